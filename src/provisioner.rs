use std::{collections::BTreeMap, sync::Arc, time::Duration};

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::{
    cidr::AddressBlock,
    error::FormationError,
    stack::{
        ProvisioningRequest, StackHandle, StackService, TAG_SUBNET, TAG_TYPE, TAG_TYPE_APP,
        with_deadline,
    },
    template::TemplateRenderer,
};

/// What to provision: a stack name, the template to render for it and the
/// values handed to the stack service alongside the rendered body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvisionSpec {
    pub name: String,
    pub template: String,
    pub context: Map<String, Value>,
    pub parameters: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

impl ProvisionSpec {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            ..Default::default()
        }
    }

    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn context_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Tags that mark a stack as owning `subnet`.
pub fn app_tags(subnet: &AddressBlock) -> BTreeMap<String, String> {
    BTreeMap::from([
        (TAG_TYPE.to_string(), TAG_TYPE_APP.to_string()),
        (TAG_SUBNET.to_string(), subnet.to_string()),
    ])
}

/// Renders templates and submits the resulting requests to the stack service.
///
/// Rejections are returned as they are; retrying is the caller's decision.
pub struct StackProvisioner {
    service: Arc<dyn StackService>,
    renderer: Arc<dyn TemplateRenderer>,
    submit_timeout: Duration,
}

impl StackProvisioner {
    pub fn new(
        service: Arc<dyn StackService>,
        renderer: Arc<dyn TemplateRenderer>,
        submit_timeout: Duration,
    ) -> Self {
        Self {
            service,
            renderer,
            submit_timeout,
        }
    }

    pub fn build_request(&self, spec: &ProvisionSpec) -> Result<ProvisioningRequest, FormationError> {
        if spec.name.trim().is_empty() {
            return Err(FormationError::invalid_argument("stack name is empty"));
        }
        let context = Value::Object(spec.context.clone());
        let template_body = self.renderer.render(&spec.template, &context)?;
        Ok(ProvisioningRequest {
            name: spec.name.clone(),
            template_body,
            parameters: spec.parameters.clone(),
            tags: spec.tags.clone(),
        })
    }

    pub async fn provision(&self, spec: &ProvisionSpec) -> Result<StackHandle, FormationError> {
        let req = self.build_request(spec)?;
        let handle = with_deadline(self.submit_timeout, self.service.create_stack(req))
            .await
            .map_err(|e| {
                let err = FormationError::from_submit("create_stack", &spec.name, e);
                warn!(stack = %spec.name, error = %err, "create stack failed");
                err
            })?;
        info!(
            stack = %spec.name,
            template = %spec.template,
            stack_id = %handle.stack_id,
            "stack create submitted"
        );
        Ok(handle)
    }

    pub async fn update(&self, spec: &ProvisionSpec) -> Result<StackHandle, FormationError> {
        let req = self.build_request(spec)?;
        let handle = with_deadline(self.submit_timeout, self.service.update_stack(req))
            .await
            .map_err(|e| {
                let err = FormationError::from_submit("update_stack", &spec.name, e);
                warn!(stack = %spec.name, error = %err, "update stack failed");
                err
            })?;
        info!(
            stack = %spec.name,
            template = %spec.template,
            stack_id = %handle.stack_id,
            "stack update submitted"
        );
        Ok(handle)
    }
}
