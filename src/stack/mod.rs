use std::{collections::BTreeMap, future::Future, pin::Pin, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::FormationError,
    status::{ApplicationStatus, StatusNormalizer},
};

pub mod http;
pub mod memory;

/// Tag key marking the kind of stack.
pub const TAG_TYPE: &str = "type";
/// `type` tag value of stacks that own a network allocation.
pub const TAG_TYPE_APP: &str = "app";
/// Tag key holding the reserved address block, in canonical `a.b.c.0/24` form.
pub const TAG_SUBNET: &str = "subnet";

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The remote infrastructure-as-code service. It is the single source of truth
/// for which stacks exist and the only serialization point between concurrent
/// provisioning callers.
pub trait StackService: Send + Sync + 'static {
    fn list_stacks(&self) -> BoxFuture<'_, Result<Vec<StackDescriptor>, RemoteError>>;

    fn create_stack(
        &self,
        req: ProvisioningRequest,
    ) -> BoxFuture<'_, Result<StackHandle, RemoteError>>;

    fn update_stack(
        &self,
        req: ProvisioningRequest,
    ) -> BoxFuture<'_, Result<StackHandle, RemoteError>>;
}

/// Bounds a remote call; expiry becomes [`RemoteError::Timeout`].
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    tokio::time::timeout(deadline, call)
        .await
        .unwrap_or(Err(RemoteError::Timeout))
}

/// Lists the fleet and projects every stack through `normalizer`.
pub async fn list_views(
    service: &dyn StackService,
    normalizer: &StatusNormalizer,
    deadline: Duration,
) -> Result<Vec<StackView>, FormationError> {
    let stacks = with_deadline(deadline, service.list_stacks())
        .await
        .map_err(|e| FormationError::from_remote("list_stacks", e))?;
    Ok(stacks.iter().map(|s| s.view(normalizer)).collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    Timeout,
    /// The service refused the request because it collides with existing
    /// state, e.g. a duplicate reserved-subnet tag.
    Conflict {
        message: String,
    },
    Rejected {
        status: u16,
        message: String,
    },
    Transport(String),
    Decode(String),
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "request timed out"),
            Self::Conflict { message } => write!(f, "conflict: {message}"),
            Self::Rejected { status, message } => write!(f, "rejected ({status}): {message}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Decode(msg) => write!(f, "invalid response: {msg}"),
        }
    }
}

impl std::error::Error for RemoteError {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Read-only snapshot of a stack as reported by the stack service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StackDescriptor {
    pub name: String,
    /// Raw lifecycle code, e.g. `CREATE_COMPLETE`. Empty for a stack the
    /// service has not started on yet.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub parameters: Vec<KeyValue>,
    #[serde(default)]
    pub tags: Vec<KeyValue>,
    #[serde(default)]
    pub outputs: Vec<KeyValue>,
}

fn flatten(pairs: &[KeyValue]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|kv| (kv.key.clone(), kv.value.clone()))
        .collect()
}

impl StackDescriptor {
    pub fn parameters(&self) -> BTreeMap<String, String> {
        flatten(&self.parameters)
    }

    pub fn tags(&self) -> BTreeMap<String, String> {
        flatten(&self.tags)
    }

    pub fn outputs(&self) -> BTreeMap<String, String> {
        flatten(&self.outputs)
    }

    fn tag(&self, key: &str) -> Option<&str> {
        // Later entries win, matching `tags()`.
        self.tags
            .iter()
            .rev()
            .find(|kv| kv.key == key)
            .map(|kv| kv.value.as_str())
    }

    pub fn is_app(&self) -> bool {
        self.tag(TAG_TYPE) == Some(TAG_TYPE_APP)
    }

    /// The reserved address block of an app stack, as tagged.
    pub fn reserved_subnet(&self) -> Option<&str> {
        if !self.is_app() {
            return None;
        }
        self.tag(TAG_SUBNET)
    }

    pub fn view(&self, normalizer: &StatusNormalizer) -> StackView {
        StackView {
            name: self.name.clone(),
            status: normalizer.normalize(&self.status),
            raw_status: self.status.clone(),
            parameters: self.parameters(),
            tags: self.tags(),
            outputs: self.outputs(),
        }
    }
}

/// Application-level projection of a [`StackDescriptor`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StackView {
    pub name: String,
    pub status: ApplicationStatus,
    pub raw_status: String,
    pub parameters: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
}

/// A fully assembled create/update request. Built fresh for every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningRequest {
    pub name: String,
    pub template_body: String,
    pub parameters: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

impl ProvisioningRequest {
    pub fn parameter_list(&self) -> Vec<KeyValue> {
        self.parameters
            .iter()
            .map(|(k, v)| KeyValue::new(k.as_str(), v.as_str()))
            .collect()
    }

    pub fn tag_list(&self) -> Vec<KeyValue> {
        self.tags
            .iter()
            .map(|(k, v)| KeyValue::new(k.as_str(), v.as_str()))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackHandle {
    pub stack_id: String,
}
