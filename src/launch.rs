use std::{sync::Arc, time::Duration};

use anyhow::Context;
use rand::{RngCore, SeedableRng, rngs::StdRng};
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    allocator::SubnetAllocator,
    cidr::{AddressBlock, MAX_DIVISIONS, divide},
    config::Config,
    error::FormationError,
    provisioner::{ProvisionSpec, StackProvisioner, app_tags},
    stack::{StackHandle, StackService, http::HttpStackService},
    template::{TemplateRenderer, TemplateSet},
};

/// Render-context key holding the allocated block.
pub const CONTEXT_SUBNET: &str = "subnet";
/// Render-context key holding the allocated block's sub-blocks.
pub const CONTEXT_SUBNETS: &str = "subnets";

/// Pause between launch attempts: `base` doubled per retry, plus up to
/// `1/jitter_max_divisor` of that at random, never more than `cap` in total.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base: Duration,
    pub cap: Duration,
    pub jitter_max_divisor: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(200),
            cap: Duration::from_secs(5),
            jitter_max_divisor: 4,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `retry`, counting from 0.
    fn delay(&self, retry: u32, rng: &mut impl RngCore) -> Duration {
        let grown = self
            .base
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.cap);
        let jitter_max_ms = match self.jitter_max_divisor {
            0 => 0,
            divisor => (grown / divisor).as_millis() as u64,
        };
        let jitter = Duration::from_millis(rng.next_u64() % (jitter_max_ms + 1));
        grown.saturating_add(jitter).min(self.cap)
    }
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Total allocate-then-provision rounds, including the first.
    pub max_attempts: u32,
    /// How many sub-blocks of the allocated block to expose to the template.
    pub subnet_divisions: usize,
    pub backoff: BackoffConfig,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            subnet_divisions: 3,
            backoff: BackoffConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launched {
    pub handle: StackHandle,
    pub subnet: AddressBlock,
    pub attempts: u32,
}

/// Allocates a subnet and provisions an app stack holding it.
///
/// The allocation read is not authoritative: when the stack service refuses
/// the create (typically because a concurrent launch claimed the same block
/// first) or a remote call fails, the whole sequence is run again from a fresh
/// listing, up to `max_attempts` rounds.
pub struct Launcher {
    allocator: SubnetAllocator,
    provisioner: StackProvisioner,
    options: LaunchOptions,
}

impl Launcher {
    pub fn new(
        allocator: SubnetAllocator,
        provisioner: StackProvisioner,
        options: LaunchOptions,
    ) -> Result<Self, FormationError> {
        if options.max_attempts == 0 {
            return Err(FormationError::invalid_argument(
                "max_attempts must be at least 1",
            ));
        }
        if options.subnet_divisions > MAX_DIVISIONS {
            return Err(FormationError::invalid_argument(format!(
                "subnet_divisions must be at most {MAX_DIVISIONS}"
            )));
        }
        Ok(Self {
            allocator,
            provisioner,
            options,
        })
    }

    /// Wires an HTTP stack service and the on-disk templates from `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let request_timeout = config.list_timeout().max(config.create_timeout());
        let service: Arc<dyn StackService> = Arc::new(
            HttpStackService::try_new(&config.stack_api_url, request_timeout)
                .context("build stack service client")?,
        );
        let templates: Arc<dyn TemplateRenderer> = Arc::new(
            TemplateSet::load_dir(&config.template_dir).with_context(|| {
                format!("load templates from {}", config.template_dir.display())
            })?,
        );

        let allocator =
            SubnetAllocator::new(service.clone(), config.base_network, config.list_timeout())
                .context("build subnet allocator")?;
        let provisioner = StackProvisioner::new(service, templates, config.create_timeout());
        let options = LaunchOptions {
            max_attempts: config.launch_max_attempts,
            subnet_divisions: usize::from(config.subnet_divisions),
            backoff: BackoffConfig::default(),
        };
        Ok(Self::new(allocator, provisioner, options)?)
    }

    pub async fn launch(&self, spec: &ProvisionSpec) -> Result<Launched, FormationError> {
        self.launch_with_rng(spec, StdRng::from_entropy()).await
    }

    async fn launch_with_rng<R: RngCore>(
        &self,
        spec: &ProvisionSpec,
        mut rng: R,
    ) -> Result<Launched, FormationError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.attempt(spec).await {
                Ok((handle, subnet)) => {
                    info!(
                        stack = %spec.name,
                        subnet = %subnet,
                        attempt,
                        "app stack launched"
                    );
                    return Ok(Launched {
                        handle,
                        subnet,
                        attempts: attempt,
                    });
                }
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= self.options.max_attempts {
                warn!(
                    stack = %spec.name,
                    attempt,
                    code = err.code(),
                    error = %err,
                    "launch failed"
                );
                return Err(err);
            }

            let delay = self.options.backoff.delay(attempt - 1, &mut rng);
            warn!(
                stack = %spec.name,
                attempt,
                max_attempts = self.options.max_attempts,
                code = err.code(),
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "launch attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(
        &self,
        spec: &ProvisionSpec,
    ) -> Result<(StackHandle, AddressBlock), FormationError> {
        let subnet = self.allocator.next_available().await?;
        let spec = self.spec_for_subnet(spec, &subnet)?;
        let handle = self.provisioner.provision(&spec).await?;
        Ok((handle, subnet))
    }

    fn spec_for_subnet(
        &self,
        spec: &ProvisionSpec,
        subnet: &AddressBlock,
    ) -> Result<ProvisionSpec, FormationError> {
        let subnets = divide(subnet, self.options.subnet_divisions)?;
        let mut spec = spec.clone();
        spec.tags.extend(app_tags(subnet));
        spec.context
            .insert(CONTEXT_SUBNET.to_string(), Value::String(subnet.to_string()));
        spec.context.insert(
            CONTEXT_SUBNETS.to_string(),
            Value::Array(
                subnets
                    .iter()
                    .map(|s| Value::String(s.to_string()))
                    .collect(),
            ),
        );
        Ok(spec)
    }
}
