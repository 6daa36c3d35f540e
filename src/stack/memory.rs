use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::debug;

use super::{
    BoxFuture, ProvisioningRequest, RemoteError, StackDescriptor, StackHandle,
    StackService, TAG_SUBNET, TAG_TYPE, TAG_TYPE_APP,
};
use crate::cidr::AddressBlock;

/// In-process [`StackService`] holding stacks in memory.
///
/// Like the real service it is the serialization point for concurrent
/// provisioning: a create or update whose reserved subnet overlaps another app
/// stack's is refused with [`RemoteError::Conflict`].
#[derive(Debug, Default)]
pub struct InMemoryStackService {
    stacks: Mutex<Vec<StackDescriptor>>,
    next_id: AtomicU64,
}

impl InMemoryStackService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stacks(stacks: Vec<StackDescriptor>) -> Self {
        Self {
            stacks: Mutex::new(stacks),
            next_id: AtomicU64::new(0),
        }
    }

    pub async fn insert(&self, stack: StackDescriptor) {
        self.stacks.lock().await.push(stack);
    }

    pub async fn stacks(&self) -> Vec<StackDescriptor> {
        self.stacks.lock().await.clone()
    }

    pub async fn get(&self, name: &str) -> Option<StackDescriptor> {
        self.stacks
            .lock()
            .await
            .iter()
            .find(|s| s.name == name)
            .cloned()
    }

    /// Moves a stack to a new raw lifecycle code, as the service would while
    /// executing it.
    pub async fn set_status(&self, name: &str, status: &str) -> bool {
        let mut stacks = self.stacks.lock().await;
        match stacks.iter_mut().find(|s| s.name == name) {
            Some(stack) => {
                stack.status = status.to_string();
                true
            }
            None => false,
        }
    }

    fn handle(&self) -> StackHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        StackHandle {
            stack_id: format!("stack-{id}"),
        }
    }
}

fn requested_subnet(req: &ProvisioningRequest) -> Result<Option<AddressBlock>, RemoteError> {
    if req.tags.get(TAG_TYPE).map(String::as_str) != Some(TAG_TYPE_APP) {
        return Ok(None);
    }
    let Some(raw) = req.tags.get(TAG_SUBNET) else {
        return Ok(None);
    };
    raw.parse::<AddressBlock>().map(Some).map_err(|e| RemoteError::Rejected {
        status: 400,
        message: format!("invalid {TAG_SUBNET} tag: {e}"),
    })
}

fn check_subnet_free(
    stacks: &[StackDescriptor],
    name: &str,
    subnet: Option<AddressBlock>,
) -> Result<(), RemoteError> {
    let Some(subnet) = subnet else {
        return Ok(());
    };
    for other in stacks.iter().filter(|s| s.name != name) {
        let Some(reserved) = other
            .reserved_subnet()
            .and_then(|raw| raw.parse::<AddressBlock>().ok())
        else {
            continue;
        };
        if reserved.overlaps(&subnet) {
            return Err(RemoteError::Conflict {
                message: format!(
                    "{TAG_SUBNET} {subnet} overlaps {reserved} reserved by stack {}",
                    other.name
                ),
            });
        }
    }
    Ok(())
}

impl StackService for InMemoryStackService {
    fn list_stacks(&self) -> BoxFuture<'_, Result<Vec<StackDescriptor>, RemoteError>> {
        Box::pin(async move { Ok(self.stacks.lock().await.clone()) })
    }

    fn create_stack(
        &self,
        req: ProvisioningRequest,
    ) -> BoxFuture<'_, Result<StackHandle, RemoteError>> {
        Box::pin(async move {
            let subnet = requested_subnet(&req)?;
            let mut stacks = self.stacks.lock().await;
            if stacks.iter().any(|s| s.name == req.name) {
                return Err(RemoteError::Conflict {
                    message: format!("stack {} already exists", req.name),
                });
            }
            check_subnet_free(&stacks, &req.name, subnet)?;

            debug!(stack = %req.name, "in-memory stack created");
            stacks.push(StackDescriptor {
                name: req.name.clone(),
                status: "CREATE_IN_PROGRESS".to_string(),
                parameters: req.parameter_list(),
                tags: req.tag_list(),
                outputs: Vec::new(),
            });
            Ok(self.handle())
        })
    }

    fn update_stack(
        &self,
        req: ProvisioningRequest,
    ) -> BoxFuture<'_, Result<StackHandle, RemoteError>> {
        Box::pin(async move {
            let subnet = requested_subnet(&req)?;
            let mut stacks = self.stacks.lock().await;
            check_subnet_free(&stacks, &req.name, subnet)?;
            let Some(stack) = stacks.iter_mut().find(|s| s.name == req.name) else {
                return Err(RemoteError::Rejected {
                    status: 404,
                    message: format!("stack {} does not exist", req.name),
                });
            };

            stack.status = "UPDATE_IN_PROGRESS".to_string();
            stack.parameters = req.parameter_list();
            stack.tags = req.tag_list();
            Ok(self.handle())
        })
    }
}
