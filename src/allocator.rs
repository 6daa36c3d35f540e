use std::{collections::BTreeSet, sync::Arc, time::Duration};

use tracing::{debug, warn};

use crate::{
    cidr::AddressBlock,
    error::FormationError,
    stack::{StackDescriptor, StackService, with_deadline},
};

/// Prefix length of every block handed out to an app stack.
pub const CANDIDATE_PREFIX_LEN: u8 = 24;

const MIN_BASE_PREFIX_LEN: u8 = 16;
// A /22 holds four /24s, two of them usable once the ends are kept back.
const MAX_BASE_PREFIX_LEN: u8 = 22;

/// The `/24` blocks of `base` that may be handed out, ascending. The first and
/// the last block are kept back, so `10.0.0.0/16` yields `10.0.1.0/24` through
/// `10.0.254.0/24`.
pub fn candidates(base: &AddressBlock) -> Result<Vec<AddressBlock>, FormationError> {
    if !(MIN_BASE_PREFIX_LEN..=MAX_BASE_PREFIX_LEN).contains(&base.prefix_len()) {
        return Err(FormationError::invalid_argument(format!(
            "base network {base} must have a prefix between /{MIN_BASE_PREFIX_LEN} and /{MAX_BASE_PREFIX_LEN}"
        )));
    }
    let all: Vec<AddressBlock> = base.subnets(CANDIDATE_PREFIX_LEN)?.collect();
    Ok(all[1..all.len() - 1].to_vec())
}

/// Reserved blocks of every `type=app` stack. Tags that do not parse are
/// skipped.
pub fn used_subnets(stacks: &[StackDescriptor]) -> BTreeSet<AddressBlock> {
    let mut used = BTreeSet::new();
    for stack in stacks {
        let Some(raw) = stack.reserved_subnet() else {
            continue;
        };
        match raw.parse::<AddressBlock>() {
            Ok(block) => {
                used.insert(block);
            }
            Err(err) => warn!(
                stack = %stack.name,
                subnet = %raw,
                error = %err,
                "ignoring unparseable subnet tag"
            ),
        }
    }
    used
}

/// Lowest candidate overlapping none of `used`.
pub fn first_free(
    candidates: &[AddressBlock],
    used: &BTreeSet<AddressBlock>,
) -> Option<AddressBlock> {
    candidates
        .iter()
        .filter(|c| !used.iter().any(|u| u.overlaps(c)))
        .min()
        .copied()
}

/// Picks free address blocks for new app stacks.
///
/// Every call re-reads the fleet from the stack service. Nothing is reserved
/// locally, so two concurrent callers can be handed the same block; the stack
/// service rejects the second create and the caller starts over.
pub struct SubnetAllocator {
    service: Arc<dyn StackService>,
    base: AddressBlock,
    candidates: Vec<AddressBlock>,
    list_timeout: Duration,
}

impl SubnetAllocator {
    pub fn new(
        service: Arc<dyn StackService>,
        base: AddressBlock,
        list_timeout: Duration,
    ) -> Result<Self, FormationError> {
        let candidates = candidates(&base)?;
        Ok(Self {
            service,
            base,
            candidates,
            list_timeout,
        })
    }

    pub fn base(&self) -> AddressBlock {
        self.base
    }

    pub async fn used(&self) -> Result<BTreeSet<AddressBlock>, FormationError> {
        let stacks = with_deadline(self.list_timeout, self.service.list_stacks())
            .await
            .map_err(|e| FormationError::from_remote("list_stacks", e))?;
        Ok(used_subnets(&stacks))
    }

    pub async fn next_available(&self) -> Result<AddressBlock, FormationError> {
        let used = self.used().await?;
        match first_free(&self.candidates, &used) {
            Some(block) => {
                debug!(subnet = %block, used = used.len(), "selected free subnet");
                Ok(block)
            }
            None => {
                warn!(base = %self.base, used = used.len(), "subnet space exhausted");
                Err(FormationError::Exhausted {
                    base: self.base.to_string(),
                })
            }
        }
    }
}
