//! Network allocation and stack provisioning for app stacks managed by a
//! remote infrastructure-as-code service.
//!
//! A [`launch::Launcher`] picks the lowest free `/24` of the base network,
//! renders the app template with it and submits a create request tagged with
//! the reservation. The stack service is the only arbiter between concurrent
//! launches; a refused create starts the sequence over from a fresh listing.

pub mod allocator;
pub mod cidr;
pub mod config;
pub mod error;
pub mod launch;
pub mod provisioner;
pub mod stack;
pub mod status;
pub mod telemetry;
pub mod template;
pub mod version;

pub use cidr::AddressBlock;
pub use error::FormationError;
pub use launch::{LaunchOptions, Launched, Launcher};
pub use provisioner::{ProvisionSpec, StackProvisioner};
pub use stack::StackService;
