//! Core library for the QNAP iSCSI volume plugin.
//!
//! The controller side turns volume requests into iSCSI targets and LUNs on
//! a QNAP appliance, rolling back partial work when a step fails. The node
//! side logs in to those targets, mounts the resulting block devices, and
//! records each attachment on disk so it can be torn down after a restart.

pub mod attach;
pub mod capability;
pub mod capacity;
pub mod command;
pub mod config;
pub mod context;
pub mod cursor;
pub mod driver;
pub mod logging;
pub mod naming;
pub mod nas;
pub mod provision;
pub mod test_support;

pub use attach::{
    AttachError, AttachOutcome, AttachRequest, AttachmentManager, DescriptorStore, DetachError,
    DetachOutcome, IscsiadmSessions, SystemMounter,
};
pub use capability::{AccessMode, AccessType, VolumeCapability};
pub use capacity::{CapacityPolicy, CapacityRange};
pub use command::{CommandRunner, ProcessCommandRunner};
pub use config::{ConfigError, DriverConfig};
pub use driver::{Code, Driver, DriverError, PluginInfo};
pub use nas::{NasApi, NasError, QnapClient};
pub use provision::{CreateFailure, CreateRequest, ProvisionError, Provisioner, ProvisionerSettings};
