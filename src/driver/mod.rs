//! Plugin request handlers.
//!
//! [`Driver`] exposes the identity, controller and node services over the
//! provisioning and attachment components. A process runs the controller
//! role, the node role, or both; calls to a role that was not configured
//! fail with [`Code::Unimplemented`].

mod controller;
mod error;
mod node;


use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::attach::{AttachmentManager, IscsiSessions, MountUtility};
use crate::nas::NasApi;
use crate::provision::Provisioner;

pub use error::{Code, DriverError};
pub use node::NodeInfo;

/// Name and version reported by the identity service.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PluginInfo {
    /// Plugin name.
    pub name: String,
    /// Plugin version.
    pub vendor_version: String,
}

impl PluginInfo {
    /// Info for `name` at this crate's version.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

/// Services advertised by the identity service.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginCapability {
    /// The controller service is offered.
    ControllerService,
}

/// Controller operations this plugin implements.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerCapability {
    /// Create and delete volumes.
    CreateDeleteVolume,
    /// List volumes.
    ListVolumes,
    /// Report pool capacity.
    GetCapacity,
}

/// Optional node operations. None are offered: publish performs the whole
/// attach, so there is no staging step.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeCapability {
    /// Separate stage and publish steps.
    StageUnstageVolume,
    /// Volume usage statistics.
    GetVolumeStats,
    /// Online expansion.
    ExpandVolume,
}

const PLUGIN_CAPABILITIES: &[PluginCapability] = &[PluginCapability::ControllerService];

const CONTROLLER_CAPABILITIES: &[ControllerCapability] = &[
    ControllerCapability::CreateDeleteVolume,
    ControllerCapability::ListVolumes,
    ControllerCapability::GetCapacity,
];

/// Services the plugin advertises.
#[must_use]
pub const fn plugin_capabilities() -> &'static [PluginCapability] {
    PLUGIN_CAPABILITIES
}

/// Controller operations the plugin implements.
#[must_use]
pub const fn controller_capabilities() -> &'static [ControllerCapability] {
    CONTROLLER_CAPABILITIES
}

/// Optional node operations the plugin implements.
#[must_use]
pub const fn node_capabilities() -> &'static [NodeCapability] {
    &[]
}

struct NodeRole<S, M> {
    node_id: String,
    manager: Arc<AttachmentManager<S, M>>,
}

/// Plugin facade over the configured roles.
pub struct Driver<A, S, M> {
    info: PluginInfo,
    controller: Option<Provisioner<A>>,
    node: Option<NodeRole<S, M>>,
    ready: AtomicBool,
}

impl<A, S, M> Driver<A, S, M>
where
    A: NasApi,
    S: IscsiSessions,
    M: MountUtility,
{
    /// Driver with no roles configured. It reports not ready until
    /// [`Driver::set_ready`] is called.
    #[must_use]
    pub const fn new(info: PluginInfo) -> Self {
        Self {
            info,
            controller: None,
            node: None,
            ready: AtomicBool::new(false),
        }
    }

    /// Enables the controller role.
    #[must_use]
    pub fn with_controller(mut self, provisioner: Provisioner<A>) -> Self {
        self.controller = Some(provisioner);
        self
    }

    /// Enables the node role.
    #[must_use]
    pub fn with_node(mut self, node_id: impl Into<String>, manager: AttachmentManager<S, M>) -> Self {
        self.node = Some(NodeRole {
            node_id: node_id.into(),
            manager: Arc::new(manager),
        });
        self
    }

    /// Plugin name and version.
    #[must_use]
    pub const fn plugin_info(&self) -> &PluginInfo {
        &self.info
    }

    /// Whether the hosting process has finished starting.
    #[must_use]
    pub fn probe(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Marks the plugin ready or not ready.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    fn provisioner(&self) -> Result<&Provisioner<A>, DriverError> {
        self.controller
            .as_ref()
            .ok_or_else(|| DriverError::new(Code::Unimplemented, "controller service not configured"))
    }

    fn node_role(&self) -> Result<&NodeRole<S, M>, DriverError> {
        self.node
            .as_ref()
            .ok_or_else(|| DriverError::new(Code::Unimplemented, "node service not configured"))
    }
}
