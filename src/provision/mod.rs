//! Volume provisioning against the appliance.
//!
//! A volume is an iSCSI target named after the normalized volume name, an
//! initiator binding on that target, and one block LUN mapped into it.
//! [`Provisioner::create`] builds that graph in order and tears it down
//! again when a later step fails; the other operations read or remove it.
//!
//! A failed rollback leaves orphaned resources on the appliance. Those are
//! reported in [`CreateFailure::rollback_failures`] and logged, never
//! retried.

mod create;
mod error;
mod lease;
mod listing;
mod wait;


use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::capability::VolumeCapability;
use crate::capacity::{CapacityPolicy, CapacityRange};
use crate::nas::{
    ChapOptions, LoginPolicy, LunIndex, NasApi, Session, SessionCell, TargetIndex, TargetOptions,
};

pub use error::{CreateFailure, ProvisionError, RollbackFailure, RollbackResource};
pub use lease::{NameLease, NameLeases};
pub use listing::{CapabilityValidation, DeleteOutcome};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Tunables for a [`Provisioner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionerSettings {
    /// Storage pool LUNs are allocated from.
    pub pool_id: u32,
    /// Portal advertised to nodes in the volume context.
    pub portal: String,
    /// Capacity bounds and defaults.
    pub policy: CapacityPolicy,
    /// Delay between LUN readiness polls.
    pub poll_interval: Duration,
    /// Upper bound on LUN readiness polling. `None` waits until cancelled.
    pub ready_timeout: Option<Duration>,
    /// Options for new targets.
    pub target_options: TargetOptions,
    /// CHAP settings for new initiator bindings.
    pub chap: ChapOptions,
    /// When to authenticate against the appliance.
    pub login_policy: LoginPolicy,
}

impl ProvisionerSettings {
    /// Settings with the default allocation policy for `pool_id`.
    #[must_use]
    pub fn new(pool_id: u32, portal: impl Into<String>) -> Self {
        Self {
            pool_id,
            portal: portal.into(),
            policy: CapacityPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            ready_timeout: None,
            target_options: TargetOptions::default(),
            chap: ChapOptions::default(),
            login_policy: LoginPolicy::default(),
        }
    }

    /// Overrides the readiness polling interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Bounds readiness polling.
    #[must_use]
    pub const fn with_ready_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Overrides the login policy.
    #[must_use]
    pub const fn with_login_policy(mut self, policy: LoginPolicy) -> Self {
        self.login_policy = policy;
        self
    }
}

/// Parameters of a create call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateRequest {
    /// Requested name, normalized before use.
    pub name: String,
    /// Requested size bounds.
    pub capacity: Option<CapacityRange>,
    /// Requested capabilities.
    pub capabilities: Vec<VolumeCapability>,
}

/// A provisioned volume.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Volume {
    /// Normalized name; also the target name.
    pub volume_id: String,
    /// Allocated size in bytes.
    pub capacity_bytes: u64,
    /// Pool holding the LUN.
    pub pool_id: u32,
    /// Appliance index of the target.
    pub target_index: TargetIndex,
    /// Appliance index of the LUN.
    pub lun_index: LunIndex,
    /// Target IQN.
    pub iqn: String,
    /// LUN number within the target.
    pub lun: u32,
    /// Connection parameters handed to the attaching node.
    pub volume_context: BTreeMap<String, String>,
}

/// One volume in a listing page.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ListEntry {
    /// Volume identifier (target name).
    pub volume_id: String,
    /// Target IQN.
    pub iqn: String,
    /// Size of the first mapped LUN, when the appliance reported it.
    pub capacity_bytes: Option<u64>,
}

/// A page of a volume listing.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ListPage {
    /// Volumes on this page.
    pub entries: Vec<ListEntry>,
    /// Token for the next page; empty when the listing is complete.
    pub next_token: String,
}

/// Storage available for new volumes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct CapacityReport {
    /// Pool capacity in bytes.
    pub available_bytes: u64,
    /// Smallest volume that can be created.
    pub minimum_volume_bytes: u64,
    /// Largest volume that can be created.
    pub maximum_volume_bytes: u64,
}

/// Drives volume lifecycles against one appliance.
#[derive(Debug)]
pub struct Provisioner<A> {
    api: A,
    session: SessionCell,
    leases: NameLeases,
    settings: ProvisionerSettings,
}

impl<A: NasApi> Provisioner<A> {
    /// Creates a provisioner over `api`.
    #[must_use]
    pub fn new(api: A, settings: ProvisionerSettings) -> Self {
        Self {
            api,
            session: SessionCell::new(settings.login_policy),
            leases: NameLeases::new(),
            settings,
        }
    }

    /// Appliance client in use.
    #[must_use]
    pub const fn api(&self) -> &A {
        &self.api
    }

    /// Settings in force.
    #[must_use]
    pub const fn settings(&self) -> &ProvisionerSettings {
        &self.settings
    }

    async fn session(&self) -> Result<Session, ProvisionError> {
        self.session
            .acquire(&self.api)
            .await
            .map_err(ProvisionError::appliance("login"))
    }

    /// Drops a cached session the appliance has stopped honouring.
    async fn observe(&self, error: &ProvisionError) {
        if error.is_auth() {
            self.session.invalidate().await;
        }
    }
}
