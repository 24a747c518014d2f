//! Error types for the provisioning workflow.

use std::time::Duration;

use thiserror::Error;

use crate::capability::CapabilityError;
use crate::capacity::CapacityError;
use crate::nas::{LunIndex, LunStatus, NasError, TargetIndex};

/// Errors raised by [`super::Provisioner`] operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// A request field is missing or malformed.
    #[error("invalid request: {0}")]
    InvalidArgument(String),
    /// The requested capabilities cannot be honoured.
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    /// The requested size is outside the allocation policy.
    #[error("invalid capacity range: {0}")]
    Capacity(#[from] CapacityError),
    /// A target with the normalized name already exists.
    #[error("volume {volume_id} already exists")]
    AlreadyExists {
        /// Normalized volume name.
        volume_id: String,
    },
    /// The addressed volume does not exist.
    #[error("volume {volume_id} not found")]
    NotFound {
        /// Volume identifier.
        volume_id: String,
    },
    /// An appliance call failed.
    #[error("{step} failed: {source}")]
    Appliance {
        /// Workflow step that issued the call.
        step: &'static str,
        /// Underlying client error.
        source: NasError,
    },
    /// The LUN left the creating state without becoming ready.
    #[error("LUN {lun_index} settled in state {status:?}")]
    LunNotReady {
        /// LUN being waited on.
        lun_index: LunIndex,
        /// Status reported by the appliance.
        status: LunStatus,
    },
    /// The LUN stayed in the creating state past the readiness bound.
    #[error("LUN {lun_index} not ready after {waited:?}")]
    ReadyTimeout {
        /// LUN being waited on.
        lun_index: LunIndex,
        /// Time spent polling.
        waited: Duration,
    },
    /// The caller cancelled the request.
    #[error("creation of volume {volume_id} cancelled")]
    Cancelled {
        /// Normalized volume name.
        volume_id: String,
    },
    /// The new target is missing from the listing, so its IQN is unknown.
    #[error("target for volume {volume_id} has no IQN in the appliance listing")]
    MissingIqn {
        /// Normalized volume name.
        volume_id: String,
    },
}

impl ProvisionError {
    pub(super) fn appliance(step: &'static str) -> impl FnOnce(NasError) -> Self {
        move |source| Self::Appliance { step, source }
    }

    /// Returns `true` when an appliance call was rejected for authentication.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::Appliance {
                source: NasError::Auth { .. },
                ..
            }
        )
    }
}

/// Appliance resource a rollback tried to remove.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RollbackResource {
    /// A target created earlier in the same request.
    Target(TargetIndex),
    /// A LUN created earlier in the same request.
    Lun(LunIndex),
}

/// A compensating delete that failed, leaving an orphaned resource.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RollbackFailure {
    /// Resource left behind on the appliance.
    pub resource: RollbackResource,
    /// Why the delete failed.
    pub error: NasError,
}

/// Outcome of a failed create.
///
/// `error` is always the failure that aborted the workflow. Rollback
/// failures never replace it; they are listed so callers can detect
/// orphaned appliance resources.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{error}")]
pub struct CreateFailure {
    /// The failure that aborted the workflow.
    pub error: ProvisionError,
    /// Compensating deletes that did not succeed.
    pub rollback_failures: Vec<RollbackFailure>,
}

impl CreateFailure {
    /// Returns `true` when nothing was left behind on the appliance.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.rollback_failures.is_empty()
    }
}

impl From<ProvisionError> for CreateFailure {
    fn from(error: ProvisionError) -> Self {
        Self {
            error,
            rollback_failures: Vec::new(),
        }
    }
}

impl From<CapabilityError> for CreateFailure {
    fn from(error: CapabilityError) -> Self {
        ProvisionError::from(error).into()
    }
}

impl From<CapacityError> for CreateFailure {
    fn from(error: CapacityError) -> Self {
        ProvisionError::from(error).into()
    }
}
