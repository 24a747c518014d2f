//! Error taxonomy returned to plugin callers.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::error;

use crate::attach::{AttachError, DetachError};
use crate::provision::{CreateFailure, ProvisionError};

/// Coarse status code of a failed call.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Code {
    /// Malformed or missing request field, or unsupported capability.
    InvalidArgument,
    /// Capacity outside the supported bounds.
    InvalidRange,
    /// A volume with the same normalized name exists.
    AlreadyExists,
    /// The addressed volume does not exist.
    NotFound,
    /// Appliance or host failure; details are only logged.
    Internal,
    /// The operation is not offered by this plugin.
    Unimplemented,
    /// The caller cancelled the request.
    Cancelled,
}

impl Code {
    /// Wire name of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::InvalidRange => "OUT_OF_RANGE",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::NotFound => "NOT_FOUND",
            Self::Internal => "INTERNAL",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed plugin call.
#[derive(Clone, Debug, Error, Eq, PartialEq, Serialize)]
#[error("{code}: {message}")]
pub struct DriverError {
    /// Status code.
    pub code: Code,
    /// Caller-facing description.
    pub message: String,
}

impl DriverError {
    /// Error with an explicit code.
    #[must_use]
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Error for an operation this plugin does not offer.
    #[must_use]
    pub fn unimplemented(operation: &str) -> Self {
        Self::new(Code::Unimplemented, format!("{operation} is not supported"))
    }

    /// Logs `source` and returns an internal error carrying only `summary`.
    fn internal(summary: String, source: &dyn fmt::Display) -> Self {
        error!(error = %source, "{summary}");
        Self::new(Code::Internal, summary)
    }
}

impl From<JoinError> for DriverError {
    fn from(err: JoinError) -> Self {
        Self::internal(String::from("node operation did not complete"), &err)
    }
}

impl From<ProvisionError> for DriverError {
    fn from(err: ProvisionError) -> Self {
        match err {
            ProvisionError::InvalidArgument(_) | ProvisionError::Capability(_) => {
                Self::new(Code::InvalidArgument, err.to_string())
            }
            ProvisionError::Capacity(_) => Self::new(Code::InvalidRange, err.to_string()),
            ProvisionError::AlreadyExists { .. } => Self::new(Code::AlreadyExists, err.to_string()),
            ProvisionError::NotFound { .. } => Self::new(Code::NotFound, err.to_string()),
            ProvisionError::Cancelled { .. } => Self::new(Code::Cancelled, err.to_string()),
            ProvisionError::Appliance { step, .. } => {
                Self::internal(format!("appliance call {step} failed"), &err)
            }
            ProvisionError::LunNotReady { .. } | ProvisionError::ReadyTimeout { .. } => {
                Self::internal(String::from("volume storage did not become ready"), &err)
            }
            ProvisionError::MissingIqn { .. } => Self::internal(err.to_string(), &err),
        }
    }
}

impl From<CreateFailure> for DriverError {
    fn from(failure: CreateFailure) -> Self {
        if !failure.is_clean() {
            error!(
                orphaned = failure.rollback_failures.len(),
                "create left resources on the appliance"
            );
        }
        failure.error.into()
    }
}

impl From<AttachError> for DriverError {
    fn from(err: AttachError) -> Self {
        match err {
            AttachError::InvalidArgument(_) | AttachError::InvalidContext { .. } => {
                Self::new(Code::InvalidArgument, err.to_string())
            }
            AttachError::Session(_) => Self::internal(String::from("iSCSI login failed"), &err),
            AttachError::Mount(_) => Self::internal(String::from("mounting the volume failed"), &err),
            AttachError::Descriptor(_) => {
                Self::internal(String::from("recording the attachment failed"), &err)
            }
            AttachError::Filesystem { .. } => {
                Self::internal(String::from("preparing the target path failed"), &err)
            }
        }
    }
}

impl From<DetachError> for DriverError {
    fn from(err: DetachError) -> Self {
        match err {
            DetachError::InvalidArgument(_) => Self::new(Code::InvalidArgument, err.to_string()),
            DetachError::Session(_) => Self::internal(String::from("iSCSI logout failed"), &err),
            DetachError::Mount(_) => {
                Self::internal(String::from("unmounting the volume failed"), &err)
            }
            DetachError::Descriptor(_) => {
                Self::internal(String::from("reading the attachment record failed"), &err)
            }
            DetachError::Filesystem { .. } => {
                Self::internal(String::from("removing the target path failed"), &err)
            }
        }
    }
}
