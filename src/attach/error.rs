//! Error types for the node attachment lifecycle.

use camino::Utf8PathBuf;
use thiserror::Error;

use super::{DescriptorError, IscsiError, MountError};

/// Errors raised by [`super::AttachmentManager::attach`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum AttachError {
    /// A request field is missing or unusable.
    #[error("invalid publish request: {0}")]
    InvalidArgument(String),
    /// The volume context lacks a usable connection parameter.
    #[error("volume context key {key}: {reason}")]
    InvalidContext {
        /// Offending context key.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
    /// The iSCSI session could not be established.
    #[error("iSCSI connect failed: {0}")]
    Session(#[from] IscsiError),
    /// Formatting or mounting failed.
    #[error("mount failed: {0}")]
    Mount(#[from] MountError),
    /// The descriptor could not be written; the session was torn down.
    #[error("could not persist attachment: {0}")]
    Descriptor(#[from] DescriptorError),
    /// The target directory could not be prepared.
    #[error("failed to prepare {path}: {message}")]
    Filesystem {
        /// Directory being prepared.
        path: Utf8PathBuf,
        /// Operating system error text.
        message: String,
    },
}

/// Errors raised by [`super::AttachmentManager::detach`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum DetachError {
    /// A request field is missing.
    #[error("invalid unpublish request: {0}")]
    InvalidArgument(String),
    /// Logging out of the target failed.
    #[error("iSCSI disconnect failed: {0}")]
    Session(#[from] IscsiError),
    /// Resolving or unmounting the target failed.
    #[error("unmount failed: {0}")]
    Mount(#[from] MountError),
    /// The descriptor could not be read or removed.
    #[error("attachment descriptor: {0}")]
    Descriptor(#[from] DescriptorError),
    /// The target path could not be inspected or removed.
    #[error("failed to clean up {path}: {message}")]
    Filesystem {
        /// Path being inspected or removed.
        path: Utf8PathBuf,
        /// Operating system error text.
        message: String,
    },
}
