//! Volume capabilities requested by the orchestrator.
//!
//! Only single-node-writer access is supported, exposed either as a raw
//! block device or as a mounted filesystem.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How many nodes may use the volume and whether they may write.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// One node, read-write.
    SingleNodeWriter,
    /// One node, read-only.
    SingleNodeReaderOnly,
    /// Many nodes, read-only.
    MultiNodeReaderOnly,
    /// Many nodes, one writer.
    MultiNodeSingleWriter,
    /// Many nodes, many writers.
    MultiNodeMultiWriter,
}

impl AccessMode {
    /// The only mode this driver provisions.
    pub const SUPPORTED: Self = Self::SingleNodeWriter;

    /// Returns `true` when the mode grants no write access.
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::SingleNodeReaderOnly | Self::MultiNodeReaderOnly)
    }

    /// Wire name of the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SingleNodeWriter => "SINGLE_NODE_WRITER",
            Self::SingleNodeReaderOnly => "SINGLE_NODE_READER_ONLY",
            Self::MultiNodeReaderOnly => "MULTI_NODE_READER_ONLY",
            Self::MultiNodeSingleWriter => "MULTI_NODE_SINGLE_WRITER",
            Self::MultiNodeMultiWriter => "MULTI_NODE_MULTI_WRITER",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the volume is presented to the workload.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    /// Raw block device.
    Block,
    /// Formatted and mounted filesystem.
    Mount {
        /// Filesystem to create when the device is blank. Empty selects the
        /// node default.
        #[serde(default)]
        fs_type: String,
        /// Extra options passed to `mount`.
        #[serde(default)]
        mount_flags: Vec<String>,
    },
}

/// A single requested capability.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VolumeCapability {
    /// Requested access mode.
    pub access_mode: AccessMode,
    /// Requested presentation, if any.
    #[serde(default)]
    pub access_type: Option<AccessType>,
}

impl VolumeCapability {
    /// Single-node-writer capability mounted with the node default filesystem.
    #[must_use]
    pub const fn mount_writer() -> Self {
        Self {
            access_mode: AccessMode::SingleNodeWriter,
            access_type: Some(AccessType::Mount {
                fs_type: String::new(),
                mount_flags: Vec::new(),
            }),
        }
    }

    /// Single-node-writer capability presented as a raw block device.
    #[must_use]
    pub const fn block_writer() -> Self {
        Self {
            access_mode: AccessMode::SingleNodeWriter,
            access_type: Some(AccessType::Block),
        }
    }

    /// Filesystem type requested for mount access, if any.
    #[must_use]
    pub fn fs_type(&self) -> Option<&str> {
        match &self.access_type {
            Some(AccessType::Mount { fs_type, .. }) if !fs_type.is_empty() => Some(fs_type),
            _ => None,
        }
    }

    /// Mount flags requested for mount access.
    #[must_use]
    pub fn mount_flags(&self) -> &[String] {
        match &self.access_type {
            Some(AccessType::Mount { mount_flags, .. }) => mount_flags,
            _ => &[],
        }
    }
}

/// Rejection of a capability set.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CapabilityError {
    /// No capabilities were supplied.
    #[error("volume capabilities must be provided")]
    Missing,
    /// One or more capabilities cannot be satisfied.
    #[error("volume capabilities cannot be satisfied: {}", .0.join("; "))]
    Unsupported(Vec<String>),
}

/// Checks that every capability is one this driver can honour.
///
/// # Errors
///
/// Returns [`CapabilityError::Missing`] for an empty set, or
/// [`CapabilityError::Unsupported`] listing each distinct violation in
/// sorted order.
pub fn check_capabilities(capabilities: &[VolumeCapability]) -> Result<(), CapabilityError> {
    if capabilities.is_empty() {
        return Err(CapabilityError::Missing);
    }

    let mut violations = BTreeSet::new();
    for capability in capabilities {
        if capability.access_mode != AccessMode::SUPPORTED {
            violations.insert(format!("unsupported access mode {}", capability.access_mode));
        }
        if capability.access_type.is_none() {
            violations.insert(String::from("unsupported access type"));
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(CapabilityError::Unsupported(violations.into_iter().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(vec![VolumeCapability::mount_writer()])]
    #[case(vec![VolumeCapability::block_writer()])]
    #[case(vec![VolumeCapability::block_writer(), VolumeCapability::mount_writer()])]
    fn accepts_single_writer(#[case] capabilities: Vec<VolumeCapability>) {
        assert_eq!(check_capabilities(&capabilities), Ok(()));
    }

    #[test]
    fn rejects_empty_set() {
        assert_eq!(check_capabilities(&[]), Err(CapabilityError::Missing));
    }

    #[test]
    fn collects_sorted_distinct_violations() {
        let capabilities = vec![
            VolumeCapability {
                access_mode: AccessMode::MultiNodeMultiWriter,
                access_type: None,
            },
            VolumeCapability {
                access_mode: AccessMode::MultiNodeMultiWriter,
                access_type: Some(AccessType::Block),
            },
            VolumeCapability {
                access_mode: AccessMode::SingleNodeWriter,
                access_type: None,
            },
        ];

        let err = check_capabilities(&capabilities)
            .expect_err("unsupported capabilities should be rejected");
        assert_eq!(
            err,
            CapabilityError::Unsupported(vec![
                String::from("unsupported access mode MULTI_NODE_MULTI_WRITER"),
                String::from("unsupported access type"),
            ])
        );
    }

    #[test]
    fn mount_accessors_ignore_block() {
        let capability = VolumeCapability::block_writer();
        assert!(capability.fs_type().is_none());
        assert!(capability.mount_flags().is_empty());
    }

    #[test]
    fn read_only_modes() {
        assert!(AccessMode::SingleNodeReaderOnly.is_read_only());
        assert!(!AccessMode::SingleNodeWriter.is_read_only());
    }
}
