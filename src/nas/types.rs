//! Value types exchanged with the appliance management API.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! index_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
        )]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Wraps a raw appliance index.
            #[must_use]
            pub const fn new(value: u32) -> Self {
                Self(value)
            }

            /// Returns the raw appliance index.
            #[must_use]
            pub const fn get(self) -> u32 {
                self.0
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

index_newtype!(
    /// Appliance-assigned index of an iSCSI target.
    TargetIndex
);
index_newtype!(
    /// Appliance-assigned index of a LUN.
    LunIndex
);

/// Authenticated appliance session. Passed explicitly into every call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Session {
    sid: String,
}

impl Session {
    /// Wraps a session id returned by the login endpoint.
    #[must_use]
    pub fn new(sid: impl Into<String>) -> Self {
        Self { sid: sid.into() }
    }

    /// Returns the session id sent as the `sid` query parameter.
    #[must_use]
    pub const fn sid(&self) -> &str {
        self.sid.as_str()
    }
}

/// Reported state of a target.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    /// Target exists but is disabled.
    Offline,
    /// Target is ready for sessions.
    Ready,
    /// At least one initiator holds a session.
    Connected,
    /// Code not documented by the appliance.
    Unknown(i32),
}

impl From<i32> for TargetStatus {
    fn from(code: i32) -> Self {
        match code {
            -1 => Self::Offline,
            0 => Self::Ready,
            1 => Self::Connected,
            other => Self::Unknown(other),
        }
    }
}

/// Reported state of a LUN.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LunStatus {
    /// Allocation still in progress.
    Creating,
    /// Allocation finished.
    Ready,
    /// Deletion in progress.
    Removing,
    /// The appliance no longer knows this LUN.
    NotFound,
    /// Code not documented by the appliance.
    Unknown(i32),
}

impl From<i32> for LunStatus {
    fn from(code: i32) -> Self {
        match code {
            0 => Self::Creating,
            1 => Self::Ready,
            -1 => Self::Removing,
            -2 => Self::NotFound,
            other => Self::Unknown(other),
        }
    }
}

/// One entry of the target listing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TargetInfo {
    /// Appliance-assigned index.
    pub index: TargetIndex,
    /// Target name, equal to the volume id for targets this driver owns.
    pub name: String,
    /// Qualified name initiators log in to.
    pub iqn: String,
    /// Current state.
    pub status: TargetStatus,
    /// LUNs mapped to this target.
    pub lun_indices: Vec<LunIndex>,
}

/// Details for a single LUN.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LunInfo {
    /// Appliance-assigned index.
    pub index: LunIndex,
    /// LUN name.
    pub name: String,
    /// Current state.
    pub status: LunStatus,
    /// Provisioned size in bytes.
    pub capacity_bytes: u64,
    /// Logical sector size.
    pub sector_size: u32,
}

/// Storage pool subscription figures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PoolCapacity {
    /// Subscribable capacity of the pool in bytes.
    pub capacity_bytes: u64,
    /// Unallocated bytes in the pool.
    pub free_bytes: u64,
}

/// Target creation options.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TargetOptions {
    /// Enable CRC data digests.
    pub data_digest: bool,
    /// Enable CRC header digests.
    pub header_digest: bool,
    /// Allow several initiators to share the target.
    pub cluster: bool,
}

impl Default for TargetOptions {
    fn default() -> Self {
        Self {
            data_digest: false,
            header_digest: false,
            cluster: true,
        }
    }
}

/// CHAP settings for an initiator binding. The default disables CHAP.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ChapOptions {
    /// Require CHAP from initiators.
    pub enabled: bool,
    /// CHAP user name.
    pub username: String,
    /// CHAP secret.
    pub password: String,
    /// Require the target to authenticate back to the initiator.
    pub mutual_enabled: bool,
    /// Mutual CHAP user name.
    pub mutual_username: String,
    /// Mutual CHAP secret.
    pub mutual_password: String,
}

/// Block LUN allocation request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LunSpec {
    /// LUN name, also used as its path on the pool.
    pub name: String,
    /// Pool to allocate from.
    pub pool_id: u32,
    /// Size in allocation units (GiB).
    pub size_units: u64,
    /// Thin provisioning.
    pub thin: bool,
    /// Logical sector size in bytes.
    pub sector_size: u32,
    /// Enable the write cache.
    pub write_cache: bool,
    /// Honour forced unit access.
    pub fua: bool,
    /// Place the LUN on SSD cache.
    pub ssd_cache: bool,
    /// Enable auto tiering.
    pub tiering: bool,
}

impl LunSpec {
    /// Thick block LUN with 512-byte sectors and every optional feature off.
    #[must_use]
    pub fn block(name: impl Into<String>, pool_id: u32, size_units: u64) -> Self {
        Self {
            name: name.into(),
            pool_id,
            size_units,
            thin: false,
            sector_size: 512,
            write_cache: false,
            fua: false,
            ssd_cache: false,
            tiering: false,
        }
    }
}
