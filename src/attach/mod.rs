//! Node-side attachment lifecycle.
//!
//! Attach logs in to the volume's target, records how to reach it in a
//! descriptor, and mounts the device at the requested path. Detach reverses
//! that once the last mount of the device is gone. Whether a volume is
//! attached is read from the host every time: the mount table and the
//! descriptor directory are consulted independently, so an attach or detach
//! interrupted by a crash can be completed by simply repeating the call.

mod connection;
mod descriptor;
mod error;
mod iscsi;
mod mount;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::capability::{AccessType, VolumeCapability};

pub use connection::{ConnectionParams, DEFAULT_INTERFACE, DEFAULT_ISCSI_PORT, with_default_port};
pub use descriptor::{AttachmentDescriptor, DescriptorError, DescriptorStore};
pub use error::{AttachError, DetachError};
pub use iscsi::{IscsiError, IscsiSessions, IscsiadmSessions};
pub use mount::{
    DEFAULT_FS_TYPE, MountEntry, MountError, MountRef, MountUtility, SystemMounter,
    parse_mount_table,
};

#[cfg(unix)]
const TARGET_DIR_MODE: u32 = 0o750;

/// Parameters of a publish call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttachRequest {
    /// Volume to attach.
    pub volume_id: String,
    /// Directory the filesystem is mounted at.
    pub target_path: Utf8PathBuf,
    /// Requested capability.
    pub capability: Option<VolumeCapability>,
    /// Mount read-only regardless of the access mode.
    pub read_only: bool,
    /// Context returned when the volume was created.
    pub volume_context: BTreeMap<String, String>,
}

/// Result of a successful attach.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AttachOutcome {
    /// The device was mounted at the target path.
    Mounted {
        /// Block device backing the mount.
        device: Utf8PathBuf,
    },
    /// The target path was already a mount point; nothing changed.
    AlreadyMounted {
        /// Block device the session resolved to.
        device: Utf8PathBuf,
    },
}

impl AttachOutcome {
    /// Block device backing the volume.
    #[must_use]
    pub fn device(&self) -> &Utf8Path {
        match self {
            Self::Mounted { device } | Self::AlreadyMounted { device } => device,
        }
    }
}

/// Result of a successful detach.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DetachOutcome {
    /// Nothing was attached at the path.
    AlreadyDetached,
    /// The path was unmounted but other mounts still use the session.
    SessionRetained {
        /// Mounts of the device left.
        remaining: usize,
    },
    /// The session was closed and the attachment forgotten.
    Detached,
}

/// Drives attach and detach on one node.
#[derive(Debug)]
pub struct AttachmentManager<S, M> {
    sessions: S,
    mounter: M,
    store: DescriptorStore,
}

impl<S: IscsiSessions, M: MountUtility> AttachmentManager<S, M> {
    /// Creates a manager over the given host primitives.
    #[must_use]
    pub const fn new(sessions: S, mounter: M, store: DescriptorStore) -> Self {
        Self {
            sessions,
            mounter,
            store,
        }
    }

    /// Descriptor store in use.
    #[must_use]
    pub const fn store(&self) -> &DescriptorStore {
        &self.store
    }

    /// Connects and mounts a volume at `request.target_path`.
    ///
    /// Repeating the call for a path that is already mounted succeeds
    /// without mounting again.
    ///
    /// # Errors
    ///
    /// Returns [`AttachError`] when the request is malformed or a host step
    /// fails. A session opened by this call is logged out again when it
    /// fails before the attachment is recorded.
    pub fn attach(&self, request: &AttachRequest) -> Result<AttachOutcome, AttachError> {
        let (fs_type, mount_flags, read_only) = validate_attach(request)?;
        let params = ConnectionParams::from_context(&request.volume_context)?;
        let volume_id = request.volume_id.as_str();
        let target = request.target_path.as_path();

        let device = self.sessions.connect(&params)?;
        match self.mounter.is_mount_point(target) {
            Ok(true) => {
                info!(volume_id, target = %target, "target already mounted");
                return Ok(AttachOutcome::AlreadyMounted { device });
            }
            Ok(false) => {}
            Err(err) => return Err(self.abandon(volume_id, &params, err.into())),
        }

        if let Err(err) = create_target_dir(target) {
            return Err(self.abandon(volume_id, &params, err));
        }

        let descriptor = AttachmentDescriptor {
            volume_id: volume_id.to_owned(),
            connection: params,
            device: device.clone(),
        };
        if let Err(err) = self.store.save(&descriptor) {
            return Err(self.abandon(volume_id, &descriptor.connection, err.into()));
        }

        let mut options = vec![String::from(if read_only { "ro" } else { "rw" })];
        options.extend(mount_flags.iter().cloned());
        self.mounter
            .format_and_mount(&device, target, fs_type, &options)?;

        info!(volume_id, device = %device, target = %target, read_only, "volume attached");
        Ok(AttachOutcome::Mounted { device })
    }

    /// Logs out a session that no descriptor records, then hands back `err`.
    ///
    /// A descriptor left by an earlier attach of the same volume means the
    /// session is shared and detach can still find it, so it stays open.
    fn abandon(&self, volume_id: &str, connection: &ConnectionParams, err: AttachError) -> AttachError {
        match self.store.load(volume_id) {
            Ok(Some(_)) => {
                warn!(volume_id, error = %err, "attach failed, keeping session recorded by an earlier attach");
                return err;
            }
            Ok(None) => {}
            Err(load) => debug!(volume_id, error = %load, "descriptor unreadable while abandoning attach"),
        }
        warn!(volume_id, error = %err, "attach failed before it was recorded, closing session");
        if let Err(logout) = self.sessions.disconnect(&connection.iqn, &connection.portals) {
            warn!(volume_id, error = %logout, "session left open after failed attach");
        }
        err
    }

    /// Unmounts `target_path` and, once no other mount uses the device,
    /// logs out and forgets the attachment.
    ///
    /// # Errors
    ///
    /// Returns [`DetachError`] when the request is malformed or a host step
    /// fails.
    pub fn detach(&self, volume_id: &str, target_path: &Utf8Path) -> Result<DetachOutcome, DetachError> {
        if volume_id.is_empty() {
            return Err(DetachError::InvalidArgument(String::from(
                "volume id must be provided",
            )));
        }
        if target_path.as_str().is_empty() {
            return Err(DetachError::InvalidArgument(String::from(
                "target path must be provided",
            )));
        }

        if !path_exists(target_path).map_err(|err| filesystem_error(target_path, &err))? {
            info!(volume_id, target = %target_path, "target path gone, nothing to detach");
            return Ok(DetachOutcome::AlreadyDetached);
        }
        let mounted = self.mounter.device_and_ref_count(target_path)?;

        let Some(descriptor) = self.store.load(volume_id)? else {
            info!(volume_id, "no attachment descriptor, nothing to detach");
            return Ok(DetachOutcome::AlreadyDetached);
        };

        let remaining = match mounted {
            Some(mount) => {
                self.mounter.unmount(target_path)?;
                mount.ref_count.saturating_sub(1)
            }
            None => self.mounter.device_ref_count(&descriptor.device)?,
        };
        if remaining > 0 {
            remove_target_tree(target_path)?;
            info!(volume_id, remaining, "device still mounted elsewhere, keeping session");
            return Ok(DetachOutcome::SessionRetained { remaining });
        }

        let connection = &descriptor.connection;
        self.sessions
            .disconnect(&connection.iqn, &connection.portals)?;
        remove_target_tree(target_path)?;
        self.store.remove(volume_id)?;

        info!(volume_id, target = %target_path, "volume detached");
        Ok(DetachOutcome::Detached)
    }
}

fn validate_attach(request: &AttachRequest) -> Result<(&str, &[String], bool), AttachError> {
    let capability = request.capability.as_ref().ok_or_else(|| {
        AttachError::InvalidArgument(String::from("volume capability must be provided"))
    })?;
    if request.volume_id.is_empty() {
        return Err(AttachError::InvalidArgument(String::from(
            "volume id must be provided",
        )));
    }
    if request.target_path.as_str().is_empty() {
        return Err(AttachError::InvalidArgument(String::from(
            "target path must be provided",
        )));
    }
    if matches!(capability.access_type, Some(AccessType::Block)) {
        return Err(AttachError::InvalidArgument(String::from(
            "raw block publish is not supported",
        )));
    }

    let read_only = request.read_only || capability.access_mode.is_read_only();
    Ok((
        capability.fs_type().unwrap_or(DEFAULT_FS_TYPE),
        capability.mount_flags(),
        read_only,
    ))
}

fn split(path: &Utf8Path) -> io::Result<(&Utf8Path, &str)> {
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    Ok((parent, name))
}

fn path_exists(path: &Utf8Path) -> io::Result<bool> {
    let (parent, name) = split(path)?;
    match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir.try_exists(name),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

fn create_target_dir(target: &Utf8Path) -> Result<(), AttachError> {
    let prepare = || -> io::Result<()> {
        Dir::create_ambient_dir_all(target, ambient_authority())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(target, std::fs::Permissions::from_mode(TARGET_DIR_MODE))?;
        }
        Ok(())
    };
    prepare().map_err(|err| AttachError::Filesystem {
        path: target.to_path_buf(),
        message: err.to_string(),
    })
}

fn remove_target_tree(target: &Utf8Path) -> Result<(), DetachError> {
    let (parent, name) = split(target).map_err(|err| filesystem_error(target, &err))?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| filesystem_error(target, &err))?;
    match dir.remove_dir_all(name) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(filesystem_error(target, &err)),
    }
}

fn filesystem_error(path: &Utf8Path, err: &io::Error) -> DetachError {
    DetachError::Filesystem {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
