//! Filesystem formatting and mounting on the host.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use tracing::{debug, info};

use crate::command::{CommandError, CommandRunner};

const PROC_MOUNTS: &str = "/proc/mounts";

/// Filesystem created when the capability names none.
pub const DEFAULT_FS_TYPE: &str = "ext4";

/// Failures of the mount utility.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum MountError {
    /// The mount table could not be read.
    #[error("failed to read mount table {path}: {message}")]
    MountTable {
        /// Table path.
        path: Utf8PathBuf,
        /// Operating system error text.
        message: String,
    },
    /// The requested filesystem cannot be created.
    #[error("unsupported filesystem type '{fs_type}'")]
    UnsupportedFs {
        /// Requested type.
        fs_type: String,
    },
    /// A host command failed.
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Device mounted at a path and how many mount entries share it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MountRef {
    /// Mounted device.
    pub device: Utf8PathBuf,
    /// Mount entries for `device`, the queried one included.
    pub ref_count: usize,
}

/// Host mount primitives.
pub trait MountUtility: Send + Sync {
    /// Returns `true` when `path` is a mount point.
    ///
    /// # Errors
    ///
    /// Returns [`MountError`] when the mount table cannot be read.
    fn is_mount_point(&self, path: &Utf8Path) -> Result<bool, MountError>;

    /// Creates a filesystem on `device` if it has none, then mounts it.
    ///
    /// # Errors
    ///
    /// Returns [`MountError`] when probing, formatting, or mounting fails.
    fn format_and_mount(
        &self,
        device: &Utf8Path,
        target: &Utf8Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), MountError>;

    /// Unmounts `target`.
    ///
    /// # Errors
    ///
    /// Returns [`MountError`] when `umount` fails.
    fn unmount(&self, target: &Utf8Path) -> Result<(), MountError>;

    /// Resolves the device mounted at `target`; `None` when nothing is.
    ///
    /// # Errors
    ///
    /// Returns [`MountError`] when the mount table cannot be read.
    fn device_and_ref_count(&self, target: &Utf8Path) -> Result<Option<MountRef>, MountError>;

    /// Number of mount entries backed by `device`.
    ///
    /// # Errors
    ///
    /// Returns [`MountError`] when the mount table cannot be read.
    fn device_ref_count(&self, device: &Utf8Path) -> Result<usize, MountError>;
}

/// One line of the mount table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MountEntry {
    /// Mounted device or pseudo source.
    pub device: String,
    /// Mount point.
    pub target: String,
    /// Filesystem type.
    pub fs_type: String,
}

/// Parses `/proc/mounts` content. Malformed lines are skipped.
#[must_use]
pub fn parse_mount_table(contents: &str) -> Vec<MountEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let target = fields.next()?;
            let fs_type = fields.next()?;
            Some(MountEntry {
                device: unescape(device),
                target: unescape(target),
                fs_type: fs_type.to_owned(),
            })
        })
        .collect()
}

/// Decodes the `\ooo` octal escapes the kernel uses for spaces and tabs.
fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let digits: String = chars.clone().take(3).collect();
        let decoded = (digits.len() == 3)
            .then(|| u8::from_str_radix(&digits, 8).ok())
            .flatten();
        if let Some(byte) = decoded {
            out.push(char::from(byte));
            chars.nth(2);
        } else {
            out.push(ch);
        }
    }
    out
}

/// [`MountUtility`] backed by `/proc/mounts`, `blkid`, `mkfs`, and `mount`.
#[derive(Clone, Debug)]
pub struct SystemMounter<R> {
    runner: R,
    mount_table: Utf8PathBuf,
}

impl<R: CommandRunner> SystemMounter<R> {
    /// Mounter reading the kernel mount table.
    #[must_use]
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            mount_table: Utf8PathBuf::from(PROC_MOUNTS),
        }
    }

    /// Reads mounts from `path` instead of `/proc/mounts`.
    #[must_use]
    pub fn with_mount_table(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.mount_table = path.into();
        self
    }

    fn entries(&self) -> Result<Vec<MountEntry>, MountError> {
        let table_error = |err: io::Error| MountError::MountTable {
            path: self.mount_table.clone(),
            message: err.to_string(),
        };
        let parent = self.mount_table.parent().unwrap_or_else(|| Utf8Path::new("/"));
        let name = self
            .mount_table
            .file_name()
            .ok_or_else(|| table_error(io::Error::from(io::ErrorKind::InvalidInput)))?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(table_error)?;
        let contents = dir.read_to_string(name).map_err(table_error)?;
        Ok(parse_mount_table(&contents))
    }

    fn existing_fs(&self, device: &Utf8Path) -> Result<Option<String>, MountError> {
        let output = self
            .runner
            .run("blkid", &["-p", "-s", "TYPE", "-o", "value", device.as_str()])?;
        // blkid exits 2 when the device carries no recognisable signature.
        if output.code == Some(2) {
            return Ok(None);
        }
        if !output.is_success() {
            return Err(CommandError::Failed {
                program: String::from("blkid"),
                code: output.code,
                stderr: output.stderr.trim().to_owned(),
            }
            .into());
        }
        let fs_type = output.stdout.trim();
        Ok((!fs_type.is_empty()).then(|| fs_type.to_owned()))
    }

    fn format(&self, device: &Utf8Path, fs_type: &str) -> Result<String, MountError> {
        let force = match fs_type {
            "ext2" | "ext3" | "ext4" => "-F",
            "xfs" | "btrfs" => "-f",
            other => {
                return Err(MountError::UnsupportedFs {
                    fs_type: other.to_owned(),
                });
            }
        };
        info!(device = %device, fs_type, "formatting blank device");
        self.runner
            .run_checked(&format!("mkfs.{fs_type}"), &[force, device.as_str()])?;
        Ok(fs_type.to_owned())
    }
}

impl<R: CommandRunner> MountUtility for SystemMounter<R> {
    fn is_mount_point(&self, path: &Utf8Path) -> Result<bool, MountError> {
        Ok(self
            .entries()?
            .iter()
            .any(|entry| Utf8Path::new(&entry.target) == path))
    }

    fn format_and_mount(
        &self,
        device: &Utf8Path,
        target: &Utf8Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), MountError> {
        let wanted = if fs_type.is_empty() {
            DEFAULT_FS_TYPE
        } else {
            fs_type
        };

        let mounted_type = match self.existing_fs(device)? {
            Some(existing) => {
                debug!(device = %device, fs_type = %existing, "device already formatted");
                existing
            }
            None => self.format(device, wanted)?,
        };

        let joined = options.join(",");
        let mut args = vec!["-t", mounted_type.as_str()];
        if !joined.is_empty() {
            args.extend(["-o", joined.as_str()]);
        }
        args.extend([device.as_str(), target.as_str()]);
        self.runner.run_checked("mount", &args)?;
        info!(device = %device, target = %target, options = %joined, "mounted volume");
        Ok(())
    }

    fn unmount(&self, target: &Utf8Path) -> Result<(), MountError> {
        self.runner.run_checked("umount", &[target.as_str()])?;
        info!(target = %target, "unmounted volume");
        Ok(())
    }

    fn device_and_ref_count(&self, target: &Utf8Path) -> Result<Option<MountRef>, MountError> {
        let entries = self.entries()?;
        let Some(mounted) = entries
            .iter()
            .rev()
            .find(|entry| Utf8Path::new(&entry.target) == target)
        else {
            return Ok(None);
        };
        let ref_count = entries
            .iter()
            .filter(|entry| entry.device == mounted.device)
            .count();
        Ok(Some(MountRef {
            device: Utf8PathBuf::from(&mounted.device),
            ref_count,
        }))
    }

    fn device_ref_count(&self, device: &Utf8Path) -> Result<usize, MountError> {
        Ok(self
            .entries()?
            .iter()
            .filter(|entry| Utf8Path::new(&entry.device) == device)
            .count())
    }
}
