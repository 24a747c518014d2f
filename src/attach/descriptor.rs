//! Persisted attachment descriptors.
//!
//! One JSON file per volume under the configured directory. Its presence is
//! what marks a volume as attached on this node across restarts, so writes
//! go through a temporary file and a rename and a crash never leaves a torn
//! descriptor behind.

use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::ConnectionParams;

const EXTENSION: &str = "json";
const TEMP_SUFFIX: &str = ".tmp";

/// Errors raised while reading or writing descriptors.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum DescriptorError {
    /// The volume id cannot be used as a file name.
    #[error("volume id '{volume_id}' cannot name a descriptor")]
    InvalidKey {
        /// Rejected identifier.
        volume_id: String,
    },
    /// File system access failed.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path being accessed.
        path: Utf8PathBuf,
        /// Operating system error text.
        message: String,
    },
    /// A descriptor exists but is not valid JSON.
    #[error("corrupt descriptor {path}: {message}")]
    Corrupt {
        /// Descriptor path.
        path: Utf8PathBuf,
        /// Decoder diagnostic.
        message: String,
    },
}

/// What a later detach needs to tear a session down without the volume
/// context.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AttachmentDescriptor {
    /// Volume this session serves.
    pub volume_id: String,
    /// Connection the session was established with.
    pub connection: ConnectionParams,
    /// Block device the session exposed.
    pub device: Utf8PathBuf,
}

/// Directory of descriptors keyed by volume id.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DescriptorStore {
    root: Utf8PathBuf,
}

impl DescriptorStore {
    /// Store rooted at `root`. The directory is created on first save.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the descriptors.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Path the descriptor for `volume_id` lives at.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::InvalidKey`] for ids that would escape the
    /// directory.
    pub fn path_for(&self, volume_id: &str) -> Result<Utf8PathBuf, DescriptorError> {
        Ok(self.root.join(file_name(volume_id)?))
    }

    /// Writes `descriptor`, replacing any previous one atomically.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError`] when the key is invalid or the write
    /// fails; a failed write leaves the previous descriptor intact.
    pub fn save(&self, descriptor: &AttachmentDescriptor) -> Result<(), DescriptorError> {
        let name = file_name(&descriptor.volume_id)?;
        let temp = format!("{name}{TEMP_SUFFIX}");

        Dir::create_ambient_dir_all(&self.root, ambient_authority())
            .map_err(|err| io_error(&self.root, &err))?;
        let dir = self.open()?;

        let rendered =
            serde_json::to_vec_pretty(descriptor).map_err(|err| DescriptorError::Io {
                path: self.root.join(&name),
                message: err.to_string(),
            })?;

        let written = dir.create(&temp).and_then(|mut file| {
            file.write_all(&rendered)?;
            file.sync_all()
        });
        if let Err(err) = written {
            if let Err(cleanup) = dir.remove_file(&temp) {
                debug!(file = %temp, error = %cleanup, "could not remove partial descriptor");
            }
            return Err(io_error(&self.root.join(&temp), &err));
        }

        dir.rename(&temp, &dir, &name)
            .map_err(|err| io_error(&self.root.join(&name), &err))
    }

    /// Reads the descriptor for `volume_id`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError`] when the key is invalid, the file cannot
    /// be read, or its content is not a descriptor.
    pub fn load(&self, volume_id: &str) -> Result<Option<AttachmentDescriptor>, DescriptorError> {
        let name = file_name(volume_id)?;
        let path = self.root.join(&name);
        let dir = match Dir::open_ambient_dir(&self.root, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(&self.root, &err)),
        };

        let contents = match dir.read_to_string(&name) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(&path, &err)),
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|err| DescriptorError::Corrupt {
                path,
                message: err.to_string(),
            })
    }

    /// Deletes the descriptor for `volume_id`. A missing file is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError`] when the key is invalid or the delete
    /// fails.
    pub fn remove(&self, volume_id: &str) -> Result<(), DescriptorError> {
        let name = file_name(volume_id)?;
        let dir = match Dir::open_ambient_dir(&self.root, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(io_error(&self.root, &err)),
        };
        match dir.remove_file(&name) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(&self.root.join(&name), &err)),
        }
    }

    fn open(&self) -> Result<Dir, DescriptorError> {
        Dir::open_ambient_dir(&self.root, ambient_authority())
            .map_err(|err| io_error(&self.root, &err))
    }
}

fn io_error(path: &Utf8Path, err: &io::Error) -> DescriptorError {
    DescriptorError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn file_name(volume_id: &str) -> Result<String, DescriptorError> {
    let usable = !volume_id.is_empty()
        && !volume_id.starts_with('.')
        && volume_id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if usable {
        Ok(format!("{volume_id}.{EXTENSION}"))
    } else {
        Err(DescriptorError::InvalidKey {
            volume_id: volume_id.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct Harness {
        _temp: TempDir,
        store: DescriptorStore,
    }

    #[fixture]
    fn harness() -> Harness {
        let temp = TempDir::new().unwrap_or_else(|err| panic!("temp dir: {err}"));
        let root = Utf8PathBuf::from_path_buf(temp.path().join("attachments"))
            .unwrap_or_else(|path| panic!("non-UTF-8 temp path: {}", path.display()));
        Harness {
            _temp: temp,
            store: DescriptorStore::new(root),
        }
    }

    fn descriptor(volume_id: &str) -> AttachmentDescriptor {
        AttachmentDescriptor {
            volume_id: volume_id.to_owned(),
            connection: ConnectionParams {
                iqn: String::from("iqn.2004-04.com.qnap:ts:iscsi.pgdata.3"),
                portals: vec![String::from("10.0.0.5:3260")],
                lun: 0,
                interface: String::from("default"),
            },
            device: Utf8PathBuf::from("/dev/sdb"),
        }
    }

    #[rstest]
    fn saved_descriptor_loads_back(harness: Harness) {
        let original = descriptor("pgdata");
        harness
            .store
            .save(&original)
            .unwrap_or_else(|err| panic!("save failed: {err}"));

        let loaded = harness
            .store
            .load("pgdata")
            .unwrap_or_else(|err| panic!("load failed: {err}"));
        assert_eq!(loaded, Some(original));
    }

    #[rstest]
    fn save_replaces_and_leaves_no_temp_file(harness: Harness) {
        let mut replacement = descriptor("pgdata");
        harness
            .store
            .save(&replacement)
            .unwrap_or_else(|err| panic!("save failed: {err}"));
        replacement.device = Utf8PathBuf::from("/dev/sdc");
        harness
            .store
            .save(&replacement)
            .unwrap_or_else(|err| panic!("save failed: {err}"));

        let dir = Dir::open_ambient_dir(harness.store.root(), ambient_authority())
            .unwrap_or_else(|err| panic!("open root: {err}"));
        let names: Vec<String> = dir
            .entries()
            .unwrap_or_else(|err| panic!("list root: {err}"))
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().ok())
            .collect();
        assert_eq!(names, vec![String::from("pgdata.json")]);

        let loaded = harness
            .store
            .load("pgdata")
            .unwrap_or_else(|err| panic!("load failed: {err}"));
        assert_eq!(loaded.map(|found| found.device), Some(Utf8PathBuf::from("/dev/sdc")));
    }

    #[rstest]
    fn missing_descriptor_and_directory_are_absent(harness: Harness) {
        let loaded = harness
            .store
            .load("pgdata")
            .unwrap_or_else(|err| panic!("load failed: {err}"));
        assert!(loaded.is_none());
        assert!(harness.store.remove("pgdata").is_ok());
    }

    #[rstest]
    fn remove_deletes_descriptor(harness: Harness) {
        harness
            .store
            .save(&descriptor("pgdata"))
            .unwrap_or_else(|err| panic!("save failed: {err}"));
        harness
            .store
            .remove("pgdata")
            .unwrap_or_else(|err| panic!("remove failed: {err}"));
        let loaded = harness
            .store
            .load("pgdata")
            .unwrap_or_else(|err| panic!("load failed: {err}"));
        assert!(loaded.is_none());
    }

    #[rstest]
    fn corrupt_descriptor_is_reported(harness: Harness) {
        Dir::create_ambient_dir_all(harness.store.root(), ambient_authority())
            .unwrap_or_else(|err| panic!("create root: {err}"));
        let dir = Dir::open_ambient_dir(harness.store.root(), ambient_authority())
            .unwrap_or_else(|err| panic!("open root: {err}"));
        dir.write("pgdata.json", "{not json")
            .unwrap_or_else(|err| panic!("write: {err}"));

        let result = harness.store.load("pgdata");
        assert!(
            matches!(result, Err(DescriptorError::Corrupt { .. })),
            "unexpected outcome: {result:?}"
        );
    }

    #[rstest]
    #[case("")]
    #[case("..")]
    #[case(".hidden")]
    #[case("a/b")]
    #[case("vol 1")]
    fn rejects_unusable_keys(harness: Harness, #[case] volume_id: &str) {
        let result = harness.store.path_for(volume_id);
        assert!(
            matches!(result, Err(DescriptorError::InvalidKey { .. })),
            "unexpected outcome: {result:?}"
        );
    }
}
