//! iSCSI session establishment through `iscsiadm`.

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::command::{CommandError, CommandRunner};

use super::ConnectionParams;

const ISCSIADM: &str = "iscsiadm";
const BY_PATH_DIR: &str = "/dev/disk/by-path";
const DEFAULT_DEVICE_WAIT: Duration = Duration::from_secs(10);
const DEFAULT_DEVICE_POLL: Duration = Duration::from_millis(250);

/// Failures establishing or tearing down sessions.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum IscsiError {
    /// No portal was given.
    #[error("no portal to reach {iqn}")]
    NoPortal {
        /// Target IQN.
        iqn: String,
    },
    /// Login failed through every portal.
    #[error("login to {iqn} failed: {message}")]
    Login {
        /// Target IQN.
        iqn: String,
        /// Last failure reported by the initiator.
        message: String,
    },
    /// The session came up but no block device appeared.
    #[error("no device for {iqn} LUN {lun} after {waited:?}")]
    DeviceTimeout {
        /// Target IQN.
        iqn: String,
        /// LUN number.
        lun: u32,
        /// Time spent waiting.
        waited: Duration,
    },
    /// Logout failed.
    #[error("logout from {iqn} failed: {message}")]
    Logout {
        /// Target IQN.
        iqn: String,
        /// Failure reported by the initiator.
        message: String,
    },
    /// An initiator command could not be run.
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Host iSCSI initiator.
pub trait IscsiSessions: Send + Sync {
    /// Logs in to the target and returns the block device of the LUN.
    ///
    /// # Errors
    ///
    /// Returns [`IscsiError`] when no portal accepts the login or no device
    /// appears.
    fn connect(&self, params: &ConnectionParams) -> Result<Utf8PathBuf, IscsiError>;

    /// Logs out of the target on every portal and forgets its node records.
    ///
    /// # Errors
    ///
    /// Returns [`IscsiError`] when a logout fails for a reason other than
    /// the session already being gone.
    fn disconnect(&self, iqn: &str, portals: &[String]) -> Result<(), IscsiError>;
}

/// [`IscsiSessions`] backed by open-iscsi.
#[derive(Clone, Debug)]
pub struct IscsiadmSessions<R> {
    runner: R,
    by_path: Utf8PathBuf,
    device_wait: Duration,
    device_poll: Duration,
}

impl<R: CommandRunner> IscsiadmSessions<R> {
    /// Initiator using `runner` and the standard device directory.
    #[must_use]
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            by_path: Utf8PathBuf::from(BY_PATH_DIR),
            device_wait: DEFAULT_DEVICE_WAIT,
            device_poll: DEFAULT_DEVICE_POLL,
        }
    }

    /// Looks for device links under `dir` instead of `/dev/disk/by-path`.
    #[must_use]
    pub fn with_by_path_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.by_path = dir.into();
        self
    }

    /// Bounds the wait for the device link to appear.
    #[must_use]
    pub const fn with_device_wait(mut self, wait: Duration, poll: Duration) -> Self {
        self.device_wait = wait;
        self.device_poll = poll;
        self
    }

    fn login(&self, params: &ConnectionParams, portal: &str) -> Result<(), String> {
        let iface = params.interface.as_str();
        let discovery = self.runner.run(
            ISCSIADM,
            &[
                "-m", "discoverydb", "-t", "sendtargets", "-p", portal, "-I", iface, "--discover",
            ],
        );
        match discovery {
            Ok(output) if output.is_success() => {}
            Ok(output) => {
                debug!(portal, stderr = %output.stderr.trim(), "discovery failed, trying login");
            }
            Err(err) => return Err(err.to_string()),
        }

        let iqn = params.iqn.as_str();
        let created = self.runner.run(
            ISCSIADM,
            &["-m", "node", "-T", iqn, "-p", portal, "-I", iface, "-o", "new"],
        );
        if let Ok(output) = &created
            && !output.is_success()
        {
            debug!(portal, stderr = %output.stderr.trim(), "node record not created");
        }

        let output = self
            .runner
            .run(
                ISCSIADM,
                &["-m", "node", "-T", iqn, "-p", portal, "-I", iface, "--login"],
            )
            .map_err(|err| err.to_string())?;
        if output.is_success() || already_logged_in(&output.stderr) {
            Ok(())
        } else {
            Err(output.stderr.trim().to_owned())
        }
    }

    fn device_link(&self, portal: &str, params: &ConnectionParams) -> Utf8PathBuf {
        self.by_path.join(format!(
            "ip-{portal}-iscsi-{}-lun-{}",
            params.iqn, params.lun
        ))
    }

    fn wait_for_device(&self, params: &ConnectionParams) -> Result<Utf8PathBuf, IscsiError> {
        let started = Instant::now();
        loop {
            for portal in &params.portals {
                let link = self.device_link(portal, params);
                match link.canonicalize_utf8() {
                    Ok(device) => return Ok(device),
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(err) => debug!(link = %link, error = %err, "device link unreadable"),
                }
            }
            if started.elapsed() >= self.device_wait {
                return Err(IscsiError::DeviceTimeout {
                    iqn: params.iqn.clone(),
                    lun: params.lun,
                    waited: started.elapsed(),
                });
            }
            thread::sleep(self.device_poll);
        }
    }
}

impl<R: CommandRunner> IscsiSessions for IscsiadmSessions<R> {
    fn connect(&self, params: &ConnectionParams) -> Result<Utf8PathBuf, IscsiError> {
        if params.portals.is_empty() {
            return Err(IscsiError::NoPortal {
                iqn: params.iqn.clone(),
            });
        }

        let mut logged_in = false;
        let mut last_failure = String::new();
        for portal in &params.portals {
            match self.login(params, portal) {
                Ok(()) => {
                    info!(iqn = %params.iqn, portal = %portal, "iSCSI session established");
                    logged_in = true;
                }
                Err(message) => {
                    warn!(iqn = %params.iqn, portal = %portal, error = %message, "iSCSI login failed");
                    last_failure = message;
                }
            }
        }
        if !logged_in {
            return Err(IscsiError::Login {
                iqn: params.iqn.clone(),
                message: last_failure,
            });
        }

        self.wait_for_device(params).inspect_err(|err| {
            warn!(iqn = %params.iqn, error = %err, "no device after login, logging out");
            if let Err(logout) = self.disconnect(&params.iqn, &params.portals) {
                warn!(iqn = %params.iqn, error = %logout, "session left open without a device");
            }
        })
    }

    fn disconnect(&self, iqn: &str, portals: &[String]) -> Result<(), IscsiError> {
        for portal in portals {
            let output = self
                .runner
                .run(ISCSIADM, &["-m", "node", "-T", iqn, "-p", portal.as_str(), "--logout"])?;
            if !output.is_success() && !not_logged_in(&output.stderr) {
                return Err(IscsiError::Logout {
                    iqn: iqn.to_owned(),
                    message: output.stderr.trim().to_owned(),
                });
            }

            let removed = self
                .runner
                .run(ISCSIADM, &["-m", "node", "-T", iqn, "-p", portal.as_str(), "-o", "delete"])?;
            if !removed.is_success() {
                debug!(iqn, portal = %portal, stderr = %removed.stderr.trim(), "node record not deleted");
            }
        }
        info!(iqn, "iSCSI session closed");
        Ok(())
    }
}

fn already_logged_in(stderr: &str) -> bool {
    stderr.contains("already present") || stderr.contains("session already exists")
}

fn not_logged_in(stderr: &str) -> bool {
    stderr.contains("No matching sessions") || stderr.contains("not logged in")
}
