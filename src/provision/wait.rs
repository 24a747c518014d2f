//! LUN readiness polling.

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::nas::{LunIndex, LunInfo, LunStatus, NasApi, Session};

use super::{ProvisionError, Provisioner};

impl<A: NasApi> Provisioner<A> {
    /// Polls `lun` at the configured interval until it leaves the creating
    /// state, the caller cancels, or the readiness bound expires.
    pub(super) async fn wait_for_lun(
        &self,
        session: &Session,
        volume_id: &str,
        lun: LunIndex,
        cancel: &CancellationToken,
    ) -> Result<LunInfo, ProvisionError> {
        let started = Instant::now();
        let deadline = self.settings.ready_timeout.map(|bound| started + bound);

        loop {
            if cancel.is_cancelled() {
                return Err(ProvisionError::Cancelled {
                    volume_id: volume_id.to_owned(),
                });
            }

            let info = self
                .api
                .get_lun(session, lun)
                .await
                .map_err(ProvisionError::appliance("get_lun"))?;

            match info.status {
                LunStatus::Ready => return Ok(info),
                LunStatus::Creating => debug!(volume_id, lun_index = %lun, "LUN still creating"),
                status => return Err(ProvisionError::LunNotReady { lun_index: lun, status }),
            }

            if deadline.is_some_and(|limit| Instant::now() >= limit) {
                return Err(ProvisionError::ReadyTimeout {
                    lun_index: lun,
                    waited: started.elapsed(),
                });
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(ProvisionError::Cancelled {
                        volume_id: volume_id.to_owned(),
                    });
                }
                () = sleep(self.settings.poll_interval) => {}
            }
        }
    }
}
