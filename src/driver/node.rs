//! Node service handlers.

use std::sync::Arc;

use camino::Utf8Path;
use serde::Serialize;
use tokio::task;

use crate::attach::{AttachOutcome, AttachRequest, DetachOutcome, IscsiSessions, MountUtility};
use crate::nas::NasApi;

use super::{Code, Driver, DriverError};

/// Node identity reported to the orchestrator.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct NodeInfo {
    /// Identifier of this node.
    pub node_id: String,
}

impl<A, S, M> Driver<A, S, M>
where
    A: NasApi,
    S: IscsiSessions + 'static,
    M: MountUtility + 'static,
{
    /// Attaches and mounts a volume at the request's target path. The host
    /// commands run on the blocking thread pool.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] with the code of the failure.
    pub async fn node_publish_volume(
        &self,
        request: &AttachRequest,
    ) -> Result<AttachOutcome, DriverError> {
        let manager = Arc::clone(&self.node_role()?.manager);
        let request = request.clone();
        let outcome = task::spawn_blocking(move || manager.attach(&request)).await?;
        Ok(outcome?)
    }

    /// Unmounts a volume and closes its session once unused.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] with the code of the failure.
    pub async fn node_unpublish_volume(
        &self,
        volume_id: &str,
        target_path: &Utf8Path,
    ) -> Result<DetachOutcome, DriverError> {
        let manager = Arc::clone(&self.node_role()?.manager);
        let volume_id = volume_id.to_owned();
        let target_path = target_path.to_path_buf();
        let outcome =
            task::spawn_blocking(move || manager.detach(&volume_id, &target_path)).await?;
        Ok(outcome?)
    }

    /// Staging is folded into publish, so this only checks the request.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the node role is absent or the id is
    /// empty.
    pub fn node_stage_volume(&self, volume_id: &str) -> Result<(), DriverError> {
        self.accept_staging(volume_id)
    }

    /// Counterpart of [`Driver::node_stage_volume`].
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the node role is absent or the id is
    /// empty.
    pub fn node_unstage_volume(&self, volume_id: &str) -> Result<(), DriverError> {
        self.accept_staging(volume_id)
    }

    /// Identity of this node.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the node role is absent.
    pub fn node_get_info(&self) -> Result<NodeInfo, DriverError> {
        Ok(NodeInfo {
            node_id: self.node_role()?.node_id.clone(),
        })
    }

    /// Usage statistics are not offered.
    ///
    /// # Errors
    ///
    /// Always returns [`Code::Unimplemented`].
    pub fn node_get_volume_stats(&self, volume_id: &str) -> Result<(), DriverError> {
        self.reject("NodeGetVolumeStats", volume_id)
    }

    fn accept_staging(&self, volume_id: &str) -> Result<(), DriverError> {
        self.node_role()?;
        if volume_id.is_empty() {
            return Err(DriverError::new(
                Code::InvalidArgument,
                "volume id must be provided",
            ));
        }
        Ok(())
    }
}
