//! Controller service handlers.

use tokio_util::sync::CancellationToken;

use crate::attach::{IscsiSessions, MountUtility};
use crate::capability::VolumeCapability;
use crate::nas::NasApi;
use crate::provision::{
    CapabilityValidation, CapacityReport, CreateRequest, DeleteOutcome, ListPage, Volume,
};

use super::{Driver, DriverError};

impl<A, S, M> Driver<A, S, M>
where
    A: NasApi,
    S: IscsiSessions,
    M: MountUtility,
{
    /// Creates a volume. Cancelling `cancel` aborts the request and removes
    /// whatever was created.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] with the code of the failure; appliance
    /// detail is logged, not returned.
    pub async fn create_volume(
        &self,
        request: &CreateRequest,
        cancel: &CancellationToken,
    ) -> Result<Volume, DriverError> {
        Ok(self.provisioner()?.create(request, cancel).await?)
    }

    /// Deletes a volume; deleting an unknown volume succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the id is empty or the appliance fails.
    pub async fn delete_volume(&self, volume_id: &str) -> Result<DeleteOutcome, DriverError> {
        Ok(self.provisioner()?.delete(volume_id).await?)
    }

    /// Lists one page of volumes.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the appliance fails.
    pub async fn list_volumes(
        &self,
        starting_token: &str,
        max_entries: u32,
    ) -> Result<ListPage, DriverError> {
        Ok(self
            .provisioner()?
            .list(starting_token, max_entries)
            .await?)
    }

    /// Reports pool capacity and the volume size bounds.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the appliance fails.
    pub async fn get_capacity(&self) -> Result<CapacityReport, DriverError> {
        Ok(self.provisioner()?.get_capacity().await?)
    }

    /// Checks whether `capabilities` can be honoured for an existing volume.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] for an empty request, an unknown volume, or
    /// an appliance failure.
    pub async fn validate_volume_capabilities(
        &self,
        volume_id: &str,
        capabilities: &[VolumeCapability],
    ) -> Result<CapabilityValidation, DriverError> {
        Ok(self
            .provisioner()?
            .validate_volume_capabilities(volume_id, capabilities)
            .await?)
    }

    /// Attaching through the controller is not offered; nodes log in
    /// directly.
    ///
    /// # Errors
    ///
    /// Always returns [`super::Code::Unimplemented`].
    pub fn controller_publish_volume(&self, volume_id: &str) -> Result<(), DriverError> {
        self.reject("ControllerPublishVolume", volume_id)
    }

    /// Snapshots are not offered.
    ///
    /// # Errors
    ///
    /// Always returns [`super::Code::Unimplemented`].
    pub fn create_snapshot(&self, volume_id: &str) -> Result<(), DriverError> {
        self.reject("CreateSnapshot", volume_id)
    }

    /// Expansion is not offered.
    ///
    /// # Errors
    ///
    /// Always returns [`super::Code::Unimplemented`].
    pub fn controller_expand_volume(&self, volume_id: &str) -> Result<(), DriverError> {
        self.reject("ControllerExpandVolume", volume_id)
    }

    pub(super) fn reject(&self, operation: &str, volume_id: &str) -> Result<(), DriverError> {
        tracing::debug!(
            plugin = %self.info.name,
            operation,
            volume_id,
            "unsupported operation requested"
        );
        Err(DriverError::unimplemented(operation))
    }
}
