//! Create workflow: target, initiator binding, LUN, readiness, mapping.

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::capability::check_capabilities;
use crate::context::volume_context;
use crate::nas::{LunIndex, LunSpec, NasApi, Session, TargetIndex};
use crate::naming::normalize_name;

use super::{
    CreateFailure, CreateRequest, ProvisionError, Provisioner, RollbackFailure, RollbackResource,
    Volume,
};

/// LUN number every volume is exposed under within its target.
const VOLUME_LUN: u32 = 0;

impl<A: NasApi> Provisioner<A> {
    /// Creates the appliance resources for a new volume.
    ///
    /// Requests for the same normalized name are serialized. Cancelling
    /// `cancel` while the LUN is being allocated aborts the request and
    /// removes everything created so far.
    ///
    /// # Errors
    ///
    /// Returns a [`CreateFailure`] carrying the error that aborted the
    /// workflow and any compensating deletes that failed.
    pub async fn create(
        &self,
        request: &CreateRequest,
        cancel: &CancellationToken,
    ) -> Result<Volume, CreateFailure> {
        let result = self.create_volume(request, cancel).await;
        if let Err(failure) = &result {
            self.observe(&failure.error).await;
        }
        result
    }

    async fn create_volume(
        &self,
        request: &CreateRequest,
        cancel: &CancellationToken,
    ) -> Result<Volume, CreateFailure> {
        if request.name.trim().is_empty() {
            return Err(
                ProvisionError::InvalidArgument(String::from("volume name must be provided")).into(),
            );
        }
        check_capabilities(&request.capabilities)?;

        let capacity_bytes = self.settings.policy.resolve(request.capacity)?;
        let size_units = self.settings.policy.units(capacity_bytes);
        let volume_id = normalize_name(&request.name);
        if volume_id.is_empty() {
            return Err(ProvisionError::InvalidArgument(format!(
                "volume name '{}' has no letters or digits",
                request.name
            ))
            .into());
        }

        let _lease = self.leases.acquire(&volume_id).await;
        info!(volume_id = %volume_id, capacity_bytes, size_units, "creating volume");

        let session = self.session().await?;
        let targets = self
            .api
            .list_targets(&session)
            .await
            .map_err(ProvisionError::appliance("list_targets"))?;
        if targets.iter().any(|target| target.name == volume_id) {
            return Err(ProvisionError::AlreadyExists { volume_id }.into());
        }

        let target = self
            .api
            .create_target(&session, &volume_id, self.settings.target_options)
            .await
            .map_err(ProvisionError::appliance("create_target"))?;
        info!(volume_id = %volume_id, target_index = %target, "created target");

        if let Err(err) = self
            .api
            .create_initiator_binding(&session, target, &self.settings.chap)
            .await
        {
            let primary = ProvisionError::appliance("create_initiator_binding")(err);
            return Err(self.rollback(&session, &volume_id, primary, target, None).await);
        }

        let spec = LunSpec::block(volume_id.as_str(), self.settings.pool_id, size_units);
        let lun = match self.api.create_lun(&session, &spec).await {
            Ok(index) => index,
            Err(err) => {
                let primary = ProvisionError::appliance("create_lun")(err);
                return Err(self.rollback(&session, &volume_id, primary, target, None).await);
            }
        };
        info!(volume_id = %volume_id, lun_index = %lun, "created LUN, waiting for allocation");

        if let Err(primary) = self.wait_for_lun(&session, &volume_id, lun, cancel).await {
            return Err(self
                .rollback(&session, &volume_id, primary, target, Some(lun))
                .await);
        }

        if let Err(err) = self.api.attach_lun(&session, lun, target).await {
            let primary = ProvisionError::appliance("attach_lun")(err);
            return Err(self
                .rollback(&session, &volume_id, primary, target, Some(lun))
                .await);
        }

        let targets = self
            .api
            .list_targets(&session)
            .await
            .map_err(ProvisionError::appliance("list_targets"))?;
        let Some(iqn) = targets
            .into_iter()
            .find(|candidate| candidate.name == volume_id)
            .map(|candidate| candidate.iqn)
            .filter(|iqn| !iqn.is_empty())
        else {
            error!(volume_id = %volume_id, target_index = %target, "new target missing from listing");
            return Err(ProvisionError::MissingIqn { volume_id }.into());
        };

        info!(volume_id = %volume_id, iqn = %iqn, "volume ready");
        Ok(Volume {
            volume_context: volume_context(&self.settings.portal, &iqn, VOLUME_LUN),
            volume_id,
            capacity_bytes,
            pool_id: self.settings.pool_id,
            target_index: target,
            lun_index: lun,
            iqn,
            lun: VOLUME_LUN,
        })
    }

    /// Removes resources created by an aborted create. Each delete is
    /// attempted independently; failures are recorded but never replace
    /// `primary`.
    async fn rollback(
        &self,
        session: &Session,
        volume_id: &str,
        primary: ProvisionError,
        target: TargetIndex,
        created_lun: Option<LunIndex>,
    ) -> CreateFailure {
        error!(volume_id, error = %primary, "create failed, rolling back");
        let mut rollback_failures = Vec::new();

        if let Err(err) = self.api.delete_target(session, target).await {
            warn!(volume_id, target_index = %target, error = %err, "rollback left target behind");
            rollback_failures.push(RollbackFailure {
                resource: RollbackResource::Target(target),
                error: err,
            });
        }

        if let Some(lun) = created_lun
            && let Err(err) = self.api.delete_lun(session, lun, false).await
        {
            warn!(volume_id, lun_index = %lun, error = %err, "rollback left LUN behind");
            rollback_failures.push(RollbackFailure {
                resource: RollbackResource::Lun(lun),
                error: err,
            });
        }

        CreateFailure {
            error: primary,
            rollback_failures,
        }
    }
}
