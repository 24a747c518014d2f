//! Delete, list, capacity, and capability checks.

use serde::Serialize;
use tracing::{debug, error, info};

use crate::capability::{AccessMode, VolumeCapability, check_capabilities};
use crate::cursor;
use crate::nas::{NasApi, Session, TargetInfo};

use super::{CapacityReport, ListEntry, ListPage, ProvisionError, Provisioner};

/// Result of a delete call.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// The volume existed and its resources were removed.
    Deleted,
    /// No volume of that id exists.
    AlreadyAbsent,
}

/// Result of a capability check against an existing volume.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CapabilityValidation {
    /// Capabilities the volume satisfies, when every requested one is.
    pub confirmed: Option<Vec<VolumeCapability>>,
    /// Why the request was not confirmed.
    pub message: Option<String>,
}

impl<A: NasApi> Provisioner<A> {
    /// Removes a volume: every mapped LUN, then the target.
    ///
    /// Deleting an unknown volume succeeds. When a LUN delete fails the
    /// target is kept, so a retry can find and finish the cleanup.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidArgument`] for an empty id and
    /// [`ProvisionError::Appliance`] for appliance failures.
    pub async fn delete(&self, volume_id: &str) -> Result<DeleteOutcome, ProvisionError> {
        let result = self.delete_volume(volume_id).await;
        if let Err(err) = &result {
            self.observe(err).await;
        }
        result
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<DeleteOutcome, ProvisionError> {
        if volume_id.is_empty() {
            return Err(ProvisionError::InvalidArgument(String::from(
                "volume id must be provided",
            )));
        }

        let _lease = self.leases.acquire(volume_id).await;
        let session = self.session().await?;
        let Some(target) = self.find_target(&session, volume_id).await? else {
            info!(volume_id, "volume already absent");
            return Ok(DeleteOutcome::AlreadyAbsent);
        };

        for lun in &target.lun_indices {
            self.api
                .delete_lun(&session, *lun, false)
                .await
                .map_err(|source| {
                    error!(volume_id, lun_index = %lun, error = %source, "LUN delete failed, keeping target");
                    ProvisionError::Appliance {
                        step: "delete_lun",
                        source,
                    }
                })?;
        }

        self.api
            .delete_target(&session, target.index)
            .await
            .map_err(ProvisionError::appliance("delete_target"))?;

        info!(volume_id, target_index = %target.index, "volume deleted");
        Ok(DeleteOutcome::Deleted)
    }

    /// Returns the next page of volumes.
    ///
    /// `page_token` carries the indices already returned; a malformed token
    /// restarts the listing. `max_entries` of zero means no limit. Order
    /// follows the appliance's own listing order.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Appliance`] when the appliance cannot be
    /// queried.
    pub async fn list(
        &self,
        page_token: &str,
        max_entries: u32,
    ) -> Result<ListPage, ProvisionError> {
        let result = self.list_volumes(page_token, max_entries).await;
        if let Err(err) = &result {
            self.observe(err).await;
        }
        result
    }

    async fn list_volumes(
        &self,
        page_token: &str,
        max_entries: u32,
    ) -> Result<ListPage, ProvisionError> {
        let session = self.session().await?;
        let targets = self
            .api
            .list_targets(&session)
            .await
            .map_err(ProvisionError::appliance("list_targets"))?;

        let mut seen = cursor::decode_or_empty(page_token);
        let limit = usize::try_from(max_entries).unwrap_or(usize::MAX);
        let mut page = ListPage::default();

        for target in targets {
            if seen.contains(&target.index.get()) {
                continue;
            }
            if limit != 0 && page.entries.len() >= limit {
                page.next_token = cursor::encode(&seen);
                break;
            }

            let capacity_bytes = self.first_lun_capacity(&session, &target).await;
            seen.insert(target.index.get());
            page.entries.push(ListEntry {
                volume_id: target.name,
                iqn: target.iqn,
                capacity_bytes,
            });
        }

        Ok(page)
    }

    async fn first_lun_capacity(&self, session: &Session, target: &TargetInfo) -> Option<u64> {
        let lun = *target.lun_indices.first()?;
        match self.api.get_lun(session, lun).await {
            Ok(info) => Some(info.capacity_bytes),
            Err(err) => {
                debug!(target_index = %target.index, lun_index = %lun, error = %err, "LUN capacity unavailable");
                None
            }
        }
    }

    /// Reports pool capacity and the per-volume size bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Appliance`] when the pool cannot be read.
    pub async fn get_capacity(&self) -> Result<CapacityReport, ProvisionError> {
        let result = async {
            let session = self.session().await?;
            self.api
                .pool_capacity(&session, self.settings.pool_id)
                .await
                .map_err(ProvisionError::appliance("pool_capacity"))
        }
        .await;

        match result {
            Ok(pool) => Ok(CapacityReport {
                available_bytes: pool.capacity_bytes,
                minimum_volume_bytes: self.settings.policy.minimum_bytes,
                maximum_volume_bytes: self.settings.policy.maximum_bytes,
            }),
            Err(err) => {
                self.observe(&err).await;
                Err(err)
            }
        }
    }

    /// Confirms whether an existing volume satisfies `capabilities`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidArgument`] for an empty id or
    /// capability set, [`ProvisionError::NotFound`] for an unknown volume,
    /// and [`ProvisionError::Appliance`] for appliance failures.
    pub async fn validate_volume_capabilities(
        &self,
        volume_id: &str,
        capabilities: &[VolumeCapability],
    ) -> Result<CapabilityValidation, ProvisionError> {
        if volume_id.is_empty() {
            return Err(ProvisionError::InvalidArgument(String::from(
                "volume id must be provided",
            )));
        }
        if capabilities.is_empty() {
            return Err(ProvisionError::InvalidArgument(String::from(
                "volume capabilities must be provided",
            )));
        }

        let lookup = async {
            let session = self.session().await?;
            self.find_target(&session, volume_id).await
        }
        .await;
        let target = match lookup {
            Ok(target) => target,
            Err(err) => {
                self.observe(&err).await;
                return Err(err);
            }
        };
        if target.is_none() {
            return Err(ProvisionError::NotFound {
                volume_id: volume_id.to_owned(),
            });
        }

        Ok(match check_capabilities(capabilities) {
            Ok(()) => CapabilityValidation {
                confirmed: Some(vec![VolumeCapability {
                    access_mode: AccessMode::SUPPORTED,
                    access_type: None,
                }]),
                message: None,
            },
            Err(err) => CapabilityValidation {
                confirmed: None,
                message: Some(err.to_string()),
            },
        })
    }

    async fn find_target(
        &self,
        session: &Session,
        volume_id: &str,
    ) -> Result<Option<TargetInfo>, ProvisionError> {
        let targets = self
            .api
            .list_targets(session)
            .await
            .map_err(ProvisionError::appliance("list_targets"))?;
        Ok(targets.into_iter().find(|target| target.name == volume_id))
    }
}
