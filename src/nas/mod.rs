//! Appliance management API: the operation contract the provisioning flow
//! depends on, its value types, and the HTTP/XML client for QNAP devices.

mod client;
mod error;
mod session;
mod types;
mod xml;

use std::future::Future;
use std::pin::Pin;

pub use client::QnapClient;
pub use error::NasError;
pub use session::{LoginPolicy, SessionCell};
pub use types::{
    ChapOptions, LunIndex, LunInfo, LunSpec, LunStatus, PoolCapacity, Session, TargetIndex,
    TargetInfo, TargetOptions, TargetStatus,
};

/// Future returned by appliance operations.
pub type NasFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, NasError>> + Send + 'a>>;

/// Operations exposed by the appliance's storage management API.
///
/// Every call except [`NasApi::login`] takes the session to act under, so
/// the caller decides when to authenticate and which session to use.
pub trait NasApi: Send + Sync {
    /// Authenticates and returns a fresh session.
    fn login(&self) -> NasFuture<'_, Session>;

    /// Lists every iSCSI target in appliance order.
    fn list_targets<'a>(&'a self, session: &'a Session) -> NasFuture<'a, Vec<TargetInfo>>;

    /// Creates a target and returns its index.
    fn create_target<'a>(
        &'a self,
        session: &'a Session,
        name: &'a str,
        options: TargetOptions,
    ) -> NasFuture<'a, TargetIndex>;

    /// Authorises initiators to connect to `target`.
    fn create_initiator_binding<'a>(
        &'a self,
        session: &'a Session,
        target: TargetIndex,
        chap: &'a ChapOptions,
    ) -> NasFuture<'a, ()>;

    /// Allocates a block LUN and returns its index.
    fn create_lun<'a>(&'a self, session: &'a Session, spec: &'a LunSpec)
    -> NasFuture<'a, LunIndex>;

    /// Reads the current state of a LUN.
    fn get_lun<'a>(&'a self, session: &'a Session, lun: LunIndex) -> NasFuture<'a, LunInfo>;

    /// Maps `lun` into `target`.
    fn attach_lun<'a>(
        &'a self,
        session: &'a Session,
        lun: LunIndex,
        target: TargetIndex,
    ) -> NasFuture<'a, ()>;

    /// Removes a target together with its initiator bindings.
    fn delete_target<'a>(&'a self, session: &'a Session, target: TargetIndex)
    -> NasFuture<'a, ()>;

    /// Removes a LUN, optionally letting the appliance finish in the background.
    fn delete_lun<'a>(
        &'a self,
        session: &'a Session,
        lun: LunIndex,
        background: bool,
    ) -> NasFuture<'a, ()>;

    /// Reads the subscription figures of a storage pool.
    fn pool_capacity<'a>(&'a self, session: &'a Session, pool_id: u32)
    -> NasFuture<'a, PoolCapacity>;
}
