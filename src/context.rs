//! Keys of the volume context a created volume carries from the controller
//! to the node that attaches it.

use std::collections::BTreeMap;

/// Portal (`IP[:PORT]`) the node logs in through.
pub const TARGET_PORTAL: &str = "targetPortal";
/// Target IQN.
pub const IQN: &str = "iqn";
/// LUN number within the target.
pub const LUN: &str = "lun";
/// JSON array of additional portals.
pub const PORTALS: &str = "portals";
/// Initiator interface name used for the session.
pub const ISCSI_INTERFACE: &str = "iscsiInterface";

/// Builds the context returned with a newly created volume.
#[must_use]
pub fn volume_context(portal: &str, iqn: &str, lun: u32) -> BTreeMap<String, String> {
    BTreeMap::from([
        (TARGET_PORTAL.to_owned(), portal.to_owned()),
        (IQN.to_owned(), iqn.to_owned()),
        (LUN.to_owned(), lun.to_string()),
        (PORTALS.to_owned(), String::from("[]")),
    ])
}
