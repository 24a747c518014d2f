//! iSCSI connection parameters recovered from a volume context.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::context;

use super::AttachError;

/// Port appended to portals given without one.
pub const DEFAULT_ISCSI_PORT: u16 = 3260;

/// Initiator interface used when the context names none.
pub const DEFAULT_INTERFACE: &str = "default";

/// Everything the session library needs to log in to one volume's target.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ConnectionParams {
    /// Target IQN.
    pub iqn: String,
    /// Portals to log in through, primary first, each as `host:port`.
    pub portals: Vec<String>,
    /// LUN number within the target.
    pub lun: u32,
    /// Initiator interface (`iscsiadm -I`).
    pub interface: String,
}

impl ConnectionParams {
    /// Derives parameters from the context a create call returned.
    ///
    /// # Errors
    ///
    /// Returns [`AttachError::InvalidContext`] when the portal or IQN is
    /// missing, the LUN is not a number, or the extra portal list is not a
    /// JSON array of strings.
    pub fn from_context(volume_context: &BTreeMap<String, String>) -> Result<Self, AttachError> {
        let portal = required(volume_context, context::TARGET_PORTAL)?;
        let iqn = required(volume_context, context::IQN)?;

        let lun = match volume_context.get(context::LUN).map(|raw| raw.trim()) {
            None | Some("") => 0,
            Some(raw) => raw.parse().map_err(|_| AttachError::InvalidContext {
                key: context::LUN,
                reason: format!("'{raw}' is not a LUN number"),
            })?,
        };

        let extra: Vec<String> = match volume_context.get(context::PORTALS).map(|raw| raw.trim()) {
            None | Some("") => Vec::new(),
            Some(raw) => serde_json::from_str(raw).map_err(|err| AttachError::InvalidContext {
                key: context::PORTALS,
                reason: err.to_string(),
            })?,
        };

        let mut portals = vec![with_default_port(portal)];
        for candidate in extra.iter().map(|raw| with_default_port(raw.trim())) {
            if !candidate.is_empty() && !portals.contains(&candidate) {
                portals.push(candidate);
            }
        }

        let interface = volume_context
            .get(context::ISCSI_INTERFACE)
            .map(|raw| raw.trim())
            .filter(|raw| !raw.is_empty())
            .unwrap_or(DEFAULT_INTERFACE)
            .to_owned();

        Ok(Self {
            iqn: iqn.to_owned(),
            portals,
            lun,
            interface,
        })
    }

    /// Portal logged in to first.
    #[must_use]
    pub fn primary_portal(&self) -> Option<&str> {
        self.portals.first().map(String::as_str)
    }
}

fn required<'a>(
    volume_context: &'a BTreeMap<String, String>,
    key: &'static str,
) -> Result<&'a str, AttachError> {
    volume_context
        .get(key)
        .map(|raw| raw.trim())
        .filter(|raw| !raw.is_empty())
        .ok_or_else(|| AttachError::InvalidContext {
            key,
            reason: String::from("missing from volume context"),
        })
}

/// Appends the iSCSI port unless `portal` already carries one.
#[must_use]
pub fn with_default_port(portal: &str) -> String {
    if portal.is_empty() || has_port(portal) {
        return portal.to_owned();
    }
    if portal.contains(':') && !portal.starts_with('[') {
        return format!("[{portal}]:{DEFAULT_ISCSI_PORT}");
    }
    format!("{portal}:{DEFAULT_ISCSI_PORT}")
}

fn has_port(portal: &str) -> bool {
    let Some((host, port)) = portal.rsplit_once(':') else {
        return false;
    };
    let numeric = !port.is_empty() && port.bytes().all(|byte| byte.is_ascii_digit());
    // A bare IPv6 address has colons but no bracketed host.
    numeric && (!host.contains(':') || host.ends_with(']'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn context_with(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect()
    }

    #[rstest]
    #[case("10.0.0.5", "10.0.0.5:3260")]
    #[case("10.0.0.5:3261", "10.0.0.5:3261")]
    #[case("nas.local", "nas.local:3260")]
    #[case("[fd00::5]", "[fd00::5]:3260")]
    #[case("[fd00::5]:3262", "[fd00::5]:3262")]
    #[case("fd00::5", "[fd00::5]:3260")]
    fn appends_default_port(#[case] portal: &str, #[case] expected: &str) {
        assert_eq!(with_default_port(portal), expected);
    }

    #[test]
    fn derives_params_from_create_context() {
        let ctx = crate::context::volume_context("10.0.0.5", "iqn.2004-04.com.qnap:ts:iscsi.vol.1", 0);

        let params = ConnectionParams::from_context(&ctx)
            .unwrap_or_else(|err| panic!("context should parse: {err}"));

        assert_eq!(params.portals, vec![String::from("10.0.0.5:3260")]);
        assert_eq!(params.iqn, "iqn.2004-04.com.qnap:ts:iscsi.vol.1");
        assert_eq!(params.lun, 0);
        assert_eq!(params.interface, DEFAULT_INTERFACE);
    }

    #[test]
    fn merges_extra_portals_without_duplicates() {
        let ctx = context_with(&[
            ("targetPortal", "10.0.0.5"),
            ("iqn", "iqn.x"),
            ("lun", "2"),
            ("portals", r#"["10.0.0.5:3260", "10.0.1.5"]"#),
            ("iscsiInterface", "iface0"),
        ]);

        let params = ConnectionParams::from_context(&ctx)
            .unwrap_or_else(|err| panic!("context should parse: {err}"));

        assert_eq!(
            params.portals,
            vec![String::from("10.0.0.5:3260"), String::from("10.0.1.5:3260")]
        );
        assert_eq!(params.lun, 2);
        assert_eq!(params.interface, "iface0");
        assert_eq!(params.primary_portal(), Some("10.0.0.5:3260"));
    }

    #[rstest]
    #[case(&[("iqn", "iqn.x")], "targetPortal")]
    #[case(&[("targetPortal", "10.0.0.5")], "iqn")]
    #[case(&[("targetPortal", "10.0.0.5"), ("iqn", "iqn.x"), ("lun", "zero")], "lun")]
    #[case(&[("targetPortal", "10.0.0.5"), ("iqn", "iqn.x"), ("portals", "10.0.1.5")], "portals")]
    fn rejects_malformed_context(#[case] pairs: &[(&str, &str)], #[case] key: &str) {
        let result = ConnectionParams::from_context(&context_with(pairs));
        assert!(
            matches!(&result, Err(AttachError::InvalidContext { key: found, .. }) if *found == key),
            "unexpected outcome: {result:?}"
        );
    }
}
