//! Decoding of the appliance's XML response documents.

use std::str::FromStr;

use roxmltree::{Document, Node};

use super::error::NasError;
use super::types::{LunIndex, LunInfo, PoolCapacity, Session, TargetIndex, TargetInfo};

fn document<'input>(operation: &str, body: &'input str) -> Result<Document<'input>, NasError> {
    Document::parse(body).map_err(|err| NasError::Parse {
        operation: operation.to_owned(),
        message: err.to_string(),
    })
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|candidate| candidate.has_tag_name(name))
}

fn child_text<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    child(node, name)
        .and_then(|element| element.text())
        .map(str::trim)
}

fn number<T: FromStr>(operation: &str, node: Node<'_, '_>, name: &str) -> Result<T, NasError>
where
    T::Err: std::fmt::Display,
{
    let raw = child_text(node, name).ok_or_else(|| NasError::Parse {
        operation: operation.to_owned(),
        message: format!("missing <{name}>"),
    })?;
    raw.parse::<T>().map_err(|err| NasError::Parse {
        operation: operation.to_owned(),
        message: format!("<{name}> value '{raw}': {err}"),
    })
}

fn number_or<T: FromStr>(
    operation: &str,
    node: Node<'_, '_>,
    name: &str,
    default: T,
) -> Result<T, NasError>
where
    T::Err: std::fmt::Display,
{
    match child_text(node, name) {
        None | Some("") => Ok(default),
        Some(_) => number(operation, node, name),
    }
}

fn check_auth(operation: &str, root: Node<'_, '_>) -> Result<(), NasError> {
    if child_text(root, "authPassed") == Some("0") {
        return Err(NasError::Auth {
            operation: operation.to_owned(),
        });
    }
    Ok(())
}

fn check_result_zero(operation: &str, root: Node<'_, '_>) -> Result<(), NasError> {
    let code: i64 = number(operation, root, "result")?;
    super::error::expect_result(operation, code, 0)
}

/// Extracts the session id from a login response.
pub(crate) fn parse_login(body: &str) -> Result<Session, NasError> {
    const OPERATION: &str = "login";
    let doc = document(OPERATION, body)?;
    let root = doc.root_element();

    if child_text(root, "authPassed") != Some("1") {
        return Err(NasError::Auth {
            operation: OPERATION.to_owned(),
        });
    }
    match child_text(root, "authSid") {
        Some(sid) if !sid.is_empty() => Ok(Session::new(sid)),
        _ => Err(NasError::Parse {
            operation: OPERATION.to_owned(),
            message: String::from("missing <authSid>"),
        }),
    }
}

/// Extracts the raw `<result>` code of a mutating call.
pub(crate) fn parse_result_code(operation: &str, body: &str) -> Result<i64, NasError> {
    let doc = document(operation, body)?;
    let root = doc.root_element();
    check_auth(operation, root)?;
    number(operation, root, "result")
}

/// Decodes the target listing.
pub(crate) fn parse_targets(body: &str) -> Result<Vec<TargetInfo>, NasError> {
    const OPERATION: &str = "list_targets";
    let doc = document(OPERATION, body)?;
    let root = doc.root_element();
    check_auth(OPERATION, root)?;
    check_result_zero(OPERATION, root)?;

    let Some(list) = child(root, "iSCSITargetList") else {
        return Ok(Vec::new());
    };

    list.children()
        .filter(|node| node.has_tag_name("targetInfo"))
        .map(|node| -> Result<TargetInfo, NasError> {
            let lun_indices = child(node, "targetLUNList")
                .map(|luns| {
                    luns.children()
                        .filter(|lun| lun.has_tag_name("LUNIndex"))
                        .filter_map(|lun| lun.text())
                        .map(|text| {
                            text.trim()
                                .parse::<u32>()
                                .map(LunIndex::new)
                                .map_err(|err| NasError::Parse {
                                    operation: OPERATION.to_owned(),
                                    message: format!("<LUNIndex> value '{text}': {err}"),
                                })
                        })
                        .collect::<Result<Vec<_>, _>>()
                })
                .transpose()?
                .unwrap_or_default();

            Ok(TargetInfo {
                index: TargetIndex::new(number(OPERATION, node, "targetIndex")?),
                name: child_text(node, "targetName").unwrap_or_default().to_owned(),
                iqn: child_text(node, "targetIQN").unwrap_or_default().to_owned(),
                status: number_or::<i32>(OPERATION, node, "targetStatus", 0)?.into(),
                lun_indices,
            })
        })
        .collect()
}

/// Decodes a single LUN description.
pub(crate) fn parse_lun(body: &str) -> Result<LunInfo, NasError> {
    const OPERATION: &str = "get_lun";
    let doc = document(OPERATION, body)?;
    let root = doc.root_element();
    check_auth(OPERATION, root)?;
    check_result_zero(OPERATION, root)?;

    let row = child(root, "LUNInfo")
        .and_then(|info| child(info, "row"))
        .ok_or_else(|| NasError::NotFound {
            operation: OPERATION.to_owned(),
            code: -2,
        })?;

    Ok(LunInfo {
        index: LunIndex::new(number(OPERATION, row, "LUNIndex")?),
        name: child_text(row, "LUNName").unwrap_or_default().to_owned(),
        status: number::<i32>(OPERATION, row, "LUNStatus")?.into(),
        capacity_bytes: number_or(OPERATION, row, "capacity_bytes", 0)?,
        sector_size: number_or(OPERATION, row, "LUNSectorSize", 512)?,
    })
}

/// Decodes the storage pool subscription figures.
pub(crate) fn parse_pool(body: &str) -> Result<PoolCapacity, NasError> {
    const OPERATION: &str = "pool_capacity";
    let doc = document(OPERATION, body)?;
    let root = doc.root_element();
    check_auth(OPERATION, root)?;
    check_result_zero(OPERATION, root)?;

    let pool = child(root, "PoolSubscription").ok_or_else(|| NasError::Parse {
        operation: OPERATION.to_owned(),
        message: String::from("missing <PoolSubscription>"),
    })?;

    Ok(PoolCapacity {
        capacity_bytes: number(OPERATION, pool, "capacity_bytes")?,
        free_bytes: number_or(OPERATION, pool, "freesize_bytes", 0)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nas::types::{LunStatus, TargetStatus};

    const TARGETS: &str = r"<?xml version='1.0' encoding='UTF-8'?>
<QDocRoot version='1.0'>
  <authPassed><![CDATA[1]]></authPassed>
  <result><![CDATA[0]]></result>
  <iSCSITargetList>
    <targetInfo>
      <targetIndex><![CDATA[0]]></targetIndex>
      <targetName><![CDATA[alpha]]></targetName>
      <targetIQN><![CDATA[iqn.2004-04.com.qnap:ts-453:iscsi.alpha.1a2b3c]]></targetIQN>
      <targetStatus><![CDATA[1]]></targetStatus>
      <targetLUNList>
        <LUNIndex><![CDATA[3]]></LUNIndex>
        <LUNIndex><![CDATA[4]]></LUNIndex>
      </targetLUNList>
    </targetInfo>
    <targetInfo>
      <targetIndex><![CDATA[2]]></targetIndex>
      <targetName><![CDATA[beta]]></targetName>
      <targetIQN><![CDATA[iqn.2004-04.com.qnap:ts-453:iscsi.beta.1a2b3c]]></targetIQN>
      <targetStatus><![CDATA[-1]]></targetStatus>
    </targetInfo>
  </iSCSITargetList>
</QDocRoot>";

    #[test]
    fn decodes_target_listing() {
        let targets = parse_targets(TARGETS).unwrap_or_else(|err| panic!("parse: {err}"));
        assert_eq!(targets.len(), 2);

        let alpha = targets.first().unwrap_or_else(|| panic!("missing alpha"));
        assert_eq!(alpha.index, TargetIndex::new(0));
        assert_eq!(alpha.name, "alpha");
        assert_eq!(alpha.status, TargetStatus::Connected);
        assert_eq!(alpha.lun_indices, vec![LunIndex::new(3), LunIndex::new(4)]);

        let beta = targets.get(1).unwrap_or_else(|| panic!("missing beta"));
        assert_eq!(beta.status, TargetStatus::Offline);
        assert!(beta.lun_indices.is_empty());
    }

    #[test]
    fn decodes_lun_row() {
        let body = "<QDocRoot><authPassed>1</authPassed><result>0</result><LUNInfo><row>\
            <LUNIndex>3</LUNIndex><LUNName>alpha</LUNName><LUNStatus>0</LUNStatus>\
            <capacity_bytes>17179869184</capacity_bytes><LUNSectorSize>4096</LUNSectorSize>\
            </row></LUNInfo></QDocRoot>";
        let lun = parse_lun(body).unwrap_or_else(|err| panic!("parse: {err}"));
        assert_eq!(lun.index, LunIndex::new(3));
        assert_eq!(lun.status, LunStatus::Creating);
        assert_eq!(lun.capacity_bytes, 17_179_869_184);
        assert_eq!(lun.sector_size, 4096);
    }

    #[test]
    fn missing_lun_row_is_not_found() {
        let body = "<QDocRoot><authPassed>1</authPassed><result>0</result><LUNInfo/></QDocRoot>";
        assert!(matches!(parse_lun(body), Err(NasError::NotFound { .. })));
    }

    #[test]
    fn decodes_login() {
        let body = "<QDocRoot><authPassed><![CDATA[1]]></authPassed>\
            <authSid><![CDATA[abc123]]></authSid></QDocRoot>";
        let session = parse_login(body).unwrap_or_else(|err| panic!("parse: {err}"));
        assert_eq!(session.sid(), "abc123");
    }

    #[test]
    fn rejected_login_is_auth_error() {
        let body = "<QDocRoot><authPassed>0</authPassed></QDocRoot>";
        assert!(matches!(parse_login(body), Err(NasError::Auth { .. })));
    }

    #[test]
    fn expired_session_is_auth_error() {
        let body = "<QDocRoot><authPassed>0</authPassed><result>0</result></QDocRoot>";
        assert!(matches!(
            parse_result_code("add_target", body),
            Err(NasError::Auth { .. })
        ));
    }

    #[test]
    fn invalid_pool_is_not_found() {
        let body = "<QDocRoot><result>-1</result></QDocRoot>";
        let result = parse_pool(body);
        assert!(
            matches!(result, Err(NasError::NotFound { code: -1, .. })),
            "unexpected outcome: {result:?}"
        );
    }

    #[test]
    fn decodes_pool() {
        let body = "<QDocRoot><result>0</result><PoolSubscription><poolID>1</poolID>\
            <capacity_bytes>1000</capacity_bytes><freesize_bytes>400</freesize_bytes>\
            </PoolSubscription></QDocRoot>";
        assert_eq!(
            parse_pool(body),
            Ok(PoolCapacity {
                capacity_bytes: 1000,
                free_bytes: 400
            })
        );
    }

    #[test]
    fn garbage_is_parse_error() {
        assert!(matches!(
            parse_result_code("add_lun", "not xml"),
            Err(NasError::Parse { .. })
        ));
    }
}
