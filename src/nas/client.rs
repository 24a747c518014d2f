//! HTTP client for the QNAP storage CGI endpoints.
//!
//! Every call is a form POST; the session id travels as the `sid` query
//! parameter and responses are XML documents carrying a `<result>` code.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;

use super::error::{NasError, expect_index, expect_result};
use super::types::{
    ChapOptions, LunIndex, LunInfo, LunSpec, PoolCapacity, Session, TargetIndex, TargetInfo,
    TargetOptions,
};
use super::{NasApi, NasFuture, xml};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const LOGIN_PATH: &str = "/cgi-bin/authLogin.cgi";
const DISK_MANAGE_PATH: &str = "/cgi-bin/disk/disk_manage.cgi";
const PORTAL_PATH: &str = "/cgi-bin/disk/iscsi_portal_setting.cgi";
const TARGET_PATH: &str = "/cgi-bin/disk/iscsi_target_setting.cgi";
const LUN_PATH: &str = "/cgi-bin/disk/iscsi_lun_setting.cgi";

type Params = Vec<(&'static str, String)>;

/// [`NasApi`] implementation backed by the appliance's HTTP interface.
#[derive(Clone, Debug)]
pub struct QnapClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    encoded_password: String,
}

impl QnapClient {
    /// Builds a client for the appliance at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`NasError::Transport`] when the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        username: impl Into<String>,
        password: &str,
    ) -> Result<Self, NasError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| NasError::Transport {
                operation: String::from("client_init"),
                message: err.to_string(),
            })?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            username: username.into(),
            encoded_password: STANDARD.encode(password),
        })
    }

    async fn post(
        &self,
        operation: &str,
        path: &str,
        query: &[(&'static str, String)],
        form: &[(&'static str, String)],
    ) -> Result<String, NasError> {
        let url = format!("{}{path}", self.base_url);
        debug!(operation, path, "calling appliance");

        let mut request = self.http.post(&url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if !form.is_empty() {
            request = request.form(form);
        }

        let response = request.send().await.map_err(|err| NasError::Transport {
            operation: operation.to_owned(),
            message: err.to_string(),
        })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(NasError::Status {
                operation: operation.to_owned(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|err| NasError::Transport {
            operation: operation.to_owned(),
            message: err.to_string(),
        })
    }
}

fn flag(value: bool) -> String {
    String::from(if value { "1" } else { "0" })
}

fn yes_no(value: bool) -> String {
    String::from(if value { "yes" } else { "no" })
}

fn with_sid(session: &Session, mut params: Params) -> Params {
    params.insert(0, ("sid", session.sid().to_owned()));
    params
}

impl NasApi for QnapClient {
    fn login(&self) -> NasFuture<'_, Session> {
        Box::pin(async move {
            let form = vec![
                ("user", self.username.clone()),
                ("pwd", self.encoded_password.clone()),
            ];
            let body = self.post("login", LOGIN_PATH, &[], &form).await?;
            xml::parse_login(&body)
        })
    }

    fn list_targets<'a>(&'a self, session: &'a Session) -> NasFuture<'a, Vec<TargetInfo>> {
        Box::pin(async move {
            let query = with_sid(
                session,
                vec![
                    ("func", String::from("extra_get")),
                    ("targetList", String::from("1")),
                ],
            );
            let body = self.post("list_targets", PORTAL_PATH, &query, &[]).await?;
            xml::parse_targets(&body)
        })
    }

    fn create_target<'a>(
        &'a self,
        session: &'a Session,
        name: &'a str,
        options: TargetOptions,
    ) -> NasFuture<'a, TargetIndex> {
        Box::pin(async move {
            const OPERATION: &str = "add_target";
            let query = with_sid(session, Vec::new());
            let form = vec![
                ("func", String::from(OPERATION)),
                ("targetName", name.to_owned()),
                ("targetAlias", name.to_owned()),
                ("bTargetDataDigest", flag(options.data_digest)),
                ("bTargetHeaderDigest", flag(options.header_digest)),
                ("bTargetClusterEnable", flag(options.cluster)),
            ];
            let body = self.post(OPERATION, TARGET_PATH, &query, &form).await?;
            let code = xml::parse_result_code(OPERATION, &body)?;
            expect_index(OPERATION, code).map(TargetIndex::new)
        })
    }

    fn create_initiator_binding<'a>(
        &'a self,
        session: &'a Session,
        target: TargetIndex,
        chap: &'a ChapOptions,
    ) -> NasFuture<'a, ()> {
        Box::pin(async move {
            const OPERATION: &str = "add_init";
            let query = with_sid(session, Vec::new());
            let form = vec![
                ("func", String::from(OPERATION)),
                ("targetIndex", target.to_string()),
                ("initiatorIndex", String::from("0")),
                ("bCHAPEnable", flag(chap.enabled)),
                ("CHAPUserName", chap.username.clone()),
                ("CHAPPasswd", chap.password.clone()),
                ("bMutualCHAPEnable", flag(chap.mutual_enabled)),
                ("mutualCHAPUserName", chap.mutual_username.clone()),
                ("mutualCHAPPasswd", chap.mutual_password.clone()),
            ];
            let body = self.post(OPERATION, TARGET_PATH, &query, &form).await?;
            let code = xml::parse_result_code(OPERATION, &body)?;
            expect_index(OPERATION, code).map(|_| ())
        })
    }

    fn create_lun<'a>(
        &'a self,
        session: &'a Session,
        spec: &'a LunSpec,
    ) -> NasFuture<'a, LunIndex> {
        Box::pin(async move {
            const OPERATION: &str = "add_lun";
            let query = with_sid(session, Vec::new());
            let form = vec![
                ("func", String::from(OPERATION)),
                ("LUNThinAllocate", flag(spec.thin)),
                ("LUNName", spec.name.clone()),
                ("LUNCapacity", spec.size_units.to_string()),
                ("LUNSectorSize", spec.sector_size.to_string()),
                ("WCEnable", flag(spec.write_cache)),
                ("FUAEnable", flag(spec.fua)),
                ("FileIO", String::from("no")),
                ("poolID", spec.pool_id.to_string()),
                ("lv_ifssd", yes_no(spec.ssd_cache)),
                ("LUNPath", spec.name.clone()),
                ("enable_tiering", flag(spec.tiering)),
            ];
            let body = self.post(OPERATION, LUN_PATH, &query, &form).await?;
            let code = xml::parse_result_code(OPERATION, &body)?;
            expect_index(OPERATION, code).map(LunIndex::new)
        })
    }

    fn get_lun<'a>(&'a self, session: &'a Session, lun: LunIndex) -> NasFuture<'a, LunInfo> {
        Box::pin(async move {
            let query = with_sid(
                session,
                vec![
                    ("func", String::from("extra_get")),
                    ("lun_info", String::from("1")),
                    ("lunID", lun.to_string()),
                ],
            );
            let body = self.post("get_lun", PORTAL_PATH, &query, &[]).await?;
            xml::parse_lun(&body)
        })
    }

    fn attach_lun<'a>(
        &'a self,
        session: &'a Session,
        lun: LunIndex,
        target: TargetIndex,
    ) -> NasFuture<'a, ()> {
        Box::pin(async move {
            const OPERATION: &str = "attach_lun";
            let query = with_sid(
                session,
                vec![
                    ("func", String::from("add_lun")),
                    ("LUNIndex", lun.to_string()),
                    ("targetIndex", target.to_string()),
                ],
            );
            let body = self.post(OPERATION, TARGET_PATH, &query, &[]).await?;
            let code = xml::parse_result_code(OPERATION, &body)?;
            expect_result(OPERATION, code, 0)
        })
    }

    fn delete_target<'a>(
        &'a self,
        session: &'a Session,
        target: TargetIndex,
    ) -> NasFuture<'a, ()> {
        Box::pin(async move {
            const OPERATION: &str = "remove_target";
            let query = with_sid(
                session,
                vec![
                    ("func", String::from(OPERATION)),
                    ("targetIndex", target.to_string()),
                ],
            );
            let body = self.post(OPERATION, TARGET_PATH, &query, &[]).await?;
            let code = xml::parse_result_code(OPERATION, &body)?;
            // Success echoes the removed index.
            expect_result(OPERATION, code, i64::from(target.get()))
        })
    }

    fn delete_lun<'a>(
        &'a self,
        session: &'a Session,
        lun: LunIndex,
        background: bool,
    ) -> NasFuture<'a, ()> {
        Box::pin(async move {
            const OPERATION: &str = "remove_lun";
            let mut params = vec![("func", String::from(OPERATION))];
            if background {
                params.push(("run_background", String::from("1")));
            }
            params.push(("LUNIndex", lun.to_string()));
            let query = with_sid(session, params);
            let body = self.post(OPERATION, LUN_PATH, &query, &[]).await?;
            let code = xml::parse_result_code(OPERATION, &body)?;
            expect_result(OPERATION, code, 0)
        })
    }

    fn pool_capacity<'a>(
        &'a self,
        session: &'a Session,
        pool_id: u32,
    ) -> NasFuture<'a, PoolCapacity> {
        Box::pin(async move {
            let query = with_sid(session, vec![("store", String::from("poolSubsc"))]);
            let form = vec![
                ("func", String::from("extra_get")),
                ("Pool_Subs", String::from("1")),
                ("poolID", pool_id.to_string()),
            ];
            let body = self
                .post("pool_capacity", DISK_MANAGE_PATH, &query, &form)
                .await?;
            xml::parse_pool(&body)
        })
    }
}
