//! Unit tests for configuration loading and validation.

use std::time::Duration;

use qnap_csi::config::{ConfigError, DEFAULT_CONFIG_DIR, DEFAULT_DRIVER_NAME, DriverConfig};
use qnap_csi::nas::LoginPolicy;
use qnap_csi::test_support::EnvGuard;
use rstest::*;

#[fixture]
fn valid_config() -> DriverConfig {
    DriverConfig {
        url: Some(String::from("https://nas.example.test:443")),
        username: Some(String::from("admin")),
        password: Some(String::from("secret")),
        portal: Some(String::from("10.0.0.5:3260")),
        storage_pool_id: 2,
        node_id: Some(String::from("worker-1")),
        config_dir: String::from(DEFAULT_CONFIG_DIR),
        driver_name: String::from(DEFAULT_DRIVER_NAME),
        lun_poll_interval_ms: 250,
        lun_ready_timeout_secs: 600,
        reuse_session: false,
        log_level: String::from("info"),
    }
}

fn assert_actionable(error: &ConfigError, env_var: &str, toml_key: &str) {
    let message = error.to_string();
    assert!(
        message.contains(env_var),
        "error should mention env var {env_var}: {message}"
    );
    assert!(
        message.contains("qnap-csi.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains(toml_key),
        "error should mention TOML key {toml_key}: {message}"
    );
}

#[rstest]
#[case::url(|cfg: &mut DriverConfig| cfg.url = None, "QNAP_URL", "url")]
#[case::blank_user(
    |cfg: &mut DriverConfig| cfg.username = Some(String::from("  ")),
    "QNAP_USERNAME",
    "username"
)]
#[case::password(|cfg: &mut DriverConfig| cfg.password = None, "QNAP_PASSWORD", "password")]
#[case::portal(|cfg: &mut DriverConfig| cfg.portal = None, "QNAP_PORTAL", "portal")]
fn controller_validation_names_missing_field(
    valid_config: DriverConfig,
    #[case] mutate: fn(&mut DriverConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);

    let result = cfg.validate_controller();

    let Err(error) = result else {
        panic!("validation should fail: {result:?}");
    };
    assert!(matches!(error, ConfigError::MissingField(_)));
    assert_actionable(&error, env_var, toml_key);
}

#[rstest]
fn controller_validation_returns_credentials(valid_config: DriverConfig) {
    let access = valid_config
        .validate_controller()
        .unwrap_or_else(|err| panic!("valid config rejected: {err}"));
    assert_eq!(access.url, "https://nas.example.test:443");
    assert_eq!(access.username, "admin");
    assert_eq!(access.password, "secret");
}

#[rstest]
fn zero_poll_interval_is_invalid(valid_config: DriverConfig) {
    let cfg = DriverConfig {
        lun_poll_interval_ms: 0,
        ..valid_config
    };
    let result = cfg.validate_controller();
    assert!(
        matches!(&result, Err(ConfigError::Invalid(message)) if message.contains("lun_poll_interval_ms")),
        "unexpected outcome: {result:?}"
    );
}

#[rstest]
fn node_validation_needs_only_node_fields(valid_config: DriverConfig) {
    let node_only = DriverConfig {
        url: None,
        username: None,
        password: None,
        portal: None,
        ..valid_config.clone()
    };
    assert_eq!(node_only.validate_node(), Ok("worker-1"));

    let missing = DriverConfig {
        node_id: None,
        ..valid_config
    };
    let result = missing.validate_node();
    let Err(error) = result else {
        panic!("validation should fail: {result:?}");
    };
    assert_actionable(&error, "QNAP_NODE_ID", "node_id");
}

#[rstest]
fn settings_follow_configuration(valid_config: DriverConfig) {
    let settings = valid_config
        .provisioner_settings()
        .unwrap_or_else(|err| panic!("settings rejected: {err}"));
    assert_eq!(settings.pool_id, 2);
    assert_eq!(settings.portal, "10.0.0.5:3260");
    assert_eq!(settings.poll_interval, Duration::from_millis(250));
    assert_eq!(settings.ready_timeout, Some(Duration::from_secs(600)));
    assert_eq!(settings.login_policy, LoginPolicy::EveryRequest);
}

#[rstest]
fn zero_timeout_waits_for_cancellation_only(valid_config: DriverConfig) {
    let cfg = DriverConfig {
        lun_ready_timeout_secs: 0,
        reuse_session: true,
        ..valid_config
    };
    let settings = cfg
        .provisioner_settings()
        .unwrap_or_else(|err| panic!("settings rejected: {err}"));
    assert_eq!(settings.ready_timeout, None);
    assert_eq!(settings.login_policy, LoginPolicy::Reuse);
}

#[tokio::test]
async fn environment_values_layer_over_defaults() {
    let _guard = EnvGuard::set_vars(&[
        ("QNAP_URL", Some("https://nas.example.test")),
        ("QNAP_NODE_ID", Some("worker-9")),
        ("QNAP_DRIVER_NAME", None),
        ("QNAP_CONFIG_DIR", None),
    ])
    .await;

    let cfg = DriverConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("load failed: {err}"));

    assert_eq!(cfg.url.as_deref(), Some("https://nas.example.test"));
    assert_eq!(cfg.node_id.as_deref(), Some("worker-9"));
    assert_eq!(cfg.driver_name, DEFAULT_DRIVER_NAME);
    assert_eq!(cfg.config_dir, DEFAULT_CONFIG_DIR);
    assert_eq!(cfg.storage_pool_id, 1);
    assert_eq!(cfg.lun_ready_timeout_secs, 600);
    assert!(!cfg.reuse_session);
}
