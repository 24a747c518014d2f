//! Binary entry point for the `qnap-csi` CLI.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use qnap_csi::capability::{AccessMode, AccessType, VolumeCapability};
use qnap_csi::driver::{
    ControllerCapability, NodeCapability, PluginCapability, controller_capabilities,
    node_capabilities, plugin_capabilities,
};
use qnap_csi::logging::{self, LogFormat, LoggingError};
use qnap_csi::{
    AttachRequest, AttachmentManager, CapacityRange, ConfigError, CreateRequest, DescriptorStore,
    Driver, DriverConfig, DriverError, IscsiadmSessions, NasError, PluginInfo,
    ProcessCommandRunner, Provisioner, QnapClient, SystemMounter,
};

mod cli;

use cli::{AccessModeArg, CapabilityArgs, Cli};

type HostDriver = Driver<
    QnapClient,
    IscsiadmSessions<ProcessCommandRunner>,
    SystemMounter<ProcessCommandRunner>,
>;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("logging setup failed: {0}")]
    Logging(#[from] LoggingError),
    #[error("appliance client: {0}")]
    Client(#[from] NasError),
    #[error("{0}")]
    Driver(#[from] DriverError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("failed to write output: {0}")]
    Output(String),
}

impl CliError {
    const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Logging(_) | Self::InvalidArgument(_) => 2,
            Self::Client(_) | Self::Driver(_) | Self::Output(_) => 1,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            err.exit_code()
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let config = DriverConfig::load_without_cli_args()?;
    let format = if cli.output().json_logs {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    logging::init(&config.log_level, format)?;

    match cli {
        Cli::Create(command) => {
            let driver = controller_driver(&config)?;
            let request = CreateRequest {
                name: command.name,
                capacity: Some(CapacityRange::new(
                    command.required_bytes,
                    command.limit_bytes,
                )),
                capabilities: vec![capability_from(&command.capability)],
            };
            let cancel = CancellationToken::new();
            spawn_interrupt_watch(cancel.clone());
            write_json(&driver.create_volume(&request, &cancel).await?)
        }
        Cli::Delete(command) => {
            let driver = controller_driver(&config)?;
            write_json(&driver.delete_volume(&command.volume_id).await?)
        }
        Cli::List(command) => {
            let driver = controller_driver(&config)?;
            write_json(
                &driver
                    .list_volumes(&command.starting_token, command.max_entries)
                    .await?,
            )
        }
        Cli::Capacity(_) => {
            let driver = controller_driver(&config)?;
            write_json(&driver.get_capacity().await?)
        }
        Cli::Validate(command) => {
            let driver = controller_driver(&config)?;
            let capabilities = [capability_from(&command.capability)];
            write_json(
                &driver
                    .validate_volume_capabilities(&command.volume_id, &capabilities)
                    .await?,
            )
        }
        Cli::Publish(command) => {
            let driver = node_driver(&config)?;
            let request = AttachRequest {
                volume_id: command.volume_id,
                target_path: Utf8PathBuf::from(command.target_path),
                capability: Some(capability_from(&command.capability)),
                read_only: command.read_only,
                volume_context: parse_context(&command.context)?,
            };
            write_json(&driver.node_publish_volume(&request).await?)
        }
        Cli::Unpublish(command) => {
            let driver = node_driver(&config)?;
            let target = Utf8PathBuf::from(command.target_path);
            write_json(
                &driver
                    .node_unpublish_volume(&command.volume_id, &target)
                    .await?,
            )
        }
        Cli::Info(_) => write_json(&InfoReport {
            plugin: PluginInfo::new(&config.driver_name),
            plugin_capabilities: plugin_capabilities(),
            controller_capabilities: controller_capabilities(),
            node_capabilities: node_capabilities(),
            node_id: config.node_id.clone(),
        }),
    }
}

#[derive(Debug, Serialize)]
struct InfoReport {
    plugin: PluginInfo,
    plugin_capabilities: &'static [PluginCapability],
    controller_capabilities: &'static [ControllerCapability],
    node_capabilities: &'static [NodeCapability],
    node_id: Option<String>,
}

fn controller_driver(config: &DriverConfig) -> Result<HostDriver, CliError> {
    let access = config.validate_controller()?;
    let settings = config.provisioner_settings()?;
    let client = QnapClient::new(access.url, access.username, access.password)?;
    let driver = Driver::new(PluginInfo::new(&config.driver_name))
        .with_controller(Provisioner::new(client, settings));
    driver.set_ready(true);
    Ok(driver)
}

fn node_driver(config: &DriverConfig) -> Result<HostDriver, CliError> {
    let node_id = config.validate_node()?;
    let manager = AttachmentManager::new(
        IscsiadmSessions::new(ProcessCommandRunner),
        SystemMounter::new(ProcessCommandRunner),
        DescriptorStore::new(config.descriptor_dir()),
    );
    let driver = Driver::new(PluginInfo::new(&config.driver_name)).with_node(node_id, manager);
    driver.set_ready(true);
    Ok(driver)
}

/// Cancels `token` on Ctrl-C so an in-flight create rolls back.
fn spawn_interrupt_watch(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, cancelling request");
                token.cancel();
            }
            Err(err) => warn!(error = %err, "could not listen for interrupts"),
        }
    });
}

const fn access_mode_from(arg: AccessModeArg) -> AccessMode {
    match arg {
        AccessModeArg::SingleNodeWriter => AccessMode::SingleNodeWriter,
        AccessModeArg::SingleNodeReaderOnly => AccessMode::SingleNodeReaderOnly,
        AccessModeArg::MultiNodeReaderOnly => AccessMode::MultiNodeReaderOnly,
        AccessModeArg::MultiNodeSingleWriter => AccessMode::MultiNodeSingleWriter,
        AccessModeArg::MultiNodeMultiWriter => AccessMode::MultiNodeMultiWriter,
    }
}

fn capability_from(args: &CapabilityArgs) -> VolumeCapability {
    let access_type = if args.block {
        AccessType::Block
    } else {
        AccessType::Mount {
            fs_type: args.fs_type.clone().unwrap_or_default(),
            mount_flags: args.mount_flag.clone(),
        }
    };
    VolumeCapability {
        access_mode: access_mode_from(args.access_mode),
        access_type: Some(access_type),
    }
}

fn parse_context(entries: &[String]) -> Result<BTreeMap<String, String>, CliError> {
    entries
        .iter()
        .map(|entry| {
            entry
                .split_once('=')
                .filter(|(key, _)| !key.is_empty())
                .map(|(key, value)| (key.to_owned(), value.to_owned()))
                .ok_or_else(|| {
                    CliError::InvalidArgument(format!("context entry '{entry}' is not KEY=VALUE"))
                })
        })
        .collect()
}

fn write_json(value: &impl Serialize) -> Result<(), CliError> {
    let rendered =
        serde_json::to_string_pretty(value).map_err(|err| CliError::Output(err.to_string()))?;
    writeln!(io::stdout(), "{rendered}").map_err(|err| CliError::Output(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use qnap_csi::driver::Code;

    fn capability_args(block: bool) -> CapabilityArgs {
        CapabilityArgs {
            access_mode: AccessModeArg::SingleNodeReaderOnly,
            block,
            fs_type: Some(String::from("xfs")),
            mount_flag: vec![String::from("noatime")],
        }
    }

    #[test]
    fn context_entries_become_a_map() {
        let parsed = parse_context(&[
            String::from("targetPortal=10.0.0.5:3260"),
            String::from("portals=[\"10.0.0.6\"]"),
            String::from("lun=0"),
        ])
        .unwrap_or_else(|err| panic!("parse failed: {err}"));

        assert_eq!(
            parsed.get("targetPortal").map(String::as_str),
            Some("10.0.0.5:3260")
        );
        assert_eq!(
            parsed.get("portals").map(String::as_str),
            Some("[\"10.0.0.6\"]")
        );
        assert_eq!(parsed.len(), 3);
    }

    #[rstest]
    #[case("no-separator")]
    #[case("=value")]
    fn malformed_context_entries_are_rejected(#[case] entry: &str) {
        let result = parse_context(&[entry.to_owned()]);
        assert!(
            matches!(&result, Err(CliError::InvalidArgument(message)) if message.contains(entry)),
            "unexpected outcome: {result:?}"
        );
    }

    #[test]
    fn mount_capability_keeps_fs_and_flags() {
        let capability = capability_from(&capability_args(false));
        assert_eq!(capability.access_mode, AccessMode::SingleNodeReaderOnly);
        assert_eq!(capability.fs_type(), Some("xfs"));
        assert_eq!(capability.mount_flags(), &[String::from("noatime")]);
    }

    #[test]
    fn block_capability_drops_mount_settings() {
        let capability = capability_from(&capability_args(true));
        assert_eq!(capability.access_type, Some(AccessType::Block));
    }

    #[test]
    fn configuration_errors_exit_with_usage_code() {
        let config = CliError::Config(ConfigError::MissingField(String::from("url")));
        assert_eq!(config.exit_code(), 2);
        let driver = CliError::Driver(DriverError::new(Code::Internal, "boom"));
        assert_eq!(driver.exit_code(), 1);
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        let err = CliError::Driver(DriverError::new(Code::NotFound, "volume pgdata not found"));
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));
        assert_eq!(rendered, "NOT_FOUND: volume pgdata not found\n");
    }
}
