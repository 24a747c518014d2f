//! Command-line interface definitions for the `qnap-csi` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, ValueEnum};

/// Top-level CLI for the `qnap-csi` binary.
#[derive(Debug, Parser)]
#[command(
    name = "qnap-csi",
    version,
    about = "Provision and attach QNAP iSCSI volumes",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Create a volume on the appliance.
    #[command(name = "create", about = "Create a volume on the appliance")]
    Create(CreateCommand),
    /// Delete a volume; unknown volumes are ignored.
    #[command(name = "delete", about = "Delete a volume")]
    Delete(VolumeArgs),
    /// List volumes one page at a time.
    #[command(name = "list", about = "List volumes")]
    List(ListCommand),
    /// Report pool capacity and volume size bounds.
    #[command(name = "capacity", about = "Report pool capacity")]
    Capacity(OutputArgs),
    /// Check capabilities against an existing volume.
    #[command(name = "validate", about = "Validate volume capabilities")]
    Validate(ValidateCommand),
    /// Attach and mount a volume on this node.
    #[command(name = "publish", about = "Attach and mount a volume on this node")]
    Publish(PublishCommand),
    /// Unmount a volume and close its session when unused.
    #[command(name = "unpublish", about = "Unmount and detach a volume")]
    Unpublish(UnpublishCommand),
    /// Print plugin identity and capabilities.
    #[command(name = "info", about = "Print plugin identity and capabilities")]
    Info(OutputArgs),
}

/// Options shared by every subcommand.
#[derive(Debug, Args)]
pub(crate) struct OutputArgs {
    /// Emit log events as JSON lines on stderr.
    #[arg(long)]
    pub(crate) json_logs: bool,
}

/// Access mode accepted on the command line.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub(crate) enum AccessModeArg {
    /// One node, read-write.
    #[default]
    SingleNodeWriter,
    /// One node, read-only.
    SingleNodeReaderOnly,
    /// Many nodes, read-only.
    MultiNodeReaderOnly,
    /// Many nodes, one writer.
    MultiNodeSingleWriter,
    /// Many nodes, many writers.
    MultiNodeMultiWriter,
}

/// Capability requested for a volume.
#[derive(Debug, Args)]
pub(crate) struct CapabilityArgs {
    /// Access mode to request.
    #[arg(long, value_enum, default_value_t = AccessModeArg::SingleNodeWriter)]
    pub(crate) access_mode: AccessModeArg,
    /// Request a raw block device instead of a filesystem.
    #[arg(long, conflicts_with_all = ["fs_type", "mount_flag"])]
    pub(crate) block: bool,
    /// Filesystem to create on a blank device.
    #[arg(long, value_name = "FS")]
    pub(crate) fs_type: Option<String>,
    /// Extra mount option; may be repeated.
    #[arg(long, value_name = "OPTION")]
    pub(crate) mount_flag: Vec<String>,
}

/// Arguments for `qnap-csi create`.
#[derive(Debug, Args)]
pub(crate) struct CreateCommand {
    /// Volume name; normalized to lowercase letters and digits.
    pub(crate) name: String,
    /// Minimum size in bytes; zero leaves it unset.
    #[arg(long, default_value_t = 0, value_name = "BYTES")]
    pub(crate) required_bytes: u64,
    /// Maximum size in bytes; zero leaves it unset.
    #[arg(long, default_value_t = 0, value_name = "BYTES")]
    pub(crate) limit_bytes: u64,
    /// Requested capability.
    #[command(flatten)]
    pub(crate) capability: CapabilityArgs,
    /// Output options.
    #[command(flatten)]
    pub(crate) output: OutputArgs,
}

/// Arguments naming a single volume.
#[derive(Debug, Args)]
pub(crate) struct VolumeArgs {
    /// Volume identifier.
    pub(crate) volume_id: String,
    /// Output options.
    #[command(flatten)]
    pub(crate) output: OutputArgs,
}

/// Arguments for `qnap-csi list`.
#[derive(Debug, Args)]
pub(crate) struct ListCommand {
    /// Token returned by the previous page.
    #[arg(long, default_value = "", value_name = "TOKEN")]
    pub(crate) starting_token: String,
    /// Page size; zero lists everything.
    #[arg(long, default_value_t = 0, value_name = "N")]
    pub(crate) max_entries: u32,
    /// Output options.
    #[command(flatten)]
    pub(crate) output: OutputArgs,
}

/// Arguments for `qnap-csi validate`.
#[derive(Debug, Args)]
pub(crate) struct ValidateCommand {
    /// Volume identifier.
    pub(crate) volume_id: String,
    /// Capability to check.
    #[command(flatten)]
    pub(crate) capability: CapabilityArgs,
    /// Output options.
    #[command(flatten)]
    pub(crate) output: OutputArgs,
}

/// Arguments for `qnap-csi publish`.
#[derive(Debug, Args)]
pub(crate) struct PublishCommand {
    /// Volume identifier.
    pub(crate) volume_id: String,
    /// Directory to mount the volume at.
    pub(crate) target_path: String,
    /// Volume context entry as `KEY=VALUE`; may be repeated.
    #[arg(long = "context", value_name = "KEY=VALUE", required = true)]
    pub(crate) context: Vec<String>,
    /// Mount read-only.
    #[arg(long)]
    pub(crate) read_only: bool,
    /// Requested capability.
    #[command(flatten)]
    pub(crate) capability: CapabilityArgs,
    /// Output options.
    #[command(flatten)]
    pub(crate) output: OutputArgs,
}

/// Arguments for `qnap-csi unpublish`.
#[derive(Debug, Args)]
pub(crate) struct UnpublishCommand {
    /// Volume identifier.
    pub(crate) volume_id: String,
    /// Mount point to release.
    pub(crate) target_path: String,
    /// Output options.
    #[command(flatten)]
    pub(crate) output: OutputArgs,
}

impl Cli {
    /// Output options of the selected subcommand.
    pub(crate) const fn output(&self) -> &OutputArgs {
        match self {
            Self::Create(command) => &command.output,
            Self::Delete(command) => &command.output,
            Self::List(command) => &command.output,
            Self::Validate(command) => &command.output,
            Self::Publish(command) => &command.output,
            Self::Unpublish(command) => &command.output,
            Self::Capacity(output) | Self::Info(output) => output,
        }
    }
}
