//! Command-line interface definitions for the `disk-migration` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, ValueEnum};

/// Top-level CLI for the `disk-migration` binary.
#[derive(Debug, Parser)]
#[command(
    name = "disk-migration",
    about = "Move Kubernetes persistent volume data onto fresh volumes without data loss",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Copy a claim's data onto a new volume and rebind the claim to it.
    #[command(
        name = "migrate",
        about = "Copy a claim's data onto a new volume and rebind the claim to it"
    )]
    Migrate(MigrateCommand),
    /// Move a claim onto an existing volume.
    #[command(name = "rebind", about = "Move a claim onto an existing volume")]
    Rebind(RebindCommand),
    /// Point an available volume at a claim.
    #[command(name = "force-bind", about = "Point an available volume at a claim")]
    ForceBind(ForceBindCommand),
    /// Delete a chain database from the volume behind a claim.
    #[command(
        name = "delete-chain",
        about = "Delete a chain database from the volume behind a claim"
    )]
    DeleteChain(DeleteChainCommand),
    /// Delete leftover volumes of a storage class.
    #[command(name = "cleanup-pvs", about = "Delete leftover volumes of a storage class")]
    CleanupPvs(CleanupCommand),
    /// Restore the Delete reclaim policy on every volume.
    #[command(
        name = "fix-reclaim-policies",
        about = "Restore the Delete reclaim policy on every volume"
    )]
    FixReclaimPolicies(FixPoliciesCommand),
}

/// Namespace override shared by namespaced commands.
#[derive(Debug, Args)]
pub(crate) struct NamespaceArg {
    /// Namespace holding the claims and jobs (defaults to configuration).
    #[arg(short = 'n', long, value_name = "NAMESPACE")]
    pub(crate) namespace: Option<String>,
}

/// Claim selection shared by commands that accept a pod name instead.
#[derive(Debug, Args)]
pub(crate) struct ClaimTarget {
    /// Claim to operate on, or the pod name when `--pod` is given.
    #[arg(value_name = "CLAIM")]
    pub(crate) claim: String,
    /// Treat CLAIM as a pod name and derive the claim from the configured
    /// claim prefix.
    #[arg(long)]
    pub(crate) pod: bool,
}

/// Copy scope accepted by `migrate --copy-level`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub(crate) enum CopyLevelArg {
    /// Synchronise the whole chain directory.
    #[default]
    All,
    /// Synchronise only the chain database.
    ChainOnly,
    /// List both volumes without copying.
    PrintOnly,
}

/// Arguments for the `disk-migration migrate` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct MigrateCommand {
    #[command(flatten)]
    pub(crate) target: ClaimTarget,
    /// How much of the chain directory to copy.
    #[arg(long, value_enum, default_value_t = CopyLevelArg::All)]
    pub(crate) copy_level: CopyLevelArg,
    #[command(flatten)]
    pub(crate) namespace: NamespaceArg,
}

/// Arguments for the `disk-migration rebind` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RebindCommand {
    /// Claim to move.
    pub(crate) claim: String,
    /// Volume the claim should end up bound to.
    pub(crate) volume: String,
    /// Volume the claim was bound to before an interrupted run deleted it.
    #[arg(long, value_name = "VOLUME")]
    pub(crate) from_volume: Option<String>,
    #[command(flatten)]
    pub(crate) namespace: NamespaceArg,
}

/// Arguments for the `disk-migration force-bind` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ForceBindCommand {
    /// Available volume to bind.
    pub(crate) volume: String,
    /// Claim the volume should reference.
    pub(crate) claim: String,
    #[command(flatten)]
    pub(crate) namespace: NamespaceArg,
}

/// Arguments for the `disk-migration delete-chain` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DeleteChainCommand {
    #[command(flatten)]
    pub(crate) target: ClaimTarget,
    /// Chain directory to delete from (defaults to configuration).
    #[arg(long, value_name = "CHAIN")]
    pub(crate) chain_name: Option<String>,
    /// Leave the frontier database in place.
    #[arg(long)]
    pub(crate) keep_frontier: bool,
    /// Skip the confirmation prompt.
    #[arg(short = 'y', long)]
    pub(crate) yes: bool,
    #[command(flatten)]
    pub(crate) namespace: NamespaceArg,
}

/// Arguments for the `disk-migration cleanup-pvs` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct CleanupCommand {
    /// Only volumes whose storage class starts with this prefix are considered.
    #[arg(long, value_name = "PREFIX", default_value = "azurefile")]
    pub(crate) storage_class_prefix: String,
    /// Skip the confirmation prompts.
    #[arg(short = 'y', long)]
    pub(crate) yes: bool,
}

/// Arguments for the `disk-migration fix-reclaim-policies` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct FixPoliciesCommand {
    /// Skip the confirmation prompts.
    #[arg(short = 'y', long)]
    pub(crate) yes: bool,
}
