//! Command-line interface definitions for the `flotilla` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `flotilla` binary.
///
/// The account is read from `FLOTILLA_ACCOUNT_*` environment variables or
/// `flotilla.toml`.
#[derive(Debug, Parser)]
#[command(
    name = "flotilla",
    about = "Create and manage container clusters across cloud backends",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Do not read or write the account cache for this invocation.
    #[arg(long, global = true)]
    pub(crate) no_cache: bool,
    /// Seconds to wait for a cluster to settle when --wait is given.
    #[arg(long, global = true, value_name = "SECONDS")]
    pub(crate) wait_timeout: Option<u64>,
    /// Operation to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Cluster operations.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Show the account's cluster limits.
    #[command(name = "quotas")]
    Quotas,
    /// Create a cluster.
    #[command(name = "create")]
    Create(CreateCommand),
    /// Show one cluster.
    #[command(name = "get")]
    Get(ClusterCommand),
    /// List clusters.
    #[command(name = "list", visible_alias = "ls")]
    List,
    /// List cluster templates, optionally filtered by a glob pattern.
    #[command(name = "templates")]
    Templates(TemplatesCommand),
    /// Set a cluster's node count.
    #[command(name = "resize")]
    Resize(ScaleCommand),
    /// Add nodes to a cluster.
    #[command(name = "grow")]
    Grow(ScaleCommand),
    /// Turn autoscaling on or off.
    #[command(name = "autoscale")]
    Autoscale(AutoscaleCommand),
    /// Rebuild a cluster.
    #[command(name = "rebuild")]
    Rebuild(ClusterCommand),
    /// Delete a cluster and its local credentials.
    #[command(name = "delete", visible_alias = "rm")]
    Delete(ClusterCommand),
    /// Download a cluster's credentials bundle and print its directory.
    #[command(name = "credentials", visible_alias = "creds")]
    Credentials(CredentialsCommand),
}

/// Arguments for `flotilla create`.
#[derive(Debug, Args)]
pub(crate) struct CreateCommand {
    /// Name of the new cluster.
    pub(crate) name: String,
    /// Template name or glob pattern (case-insensitive).
    #[arg(long, short = 't', value_name = "PATTERN")]
    pub(crate) template: Option<String>,
    /// Number of nodes.
    #[arg(long, short = 'n', default_value_t = 1)]
    pub(crate) nodes: u32,
    /// Wait until the cluster is active.
    #[arg(long)]
    pub(crate) wait: bool,
}

/// Arguments for commands addressing one cluster.
#[derive(Debug, Args)]
pub(crate) struct ClusterCommand {
    /// Cluster identifier or name.
    pub(crate) cluster: String,
    /// Wait until the cluster settles.
    #[arg(long)]
    pub(crate) wait: bool,
}

/// Arguments for `flotilla templates`.
#[derive(Debug, Args)]
pub(crate) struct TemplatesCommand {
    /// Glob pattern matched against template names.
    pub(crate) filter: Option<String>,
}

/// Arguments for `flotilla resize` and `flotilla grow`.
#[derive(Debug, Args)]
pub(crate) struct ScaleCommand {
    /// Cluster identifier or name.
    pub(crate) cluster: String,
    /// Node count (resize) or nodes to add (grow).
    pub(crate) nodes: u32,
    /// Wait until the cluster is active.
    #[arg(long)]
    pub(crate) wait: bool,
}

/// Arguments for `flotilla autoscale`.
#[derive(Debug, Args)]
pub(crate) struct AutoscaleCommand {
    /// Cluster identifier or name.
    pub(crate) cluster: String,
    /// Desired setting.
    #[arg(value_parser = ["on", "off"])]
    pub(crate) setting: String,
}

/// Arguments for `flotilla credentials`.
#[derive(Debug, Args)]
pub(crate) struct CredentialsCommand {
    /// Cluster identifier or name.
    pub(crate) cluster: String,
    /// Directory to write the bundle to instead of the default location.
    #[arg(long, value_name = "DIR")]
    pub(crate) path: Option<PathBuf>,
    /// Download again even when a valid bundle exists.
    #[arg(long, conflicts_with = "remove")]
    pub(crate) force: bool,
    /// Remove the local bundle instead of downloading it.
    #[arg(long)]
    pub(crate) remove: bool,
}
