//! Command-line interface definitions for the `zstack-machine` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Parser, Subcommand};

/// Top-level CLI for the `zstack-machine` binary.
#[derive(Debug, Parser)]
#[command(
    name = "zstack-machine",
    about = "Create and drive a ZStack VM instance through its lifecycle",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Instance to operate on. Required by every command except `create` and
    /// `list`.
    #[arg(
        long,
        global = true,
        env = "ZSTACK_INSTANCE_UUID",
        value_name = "UUID"
    )]
    pub(crate) instance_uuid: Option<String>,
    /// Lifecycle operation to perform.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Lifecycle operations exposed by the binary.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Subcommand)]
pub(crate) enum Command {
    /// Create an instance from the configured image and offering, then print
    /// its UUID.
    Create,
    /// Power the instance on.
    Start,
    /// Stop the instance gracefully.
    Stop,
    /// Power the instance off immediately.
    Kill,
    /// Reboot the instance.
    Restart,
    /// Delete and expunge the instance.
    Remove,
    /// Print the instance state (`Running`, `Paused`, `Stopped` or `Unknown`).
    State,
    /// Print the instance IP address.
    Ip,
    /// Print the Docker endpoint URL of the instance.
    Url,
    /// List every instance visible to the account.
    List,
}

impl Command {
    /// Returns `true` when the command acts on an existing instance.
    pub(crate) const fn needs_instance(self) -> bool {
        !matches!(self, Self::Create | Self::List)
    }
}
