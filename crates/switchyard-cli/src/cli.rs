//! Command-line argument definitions for the switchyard operator CLI.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use switchyard_core::GatewaySettings;

/// Operator tooling for the switchyard inference gateway.
#[derive(Debug, Parser)]
#[command(name = "switchyard", version, about)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,

    /// Log filter, `RUST_LOG` syntax.
    #[arg(long, global = true, default_value = "switchyard_routing=info,switchyard_cli=info")]
    pub log_filter: String,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Rebuild the scorecard snapshot from the telemetry log.
    Recalibrate {
        /// Telemetry log to fold in (JSONL).
        #[arg(long)]
        log: PathBuf,
        /// Snapshot history file to read and append to.
        #[arg(long)]
        snapshots: PathBuf,
        /// External prior table (TOML). Omit to run without fresh priors.
        #[arg(long)]
        priors: Option<PathBuf>,
        /// Pseudo-sample weight of the external prior.
        #[arg(long, default_value_t = GatewaySettings::default().prior_pseudo_samples)]
        prior_weight: f64,
    },
    /// Inspect scorecard snapshots.
    Scorecards {
        /// What to show.
        #[command(subcommand)]
        command: ScorecardCommand,
    },
    /// Inspect the model registry.
    Registry {
        /// What to show.
        #[command(subcommand)]
        command: RegistryCommand,
    },
}

/// Scorecard inspection subcommands.
#[derive(Debug, Subcommand)]
pub enum ScorecardCommand {
    /// Print the active snapshot's cards.
    Show {
        /// Snapshot history file.
        #[arg(long)]
        snapshots: PathBuf,
    },
    /// Print the cards that changed between the previous and active
    /// snapshots.
    Diff {
        /// Snapshot history file.
        #[arg(long)]
        snapshots: PathBuf,
    },
}

/// Registry inspection subcommands.
#[derive(Debug, Subcommand)]
pub enum RegistryCommand {
    /// List registered backends.
    List {
        /// Registry document (TOML).
        #[arg(long)]
        registry: PathBuf,
    },
}
