//! Switchyard operator CLI: recalibration and inspection tooling for the
//! inference routing gateway.
#![cfg_attr(
    test,
    allow(
        dead_code,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::missing_errors_doc,
        clippy::print_stdout,
        clippy::print_stderr,
        reason = "Allow for tests"
    )
)]

use anyhow::Result;
use clap::Parser as _;
use cli::{Cli, Command, RegistryCommand, ScorecardCommand};
use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _,
};

mod cli;
mod handlers;

fn main() -> Result<()> {
    let cli = Cli::parse();

    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| cli.log_filter.clone().into()))
        .with(fmt::layer().with_target(true).with_level(true))
        .init();

    match cli.command {
        Command::Recalibrate {
            log,
            snapshots,
            priors,
            prior_weight,
        } => handlers::handle_recalibrate(&log, &snapshots, priors, prior_weight),
        Command::Scorecards { command } => match command {
            ScorecardCommand::Show { snapshots } => handlers::handle_scorecards_show(&snapshots),
            ScorecardCommand::Diff { snapshots } => handlers::handle_scorecards_diff(&snapshots),
        },
        Command::Registry { command } => match command {
            RegistryCommand::List { registry } => handlers::handle_registry_list(&registry),
        },
    }
}
