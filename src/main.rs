// SPDX-License-Identifier: GPL-3.0-only

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use crate::apply::Applier;
use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::controller::Controller;
use crate::helper::{Command, HelperInvoker, ProcessInvoker, parse_detect};

#[macro_use]
extern crate tracing;

mod apply;
mod cli;
mod config;
mod controller;
mod daemon;
mod error;
mod helper;
mod instance;

fn setup_logs() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new(format!(
        "warn,{}=warn",
        env!("CARGO_CRATE_NAME")
    )));

    if let Ok(journal_layer) = tracing_journald::layer() {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .with(journal_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    setup_logs();
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let config = Config::load_or_default(&config_path);
    let helper_path = cli
        .helper
        .unwrap_or_else(|| config.helper_path.clone());
    let invoker = ProcessInvoker::new(helper_path).with_timeout(config.helper_timeout());

    match cli.command {
        Commands::Detect => {
            let payload = invoker
                .invoke(Command::detect_args())
                .await
                .context("Helper returned no answer to detect")?;
            let displays =
                parse_detect(&payload).context("Helper returned an invalid display list")?;
            println!("{}", serde_json::to_string_pretty(&displays)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Apply(args) => {
            let targets = args.resolve(&config);
            let applier = Applier::spawn(Arc::new(invoker), config.retry_policy());
            let report = applier.apply_and_wait(targets).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.all_ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Daemon => {
            let applier = Applier::spawn(Arc::new(invoker), config.retry_policy());
            let controller = Controller::new(applier, config, Some(config_path));
            daemon::run(controller).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
