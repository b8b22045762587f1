pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use aisle_core::config::LoadOptions;
use clap::{Parser, Subcommand};

use crate::commands::route::RouteArgs;

#[derive(Debug, Parser)]
#[command(
    name = "aisle",
    about = "Aisle shopping-assistant routing CLI",
    long_about = "Route shopper utterances, inspect effective configuration, and check dependency readiness.",
    after_help = "Examples:\n  aisle route \"oat milk\" --json\n  aisle route \"add the second one to my cart\" --session s-1\n  aisle config\n  aisle doctor --json"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Config file to load instead of aisle.toml")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Classify one utterance and search for it within the routing deadline")]
    Route {
        text: String,
        #[arg(long, default_value = "cli", help = "Session whose context is used and updated")]
        session: String,
        #[arg(long, help = "Shopper identifier attached to the utterance")]
        user: Option<String>,
        #[arg(long, help = "Fixed search alpha in [0, 1]; disables alpha correction")]
        alpha: Option<f64>,
        #[arg(long, help = "Maximum number of results")]
        limit: Option<usize>,
        #[arg(long = "deadline-ms", help = "Overrides the configured routing deadline")]
        deadline_ms: Option<u64>,
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config and check classifier and search backend readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions {
        require_file: cli.config.is_some(),
        config_path: cli.config,
        ..LoadOptions::default()
    };

    let result = match cli.command {
        Command::Route { text, session, user, alpha, limit, deadline_ms, json } => {
            let args = RouteArgs { text, session, user, alpha, limit, deadline_ms, json };
            commands::route::run(args, options)
        }
        Command::Config => commands::config::run(options),
        Command::Doctor { json } => commands::doctor::run(json, options),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
