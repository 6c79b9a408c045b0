pub mod commands;
pub mod logging;

use clap::{Parser, Subcommand};
use leadwise_core::config::{AppConfig, LoadOptions};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "leadwise",
    about = "Leadwise operator CLI",
    long_about = "Operate the Leadwise store, knowledge ingestion, config inspection, and smoke validation.",
    after_help = "Examples:\n  leadwise migrate\n  leadwise ingest --site https://example.com\n  leadwise config\n  leadwise smoke"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Crawl knowledge sites, embed their chunks and upsert them into the store")]
    Ingest {
        #[arg(long = "site", help = "Root URL to crawl; repeatable, replaces knowledge.sites")]
        sites: Vec<String>,
    },
    #[command(about = "Run end-to-end readiness checks with per-check timing details")]
    Smoke,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    // Commands report their own config failures; logging just falls back to defaults.
    let logging = AppConfig::load(LoadOptions::default())
        .map(|config| config.logging)
        .unwrap_or_else(|_| AppConfig::default().logging);
    logging::init(&logging);

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Ingest { sites } => commands::ingest::run(sites),
        Command::Smoke => commands::smoke::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
