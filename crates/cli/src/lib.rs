pub mod commands;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use phasequote_core::config::{AppConfig, LoadOptions, LogFormat, LoggingConfig};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "phasequote",
    about = "PhaseQuote operator CLI",
    long_about = "Operate the PhaseQuote pricing engine: migrations, demo data, config inspection, and quotation workflow.",
    after_help = "Examples:\n  phasequote migrate\n  phasequote seed\n  phasequote show QT-DEMO-0001\n  phasequote reprice QT-DEMO-0001 --rate-card enterprise\n  phasequote submit QT-DEMO-0001"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo catalog, rate cards and quotation, then verify them")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, pricing source readiness, and DB connectivity checks")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print a stored quotation with recomputed totals")]
    Show { quotation_id: String },
    #[command(about = "Re-price every item of a quotation and save it")]
    Reprice {
        quotation_id: String,
        #[arg(long, help = "Switch to this rate card before re-pricing")]
        rate_card: Option<String>,
        #[arg(long, conflicts_with = "rate_card", help = "Clear the rate card and use the default")]
        default_rate_card: bool,
    },
    #[command(about = "Run the submission gate and move a draft quotation to unapproved")]
    Submit {
        quotation_id: String,
        #[arg(long, help = "Date the gate compares phase start dates against (YYYY-MM-DD)")]
        today: Option<NaiveDate>,
    },
    #[command(about = "Approve an unapproved quotation")]
    Approve { quotation_id: String },
    #[command(about = "Revert an unapproved or approved quotation to draft")]
    Revert { quotation_id: String },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        init_logging(&config.logging);
    }

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Show { quotation_id } => commands::quotation::show(&quotation_id),
        Command::Reprice { quotation_id, rate_card, default_rate_card } => {
            let target = match (rate_card, default_rate_card) {
                (Some(id), _) => commands::quotation::RateCardChoice::Switch(id),
                (None, true) => commands::quotation::RateCardChoice::Default,
                (None, false) => commands::quotation::RateCardChoice::Keep,
            };
            commands::quotation::reprice(&quotation_id, target)
        }
        Command::Submit { quotation_id, today } => {
            commands::quotation::submit(&quotation_id, today)
        }
        Command::Approve { quotation_id } => commands::quotation::approve(&quotation_id),
        Command::Revert { quotation_id } => commands::quotation::revert(&quotation_id),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Installs the fmt subscriber on stderr so stdout carries only command output.
pub fn init_logging(config: &LoggingConfig) {
    use tracing::Level;

    let log_level = config.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    // A subscriber may already be installed when embedded in tests.
    let _ = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
