pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "lite",
    about = "LITE operator CLI",
    long_about = "Operate the LITE case-management backend: readiness checks, migrations, demo data and the scheduled jobs.",
    after_help = "Examples:\n  lite doctor --json\n  lite migrate\n  lite sla-update\n  lite hmrc-deliver"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run startup preflight checks and return structured status output")]
    Start,
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo dataset: queues, rules, control list entries and sample cases")]
    Seed,
    #[command(about = "Inspect effective configuration values with source attribution and redaction")]
    Config,
    #[command(about = "Validate config, HMRC integration settings and database readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Advance SLA counters for open cases (skipped on weekends and bank holidays)")]
    SlaUpdate,
    #[command(about = "Expire issued licences whose end date has passed")]
    ExpireLicences,
    #[command(about = "Deliver one batch of pending licence updates to HMRC")]
    HmrcDeliver,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Start => commands::start::run(),
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => commands::CommandResult { exit_code: 0, output: commands::config::run() },
        Command::Doctor { json } => commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) },
        Command::SlaUpdate => commands::jobs::sla_update(),
        Command::ExpireLicences => commands::jobs::expire_licences(),
        Command::HmrcDeliver => commands::jobs::hmrc_deliver(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn job_subcommands_use_kebab_case() {
        let cli = Cli::try_parse_from(["lite", "expire-licences"]).expect("parse");
        assert!(matches!(cli.command, Command::ExpireLicences));

        let cli = Cli::try_parse_from(["lite", "doctor", "--json"]).expect("parse");
        assert!(matches!(cli.command, Command::Doctor { json: true }));

        assert!(Cli::try_parse_from(["lite", "smoke"]).is_err());
    }
}
