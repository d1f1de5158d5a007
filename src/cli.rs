use anyhow::{Result, bail};
use clap::{Parser, Subcommand};

use crate::commands::{self, CommandReport};

#[derive(Debug, Parser)]
#[command(
    name = "cvwatch",
    version,
    about = "Harvest new conversions from an affiliate console and notify once per event"
)]
struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one harvest cycle.
    Run {
        /// Print notifications to stdout instead of posting them.
        #[arg(long)]
        dry_run: bool,
    },
    /// Show paths and the persisted state.
    Status,
    /// Check configuration, price table and state before scheduling.
    Verify {
        #[arg(long)]
        strict: bool,
    },
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let verdict = if report.ok { "ok" } else { "failed" };
    println!("{}: {verdict}", report.command);
    for detail in &report.details {
        println!("  {detail}");
    }
    for issue in &report.issues {
        println!("  issue: {issue}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let report = match cli.command {
        Command::Run { dry_run } => {
            commands::run::run(&commands::run::RunCommandOptions { dry_run })?
        }
        Command::Status => commands::status::run()?,
        Command::Verify { strict } => {
            commands::verify::run(&commands::verify::VerifyOptions { strict })?
        }
    };

    print_report(&report, cli.json)?;
    if !report.ok {
        bail!("{} reported {} issue(s)", report.command, report.issues.len());
    }
    Ok(())
}
