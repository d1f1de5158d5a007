use anyhow::Result;

use crate::commands::CommandReport;
use crate::cvwatch::notify::format_amount;
use crate::cvwatch::run::{self, RunOptions};

#[derive(Debug, Clone, Default)]
pub struct RunCommandOptions {
    pub dry_run: bool,
}

pub fn run(opts: &RunCommandOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("run");
    let outcome = run::run_once(&RunOptions {
        dry_run: opts.dry_run,
    })?;

    report.detail(format!("mode={}", outcome.mode));
    report.detail(format!("dry_run={}", opts.dry_run));
    report.detail(format!("pages={}", outcome.pages));
    report.detail(format!("stop={}", outcome.stop));
    report.detail(format!("new_events={}", outcome.new_events));
    report.detail(format!("notifications={}", outcome.notifications));
    report.detail(format!("seen_fingerprints={}", outcome.seen));
    report.detail(format!(
        "month.{}={} ({} conversions)",
        outcome.current_month,
        format_amount("", outcome.month_total.revenue),
        outcome.month_total.count
    ));
    if !outcome.unresolved.is_empty() {
        report.detail(format!("unresolved={}", outcome.unresolved.join(",")));
    }

    Ok(report)
}
