use anyhow::Result;

use crate::commands::CommandReport;
use crate::cvwatch::notify::format_amount;
use crate::cvwatch::paths::resolve_paths;
use crate::cvwatch::state;

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("build_id={}", env!("CVWATCH_BUILD_ID")));
    report.detail(format!("home={}", paths.home.display()));
    report.detail(format!("config_file={}", paths.config_file.display()));
    report.detail(format!("price_table={}", paths.price_table.display()));
    report.detail(format!("state_file={}", paths.state_file.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));

    let current = state::load(&paths.state_file)?;
    report.detail(format!("initialized={}", current.initialized));
    report.detail(format!("seen_fingerprints={}", current.seen_fingerprints.len()));
    if !current.updated_at.is_empty() {
        report.detail(format!("updated_at={}", current.updated_at));
    }
    for (month, total) in &current.monthly_totals {
        report.detail(format!(
            "month.{month}={} ({} conversions)",
            format_amount("", total.revenue),
            total.count
        ));
    }

    report.detail(format!("price_table_present={}", paths.price_table.is_file()));

    Ok(report)
}
