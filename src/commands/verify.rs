use anyhow::Result;
use std::collections::BTreeSet;
use std::env;
use std::fs;

use crate::commands::{CommandReport, status};
use crate::cvwatch::config::load_config;
use crate::cvwatch::paths::resolve_paths;
use crate::cvwatch::pricing;
use crate::cvwatch::state::PersistedState;

include!(concat!(env!("OUT_DIR"), "/cvwatch_env_allowlist.rs"));

#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    pub strict: bool,
}

/// `CVWATCH_*` names that nothing in the binary reads, usually typos.
fn unknown_env_keys(keys: impl Iterator<Item = String>) -> Vec<String> {
    let known: BTreeSet<&str> = GENERATED_ENV_ALLOWLIST.iter().copied().collect();
    let unknown: BTreeSet<String> = keys
        .filter(|key| key.starts_with("CVWATCH_"))
        .filter(|key| !known.contains(key.as_str()))
        .collect();
    unknown.into_iter().collect()
}

pub fn run(opts: &VerifyOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("verify");

    match load_config(&paths.config_file) {
        Ok(cfg) => {
            report.detail(format!("config: ok (target={})", cfg.target.url));
            if cfg.notify.webhook_url.is_none() {
                let msg = "CVWATCH_WEBHOOK_URL unset; only `run --dry-run` will work";
                if opts.strict {
                    report.issue(msg);
                } else {
                    report.detail(format!("warning: {msg}"));
                }
            }
        }
        Err(err) => report.issue(format!("config: {err:#}")),
    }

    match pricing::load(&paths.price_table) {
        Ok(prices) => report.detail(format!(
            "price_table: ok ({} by id, {} by name, default {})",
            prices.by_ad_id.len(),
            prices.by_ad_name.len(),
            prices.default_unit_price
        )),
        Err(err) => report.issue(format!("price_table: {err:#}")),
    }

    if paths.state_file.exists() {
        let readable = fs::read_to_string(&paths.state_file)
            .ok()
            .and_then(|raw| serde_json::from_str::<PersistedState>(&raw).ok())
            .is_some();
        if readable {
            report.detail("state_file: ok");
        } else {
            report.issue(format!(
                "state_file unreadable ({}); the next run will bootstrap from scratch",
                paths.state_file.display()
            ));
        }
    } else {
        report.detail("state_file: absent; the next run will bootstrap");
    }

    for key in unknown_env_keys(env::vars().map(|(key, _)| key)) {
        let msg = format!("unknown environment variable {key}");
        if opts.strict {
            report.issue(msg);
        } else {
            report.detail(format!("warning: {msg}"));
        }
    }

    report.merge(status::run()?);

    if opts.strict && !report.ok {
        report.issue("strict verify failed");
    }

    Ok(report)
}
