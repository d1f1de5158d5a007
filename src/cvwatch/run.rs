use crate::cvwatch::audit;
use crate::cvwatch::config::{CvwatchConfig, load_config};
use crate::cvwatch::extract::table_ready;
use crate::cvwatch::harvest::{HarvestMode, Harvester, StopReason};
use crate::cvwatch::notify::{
    Notification, Notifier, StdoutNotifier, WebhookNotifier, conversion_message,
    unresolved_summary,
};
use crate::cvwatch::paths::{CvwatchPaths, resolve_paths};
use crate::cvwatch::pricing::{self, PriceTable};
use crate::cvwatch::state::{self, MonthlyTotal, PersistedState, STATE_VERSION};
use crate::driver::{HtmlTable, PageDriver};
use crate::driver::html::{HtmlDriver, LoginLanding, LoginRequest};
use crate::error::CvwatchError;
use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use reqwest::Url;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
}

/// Clock-derived inputs, fixed for the whole run.
#[derive(Debug, Clone)]
pub struct RunClock {
    /// `YYYY-MM` in the console's own timezone.
    pub current_month: String,
    pub now: String,
}

impl RunClock {
    pub fn current(cfg: &CvwatchConfig) -> Result<Self> {
        let tz = cfg.timezone()?;
        let now = Utc::now();
        Ok(Self {
            current_month: now.with_timezone(&tz).format("%Y-%m").to_string(),
            now: now.to_rfc3339_opts(SecondsFormat::Secs, true),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: HarvestMode,
    pub pages: usize,
    pub stop: StopReason,
    pub new_events: usize,
    pub notifications: usize,
    pub unresolved: Vec<String>,
    pub current_month: String,
    pub month_total: MonthlyTotal,
    pub seen: usize,
}

/// Walk the table and fold the result into `state`. `state` is only
/// complete once this returns `Ok`; callers persist it after that.
pub fn execute(
    driver: &mut dyn PageDriver,
    cfg: &CvwatchConfig,
    prices: &PriceTable,
    clock: &RunClock,
    state: &mut PersistedState,
    notifier: &mut dyn Notifier,
) -> Result<RunReport> {
    let headers = &cfg.headers;
    let ready = driver.wait_for(
        &|tables: &[HtmlTable]| table_ready(tables, headers),
        cfg.paging.discovery_timeout(),
    )?;
    if !ready {
        return Err(CvwatchError::TableNotFound {
            timeout_secs: cfg.paging.discovery_timeout_secs,
        }
        .into());
    }

    let harvester = Harvester {
        headers,
        prices,
        settle_timeout: cfg.paging.settle_timeout(),
    };
    let outcome = if state.initialized {
        let seen = state.seen_set();
        harvester.incremental(driver, &seen, cfg.paging.incremental_max_pages as usize)?
    } else {
        harvester.bootstrap(
            driver,
            &clock.current_month,
            cfg.paging.bootstrap_max_pages as usize,
        )?
    };

    // Pages list newest first; totals and the seen list grow oldest first.
    let mut outbox: Vec<Notification> = Vec::new();
    for event in outcome.events.iter().rev() {
        let total = state.record_event(event);
        if outcome.mode == HarvestMode::Incremental {
            outbox.push(conversion_message(
                event,
                total,
                &cfg.notify.currency_symbol,
                cfg.link_url(),
            ));
        }
    }
    let oldest_first: Vec<String> = outcome.observed.iter().rev().cloned().collect();
    state.remember(&oldest_first, cfg.state.seen_cap as usize);

    let unresolved: BTreeSet<String> = outcome
        .events
        .iter()
        .filter(|event| !event.price_resolved())
        .map(|event| event.ad_key().to_string())
        .collect();
    if !unresolved.is_empty() {
        warn!(count = unresolved.len(), "events without a unit price");
    }
    if outcome.mode == HarvestMode::Incremental
        && let Some(summary) = unresolved_summary(&outcome.events)
    {
        outbox.push(summary);
    }

    for notification in &outbox {
        notifier.send(notification)?;
    }

    state.version = STATE_VERSION;
    state.initialized = true;
    state.updated_at = clock.now.clone();

    info!(
        mode = %outcome.mode,
        pages = outcome.pages,
        new = outcome.events.len(),
        notified = outbox.len(),
        stop = %outcome.stop,
        "harvest applied"
    );
    Ok(RunReport {
        mode: outcome.mode,
        pages: outcome.pages,
        stop: outcome.stop,
        new_events: outcome.events.len(),
        notifications: outbox.len(),
        unresolved: unresolved.into_iter().collect(),
        month_total: state.total_for(&clock.current_month),
        current_month: clock.current_month.clone(),
        seen: state.seen_fingerprints.len(),
    })
}

fn same_page(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
        && a.path().trim_end_matches('/') == b.path().trim_end_matches('/')
}

/// Decide whether a login attempt succeeded. A landing that still shows a
/// password form always fails. With `success_prefix` the landed URL must
/// start with it; without one it must be a different page than `login_url`
/// (the query string does not count).
pub fn check_login(
    login_url: &str,
    landing: &LoginLanding,
    success_prefix: Option<&str>,
) -> Result<(), CvwatchError> {
    let landed = landing.url.as_str();
    let ok = !landing.password_form
        && match success_prefix {
            Some(prefix) => landed.starts_with(prefix),
            None => match Url::parse(login_url) {
                Ok(login) => !same_page(&login, &landing.url),
                Err(_) => landed != login_url,
            },
        };
    if ok {
        return Ok(());
    }
    let expected = match success_prefix {
        Some(prefix) => format!("a location starting with {prefix}"),
        None => format!("a page other than {login_url}"),
    };
    let actual = if landing.password_form {
        format!("{landed} (password form still shown)")
    } else {
        landed.to_string()
    };
    Err(CvwatchError::LoginFailed { expected, actual })
}

fn open_target(cfg: &CvwatchConfig) -> Result<HtmlDriver> {
    let mut driver = HtmlDriver::new(cfg.paging.poll_interval())?;
    let target = &cfg.target;

    if let Some(login_url) = &target.login_url {
        let request = LoginRequest {
            url: login_url.clone(),
            id_field: target.id_field.clone(),
            password_field: target.password_field.clone(),
            login_id: target.login_id.clone().unwrap_or_default(),
            password: target.password.clone().unwrap_or_default(),
        };
        let landing = driver.login(&request)?;
        check_login(login_url, &landing, target.success_prefix.as_deref())?;
        info!(landed = %landing.url, "logged in");
    }

    driver
        .open(&target.url)
        .with_context(|| format!("failed to open {}", target.url))?;
    Ok(driver)
}

fn notifier_for(cfg: &CvwatchConfig, opts: &RunOptions) -> Result<Box<dyn Notifier>> {
    if opts.dry_run {
        return Ok(Box::new(StdoutNotifier::stdout()));
    }
    let Some(url) = &cfg.notify.webhook_url else {
        return Err(CvwatchError::MissingConfig("CVWATCH_WEBHOOK_URL".to_string()).into());
    };
    Ok(Box::new(WebhookNotifier::new(url.clone())?))
}

fn cycle(paths: &CvwatchPaths, opts: &RunOptions) -> Result<RunReport> {
    let cfg = load_config(&paths.config_file)?;
    let prices = pricing::load(&paths.price_table)?;
    let mut notifier = notifier_for(&cfg, opts)?;
    let clock = RunClock::current(&cfg)?;
    let mut state = state::load(&paths.state_file)?;

    let mut driver = open_target(&cfg)?;
    let report = execute(
        &mut driver,
        &cfg,
        &prices,
        &clock,
        &mut state,
        notifier.as_mut(),
    )?;
    state::save(&paths.state_file, &state)?;
    Ok(report)
}

pub fn run_once(opts: &RunOptions) -> Result<RunReport> {
    let paths = resolve_paths()?;
    let outcome = cycle(&paths, opts);

    let (phase, status, message) = match &outcome {
        Ok(report) => (
            report.mode.to_string(),
            "ok",
            format!(
                "pages={} new={} notified={} stop={}",
                report.pages, report.new_events, report.notifications, report.stop
            ),
        ),
        Err(err) => ("run".to_string(), "failed", format!("{err:#}")),
    };
    if let Err(err) = audit::append_event(&paths, &phase, status, &message) {
        warn!(error = %err, "failed to append audit event");
    }
    outcome
}
