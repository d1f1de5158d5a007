use crate::cvwatch::extract::HeaderMap;
use crate::error::CvwatchError;
use anyhow::Result;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub url: String,
    pub login_url: Option<String>,
    pub login_id: Option<String>,
    pub password: Option<String>,
    pub id_field: String,
    pub password_field: String,
    pub success_prefix: Option<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            login_url: None,
            login_id: None,
            password: None,
            id_field: "login_id".to_string(),
            password_field: "password".to_string(),
            success_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingConfig {
    pub bootstrap_max_pages: u64,
    pub incremental_max_pages: u64,
    pub discovery_timeout_secs: u64,
    /// How long a pager that reloads the same address gets to change the table.
    pub settle_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            bootstrap_max_pages: 50,
            incremental_max_pages: 10,
            discovery_timeout_secs: 30,
            settle_timeout_ms: 3000,
            poll_interval_ms: 500,
        }
    }
}

impl PagingConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub seen_cap: u64,
    pub timezone: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            seen_cap: 5000,
            timezone: "Asia/Tokyo".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
    pub currency_symbol: String,
    /// Falls back to the target url.
    pub link_url: Option<String>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            currency_symbol: "¥".to_string(),
            link_url: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CvwatchConfig {
    pub target: TargetConfig,
    pub headers: HeaderMap,
    pub paging: PagingConfig,
    pub state: StateConfig,
    pub notify: NotifyConfig,
}

impl CvwatchConfig {
    pub fn timezone(&self) -> Result<Tz> {
        self.state.timezone.trim().parse::<Tz>().map_err(|_| {
            CvwatchError::InvalidConfig(format!("unknown timezone `{}`", self.state.timezone))
                .into()
        })
    }

    pub fn link_url(&self) -> &str {
        self.notify
            .link_url
            .as_deref()
            .unwrap_or(self.target.url.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialCvwatchConfig {
    target: Option<TargetConfig>,
    headers: Option<HeaderMap>,
    paging: Option<PagingConfig>,
    state: Option<StateConfig>,
    notify: Option<NotifyConfig>,
}

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn lookup_trimmed(lookup: Lookup<'_>, var: &str) -> Option<String> {
    lookup(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or_string(lookup: Lookup<'_>, var: &str, fallback: &str) -> String {
    lookup_trimmed(lookup, var).unwrap_or_else(|| fallback.to_string())
}

fn env_or_optional(lookup: Lookup<'_>, var: &str, fallback: Option<String>) -> Option<String> {
    lookup_trimmed(lookup, var).or(fallback)
}

fn env_or_u64(lookup: Lookup<'_>, var: &str, fallback: u64) -> Result<u64> {
    match lookup_trimmed(lookup, var) {
        Some(v) => v.parse::<u64>().map_err(|_| {
            CvwatchError::InvalidConfig(format!("{var} must be a non-negative integer, got `{v}`"))
                .into()
        }),
        None => Ok(fallback),
    }
}

fn merge_file_config(base: &mut CvwatchConfig, path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(path).map_err(|err| {
        CvwatchError::InvalidConfig(format!("failed to read {}: {err}", path.display()))
    })?;
    let parsed: PartialCvwatchConfig = toml::from_str(&raw).map_err(|err| {
        CvwatchError::InvalidConfig(format!("failed to parse {}: {err}", path.display()))
    })?;
    if let Some(target) = parsed.target {
        base.target = target;
    }
    if let Some(headers) = parsed.headers {
        base.headers = headers;
    }
    if let Some(paging) = parsed.paging {
        base.paging = paging;
    }
    if let Some(state) = parsed.state {
        base.state = state;
    }
    if let Some(notify) = parsed.notify {
        base.notify = notify;
    }
    Ok(())
}

fn apply_env(cfg: &mut CvwatchConfig, lookup: Lookup<'_>) -> Result<()> {
    let t = &mut cfg.target;
    t.url = env_or_string(lookup, "CVWATCH_TARGET_URL", &t.url);
    t.login_url = env_or_optional(lookup, "CVWATCH_LOGIN_URL", t.login_url.take());
    t.login_id = env_or_optional(lookup, "CVWATCH_LOGIN_ID", t.login_id.take());
    t.password = env_or_optional(lookup, "CVWATCH_LOGIN_PASSWORD", t.password.take());
    t.id_field = env_or_string(lookup, "CVWATCH_LOGIN_ID_FIELD", &t.id_field);
    t.password_field = env_or_string(lookup, "CVWATCH_LOGIN_PASSWORD_FIELD", &t.password_field);
    t.success_prefix =
        env_or_optional(lookup, "CVWATCH_LOGIN_SUCCESS_PREFIX", t.success_prefix.take());

    let h = &mut cfg.headers;
    h.order_time = env_or_string(lookup, "CVWATCH_HEADER_ORDER_TIME", &h.order_time);
    h.click_time = env_or_string(lookup, "CVWATCH_HEADER_CLICK_TIME", &h.click_time);
    h.ad_id = env_or_string(lookup, "CVWATCH_HEADER_AD_ID", &h.ad_id);
    h.ad_name = env_or_string(lookup, "CVWATCH_HEADER_AD_NAME", &h.ad_name);
    h.site_name = env_or_string(lookup, "CVWATCH_HEADER_SITE_NAME", &h.site_name);
    h.os = env_or_string(lookup, "CVWATCH_HEADER_OS", &h.os);
    h.referrer = env_or_string(lookup, "CVWATCH_HEADER_REFERRER", &h.referrer);
    h.status = env_or_string(lookup, "CVWATCH_HEADER_STATUS", &h.status);

    let p = &mut cfg.paging;
    p.bootstrap_max_pages =
        env_or_u64(lookup, "CVWATCH_BOOTSTRAP_MAX_PAGES", p.bootstrap_max_pages)?;
    p.incremental_max_pages =
        env_or_u64(lookup, "CVWATCH_INCREMENTAL_MAX_PAGES", p.incremental_max_pages)?;
    p.discovery_timeout_secs =
        env_or_u64(lookup, "CVWATCH_DISCOVERY_TIMEOUT_SECS", p.discovery_timeout_secs)?;
    p.settle_timeout_ms = env_or_u64(lookup, "CVWATCH_SETTLE_TIMEOUT_MS", p.settle_timeout_ms)?;
    p.poll_interval_ms = env_or_u64(lookup, "CVWATCH_POLL_INTERVAL_MS", p.poll_interval_ms)?;

    cfg.state.seen_cap = env_or_u64(lookup, "CVWATCH_SEEN_CAP", cfg.state.seen_cap)?;
    cfg.state.timezone = env_or_string(lookup, "CVWATCH_TIMEZONE", &cfg.state.timezone);

    let n = &mut cfg.notify;
    n.webhook_url = env_or_optional(lookup, "CVWATCH_WEBHOOK_URL", n.webhook_url.take());
    n.currency_symbol = env_or_string(lookup, "CVWATCH_CURRENCY_SYMBOL", &n.currency_symbol);
    n.link_url = env_or_optional(lookup, "CVWATCH_LINK_URL", n.link_url.take());
    Ok(())
}

fn validate(cfg: &CvwatchConfig) -> Result<()> {
    if cfg.target.url.trim().is_empty() {
        return Err(CvwatchError::MissingConfig("CVWATCH_TARGET_URL".to_string()).into());
    }
    if cfg.target.login_url.is_some() {
        if cfg.target.login_id.is_none() {
            return Err(CvwatchError::MissingConfig("CVWATCH_LOGIN_ID".to_string()).into());
        }
        if cfg.target.password.is_none() {
            return Err(CvwatchError::MissingConfig("CVWATCH_LOGIN_PASSWORD".to_string()).into());
        }
    }

    let bounded = [
        ("paging.bootstrap_max_pages", cfg.paging.bootstrap_max_pages),
        ("paging.incremental_max_pages", cfg.paging.incremental_max_pages),
        ("paging.discovery_timeout_secs", cfg.paging.discovery_timeout_secs),
        ("paging.settle_timeout_ms", cfg.paging.settle_timeout_ms),
        ("paging.poll_interval_ms", cfg.paging.poll_interval_ms),
        ("state.seen_cap", cfg.state.seen_cap),
    ];
    for (name, value) in bounded {
        if value == 0 {
            return Err(CvwatchError::InvalidConfig(format!("{name} must be >= 1")).into());
        }
    }

    for column in crate::cvwatch::extract::Column::REQUIRED {
        if cfg.headers.label(column).trim().is_empty() {
            return Err(CvwatchError::InvalidConfig(format!(
                "heading for {column:?} cannot be empty"
            ))
            .into());
        }
    }

    cfg.timezone()?;
    Ok(())
}

/// Defaults, then the TOML file at `path` (if present), then variables
/// served by `lookup`.
pub fn load_config_with(path: &Path, lookup: Lookup<'_>) -> Result<CvwatchConfig> {
    let mut cfg = CvwatchConfig::default();
    merge_file_config(&mut cfg, path)?;
    apply_env(&mut cfg, lookup)?;
    validate(&cfg)?;
    Ok(cfg)
}

pub fn load_config(path: &Path) -> Result<CvwatchConfig> {
    load_config_with(path, &|var| env::var(var).ok())
}
