use crate::cvwatch::normalize::Event;
use crate::cvwatch::state::MonthlyTotal;
use crate::error::CvwatchError;
use anyhow::Result;
use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::io::Write;
use std::time::Duration;
use tracing::{debug, warn};

pub const UNRESOLVED_LIST_LIMIT: usize = 20;
const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Conversion,
    UnresolvedPrices,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    pub text: String,
}

pub trait Notifier {
    fn send(&mut self, notification: &Notification) -> Result<()>;
}

/// Render an amount with thousands separators, e.g. `¥12,345`.
pub fn format_amount(symbol: &str, amount: u64) -> String {
    let digits = amount.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{symbol}{grouped}")
}

pub fn conversion_message(
    event: &Event,
    month_total: MonthlyTotal,
    symbol: &str,
    link: &str,
) -> Notification {
    let price = if event.price_resolved() {
        format_amount(symbol, event.unit_price)
    } else {
        format!("unresolved ({})", event.ad_key())
    };
    let mut lines = vec![
        "New conversion".to_string(),
        format!("time: {}", event.event_time),
        format!("ad: {}", event.ad_name),
    ];
    if !event.site_name.is_empty() {
        lines.push(format!("site: {}", event.site_name));
    }
    lines.push(format!("price: {price}"));
    lines.push(format!(
        "{} total: {} ({} conversions)",
        event.month_key,
        format_amount(symbol, month_total.revenue),
        month_total.count
    ));
    if !link.is_empty() {
        lines.push(link.to_string());
    }

    Notification {
        kind: NotificationKind::Conversion,
        fingerprint: Some(event.fingerprint.clone()),
        text: lines.join("\n"),
    }
}

/// `None` when every event had a price.
pub fn unresolved_summary(events: &[Event]) -> Option<Notification> {
    let keys: BTreeSet<&str> = events
        .iter()
        .filter(|event| !event.price_resolved())
        .map(Event::ad_key)
        .collect();
    if keys.is_empty() {
        return None;
    }

    let mut lines = vec![format!(
        "Unit price unresolved for {} ad(s); add them to the price table:",
        keys.len()
    )];
    lines.extend(
        keys.iter()
            .take(UNRESOLVED_LIST_LIMIT)
            .map(|key| format!("- {key}")),
    );
    if keys.len() > UNRESOLVED_LIST_LIMIT {
        lines.push(format!("... and {} more", keys.len() - UNRESOLVED_LIST_LIMIT));
    }

    Some(Notification {
        kind: NotificationKind::UnresolvedPrices,
        fingerprint: None,
        text: lines.join("\n"),
    })
}

/// Posts `{"text": ...}` to an incoming-webhook URL.
pub struct WebhookNotifier {
    url: String,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|err| CvwatchError::Notification(format!("http client: {err}")))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

impl Notifier for WebhookNotifier {
    fn send(&mut self, notification: &Notification) -> Result<()> {
        let payload = json!({ "text": notification.text });
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .map_err(|err| CvwatchError::Notification(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            warn!(%status, body = %body, "webhook returned non-success");
            return Err(CvwatchError::Notification(format!("webhook returned {status}")).into());
        }
        debug!(kind = ?notification.kind, "notification delivered");
        Ok(())
    }
}

/// Writes one JSON line per notification; used by `run --dry-run`.
pub struct StdoutNotifier<W: Write> {
    out: W,
}

impl StdoutNotifier<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> StdoutNotifier<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Notifier for StdoutNotifier<W> {
    fn send(&mut self, notification: &Notification) -> Result<()> {
        let line = serde_json::to_string(notification)?;
        writeln!(self.out, "{line}")
            .map_err(|err| CvwatchError::Notification(err.to_string()))?;
        Ok(())
    }
}
