use crate::cvwatch::extract::RawRow;
use crate::cvwatch::pricing::PriceTable;
use crate::cvwatch::util::collapse_whitespace;
use serde::Serialize;
use sha2::{Digest, Sha256};

pub const UNKNOWN_MONTH: &str = "unknown";

const FIELD_SEPARATOR: u8 = 0x1f;

/// One conversion occurrence derived from one table row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub event_time: String,
    pub ad_id: String,
    pub ad_name: String,
    pub site_name: String,
    pub os: String,
    pub referrer: String,
    /// Approval state as displayed. Not part of the fingerprint.
    pub status: String,
    pub unit_price: u64,
    pub month_key: String,
    pub fingerprint: String,
}

impl Event {
    pub fn ad_key(&self) -> &str {
        if self.ad_id.is_empty() {
            &self.ad_name
        } else {
            &self.ad_id
        }
    }

    pub fn price_resolved(&self) -> bool {
        self.unit_price > 0
    }
}

/// `YYYY-MM` bucket from the first seven characters of the displayed time.
pub fn month_key(event_time: &str) -> String {
    let head: Vec<char> = event_time.chars().take(7).collect();
    if head.len() < 7 {
        return UNKNOWN_MONTH.to_string();
    }
    head.into_iter()
        .map(|ch| if ch == '/' || ch == '.' { '-' } else { ch })
        .collect()
}

pub fn fingerprint(
    event_time: &str,
    ad_key: &str,
    site_name: &str,
    os: &str,
    referrer: &str,
    ad_name: &str,
) -> String {
    let mut hasher = Sha256::new();
    for (idx, part) in [event_time, ad_key, site_name, os, referrer, ad_name]
        .iter()
        .enumerate()
    {
        if idx > 0 {
            hasher.update([FIELD_SEPARATOR]);
        }
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

pub fn normalize_row(row: &RawRow, prices: &PriceTable) -> Option<Event> {
    let order_time = collapse_whitespace(&row.order_time);
    let event_time = if order_time.is_empty() {
        collapse_whitespace(&row.click_time)
    } else {
        order_time
    };
    let ad_id = collapse_whitespace(&row.ad_id);
    let ad_name = collapse_whitespace(&row.ad_name);
    let ad_key = if ad_id.is_empty() { &ad_name } else { &ad_id };
    if event_time.is_empty() || ad_key.is_empty() {
        return None;
    }

    let site_name = collapse_whitespace(&row.site_name);
    let os = collapse_whitespace(&row.os);
    let referrer = collapse_whitespace(&row.referrer);
    let fingerprint = fingerprint(&event_time, ad_key, &site_name, &os, &referrer, &ad_name);

    Some(Event {
        unit_price: prices.resolve(&ad_id, &ad_name),
        month_key: month_key(&event_time),
        status: collapse_whitespace(&row.status),
        event_time,
        ad_id,
        ad_name,
        site_name,
        os,
        referrer,
        fingerprint,
    })
}

/// Rows in, events out, in table order. Rows without a time or an ad are
/// dropped.
pub fn normalize(rows: &[RawRow], prices: &PriceTable) -> Vec<Event> {
    rows.iter()
        .filter_map(|row| normalize_row(row, prices))
        .collect()
}
