use crate::cvwatch::normalize::Event;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::warn;

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonthlyTotal {
    pub revenue: u64,
    pub count: u64,
}

/// Everything carried from one run to the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PersistedState {
    pub version: u32,
    pub initialized: bool,
    /// Oldest first; the tail is the most recently observed.
    pub seen_fingerprints: Vec<String>,
    pub monthly_totals: BTreeMap<String, MonthlyTotal>,
    pub updated_at: String,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            initialized: false,
            seen_fingerprints: Vec::new(),
            monthly_totals: BTreeMap::new(),
            updated_at: String::new(),
        }
    }
}

impl PersistedState {
    pub fn seen_set(&self) -> HashSet<&str> {
        self.seen_fingerprints.iter().map(String::as_str).collect()
    }

    /// Add one accepted event to its month and return the running total.
    pub fn record_event(&mut self, event: &Event) -> MonthlyTotal {
        let total = self
            .monthly_totals
            .entry(event.month_key.clone())
            .or_default();
        total.count += 1;
        total.revenue += event.unit_price;
        *total
    }

    pub fn remember(&mut self, observed: &[String], cap: usize) {
        let previous = std::mem::take(&mut self.seen_fingerprints);
        self.seen_fingerprints = merge_fingerprints(&previous, observed, cap);
    }

    pub fn total_for(&self, month_key: &str) -> MonthlyTotal {
        self.monthly_totals
            .get(month_key)
            .copied()
            .unwrap_or_default()
    }
}

/// Concatenate, keep only the last occurrence of each value, then drop from
/// the front until at most `cap` remain.
pub fn merge_fingerprints(previous: &[String], new: &[String], cap: usize) -> Vec<String> {
    let mut kept = HashSet::new();
    let mut merged: Vec<String> = previous
        .iter()
        .chain(new.iter())
        .rev()
        .filter(|fp| kept.insert(fp.as_str()))
        .take(cap)
        .cloned()
        .collect();
    merged.reverse();
    merged
}

/// Missing or unparseable state falls back to a fresh, uninitialised one.
pub fn load(path: &Path) -> Result<PersistedState> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(PersistedState::default()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };

    match serde_json::from_str::<PersistedState>(&raw) {
        Ok(state) => Ok(state),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "state file unreadable; starting fresh");
            Ok(PersistedState::default())
        }
    }
}

/// Write via a temp file in the same directory and rename over the target.
pub fn save(path: &Path, state: &PersistedState) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;

    let data = serde_json::to_string_pretty(state)?;
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    tmp.write_all(format!("{data}\n").as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fps(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn merge_keeps_last_occurrence() {
        let merged = merge_fingerprints(&fps(&["a", "b", "c"]), &fps(&["b", "d"]), 10);
        assert_eq!(merged, fps(&["a", "c", "b", "d"]));
    }

    #[test]
    fn merge_drops_oldest_over_cap() {
        let merged = merge_fingerprints(&fps(&["a", "b", "c"]), &fps(&["b", "d"]), 3);
        assert_eq!(merged, fps(&["c", "b", "d"]));
    }

    #[test]
    fn merge_never_exceeds_cap() {
        let previous: Vec<String> = (0..50).map(|i| format!("p{i}")).collect();
        let new: Vec<String> = (0..50).map(|i| format!("n{}", i % 7)).collect();
        for cap in [1usize, 5, 20, 200] {
            let merged = merge_fingerprints(&previous, &new, cap);
            assert!(merged.len() <= cap);
            let unique: HashSet<&String> = merged.iter().collect();
            assert_eq!(unique.len(), merged.len());
        }
        assert!(merge_fingerprints(&previous, &new, 0).is_empty());
    }

    #[test]
    fn record_event_accumulates_per_month() {
        let mut state = PersistedState::default();
        let mut event = Event {
            event_time: "2024-06-02 10:00".to_string(),
            ad_id: "A1".to_string(),
            ad_name: "Ad".to_string(),
            site_name: String::new(),
            os: String::new(),
            referrer: String::new(),
            status: String::new(),
            unit_price: 1500,
            month_key: "2024-06".to_string(),
            fingerprint: "f1".to_string(),
        };
        state.record_event(&event);
        event.unit_price = 0;
        let total = state.record_event(&event);
        assert_eq!(total, MonthlyTotal { revenue: 1500, count: 2 });
        assert_eq!(state.total_for("2024-05"), MonthlyTotal::default());
    }

    #[test]
    fn load_missing_file_is_uninitialised() {
        let tmp = tempdir().expect("tempdir");
        let state = load(&tmp.path().join("nope.json")).expect("load");
        assert!(!state.initialized);
        assert_eq!(state.version, STATE_VERSION);
    }

    #[test]
    fn load_corrupt_file_falls_back() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("state.json");
        fs::write(&path, "{ not json").expect("write");
        let state = load(&path).expect("load");
        assert_eq!(state, PersistedState::default());
    }

    #[test]
    fn save_then_load_uses_camel_case_schema() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("state").join("cvwatch_state.json");
        let mut state = PersistedState {
            initialized: true,
            seen_fingerprints: fps(&["a", "b"]),
            updated_at: "2024-06-02T01:00:00+00:00".to_string(),
            ..PersistedState::default()
        };
        state
            .monthly_totals
            .insert("2024-06".to_string(), MonthlyTotal { revenue: 4500, count: 3 });

        save(&path, &state).expect("save");
        let raw = fs::read_to_string(&path).expect("read");
        assert!(raw.contains("\"seenFingerprints\""));
        assert!(raw.contains("\"monthlyTotals\""));
        assert!(raw.contains("\"updatedAt\""));

        let loaded = load(&path).expect("load");
        assert_eq!(loaded, state);
        let leftovers = fs::read_dir(path.parent().expect("parent"))
            .expect("read dir")
            .count();
        assert_eq!(leftovers, 1);
    }
}
