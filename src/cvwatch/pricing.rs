use crate::cvwatch::util::collapse_whitespace;
use crate::error::CvwatchError;
use anyhow::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Unit prices per ad. Resolution order: ad id, then ad name, then the
/// default. A resolved price of 0 means "unknown" and is reported as such.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTable {
    #[serde(default)]
    pub by_ad_id: BTreeMap<String, u64>,
    #[serde(default)]
    pub by_ad_name: BTreeMap<String, u64>,
    pub default_unit_price: u64,
}

impl PriceTable {
    pub fn resolve(&self, ad_id: &str, ad_name: &str) -> u64 {
        if !ad_id.is_empty() {
            if let Some(price) = self.by_ad_id.get(ad_id) {
                return *price;
            }
        }
        if !ad_name.is_empty() {
            if let Some(price) = self.by_ad_name.get(ad_name) {
                return *price;
            }
        }
        self.default_unit_price
    }

    fn normalized(self) -> Self {
        let clean = |map: BTreeMap<String, u64>| {
            map.into_iter()
                .map(|(key, price)| (collapse_whitespace(&key), price))
                .collect()
        };
        Self {
            by_ad_id: clean(self.by_ad_id),
            by_ad_name: clean(self.by_ad_name),
            default_unit_price: self.default_unit_price,
        }
    }
}

fn parse_from(raw: &str, origin: &str) -> Result<PriceTable> {
    let parsed: PriceTable = json5::from_str(raw).map_err(|err| {
        CvwatchError::PriceTable(format!("failed to parse {origin}: {err}"))
    })?;
    Ok(parsed.normalized())
}

pub fn load(path: &Path) -> Result<PriceTable> {
    if !path.is_file() {
        return Err(CvwatchError::PriceTable(format!("{} not found", path.display())).into());
    }
    let raw = fs::read_to_string(path).map_err(|err| {
        CvwatchError::PriceTable(format!("failed to read {}: {err}", path.display()))
    })?;
    parse_from(&raw, &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn parse(raw: &str) -> Result<PriceTable> {
        parse_from(raw, "inline")
    }

    fn sample() -> PriceTable {
        parse(
            r#"{
                // per-campaign overrides
                byAdId: { "A1": 3000, "A2": 0 },
                byAdName: { "Spring  Sale": 1500, "Winter": 800, },
                defaultUnitPrice: 500,
            }"#,
        )
        .expect("parse")
    }

    #[test]
    fn ad_id_wins_over_ad_name() {
        let prices = sample();
        assert_eq!(prices.resolve("A1", "Spring Sale"), 3000);
    }

    #[test]
    fn falls_back_to_name_then_default() {
        let prices = sample();
        assert_eq!(prices.resolve("Z9", "Spring Sale"), 1500);
        assert_eq!(prices.resolve("", "Winter"), 800);
        assert_eq!(prices.resolve("Z9", "Unknown"), 500);
    }

    #[test]
    fn explicit_zero_is_kept() {
        assert_eq!(sample().resolve("A2", "Winter"), 0);
    }

    #[test]
    fn missing_default_is_rejected() {
        let err = parse(r#"{ "byAdId": {} }"#).expect_err("must fail");
        let typed = err.downcast_ref::<CvwatchError>().expect("typed");
        assert_eq!(typed.code(), "E003_PRICE_TABLE");
    }

    #[test]
    fn negative_price_is_rejected() {
        assert!(parse(r#"{ "defaultUnitPrice": -1 }"#).is_err());
    }

    #[test]
    fn load_reports_missing_file_as_price_table_error() {
        let tmp = tempdir().expect("tempdir");
        let err = load(&tmp.path().join("prices.json")).expect_err("missing");
        assert!(err.downcast_ref::<CvwatchError>().is_some());
    }

    #[test]
    fn load_reads_file() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("prices.json");
        fs::write(&path, r#"{"byAdId":{"A1":1200},"defaultUnitPrice":0}"#).expect("write");
        let prices = load(&path).expect("load");
        assert_eq!(prices.resolve("A1", ""), 1200);
        assert_eq!(prices.resolve("A3", ""), 0);
    }
}
