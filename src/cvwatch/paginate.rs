use crate::cvwatch::extract::{HeaderMap, select_table};
use crate::cvwatch::util::truncate_chars;
use crate::driver::{Activation, HtmlTable, Locator, PageDriver};
use anyhow::Result;
use std::time::Duration;
use tracing::debug;

pub const SIGNATURE_MAX_CHARS: usize = 512;

const NEXT_LABELS: &[&str] = &[
    "次へ",
    "次へ>",
    "次へ ›",
    "次のページ",
    "次",
    "Next",
    "next",
    "NEXT",
    "Next ›",
    "›",
    "»",
    ">",
];

/// Tried in order; the first activation that changes the table wins.
pub const NEXT_PAGE_CHAIN: &[Locator] = &[
    Locator::Selector("a[rel='next']"),
    Locator::Selector("link[rel='next']"),
    Locator::Selector(".pagination .next a"),
    Locator::Selector(".pagination li.next a"),
    Locator::Selector(".pager .next a"),
    Locator::Selector("a.next"),
    Locator::Selector("a.page-next"),
    Locator::Selector("button.next"),
    Locator::Selector("[aria-label='Next']"),
    Locator::Selector("[aria-label='次へ']"),
    Locator::Label(NEXT_LABELS),
];

/// Bounded text snapshot of the best-scoring table's first and last rows.
pub fn signature(tables: &[HtmlTable], headers: &HeaderMap) -> String {
    let Some(table) = select_table(tables, headers) else {
        return String::new();
    };
    let (Some(first), Some(last)) = (table.rows.first(), table.rows.last()) else {
        return String::new();
    };
    let text = format!("{}\n{}", first.join(" "), last.join(" "));
    truncate_chars(&text, SIGNATURE_MAX_CHARS)
}

/// Try each locator in `chain`; `Ok(true)` only once the table's signature
/// actually differs from what it was before.
pub fn advance_with(
    driver: &mut dyn PageDriver,
    headers: &HeaderMap,
    chain: &[Locator],
    settle_timeout: Duration,
) -> Result<bool> {
    let before = signature(&driver.tables()?, headers);
    let changed = |tables: &[HtmlTable]| signature(tables, headers) != before;

    for locator in chain {
        let outcome = driver.activate(locator, &changed, settle_timeout)?;
        match outcome {
            Activation::NotFound => continue,
            Activation::TimedOut => {
                debug!(?locator, "pager click produced no change");
                continue;
            }
            Activation::Navigated | Activation::Settled => {
                if changed(&driver.tables()?) {
                    debug!(?locator, ?outcome, "table advanced");
                    return Ok(true);
                }
                debug!(?locator, ?outcome, "table unchanged after activation");
            }
        }
    }
    Ok(false)
}

pub fn advance(
    driver: &mut dyn PageDriver,
    headers: &HeaderMap,
    settle_timeout: Duration,
) -> Result<bool> {
    advance_with(driver, headers, NEXT_PAGE_CHAIN, settle_timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::scripted::{PagerMode, ScriptedDriver, table};

    const HEADERS: [&str; 3] = ["注文日時", "広告ID", "広告名"];

    fn page(ids: &[&str]) -> Vec<HtmlTable> {
        let rows: Vec<Vec<String>> = ids
            .iter()
            .map(|id| vec!["2024-06-01".to_string(), id.to_string(), "Ad".to_string()])
            .collect();
        let mut log = table(&HEADERS, &[]);
        log.rows = rows;
        vec![table(&["menu"], &[&["home"]]), log]
    }

    fn settle() -> Duration {
        Duration::from_millis(10)
    }

    #[test]
    fn signature_uses_first_and_last_row_of_best_table() {
        let sig = signature(&page(&["A1", "A2", "A3"]), &HeaderMap::default());
        assert_eq!(sig, "2024-06-01 A1 Ad\n2024-06-01 A3 Ad");
        assert_eq!(signature(&[], &HeaderMap::default()), "");
    }

    #[test]
    fn signature_is_bounded() {
        let long = "x".repeat(SIGNATURE_MAX_CHARS * 2);
        let tables = vec![table(&HEADERS, &[&[long.as_str(), "A1", "Ad"]])];
        let sig = signature(&tables, &HeaderMap::default());
        assert_eq!(sig.chars().count(), SIGNATURE_MAX_CHARS);
    }

    #[test]
    fn navigation_to_new_rows_counts_as_advance() {
        let mut driver = ScriptedDriver::new(vec![page(&["A1"]), page(&["A2"])]);
        let moved = advance(&mut driver, &HeaderMap::default(), settle()).expect("advance");
        assert!(moved);
        assert_eq!(driver.current_page(), 1);
    }

    #[test]
    fn reload_of_same_rows_is_not_an_advance() {
        let mut driver = ScriptedDriver::new(vec![page(&["A1"])]);
        let moved = advance(&mut driver, &HeaderMap::default(), settle()).expect("advance");
        assert!(!moved);
        assert_eq!(driver.activations.len(), 1);
    }

    #[test]
    fn falls_back_to_label_locator_for_in_place_rerender() {
        let mut driver = ScriptedDriver::new(vec![page(&["A1"]), page(&["A2"])])
            .with_pager(Locator::Label(NEXT_LABELS), PagerMode::Rerender);
        let moved = advance(&mut driver, &HeaderMap::default(), settle()).expect("advance");
        assert!(moved);
        assert_eq!(driver.activations, vec![Locator::Label(NEXT_LABELS)]);
    }

    #[test]
    fn settle_timeout_is_not_an_error() {
        let mut driver = ScriptedDriver::new(vec![page(&["A1"])])
            .with_pager(Locator::Label(NEXT_LABELS), PagerMode::Rerender);
        let moved = advance(&mut driver, &HeaderMap::default(), settle()).expect("advance");
        assert!(!moved);
    }

    #[test]
    fn no_pager_at_all_means_no_movement() {
        let mut driver = ScriptedDriver::new(vec![page(&["A1"]), page(&["A2"])])
            .with_pager(Locator::Selector("#nowhere"), PagerMode::Navigate);
        let moved = advance(&mut driver, &HeaderMap::default(), settle()).expect("advance");
        assert!(!moved);
        assert_eq!(driver.current_page(), 0);
    }

    #[test]
    fn driver_failures_propagate() {
        let mut driver = ScriptedDriver::new(vec![page(&["A1"]), page(&["A2"])]);
        driver.fail_activation = true;
        assert!(advance(&mut driver, &HeaderMap::default(), settle()).is_err());
    }
}
