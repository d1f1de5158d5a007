use crate::cvwatch::extract::{HeaderMap, extract};
use crate::cvwatch::normalize::{Event, normalize};
use crate::cvwatch::paginate;
use crate::cvwatch::pricing::PriceTable;
use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use crate::driver::PageDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestMode {
    Bootstrap,
    Incremental,
}

impl fmt::Display for HarvestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bootstrap => f.write_str("bootstrap"),
            Self::Incremental => f.write_str("incremental"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A whole page sat before the current month.
    MonthBoundary,
    /// A whole page was already known.
    NoNewRows,
    /// The pager could not move the table any further.
    NoMovement,
    PageLimit,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::MonthBoundary => "month_boundary",
            Self::NoNewRows => "no_new_rows",
            Self::NoMovement => "no_movement",
            Self::PageLimit => "page_limit",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone)]
pub struct HarvestOutcome {
    pub mode: HarvestMode,
    /// Accepted events, first-discovered first.
    pub events: Vec<Event>,
    /// Every distinct fingerprint seen on the walked pages, in page order.
    pub observed: Vec<String>,
    pub pages: usize,
    pub stop: StopReason,
}

pub struct Harvester<'a> {
    pub headers: &'a HeaderMap,
    pub prices: &'a PriceTable,
    pub settle_timeout: Duration,
}

struct Walk {
    events: Vec<Event>,
    accepted: HashSet<String>,
    observed: Vec<String>,
    observed_set: HashSet<String>,
}

impl Walk {
    fn new() -> Self {
        Self {
            events: Vec::new(),
            accepted: HashSet::new(),
            observed: Vec::new(),
            observed_set: HashSet::new(),
        }
    }

    fn observe(&mut self, event: &Event) {
        if self.observed_set.insert(event.fingerprint.clone()) {
            self.observed.push(event.fingerprint.clone());
        }
    }

    fn accept(&mut self, event: Event) -> bool {
        if !self.accepted.insert(event.fingerprint.clone()) {
            return false;
        }
        self.events.push(event);
        true
    }

    fn finish(self, mode: HarvestMode, pages: usize, stop: StopReason) -> HarvestOutcome {
        HarvestOutcome {
            mode,
            events: self.events,
            observed: self.observed,
            pages,
            stop,
        }
    }
}

impl Harvester<'_> {
    fn page_events(&self, driver: &mut dyn PageDriver) -> Result<Vec<Event>> {
        let rows = extract(&driver.tables()?, self.headers);
        Ok(normalize(&rows, self.prices))
    }

    /// Collect current-month events until a page lies wholly in an earlier
    /// month, the pager stops moving, or `max_pages` pages were read.
    pub fn bootstrap(
        &self,
        driver: &mut dyn PageDriver,
        current_month: &str,
        max_pages: usize,
    ) -> Result<HarvestOutcome> {
        let mut walk = Walk::new();
        let mut page = 0usize;
        loop {
            page += 1;
            let events = self.page_events(driver)?;
            let past_month = !events.is_empty()
                && events
                    .iter()
                    .all(|event| event.month_key.as_str() < current_month);

            let mut kept = 0usize;
            for event in events {
                walk.observe(&event);
                if event.month_key == current_month && walk.accept(event) {
                    kept += 1;
                }
            }
            debug!(page, kept, past_month, "bootstrap page read");

            let stop = if past_month {
                Some(StopReason::MonthBoundary)
            } else if page >= max_pages {
                Some(StopReason::PageLimit)
            } else if !paginate::advance(driver, self.headers, self.settle_timeout)? {
                Some(StopReason::NoMovement)
            } else {
                None
            };
            if let Some(stop) = stop {
                info!(pages = page, events = walk.events.len(), %stop, "bootstrap harvest finished");
                return Ok(walk.finish(HarvestMode::Bootstrap, page, stop));
            }
        }
    }

    /// Collect events not in `seen` until a page yields nothing new, the
    /// pager stops moving, or `max_pages` pages were read.
    pub fn incremental(
        &self,
        driver: &mut dyn PageDriver,
        seen: &HashSet<&str>,
        max_pages: usize,
    ) -> Result<HarvestOutcome> {
        let mut walk = Walk::new();
        let mut page = 0usize;
        loop {
            page += 1;
            let events = self.page_events(driver)?;

            let mut fresh = 0usize;
            for event in events {
                walk.observe(&event);
                if !seen.contains(event.fingerprint.as_str()) && walk.accept(event) {
                    fresh += 1;
                }
            }
            debug!(page, fresh, "incremental page read");

            let stop = if fresh == 0 {
                Some(StopReason::NoNewRows)
            } else if page >= max_pages {
                Some(StopReason::PageLimit)
            } else if !paginate::advance(driver, self.headers, self.settle_timeout)? {
                Some(StopReason::NoMovement)
            } else {
                None
            };
            if let Some(stop) = stop {
                info!(pages = page, events = walk.events.len(), %stop, "incremental harvest finished");
                return Ok(walk.finish(HarvestMode::Incremental, page, stop));
            }
        }
    }
}
