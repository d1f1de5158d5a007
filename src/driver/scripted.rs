use crate::driver::{Activation, DriverError, HtmlTable, Locator, PageDriver, TablePredicate};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagerMode {
    /// Full navigation; at the last page the click reloads the same page.
    Navigate,
    /// In-place re-render; at the last page nothing changes and the settle
    /// wait times out.
    Rerender,
}

pub struct ScriptedDriver {
    pages: Vec<Vec<HtmlTable>>,
    current: usize,
    pager: Locator,
    mode: PagerMode,
    rendered: bool,
    pub activations: Vec<Locator>,
    pub fail_activation: bool,
}

impl ScriptedDriver {
    pub fn new(pages: Vec<Vec<HtmlTable>>) -> Self {
        Self {
            pages,
            current: 0,
            pager: Locator::Selector("a[rel='next']"),
            mode: PagerMode::Navigate,
            rendered: true,
            activations: Vec::new(),
            fail_activation: false,
        }
    }

    pub fn with_pager(mut self, pager: Locator, mode: PagerMode) -> Self {
        self.pager = pager;
        self.mode = mode;
        self
    }

    pub fn never_rendering(mut self) -> Self {
        self.rendered = false;
        self
    }

    pub fn current_page(&self) -> usize {
        self.current
    }
}

impl PageDriver for ScriptedDriver {
    fn tables(&mut self) -> Result<Vec<HtmlTable>, DriverError> {
        if !self.rendered {
            return Ok(Vec::new());
        }
        Ok(self.pages.get(self.current).cloned().unwrap_or_default())
    }

    fn wait_for(
        &mut self,
        predicate: TablePredicate<'_>,
        _timeout: Duration,
    ) -> Result<bool, DriverError> {
        let tables = self.tables()?;
        Ok(predicate(&tables))
    }

    fn activate(
        &mut self,
        locator: &Locator,
        settled: TablePredicate<'_>,
        _timeout: Duration,
    ) -> Result<Activation, DriverError> {
        if self.fail_activation {
            return Err(DriverError::Network("connection reset".to_string()));
        }
        if *locator != self.pager {
            return Ok(Activation::NotFound);
        }
        self.activations.push(*locator);
        if self.current + 1 < self.pages.len() {
            self.current += 1;
        }
        match self.mode {
            PagerMode::Navigate => Ok(Activation::Navigated),
            PagerMode::Rerender => {
                let tables = self.tables()?;
                if settled(&tables) {
                    Ok(Activation::Settled)
                } else {
                    Ok(Activation::TimedOut)
                }
            }
        }
    }
}

pub fn table(headers: &[&str], rows: &[&[&str]]) -> HtmlTable {
    HtmlTable {
        headers: headers.iter().map(|h| h.to_string()).collect(),
        rows: rows
            .iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect(),
    }
}
