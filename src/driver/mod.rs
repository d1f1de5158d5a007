pub mod error;
pub mod html;
#[cfg(test)]
pub mod scripted;

use std::time::Duration;

pub use error::DriverError;

/// One `<table>` as rendered: header cell texts and visible data rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// How to find a control that moves the view to the next page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locator {
    /// First element matching a CSS selector.
    Selector(&'static str),
    /// Any enabled, visible control whose text equals one of the labels.
    Label(&'static [&'static str]),
}

/// What happened after a locator was activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    NotFound,
    Navigated,
    Settled,
    TimedOut,
}

pub type TablePredicate<'a> = &'a dyn Fn(&[HtmlTable]) -> bool;

pub trait PageDriver {
    /// Read-only query over the current document.
    fn tables(&mut self) -> Result<Vec<HtmlTable>, DriverError>;

    /// Block until `predicate` holds or `timeout` elapses; `Ok(false)` on timeout.
    fn wait_for(
        &mut self,
        predicate: TablePredicate<'_>,
        timeout: Duration,
    ) -> Result<bool, DriverError>;

    /// Activate the first control `locator` resolves to, then wait for either a
    /// navigation or `settled` to hold, whichever comes first.
    fn activate(
        &mut self,
        locator: &Locator,
        settled: TablePredicate<'_>,
        timeout: Duration,
    ) -> Result<Activation, DriverError>;
}
