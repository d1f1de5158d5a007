use crate::driver::HtmlTable;
use crate::cvwatch::util::collapse_whitespace;
use serde::{Deserialize, Serialize};

/// Score per recognised heading; data-row count only breaks ties.
pub const HEADER_WEIGHT: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    OrderTime,
    ClickTime,
    AdId,
    AdName,
    SiteName,
    Os,
    Referrer,
    Status,
}

impl Column {
    /// Headings that count towards a table's score.
    pub const SCORED: [Column; 7] = [
        Column::OrderTime,
        Column::ClickTime,
        Column::AdId,
        Column::AdName,
        Column::SiteName,
        Column::Os,
        Column::Referrer,
    ];

    /// Headings a table must carry before the page counts as rendered.
    pub const REQUIRED: [Column; 3] = [Column::OrderTime, Column::AdId, Column::AdName];

    pub const ALL: [Column; 8] = [
        Column::OrderTime,
        Column::ClickTime,
        Column::AdId,
        Column::AdName,
        Column::SiteName,
        Column::Os,
        Column::Referrer,
        Column::Status,
    ];
}

/// Heading text the console uses for each column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderMap {
    pub order_time: String,
    pub click_time: String,
    pub ad_id: String,
    pub ad_name: String,
    pub site_name: String,
    pub os: String,
    pub referrer: String,
    pub status: String,
}

impl Default for HeaderMap {
    fn default() -> Self {
        Self {
            order_time: "注文日時".to_string(),
            click_time: "クリック日時".to_string(),
            ad_id: "広告ID".to_string(),
            ad_name: "広告名".to_string(),
            site_name: "サイト名".to_string(),
            os: "OS".to_string(),
            referrer: "リファラ".to_string(),
            status: "ステータス".to_string(),
        }
    }
}

impl HeaderMap {
    pub fn label(&self, column: Column) -> &str {
        match column {
            Column::OrderTime => &self.order_time,
            Column::ClickTime => &self.click_time,
            Column::AdId => &self.ad_id,
            Column::AdName => &self.ad_name,
            Column::SiteName => &self.site_name,
            Column::Os => &self.os,
            Column::Referrer => &self.referrer,
            Column::Status => &self.status,
        }
    }
}

/// One visible data row, keyed by column. Absent columns stay empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    pub order_time: String,
    pub click_time: String,
    pub ad_id: String,
    pub ad_name: String,
    pub site_name: String,
    pub os: String,
    pub referrer: String,
    pub status: String,
}

impl RawRow {
    fn slot(&mut self, column: Column) -> &mut String {
        match column {
            Column::OrderTime => &mut self.order_time,
            Column::ClickTime => &mut self.click_time,
            Column::AdId => &mut self.ad_id,
            Column::AdName => &mut self.ad_name,
            Column::SiteName => &mut self.site_name,
            Column::Os => &mut self.os,
            Column::Referrer => &mut self.referrer,
            Column::Status => &mut self.status,
        }
    }
}

fn exact_match(cell: &str, label: &str) -> bool {
    collapse_whitespace(cell) == label
}

fn substring_match(cell: &str, label: &str) -> bool {
    collapse_whitespace(cell).contains(label)
}

pub fn header_matches(cell: &str, label: &str) -> bool {
    let label = collapse_whitespace(label);
    !label.is_empty() && substring_match(cell, &label)
}

/// Index of the heading for `column`, preferring an exact match over a
/// substring one.
pub fn column_index(table: &HtmlTable, headers: &HeaderMap, column: Column) -> Option<usize> {
    let label = collapse_whitespace(headers.label(column));
    if label.is_empty() {
        return None;
    }
    table
        .headers
        .iter()
        .position(|cell| exact_match(cell, &label))
        .or_else(|| {
            table
                .headers
                .iter()
                .position(|cell| substring_match(cell, &label))
        })
}

fn has_heading(table: &HtmlTable, headers: &HeaderMap, column: Column) -> bool {
    let label = headers.label(column);
    table.headers.iter().any(|cell| header_matches(cell, label))
}

pub fn score_table(table: &HtmlTable, headers: &HeaderMap) -> u64 {
    let matched = Column::SCORED
        .iter()
        .filter(|column| has_heading(table, headers, **column))
        .count() as u64;
    matched * HEADER_WEIGHT + table.rows.len() as u64
}

/// Highest-scoring table; the first one wins a tie. `None` when nothing
/// scores above zero.
pub fn select_table<'a>(tables: &'a [HtmlTable], headers: &HeaderMap) -> Option<&'a HtmlTable> {
    let mut best: Option<(u64, &HtmlTable)> = None;
    for table in tables {
        let score = score_table(table, headers);
        if score == 0 {
            continue;
        }
        match best {
            Some((top, _)) if score <= top => {}
            _ => best = Some((score, table)),
        }
    }
    best.map(|(_, table)| table)
}

/// Whether the page has finished rendering a usable conversion table.
pub fn table_ready(tables: &[HtmlTable], headers: &HeaderMap) -> bool {
    tables.iter().any(|table| {
        !table.rows.is_empty()
            && Column::REQUIRED
                .iter()
                .all(|column| has_heading(table, headers, *column))
    })
}

pub fn extract(tables: &[HtmlTable], headers: &HeaderMap) -> Vec<RawRow> {
    let Some(table) = select_table(tables, headers) else {
        return Vec::new();
    };

    let positions: Vec<(Column, usize)> = Column::ALL
        .iter()
        .filter_map(|column| column_index(table, headers, *column).map(|idx| (*column, idx)))
        .collect();

    table
        .rows
        .iter()
        .map(|cells| {
            let mut row = RawRow::default();
            for (column, idx) in &positions {
                if let Some(value) = cells.get(*idx) {
                    *row.slot(*column) = value.clone();
                }
            }
            row
        })
        .collect()
}
