//! Shared data types: the table being rewritten, output separators and
//! batch phases

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

/// HTML-bearing columns whose images are localized
pub const BODY_UK: &str = "body_uk";
pub const BODY_RU: &str = "body_ru";
pub const REQUIRED_COLUMNS: [&str; 2] = [BODY_UK, BODY_RU];

/// Header plus data rows, as read from the spreadsheet export.
///
/// Rows may be shorter than the header; missing cells read as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    index: HashMap<String, usize>,
}

impl Table {
    /// Split raw records into header and rows. The first record is the header.
    pub fn from_records(mut records: Vec<Vec<String>>) -> Self {
        if records.is_empty() {
            return Self::default();
        }
        let headers = records.remove(0);
        let mut index = HashMap::new();
        for (i, name) in headers.iter().enumerate() {
            // First occurrence wins for duplicated header names
            index.entry(name.clone()).or_insert(i);
        }
        Self {
            headers,
            rows: records,
            index,
        }
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Header first, then every row.
    pub fn records(&self) -> impl Iterator<Item = &Vec<String>> {
        std::iter::once(&self.headers).chain(self.rows.iter())
    }
}

/// Field delimiter for the output CSV
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Separator {
    Comma,
    #[default]
    Semicolon,
    Tab,
}

impl Separator {
    pub fn as_byte(&self) -> u8 {
        match self {
            Separator::Comma => b',',
            Separator::Semicolon => b';',
            Separator::Tab => b'\t',
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Separator::Comma => "comma",
            Separator::Semicolon => "semicolon",
            Separator::Tab => "tab",
        }
    }
}

/// Batch state machine. `Failed` is reachable from every running phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    FetchingSource,
    ValidatingSchema,
    CollectingReferences,
    DownloadingAssets,
    RewritingRows,
    WritingOutput,
    Completed,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "Idle",
            Phase::FetchingSource => "Fetching CSV data...",
            Phase::ValidatingSchema => "Validating columns...",
            Phase::CollectingReferences => "Collecting image links...",
            Phase::DownloadingAssets => "Downloading images...",
            Phase::RewritingRows => "Updating descriptions...",
            Phase::WritingOutput => "Writing to output file...",
            Phase::Completed => "Completed",
            Phase::Failed => "Failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_table_lookup_by_name() {
        let table = Table::from_records(vec![
            record(&["id", "body_ru", "body_uk"]),
            record(&["1", "ru", "uk"]),
            record(&["2"]),
        ]);
        assert_eq!(table.column(BODY_UK), Some(2));
        assert_eq!(table.column("missing"), None);
        assert_eq!(table.cell(0, 2), "uk");
        assert_eq!(table.cell(1, 2), "");
        assert_eq!(table.records().count(), 3);
    }

    #[test]
    fn test_empty_records() {
        let table = Table::from_records(Vec::new());
        assert!(table.headers.is_empty());
        assert!(table.rows.is_empty());
    }

    #[test]
    fn test_separator_bytes() {
        assert_eq!(Separator::Comma.as_byte(), b',');
        assert_eq!(Separator::Semicolon.as_byte(), b';');
        assert_eq!(Separator::Tab.as_byte(), b'\t');
        assert_eq!(Separator::default(), Separator::Semicolon);
    }
}
