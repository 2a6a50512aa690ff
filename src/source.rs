//! Where the table comes from: a Google Spreadsheet CSV export or a local
//! CSV file

use anyhow::{anyhow, bail, Context, Result};
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use url::Url;

/// Anything that can produce raw CSV records (header first).
pub trait TableSource {
    fn describe(&self) -> String;
    fn load(&self) -> Result<Vec<Vec<String>>>;
}

/// Transform a spreadsheet URL into its CSV export URL.
///
/// `https://docs.google.com/spreadsheets/d/<id>/edit#gid=7` becomes
/// `https://docs.google.com/spreadsheets/d/<id>/export?format=csv&gid=7`.
/// The sheet id comes from the query, then the fragment, then defaults to 0.
pub fn export_url(spreadsheet_url: &str) -> Result<String> {
    let url = Url::parse(spreadsheet_url)
        .with_context(|| format!("Invalid spreadsheet URL: {}", spreadsheet_url))?;

    let parts: Vec<&str> = url.path().split('/').collect();
    let spreadsheet_id = parts
        .iter()
        .position(|p| *p == "d")
        .and_then(|i| parts.get(i + 1))
        .filter(|id| !id.is_empty())
        .ok_or_else(|| anyhow!("Invalid Google Spreadsheet URL"))?;

    let gid = url
        .query_pairs()
        .find(|(k, _)| k == "gid")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            url.fragment()
                .and_then(|f| f.split_once('='))
                .filter(|(k, v)| *k == "gid" && !v.is_empty())
                .map(|(_, v)| v.to_string())
        })
        .unwrap_or_else(|| "0".to_string());

    Ok(format!(
        "https://docs.google.com/spreadsheets/d/{}/export?format=csv&gid={}",
        spreadsheet_id, gid
    ))
}

/// Parse CSV text into records. Rows may have differing field counts.
///
/// Input must be UTF-8; the first record that is not fails the parse with
/// its record number.
pub fn parse_csv<R: Read>(reader: R) -> Result<Vec<Vec<String>>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut records = Vec::new();
    for (i, record) in csv_reader.byte_records().enumerate() {
        let record = record.with_context(|| format!("Failed to parse CSV record {}", i + 1))?;
        let record = csv::StringRecord::from_byte_record(record).map_err(|e| {
            anyhow!(
                "CSV record {} is not valid UTF-8 (field {}); re-save the file as UTF-8",
                i + 1,
                e.utf8_error().field() + 1
            )
        })?;
        records.push(record.iter().map(|f| f.to_string()).collect());
    }
    Ok(records)
}

/// Spreadsheet fetched over HTTP as CSV
pub struct SpreadsheetSource {
    pub spreadsheet_url: String,
    pub client: reqwest::blocking::Client,
}

impl TableSource for SpreadsheetSource {
    fn describe(&self) -> String {
        self.spreadsheet_url.clone()
    }

    fn load(&self) -> Result<Vec<Vec<String>>> {
        let csv_url = export_url(&self.spreadsheet_url)?;
        tracing::debug!(%csv_url, "fetching spreadsheet export");

        let response = self
            .client
            .get(&csv_url)
            .send()
            .with_context(|| format!("Failed to fetch: {}", csv_url))?;

        if !response.status().is_success() {
            bail!("Failed to fetch CSV data: {}", response.status());
        }

        parse_csv(response)
    }
}

/// CSV file on disk
pub struct CsvFileSource {
    pub path: PathBuf,
}

impl TableSource for CsvFileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Result<Vec<Vec<String>>> {
        let file = fs::File::open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        parse_csv(file)
    }
}

/// Records already in memory
impl TableSource for Vec<Vec<String>> {
    fn describe(&self) -> String {
        format!("{} in-memory records", self.len())
    }

    fn load(&self) -> Result<Vec<Vec<String>>> {
        Ok(self.clone())
    }
}
