//! The batch: read the table, download every distinct image once, rewrite
//! the HTML columns and write the updated CSV.
//!
//! Phases run strictly in order. Downloads fan out over a worker pool and
//! all of them finish before any row is rewritten, so rewriting always sees
//! the complete reference map.

use anyhow::Context;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

use crate::error::BatchError;
use crate::fetch::AssetFetcher;
use crate::links::{extract_image_links, replace_image_links};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::source::TableSource;
use crate::types::{Phase, Separator, Table, REQUIRED_COLUMNS};

/// What a finished batch did
#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub output: PathBuf,
    pub rows: usize,
    /// Distinct image references found
    pub references: usize,
    pub downloaded: usize,
    /// Already on disk from an earlier run
    pub skipped: usize,
    /// Reference -> path written into the HTML
    pub assets: BTreeMap<String, String>,
    /// Reference -> error
    pub failed: BTreeMap<String, String>,
}

/// Every distinct `src` literal in the HTML columns of every row.
pub fn collect_references(table: &Table, columns: &[usize]) -> BTreeSet<String> {
    let mut references = BTreeSet::new();
    for row in 0..table.rows.len() {
        for &column in columns {
            references.extend(extract_image_links(table.cell(row, column)));
        }
    }
    references
}

/// Column indexes of the HTML-bearing columns, in `REQUIRED_COLUMNS` order.
pub fn validate_schema(table: &Table) -> Result<Vec<usize>, BatchError> {
    REQUIRED_COLUMNS
        .iter()
        .map(|&name| table.column(name).ok_or(BatchError::MissingColumn(name)))
        .collect()
}

/// Rewrite the HTML columns of one row in place.
pub fn rewrite_row(row: &mut [String], columns: &[usize], paths: &HashMap<String, String>) {
    for &column in columns {
        if let Some(cell) = row.get_mut(column) {
            *cell = replace_image_links(cell, paths);
        }
    }
}

/// Write header and rows with standard CSV quoting.
pub fn write_csv(table: &Table, path: &Path, separator: Separator) -> anyhow::Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(separator.as_byte())
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for record in table.records() {
        writer.write_record(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// State shared by download workers, behind one lock
#[derive(Default)]
struct Shared {
    paths: HashMap<String, String>,
    failed: BTreeMap<String, String>,
    downloaded: usize,
    skipped: usize,
    /// Steps finished so far, downloads and row rewrites together
    completed: usize,
}

pub struct Pipeline<'a> {
    fetcher: AssetFetcher,
    progress: &'a dyn ProgressSink,
    /// Worker threads for downloads; 0 starts one per reference
    concurrency: usize,
    separator: Separator,
    output: PathBuf,
    phase: Phase,
    total_steps: usize,
    completed: usize,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        fetcher: AssetFetcher,
        progress: &'a dyn ProgressSink,
        concurrency: usize,
        separator: Separator,
        output: &Path,
    ) -> Self {
        Self {
            fetcher,
            progress,
            concurrency,
            separator,
            output: output.to_path_buf(),
            phase: Phase::Idle,
            total_steps: 0,
            completed: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn fraction(&self) -> f64 {
        if self.total_steps == 0 {
            0.0
        } else {
            self.completed as f64 / self.total_steps as f64
        }
    }

    fn enter(&mut self, phase: Phase) {
        tracing::debug!(from = %self.phase, to = %phase, "phase change");
        self.phase = phase;
        let fraction = if phase == Phase::Completed { 1.0 } else { self.fraction() };
        self.progress.report(&ProgressEvent {
            phase,
            fraction,
            status: phase.to_string(),
            reference: None,
        });
    }

    /// Run every phase once. Any fatal error leaves the pipeline in
    /// `Phase::Failed` with no output written.
    pub fn run(&mut self, source: &dyn TableSource) -> Result<Summary, BatchError> {
        match self.run_phases(source) {
            Ok(summary) => {
                self.enter(Phase::Completed);
                Ok(summary)
            }
            Err(e) => {
                tracing::error!(phase = %self.phase, "batch failed: {}", e);
                self.enter(Phase::Failed);
                Err(e)
            }
        }
    }

    fn run_phases(&mut self, source: &dyn TableSource) -> Result<Summary, BatchError> {
        self.enter(Phase::FetchingSource);
        let records = source.load().map_err(BatchError::Source)?;
        if records.len() < 2 {
            return Err(BatchError::NoData);
        }
        let mut table = Table::from_records(records);

        self.enter(Phase::ValidatingSchema);
        let columns = validate_schema(&table)?;

        self.enter(Phase::CollectingReferences);
        let references: Vec<String> = collect_references(&table, &columns).into_iter().collect();
        self.total_steps = references.len() + table.rows.len();
        self.completed = 0;
        tracing::info!(
            rows = table.rows.len(),
            references = references.len(),
            "collected image links"
        );

        self.enter(Phase::DownloadingAssets);
        self.fetcher.prepare().map_err(|source| BatchError::Storage {
            path: self.fetcher.dir().to_path_buf(),
            source,
        })?;
        let shared = self.download_all(&references);
        self.completed = shared.completed;

        self.enter(Phase::RewritingRows);
        for row in table.rows.iter_mut() {
            rewrite_row(row, &columns, &shared.paths);
            self.completed += 1;
            self.progress.report(&ProgressEvent {
                phase: Phase::RewritingRows,
                fraction: self.fraction(),
                status: Phase::RewritingRows.to_string(),
                reference: None,
            });
        }

        self.enter(Phase::WritingOutput);
        write_csv(&table, &self.output, self.separator).map_err(BatchError::Output)?;

        Ok(Summary {
            output: self.output.clone(),
            rows: table.rows.len(),
            references: references.len(),
            downloaded: shared.downloaded,
            skipped: shared.skipped,
            assets: shared.paths.into_iter().collect(),
            failed: shared.failed,
        })
    }

    /// Fetch every reference exactly once and return the merged results.
    /// Returns only after every worker has finished.
    fn download_all(&self, references: &[String]) -> Shared {
        let shared = Mutex::new(Shared {
            completed: self.completed,
            ..Default::default()
        });
        let next = AtomicUsize::new(0);
        let total = references.len();
        let workers = match self.concurrency {
            0 => total,
            n => n.min(total),
        };

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    let Some(reference) = references.get(i) else {
                        break;
                    };
                    let result = self.fetcher.fetch(reference);

                    let mut state = shared.lock().unwrap_or_else(|e| e.into_inner());
                    match result {
                        Ok(asset) => {
                            tracing::debug!(%reference, file = %asset.filename, path = %asset.path.display(), "image ready");
                            if asset.downloaded {
                                state.downloaded += 1;
                            } else {
                                state.skipped += 1;
                            }
                            state.paths.insert(reference.clone(), asset.relative_path);
                        }
                        Err(e) => {
                            tracing::warn!(%reference, "Error downloading image: {}", e);
                            state.failed.insert(reference.clone(), e.to_string());
                        }
                    }
                    state.completed += 1;
                    let done = state.downloaded + state.skipped + state.failed.len();
                    self.progress.report(&ProgressEvent {
                        phase: Phase::DownloadingAssets,
                        fraction: state.completed as f64 / self.total_steps as f64,
                        status: format!("Downloaded {} of {} images, loading", done, total),
                        reference: Some(reference.clone()),
                    });
                });
            }
        });

        shared.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{build_client, DEFAULT_USER_AGENT};
    use crate::filename::local_filename;
    use crate::progress::{NoProgress, RecordingProgress};
    use crate::source::parse_csv;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn records(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    fn pipeline<'a>(
        server: &mockito::Server,
        tmp: &TempDir,
        progress: &'a dyn ProgressSink,
        concurrency: usize,
    ) -> Pipeline<'a> {
        let client = build_client(DEFAULT_USER_AGENT, None).unwrap();
        let fetcher = AssetFetcher::new(client, &server.url(), "/u/", &tmp.path().join("files"));
        Pipeline::new(
            fetcher,
            progress,
            concurrency,
            Separator::Comma,
            &tmp.path().join("out.csv"),
        )
    }

    fn read_output(tmp: &TempDir) -> Vec<Vec<String>> {
        parse_csv(fs::File::open(tmp.path().join("out.csv")).unwrap()).unwrap()
    }

    #[test]
    fn test_collect_references_dedups() {
        let table = Table::from_records(records(&[
            &["body_uk", "body_ru", "title"],
            &["<img src='/a.jpg'><img src='/a.jpg'>", "<img src=\"/b.png\">", "<img src='/c.gif'>"],
            &["<img src='/b.png'>", "<img src='//cdn.ua/a.jpg'>", ""],
        ]));
        let columns = validate_schema(&table).unwrap();
        let refs = collect_references(&table, &columns);
        let expected: BTreeSet<String> = ["/a.jpg", "/b.png", "//cdn.ua/a.jpg"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(refs, expected);
    }

    #[test]
    fn test_validate_schema_missing_column() {
        let table = Table::from_records(records(&[&["body_uk", "title"], &["", ""]]));
        assert!(matches!(
            validate_schema(&table),
            Err(BatchError::MissingColumn("body_ru"))
        ));
    }

    #[test]
    fn test_write_csv_quoting() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.tsv");
        let table = Table::from_records(records(&[
            &["id", "body_uk"],
            &["1", "a\tb"],
            &["2", "say \"hi\""],
            &["3", "plain"],
        ]));
        write_csv(&table, &path, Separator::Tab).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "id\tbody_uk\n1\t\"a\tb\"\n2\t\"say \"\"hi\"\"\"\n3\tplain\n"
        );
    }

    #[test]
    fn test_run_rewrites_and_fetches_once() {
        let mut server = mockito::Server::new();
        let a = server.mock("GET", "/a.jpg").with_body("A").expect(1).create();
        let b = server.mock("GET", "/b.png").with_body("BB").expect(1).create();
        let tmp = TempDir::new().unwrap();
        let absolute_b = format!("{}/b.png", server.url());

        let source = records(&[
            &["id", "body_uk", "body_ru"],
            &["1", "<p><img src='/a.jpg'></p>", "<img alt=\"x\" src=\"/a.jpg\">"],
            &["2", &format!("<img src='{}'>", absolute_b), "no images"],
        ]);
        let progress = RecordingProgress::default();
        let mut pipeline = pipeline(&server, &tmp, &progress, 4);
        let summary = pipeline.run(&source).unwrap();
        a.assert();
        b.assert();

        let name_a = local_filename(&format!("{}/a.jpg", server.url())).unwrap();
        let name_b = local_filename(&absolute_b).unwrap();
        assert!(name_a.ends_with("-a.jpg"));
        assert!(name_b.ends_with("-b.png"));

        let out = read_output(&tmp);
        assert_eq!(out[0], vec!["id", "body_uk", "body_ru"]);
        assert_eq!(out[1][1], format!("<p><img src='/u/{}'></p>", name_a));
        assert_eq!(out[1][2], format!("<img alt=\"x\" src=\"/u/{}\">", name_a));
        assert_eq!(out[2][1], format!("<img src='/u/{}'>", name_b));
        assert_eq!(out[2][2], "no images");
        assert_eq!(
            fs::read(tmp.path().join("files/u").join(&name_b)).unwrap(),
            b"BB"
        );

        assert_eq!(pipeline.phase(), Phase::Completed);
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.references, 2);
        assert_eq!(summary.downloaded, 2);
        assert!(summary.failed.is_empty());
    }

    #[test]
    fn test_run_two_literals_for_one_image() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/a.jpg")
            .with_chunked_body(|w| {
                for _ in 0..5 {
                    w.write_all(b"chunk")?;
                    std::thread::sleep(std::time::Duration::from_millis(20));
                }
                Ok(())
            })
            .create();
        let tmp = TempDir::new().unwrap();
        let absolute = format!("{}/a.jpg", server.url());

        let source = records(&[
            &["body_uk", "body_ru"],
            &["<img src='/a.jpg'>", &format!("<img src='{}'>", absolute)],
        ]);
        let summary = pipeline(&server, &tmp, &NoProgress, 2).run(&source).unwrap();

        assert!(summary.failed.is_empty(), "failed: {:?}", summary.failed);
        assert_eq!(summary.references, 2);
        let name = local_filename(&absolute).unwrap();
        let out = read_output(&tmp);
        assert_eq!(out[1][0], format!("<img src='/u/{}'>", name));
        assert_eq!(out[1][1], format!("<img src='/u/{}'>", name));
        let entries: Vec<_> = fs::read_dir(tmp.path().join("files/u"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from(&name)]);
    }

    #[test]
    fn test_run_failed_asset_left_untouched() {
        let mut server = mockito::Server::new();
        server.mock("GET", "/ok1.jpg").with_body("1").create();
        server.mock("GET", "/ok2.jpg").with_body("2").create();
        server.mock("GET", "/gone.jpg").with_status(404).create();
        let tmp = TempDir::new().unwrap();

        let source = records(&[
            &["body_uk", "body_ru"],
            &["<img src=\"/ok1.jpg\"><img src=\"/gone.jpg\">", "<img src=\"/ok2.jpg\">"],
        ]);
        let mut pipeline = pipeline(&server, &tmp, &NoProgress, 1);
        let summary = pipeline.run(&source).unwrap();

        assert_eq!(summary.downloaded, 2);
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed.contains_key("/gone.jpg"));
        assert!(!summary.assets.contains_key("/gone.jpg"));

        let out = read_output(&tmp);
        assert!(out[1][0].contains("src=\"/gone.jpg\""));
        assert!(!out[1][0].contains("src=\"/ok1.jpg\""));
        assert!(out[1][0].contains("-ok1.jpg\""));
        assert!(out[1][1].starts_with("<img src=\"/u/"));
    }

    #[test]
    fn test_run_missing_column_aborts_before_io() {
        let mut server = mockito::Server::new();
        let mock = server.mock("GET", "/a.jpg").expect(0).create();
        let tmp = TempDir::new().unwrap();

        let source = records(&[&["body_uk"], &["<img src='/a.jpg'>"]]);
        let mut pipeline = pipeline(&server, &tmp, &NoProgress, 0);
        let err = pipeline.run(&source).unwrap_err();

        assert!(matches!(err, BatchError::MissingColumn("body_ru")));
        assert_eq!(err.to_string(), "Missing required column: body_ru");
        assert_eq!(pipeline.phase(), Phase::Failed);
        assert!(!tmp.path().join("out.csv").exists());
        assert!(!tmp.path().join("files").exists());
        mock.assert();
    }

    #[test]
    fn test_run_requires_data_rows() {
        let server = mockito::Server::new();
        let tmp = TempDir::new().unwrap();
        let source = records(&[&["body_uk", "body_ru"]]);
        let mut pipeline = pipeline(&server, &tmp, &NoProgress, 0);
        assert!(matches!(pipeline.run(&source), Err(BatchError::NoData)));
        assert!(!tmp.path().join("out.csv").exists());
    }

    #[test]
    fn test_progress_counts_downloads_and_rows() {
        let mut server = mockito::Server::new();
        server.mock("GET", "/a.jpg").with_body("A").create();
        server.mock("GET", "/b.jpg").with_status(500).create();
        let tmp = TempDir::new().unwrap();

        let source = records(&[
            &["body_uk", "body_ru"],
            &["<img src='/a.jpg'>", ""],
            &["<img src='/b.jpg'>", ""],
            &["", ""],
        ]);
        let progress = RecordingProgress::default();
        let mut pipeline = pipeline(&server, &tmp, &progress, 0);
        pipeline.run(&source).unwrap();

        let events = progress.events.lock().unwrap();
        let downloads: Vec<_> = events
            .iter()
            .filter(|e| e.phase == Phase::DownloadingAssets && e.reference.is_some())
            .collect();
        let rewrites = events
            .iter()
            .filter(|e| e.phase == Phase::RewritingRows && e.reference.is_none())
            .count();
        assert_eq!(downloads.len(), 2);
        // One phase-entry event plus one per row
        assert_eq!(rewrites, 4);

        let fractions: Vec<f64> = events.iter().map(|e| e.fraction).collect();
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
        assert!(fractions.iter().all(|f| (0.0..=1.0).contains(f)));
        assert_eq!(events.last().unwrap().phase, Phase::Completed);
        assert_eq!(events.last().unwrap().fraction, 1.0);
        // 2 downloads + 3 rows share one denominator
        let before_write = events
            .iter()
            .find(|e| e.phase == Phase::WritingOutput)
            .unwrap();
        assert_eq!(before_write.fraction, 1.0);
        assert!((downloads[0].fraction - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_rerun_skips_existing_files() {
        let mut server = mockito::Server::new();
        let mock = server.mock("GET", "/a.jpg").with_body("A").expect(1).create();
        let tmp = TempDir::new().unwrap();
        let source = records(&[&["body_uk", "body_ru"], &["<img src='/a.jpg'>", ""]]);

        let first = pipeline(&server, &tmp, &NoProgress, 2).run(&source).unwrap();
        let second = pipeline(&server, &tmp, &NoProgress, 2).run(&source).unwrap();
        mock.assert();
        assert_eq!(first.downloaded, 1);
        assert_eq!(second.downloaded, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(first.assets, second.assets);
    }
}
