//! Run configuration: CONL file, command-line overrides and defaults

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fetch::{image_dir, DEFAULT_USER_AGENT};
use crate::types::Separator;

pub const DEFAULT_CONFIG_FILE: &str = "sheet-images.conl";
const DEFAULT_HOSTNAME: &str = "https://site.com.ua";
const DEFAULT_IMAGEDIR: &str = "/content/uploads/images/";
const DEFAULT_OUTPUT: &str = "output.csv";
const DEFAULT_STORAGE_ROOT: &str = "files";
const DEFAULT_CONCURRENCY: usize = 8;

/// Values read from `sheet-images.conl`
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub spreadsheet_url: Option<String>,
    pub hostname: Option<String>,
    pub imagedir: Option<String>,
    pub output: Option<String>,
    pub separator: Option<Separator>,
    pub storage_root: Option<String>,
    pub concurrency: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
}

impl FileConfig {
    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_conl::from_str(content)?)
    }

    /// Load an explicit config file, or the default one if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

/// Command-line options for a run; anything set here wins over the file
#[derive(Debug, Default, Clone, clap::Args)]
pub struct RunArgs {
    /// Google Spreadsheet URL to read
    #[arg(value_name = "SPREADSHEET_URL")]
    pub spreadsheet_url: Option<String>,
    /// Read a local UTF-8 CSV file instead of a spreadsheet
    #[arg(long, value_name = "PATH", conflicts_with = "spreadsheet_url")]
    pub csv: Option<PathBuf>,
    /// Base URL for host-relative image links
    #[arg(long)]
    pub hostname: Option<String>,
    /// Path prefix written into the HTML and used under the storage root
    #[arg(long)]
    pub imagedir: Option<String>,
    /// Output CSV file
    #[arg(short, long)]
    pub output: Option<String>,
    /// Output field separator
    #[arg(short, long, value_enum)]
    pub separator: Option<Separator>,
    /// Local directory that images are saved under
    #[arg(long)]
    pub storage_root: Option<String>,
    /// Parallel downloads (0 = one thread per image)
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,
    /// Per-request timeout; unset keeps the HTTP client default
    #[arg(long)]
    pub timeout_secs: Option<u64>,
    #[arg(long)]
    pub user_agent: Option<String>,
    /// Write a CONL manifest of downloaded and failed images
    #[arg(long, value_name = "PATH")]
    pub manifest: Option<PathBuf>,
    /// Config file (defaults to ./sheet-images.conl when present)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Delete an existing image directory and output file without asking
    #[arg(long, conflicts_with = "resume")]
    pub force: bool,
    /// Keep an existing image directory and skip images already on disk
    #[arg(long)]
    pub resume: bool,
    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Options for `clean`
#[derive(Debug, Default, Clone, clap::Args)]
pub struct CleanArgs {
    #[arg(long)]
    pub imagedir: Option<String>,
    #[arg(short, long)]
    pub output: Option<String>,
    #[arg(long)]
    pub storage_root: Option<String>,
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

impl CleanArgs {
    /// Image directory and output file a run with these settings produces
    pub fn targets(self, file: FileConfig) -> (PathBuf, PathBuf) {
        let storage_root = pick(self.storage_root, file.storage_root, DEFAULT_STORAGE_ROOT);
        let imagedir = pick(self.imagedir, file.imagedir, DEFAULT_IMAGEDIR);
        let output = pick(self.output, file.output, DEFAULT_OUTPUT);
        (
            image_dir(Path::new(&storage_root), &imagedir),
            PathBuf::from(output),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Spreadsheet(String),
    CsvFile(PathBuf),
}

/// Fully resolved settings for one batch
#[derive(Debug, Clone)]
pub struct Config {
    pub source: Source,
    pub hostname: String,
    pub imagedir: String,
    pub output: PathBuf,
    pub separator: Separator,
    pub storage_root: PathBuf,
    pub concurrency: usize,
    pub timeout: Option<Duration>,
    pub user_agent: String,
    pub manifest: Option<PathBuf>,
}

fn pick(arg: Option<String>, file: Option<String>, default: &str) -> String {
    arg.or(file).unwrap_or_else(|| default.to_string())
}

impl Config {
    /// Merge flags over file values over defaults, then check that every
    /// required field is filled in.
    pub fn resolve(args: RunArgs, file: FileConfig) -> Result<Self> {
        let source = match (args.csv, args.spreadsheet_url.or(file.spreadsheet_url)) {
            (Some(path), _) => Some(Source::CsvFile(path)),
            (None, Some(url)) if !url.trim().is_empty() => Some(Source::Spreadsheet(url)),
            _ => None,
        };
        let hostname = pick(args.hostname, file.hostname, DEFAULT_HOSTNAME);
        let imagedir = pick(args.imagedir, file.imagedir, DEFAULT_IMAGEDIR);
        let output = pick(args.output, file.output, DEFAULT_OUTPUT);

        let mut missing = Vec::new();
        if source.is_none() {
            missing.push("Spreadsheet URL");
        }
        if hostname.trim().is_empty() {
            missing.push("Hostname");
        }
        if imagedir.trim().is_empty() {
            missing.push("Image Directory");
        }
        if output.trim().is_empty() {
            missing.push("Output CSV File Name");
        }
        let Some(source) = source.filter(|_| missing.is_empty()) else {
            bail!("Please fill in the following fields: {}", missing.join(", "));
        };

        Ok(Self {
            source,
            hostname,
            imagedir,
            output: PathBuf::from(output),
            separator: args.separator.or(file.separator).unwrap_or_default(),
            storage_root: PathBuf::from(pick(
                args.storage_root,
                file.storage_root,
                DEFAULT_STORAGE_ROOT,
            )),
            concurrency: args
                .concurrency
                .or(file.concurrency)
                .unwrap_or(DEFAULT_CONCURRENCY),
            timeout: args
                .timeout_secs
                .or(file.timeout_secs)
                .map(Duration::from_secs),
            user_agent: pick(args.user_agent, file.user_agent, DEFAULT_USER_AGENT),
            manifest: args.manifest,
        })
    }
}
