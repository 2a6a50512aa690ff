use anyhow::Result;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::Path;
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod fetch;
mod filename;
mod links;
mod manifest;
mod pipeline;
mod preflight;
mod progress;
mod resolve;
mod source;
mod types;
mod utils;

pub use types::*;

use config::{CleanArgs, Config, FileConfig, RunArgs, Source};
use fetch::{build_client, AssetFetcher};
use pipeline::{Pipeline, Summary};
use preflight::{run_preflight, ConflictResolver, Decision, FixedDecision, Prompt};
use progress::{ConsoleProgress, NoProgress, ProgressSink};
use source::{CsvFileSource, SpreadsheetSource, TableSource};
use utils::osc8_path;

#[derive(Parser)]
#[command(name = "sheet-images")]
#[command(about = "Download images referenced in spreadsheet HTML and point the HTML at local copies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download images and write the updated CSV
    Run(RunArgs),
    /// Print the CSV export URL for a Google Spreadsheet URL
    ExportUrl {
        #[arg(value_name = "SPREADSHEET_URL")]
        url: String,
    },
    /// Remove the image directory and output file
    Clean(CleanArgs),
}

fn init_logging(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_summary(summary: &Summary) {
    println!(
        "\nDone! Rows: {}, images: {} (downloaded {}, already present {}, failed {})",
        summary.rows,
        summary.references,
        summary.downloaded,
        summary.skipped,
        summary.failed.len()
    );
    for (reference, error) in &summary.failed {
        eprintln!("  Error: {} - {}", reference, error);
    }
    println!("Output saved to {}", osc8_path(&summary.output));
}

fn run_batch(args: RunArgs) -> Result<()> {
    let (quiet, force, resume) = (args.quiet, args.force, args.resume);
    let file = FileConfig::load(args.config.as_deref())?;
    let config = Config::resolve(args, file)?;

    let resolver: Box<dyn ConflictResolver> = if force {
        Box::new(FixedDecision(Decision::OverwriteRequested))
    } else if resume {
        Box::new(FixedDecision(Decision::Proceed))
    } else {
        Box::new(Prompt)
    };
    run_preflight(&config, resolver.as_ref())?;

    let client = build_client(&config.user_agent, config.timeout)?;
    let source: Box<dyn TableSource> = match &config.source {
        Source::Spreadsheet(url) => Box::new(SpreadsheetSource {
            spreadsheet_url: url.clone(),
            client: client.clone(),
        }),
        Source::CsvFile(path) => Box::new(CsvFileSource { path: path.clone() }),
    };

    let fetcher = AssetFetcher::new(client, &config.hostname, &config.imagedir, &config.storage_root);
    tracing::info!(
        source = %source.describe(),
        hostname = %config.hostname,
        images = %fetcher.dir().display(),
        separator = config.separator.as_str(),
        "starting"
    );

    let progress: Box<dyn ProgressSink> = if quiet {
        Box::new(NoProgress)
    } else {
        Box::new(ConsoleProgress::default())
    };
    let mut pipeline = Pipeline::new(
        fetcher,
        progress.as_ref(),
        config.concurrency,
        config.separator,
        &config.output,
    );
    let summary = pipeline.run(source.as_ref())?;
    tracing::debug!(phase = %pipeline.phase(), "batch finished");

    if !quiet {
        print_summary(&summary);
    }
    if let Some(path) = &config.manifest {
        manifest::write_manifest(&summary, path)?;
        if !quiet {
            println!("Manifest saved to {}", osc8_path(path));
        }
    }
    Ok(())
}

fn run_clean(args: CleanArgs) -> Result<()> {
    let file = FileConfig::load(args.config.as_deref())?;
    let (dir, output) = args.targets(file);
    println!("Cleaning generated files...");

    for path in [dir.as_path(), output.as_path()] {
        remove_path(path)?;
    }

    println!("Clean complete!");
    Ok(())
}

fn remove_path(path: &Path) -> Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)?;
    } else if path.exists() {
        fs::remove_file(path)?;
    } else {
        return Ok(());
    }
    println!("  Removed {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let quiet = matches!(&cli.command, Commands::Run(args) if args.quiet);
    init_logging(quiet);

    match cli.command {
        Commands::Run(args) => run_batch(args),
        Commands::ExportUrl { url } => {
            println!("{}", source::export_url(&url)?);
            Ok(())
        }
        Commands::Clean(args) => run_clean(args),
    }
}
