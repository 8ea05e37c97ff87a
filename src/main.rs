//! Sold Listings Scraper
//!
//! Walks a fan-archive gallery of eBay "sold" search-result screenshots, OCRs
//! every screenshot it has not seen before and appends the listings it finds
//! to a JSON file.

mod collector;
mod config;
mod error;
mod model;
mod ocr;
mod paths;
mod pipeline;
mod segmenter;
mod store;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use collector::HttpGallery;
use config::Config;
use model::ListingCandidate;
use ocr::{Tesseract, extract_lines, locate_tesseract};
use pipeline::Pipeline;
use segmenter::Segmenter;
use store::ListingStore;

const LOG_FILE_NAME: &str = "sold-listings.log";

#[derive(Parser, Debug)]
#[command(name = "sold-listings", version, about = "Scrape sold eBay listings from gallery screenshots")]
struct Cli {
    /// Config file (defaults to ./sold-listings.json when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More logging: -v debug, -vv trace. RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log to the console
    #[arg(long, global = true)]
    no_log_file: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scrape the gallery and append new listings (default)
    Run(RunArgs),
    /// OCR a local screenshot, print its lines and the listings found
    Ocr { image: PathBuf },
    /// Segment a text file of OCR lines (one per line) and print listings as JSON
    Segment { file: PathBuf },
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// First gallery page
    #[arg(long)]
    base_url: Option<String>,

    /// Listings file
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long)]
    max_pages: Option<u32>,

    /// Reprocess images whose previous extraction failed
    #[arg(long)]
    retry_failed: bool,
}

impl RunArgs {
    fn apply(self, config: &mut Config) {
        if let Some(url) = self.base_url {
            config.collector.base_url = url;
        }
        if let Some(output) = self.output {
            config.store.output = output;
        }
        if let Some(max_pages) = self.max_pages {
            config.collector.max_pages = max_pages;
        }
        if self.retry_failed {
            config.store.retry_failed = true;
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, !cli.no_log_file);

    std::panic::set_hook(Box::new(|info| {
        tracing::error!("[PANIC] {}", info);
    }));

    ExitCode::from(exit_code(execute(cli)))
}

/// Logs a failed run once and maps it to the process exit status.
fn exit_code(result: Result<()>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("{:#}", e);
            1
        }
    }
}

fn execute(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::Run(args) => {
            args.apply(&mut config);
            run(&config)
        }
        Command::Ocr { image } => ocr_image(&config, &image),
        Command::Segment { file } => segment_file(&config, &file),
    }
}

/// Sets up console logging plus an optional plain-text log file.
fn init_logging(verbose: u8, to_file: bool) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,sold_listings={}", level)));

    let (file_layer, file_error) = if to_file {
        match open_log_file() {
            Ok(file) => (
                Some(
                    fmt::layer()
                        .with_writer(Mutex::new(file))
                        .with_ansi(false),
                ),
                None,
            ),
            Err(e) => (None, Some(e)),
        }
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    if let Some(e) = file_error {
        tracing::warn!("Logging to console only: {:#}", e);
    }
}

fn open_log_file() -> Result<File> {
    let dir = paths::logs_dir();
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let path = dir.join(LOG_FILE_NAME);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

fn run(config: &Config) -> Result<()> {
    tracing::info!("Sold listings scraper started");
    tracing::info!("Gallery: {}", config.collector.base_url);
    tracing::info!("Output: {}", config.store.output.display());

    // Fail before touching the network when OCR cannot work at all
    let recognizer = Tesseract::new(locate_tesseract(&config.ocr)?, &config.ocr);
    let segmenter = Segmenter::new(&config.segmenter).context("Invalid segmenter pattern")?;
    let gallery = HttpGallery::new(&config.collector)?;
    let mut store = ListingStore::open(&config.store.output)?;

    let summary = Pipeline::new(&gallery, &recognizer, &segmenter, config).run(&mut store);
    store.save()?;

    if summary.updated() {
        println!(
            "{} new listings saved to {} ({} total). Commit the updated file.",
            store.new_count(),
            store.path().display(),
            store.total()
        );
    } else {
        tracing::info!("No new listings");
    }
    Ok(())
}

fn ocr_image(config: &Config, path: &Path) -> Result<()> {
    let img = image::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let recognizer = Tesseract::new(locate_tesseract(&config.ocr)?, &config.ocr);
    let segmenter = Segmenter::new(&config.segmenter).context("Invalid segmenter pattern")?;

    let lines = extract_lines(&img, &config.preprocess, &config.ocr, &recognizer)?;
    println!("--- {} OCR lines ---", lines.len());
    for line in &lines {
        println!("{}", line);
    }

    println!("--- Listings ---");
    print_listings(&segmenter.segment(&lines))
}

fn segment_file(config: &Config, path: &Path) -> Result<()> {
    print_listings(&read_segment_file(config, path)?)
}

/// Segments a text file holding one OCR line per line.
fn read_segment_file(config: &Config, path: &Path) -> Result<Vec<ListingCandidate>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let segmenter = Segmenter::new(&config.segmenter).context("Invalid segmenter pattern")?;
    Ok(segmenter.segment(&lines))
}

fn print_listings(listings: &[ListingCandidate]) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(listings)?);
    Ok(())
}
