//! Command-line interface for repolens.

use clap::{Parser, Subcommand};
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::analyze::AnalysisOptions;
use crate::config::PipelineConfig;
use crate::index::SearchQuery;
use crate::pipeline::AnalysisPipeline;
use crate::queue::QueueEvent;
use crate::report;

/// Exit codes.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_ERROR: i32 = 2;

/// Default configuration file names to search for.
const DEFAULT_CONFIG_NAMES: &[&str] = &["repolens.yaml", ".repolens.yaml"];

/// Concurrent repository analysis with deduplication, caching, and
/// ranked search.
///
/// Repolens analyzes filesystem paths and reports languages, frameworks,
/// and complexity. Identical concurrent requests share one execution and
/// completed results are cached and searchable.
#[derive(Parser)]
#[command(name = "repolens")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyze one or more repository paths
    #[command(visible_alias = "scan")]
    Analyze(AnalyzeArgs),
    /// Create a configuration file with defaults
    Init(InitArgs),
}

/// Arguments for the analyze command.
#[derive(Parser)]
pub struct AnalyzeArgs {
    /// Paths to analyze
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Path to configuration YAML file (default: auto-discover)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output format: pretty or json
    #[arg(short, long, default_value = "pretty")]
    pub format: String,

    /// Override the configured concurrency bound
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Override the per-analysis timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Also scan hidden directories
    #[arg(long)]
    pub include_hidden: bool,

    /// Glob patterns to exclude from the scan (repeatable)
    #[arg(long = "exclude")]
    pub excludes: Vec<String>,

    /// Tags attached to each analyzed repository (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// After analysis, search the index by language (repeatable)
    #[arg(long = "search-language")]
    pub search_languages: Vec<String>,

    /// After analysis, search the index by framework (repeatable)
    #[arg(long = "search-framework")]
    pub search_frameworks: Vec<String>,

    /// After analysis, search the index by file extension (repeatable)
    #[arg(long = "search-file-type")]
    pub search_file_types: Vec<String>,

    /// After analysis, search the index by tag (repeatable)
    #[arg(long = "search-tag")]
    pub search_tags: Vec<String>,

    /// After analysis, free-text search over names and summaries
    #[arg(long = "search-text")]
    pub search_text: Option<String>,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

/// Arguments for the init command.
#[derive(Parser)]
pub struct InitArgs {
    /// Output file path
    #[arg(short, long, default_value = "repolens.yaml")]
    pub output: PathBuf,
}

/// Discover a configuration file in the current directory.
fn discover_config() -> Option<PathBuf> {
    DEFAULT_CONFIG_NAMES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

fn load_config(args: &AnalyzeArgs) -> anyhow::Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => match discover_config() {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::default(),
        },
    };
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.task_timeout_ms = Some(timeout_ms);
    }
    config.validate()?;
    Ok(config)
}

fn search_query(args: &AnalyzeArgs) -> SearchQuery {
    SearchQuery {
        languages: args.search_languages.clone(),
        frameworks: args.search_frameworks.clone(),
        file_types: args.search_file_types.clone(),
        tags: args.search_tags.clone(),
        text: args.search_text.clone(),
    }
}

/// Run the analyze command.
pub async fn run_analyze(args: &AnalyzeArgs) -> anyhow::Result<i32> {
    if args.format != "pretty" && args.format != "json" {
        eprintln!(
            "Error: invalid format {:?}, must be 'pretty' or 'json'",
            args.format
        );
        return Ok(EXIT_ERROR);
    }

    let config = match load_config(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return Ok(EXIT_ERROR);
        }
    };

    let options = AnalysisOptions {
        include_hidden: args.include_hidden,
        exclude: args.excludes.clone(),
        tags: args.tags.clone(),
        ..AnalysisOptions::default()
    };

    let pipeline = Arc::new(AnalysisPipeline::with_default_executor(&config));

    // Progress bar: per-request completion drives the position, queue
    // events drive the live message. Cached hits never reach the queue,
    // so the bar cannot be driven by queue events alone.
    let bar = if args.no_progress || args.format == "json" {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(args.paths.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("  {bar:30.cyan/dim} {pos}/{len} {msg}")
                .expect("static template is valid"),
        );
        bar
    };

    let mut events = pipeline.subscribe();
    let event_bar = bar.clone();
    let event_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(QueueEvent::Progress(progress)) => {
                    event_bar.set_message(format!("{} running", progress.running));
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut inflight: FuturesUnordered<_> = args
        .paths
        .iter()
        .enumerate()
        .map(|(position, raw)| {
            let pipeline = Arc::clone(&pipeline);
            let options = options.clone();
            let raw = raw.clone();
            async move {
                let outcome = pipeline.analyze(&raw, options).await;
                (position, raw, outcome)
            }
        })
        .collect();

    let mut reports = Vec::new();
    let mut failures = Vec::new();
    while let Some((position, raw, outcome)) = inflight.next().await {
        bar.inc(1);
        match outcome {
            Ok(report) => reports.push((position, report)),
            Err(error) => failures.push((position, raw, error)),
        }
    }
    bar.finish_and_clear();
    event_task.abort();

    // Restore submission order for output
    reports.sort_by_key(|(position, _)| *position);
    failures.sort_by_key(|(position, _, _)| *position);
    let reports: Vec<_> = reports.into_iter().map(|(_, report)| report).collect();
    let failures: Vec<_> = failures
        .into_iter()
        .map(|(_, raw, error)| (raw, error))
        .collect();

    let query = search_query(args);
    let search_results = (!query.is_empty()).then(|| pipeline.search(&query));

    let any_failed = !failures.is_empty();
    match args.format.as_str() {
        "json" => {
            let json = report::JsonReport::new(reports, failures, search_results);
            report::write_json(&json)?;
        }
        _ => {
            report::write_pretty(&reports, &failures, search_results.as_deref());
        }
    }

    pipeline.close();
    if any_failed {
        Ok(EXIT_FAILED)
    } else {
        Ok(EXIT_SUCCESS)
    }
}

/// Run the init command.
pub fn run_init(args: &InitArgs) -> anyhow::Result<i32> {
    if args.output.exists() {
        eprintln!("Error: file already exists: {}", args.output.display());
        eprintln!("Remove it or use --output to specify a different path");
        return Ok(EXIT_ERROR);
    }

    let config = PipelineConfig::default();
    let yaml = serde_yaml::to_string(&config)?;
    if let Err(e) = std::fs::write(&args.output, yaml) {
        eprintln!("Error: failed to write configuration: {}", e);
        return Ok(EXIT_ERROR);
    }

    println!("Created {} with default settings", args.output.display());
    println!();
    println!("Next steps:");
    println!(
        "  1. Edit {} to tune concurrency and cache policy",
        args.output.display()
    );
    println!(
        "  2. Run: repolens analyze <path> --config {}",
        args.output.display()
    );

    Ok(EXIT_SUCCESS)
}
