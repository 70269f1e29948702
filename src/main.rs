#![allow(clippy::print_stdout)]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use medical_warehouse::collector::Collector;
use medical_warehouse::config::AppConfig;
use medical_warehouse::file_writer::{export_detections_csv, write_json_report};
use medical_warehouse::logging::{init_logging, OperationTimer};
use medical_warehouse::metrics::MetricsCollector;
use medical_warehouse::validation::InputValidator;
use medical_warehouse::{Database, Pipeline, QueryService, RunOptions, SidecarDetector};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a batch folder into the raw store
    Ingest {
        /// Batch folder (YYYY-MM-DD); defaults to the latest
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// Classify images that have no detection yet
    Classify {
        /// Base directory for relative image paths
        #[arg(long)]
        image_root: Option<PathBuf>,
    },
    /// Rebuild the dimensional model
    Model,
    /// Ingest, classify and model in one run
    Run {
        /// Batch folder (YYYY-MM-DD); defaults to the latest
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Base directory for relative image paths
        #[arg(long)]
        image_root: Option<PathBuf>,

        /// Write the run report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Show store row counts
    Stats,
    /// Export the detection store as CSV
    ExportDetections {
        /// Output file
        #[arg(short, long, default_value = "data/processed/detections.csv")]
        output: PathBuf,
    },
    /// Run an analytics query and print the response as JSON
    Report {
        #[command(subcommand)]
        query: ReportQuery,
    },
}

#[derive(Subcommand)]
enum ReportQuery {
    /// Most mentioned product terms
    TopProducts {
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Daily activity of one channel
    Activity {
        /// Channel name
        channel: String,

        #[arg(short, long)]
        days: Option<u32>,

        /// Last day of the window (YYYY-MM-DD); defaults to today
        #[arg(long)]
        as_of: Option<String>,
    },
    /// Keyword search
    Search {
        query: String,

        #[arg(short, long)]
        channel: Option<String>,

        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Image usage statistics
    Visual,
    /// Engagement by image category and top detected objects
    Engagement {
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging; keep the guard alive until exit
    let log_file = config.logging.file_path.as_deref().map(Path::new);
    let _guard = init_logging(Some(&config.get_log_level()), log_file, config.logging.format == "json")?;

    if let Err(e) = MetricsCollector::init() {
        warn!("Metrics recorder not installed: {e}");
    }

    info!("Starting medical-warehouse");

    // Parse command line arguments
    let cli = Cli::parse();

    let database_url = config.get_database_url();
    InputValidator::validate_database_url(&database_url)?;
    let mut db_config = config.database.clone();
    db_config.url = database_url;
    let db = Database::from_config(&db_config).context("Failed to open database")?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current unit of work");
            ctrl_c.cancel();
        }
    });

    match cli.command {
        Commands::Ingest { dir } => {
            let mut pipeline = Pipeline::new(db, config);
            let result = pipeline.ingest(dir.as_deref())?;
            print_json(&result)?;
        }
        Commands::Classify { image_root } => {
            InputValidator::validate_workers(config.classifier.workers)?;
            let detector = detector(image_root, &config);
            let mut pipeline = Pipeline::new(db, config);
            let report = pipeline.classify(&detector, &cancel).await?;
            print_json(&report)?;
        }
        Commands::Model => {
            let mut pipeline = Pipeline::new(db, config);
            let summary = pipeline.model()?;
            print_json(&summary)?;
        }
        Commands::Run { dir, image_root, report } => {
            let timer = OperationTimer::new("pipeline_run");
            let detector = detector(image_root, &config);
            let mut pipeline = Pipeline::new(db, config);
            let options = RunOptions {
                batch_dir: dir,
                collection_date: None,
            };
            // The platform client is external; runs start from batch files on disk
            let run = pipeline
                .run(None::<&dyn Collector>, &detector, &options, &cancel)
                .await?;
            timer.finish();
            if let Some(path) = report {
                InputValidator::validate_file_path(&path)?;
                write_json_report(&run, &path)?;
                info!(path = %path.display(), "Run report written");
            }
            print_json(&run)?;
            println!("{}", pipeline.metrics().get_summary());
        }
        Commands::Stats => {
            print_json(&db.store_stats()?)?;
        }
        Commands::ExportDetections { output } => {
            InputValidator::validate_file_path(&output)?;
            let rows = export_detections_csv(&db.detections()?, &output)?;
            info!(rows, path = %output.display(), "Detections exported");
        }
        Commands::Report { query } => {
            let service = QueryService::new(db, config.analytics.clone())?;
            let response = match query {
                ReportQuery::TopProducts { limit } => service.top_products(limit),
                ReportQuery::Activity { channel, days, as_of } => {
                    let as_of = as_of
                        .map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d"))
                        .transpose()
                        .context("Invalid --as-of date, expected YYYY-MM-DD")?;
                    service.channel_activity(&channel, days, as_of)
                }
                ReportQuery::Search { query, channel, limit } => {
                    if let Some(limit) = limit {
                        InputValidator::validate_search_limit(limit)?;
                    }
                    service.search_messages(&query, channel.as_deref(), limit)
                }
                ReportQuery::Visual => service.visual_content(),
                ReportQuery::Engagement { limit } => service.image_engagement(limit),
            };
            print_json(&response)?;
        }
    }

    Ok(())
}

fn detector(image_root: Option<PathBuf>, config: &AppConfig) -> SidecarDetector {
    image_root.map_or_else(|| SidecarDetector::from_config(&config.ingest), SidecarDetector::with_base_dir)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
