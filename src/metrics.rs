use std::time::Duration;

use anyhow::Result;
use metrics::{counter, gauge, histogram};

use crate::classifier::ClassifyReport;
use crate::collector::CollectReport;
use crate::ingest::LoadResult;
use crate::models::DimensionalModel;

const RECORDS_INGESTED: &str = "warehouse_records_ingested_total";
const RECORDS_SKIPPED: &str = "warehouse_records_skipped_total";
const RECORDS_FAILED: &str = "warehouse_records_failed_total";
const MESSAGES_COLLECTED: &str = "warehouse_messages_collected_total";
const CHANNELS_FAILED: &str = "warehouse_channels_failed_total";
const IMAGES_CLASSIFIED: &str = "warehouse_images_classified_total";
const IMAGES_MISSING: &str = "warehouse_images_missing_total";
const MODEL_ROWS: &str = "warehouse_model_rows";
const STAGE_DURATION: &str = "warehouse_stage_duration_seconds";
const QUERIES: &str = "warehouse_queries_total";
const ERRORS: &str = "warehouse_errors_total";

/// Pipeline metrics: forwards to the `metrics` facade and keeps local totals
/// for the end-of-run summary.
#[derive(Debug, Default, Clone)]
pub struct MetricsCollector {
    pub records_ingested: u64,
    pub records_skipped: u64,
    pub records_failed: u64,
    pub messages_collected: u64,
    pub channels_failed: u64,
    pub images_classified: u64,
    pub images_missing: u64,
    pub rebuilds: u64,
    pub fact_rows: u64,
    pub errors_total: u64,
}

impl MetricsCollector {
    /// Install the no-op recorder; fails if a recorder is already installed
    pub fn init() -> Result<()> {
        metrics::set_global_recorder(metrics::NoopRecorder)
            .map_err(|e| anyhow::anyhow!("Failed to initialize metrics recorder: {}", e))?;
        Ok(())
    }

    pub fn record_collect(&mut self, report: &CollectReport, duration: Duration) {
        counter!(MESSAGES_COLLECTED).increment(report.messages as u64);
        counter!(CHANNELS_FAILED).increment(report.failed_channels.len() as u64);
        histogram!(STAGE_DURATION, "stage" => "collect").record(duration.as_secs_f64());

        self.messages_collected += report.messages as u64;
        self.channels_failed += report.failed_channels.len() as u64;
    }

    pub fn record_ingest(&mut self, result: &LoadResult, duration: Duration) {
        counter!(RECORDS_INGESTED).increment(result.inserted_count as u64);
        counter!(RECORDS_SKIPPED).increment(result.skipped_count as u64);
        counter!(RECORDS_FAILED).increment(result.errors.len() as u64);
        histogram!(STAGE_DURATION, "stage" => "ingest").record(duration.as_secs_f64());

        self.records_ingested += result.inserted_count as u64;
        self.records_skipped += result.skipped_count as u64;
        self.records_failed += result.errors.len() as u64;
    }

    pub fn record_classification(&mut self, report: &ClassifyReport, duration: Duration) {
        for (category, count) in &report.by_category {
            counter!(IMAGES_CLASSIFIED, "category" => category.as_str()).increment(*count as u64);
        }
        counter!(IMAGES_MISSING).increment(report.skipped_missing_image as u64);
        histogram!(STAGE_DURATION, "stage" => "classify").record(duration.as_secs_f64());

        self.images_classified += report.classified as u64;
        self.images_missing += report.skipped_missing_image as u64;
    }

    pub fn record_rebuild(&mut self, model: &DimensionalModel, duration: Duration) {
        gauge!(MODEL_ROWS, "table" => "dim_channels").set(model.channels.len() as f64);
        gauge!(MODEL_ROWS, "table" => "dim_dates").set(model.dates.len() as f64);
        gauge!(MODEL_ROWS, "table" => "fct_messages").set(model.facts.len() as f64);
        histogram!(STAGE_DURATION, "stage" => "model").record(duration.as_secs_f64());

        self.rebuilds += 1;
        self.fact_rows = model.facts.len() as u64;
    }

    /// Record a failed stage
    pub fn record_error(&mut self, stage: &'static str, code: &'static str) {
        counter!(ERRORS, "stage" => stage, "code" => code).increment(1);
        self.errors_total += 1;
    }

    /// Get a human-readable summary of local totals
    #[must_use]
    pub fn get_summary(&self) -> String {
        format!(
            "Metrics Summary:\n\
             - Messages collected: {}\n\
             - Channels failed: {}\n\
             - Records ingested: {}\n\
             - Records skipped: {}\n\
             - Records failed: {}\n\
             - Images classified: {}\n\
             - Images missing: {}\n\
             - Rebuilds: {}\n\
             - Fact rows: {}\n\
             - Errors: {}",
            self.messages_collected,
            self.channels_failed,
            self.records_ingested,
            self.records_skipped,
            self.records_failed,
            self.images_classified,
            self.images_missing,
            self.rebuilds,
            self.fact_rows,
            self.errors_total,
        )
    }
}

/// Count one query-layer call
pub fn record_query(operation: &'static str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(QUERIES, "operation" => operation, "status" => status).increment(1);
}
