//! Stage runner: Collect → Ingest → Classify → Model.
//!
//! Stages run strictly in order. Each commits its own output before the next
//! starts, so cancellation between stages leaves every finished stage intact.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::classifier::{classify_pending, ClassifyReport, ObjectDetector};
use crate::collector::{collect_channels, CollectReport, Collector};
use crate::config::AppConfig;
use crate::db::Database;
use crate::error::{Result, WarehouseError};
use crate::ingest::{latest_batch_dir, IngestionLoader, LoadResult};
use crate::metrics::MetricsCollector;
use crate::modeler;

/// Options for one run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Batch folder to ingest; defaults to the latest under the raw dir
    pub batch_dir: Option<PathBuf>,
    /// Collection date for new batch files; defaults to today (UTC)
    pub collection_date: Option<NaiveDate>,
}

/// Row counts of the rebuilt model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModelSummary {
    pub channels: usize,
    pub dates: usize,
    pub facts: usize,
    /// Facts kept with a null channel or date key
    pub unresolved_facts: usize,
    pub image_detections: usize,
}

/// Everything one run did
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub collect: Option<CollectReport>,
    pub ingest: LoadResult,
    pub classify: ClassifyReport,
    pub model: ModelSummary,
}

pub struct Pipeline {
    db: Database,
    config: AppConfig,
    metrics: MetricsCollector,
}

impl Pipeline {
    #[must_use]
    pub fn new(db: Database, config: AppConfig) -> Self {
        Self {
            db,
            config,
            metrics: MetricsCollector::default(),
        }
    }

    #[must_use]
    pub const fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    fn checkpoint(cancel: &CancellationToken, stage: &'static str) -> Result<()> {
        if cancel.is_cancelled() {
            warn!(stage, "Run cancelled before stage");
            return Err(WarehouseError::Cancelled(stage));
        }
        Ok(())
    }

    fn track<T>(&mut self, stage: &'static str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.metrics.record_error(stage, e.code());
        }
        result
    }

    /// Fetch every configured channel into batch files
    pub async fn collect<C: Collector + ?Sized>(
        &mut self,
        collector: &C,
        date: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<CollectReport> {
        let start = Instant::now();
        let cfg = &self.config.collector;
        let result = collect_channels(
            collector,
            &cfg.channels,
            cfg.max_messages,
            &self.config.retry_policy(),
            Path::new(&self.config.ingest.raw_dir),
            date,
            cancel,
        )
        .await;
        let report = self.track("collect", result)?;
        self.metrics.record_collect(&report, start.elapsed());
        Ok(report)
    }

    /// Load one batch folder, or the latest one when `dir` is `None`
    pub fn ingest(&mut self, dir: Option<&Path>) -> Result<LoadResult> {
        let start = Instant::now();
        let dir = match dir {
            Some(dir) => Some(dir.to_path_buf()),
            None => latest_batch_dir(Path::new(&self.config.ingest.raw_dir))?,
        };
        let Some(dir) = dir.filter(|d| d.is_dir()) else {
            warn!(raw_dir = self.config.ingest.raw_dir, "No batch folder to ingest");
            return Ok(LoadResult::default());
        };

        info!(dir = %dir.display(), "Ingesting batch folder");
        let result = IngestionLoader::new(self.db.clone()).load_dir(&dir);
        let result = self.track("ingest", result)?;
        self.metrics.record_ingest(&result, start.elapsed());
        Ok(result)
    }

    /// Classify all images without a detection row
    pub async fn classify<D: ObjectDetector + ?Sized>(
        &mut self,
        detector: &D,
        cancel: &CancellationToken,
    ) -> Result<ClassifyReport> {
        let start = Instant::now();
        let result = classify_pending(
            &self.db,
            detector,
            self.config.classifier.workers,
            self.config.classifier.confidence_threshold,
            cancel,
        )
        .await;
        let report = self.track("classify", result)?;
        self.metrics.record_classification(&report, start.elapsed());
        Ok(report)
    }

    /// Rebuild the dimensional model
    pub fn model(&mut self) -> Result<ModelSummary> {
        let start = Instant::now();
        let result = self
            .config
            .date_range()
            .map_err(WarehouseError::from)
            .and_then(|(from, to)| modeler::rebuild(&self.db, from, to));
        let model = self.track("model", result)?;
        self.metrics.record_rebuild(&model, start.elapsed());

        Ok(ModelSummary {
            channels: model.channels.len(),
            dates: model.dates.len(),
            facts: model.facts.len(),
            unresolved_facts: model
                .facts
                .iter()
                .filter(|f| f.channel_key.is_none() || f.date_key.is_none())
                .count(),
            image_detections: model.image_detections.len(),
        })
    }

    /// Run every stage in order; collection only when a collector is given
    pub async fn run<C, D>(
        &mut self,
        collector: Option<&C>,
        detector: &D,
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<RunReport>
    where
        C: Collector + ?Sized,
        D: ObjectDetector + ?Sized,
    {
        let mut report = RunReport::default();

        let mut batch_dir = options.batch_dir.clone();
        if let Some(collector) = collector {
            Self::checkpoint(cancel, "collect")?;
            let date = options.collection_date.unwrap_or_else(|| Utc::now().date_naive());
            let collected = self.collect(collector, date, cancel).await?;
            if batch_dir.is_none() {
                batch_dir = Some(Path::new(&self.config.ingest.raw_dir).join(date.format("%Y-%m-%d").to_string()));
            }
            report.collect = Some(collected);
        }

        Self::checkpoint(cancel, "ingest")?;
        report.ingest = self.ingest(batch_dir.as_deref())?;

        Self::checkpoint(cancel, "classify")?;
        report.classify = self.classify(detector, cancel).await?;

        Self::checkpoint(cancel, "model")?;
        report.model = self.model()?;

        info!(
            inserted = report.ingest.inserted_count,
            classified = report.classify.classified,
            facts = report.model.facts,
            "Pipeline run complete"
        );
        info!("{}", self.metrics.get_summary());
        Ok(report)
    }
}
