//! Ingestion of collector batches into the raw store.
//!
//! Batches live on disk as `<raw_dir>/<YYYY-MM-DD>/<channel>.json`. Loading is
//! record-at-a-time with insert-if-absent semantics, so re-running a batch is a
//! no-op and a bad record never blocks its siblings.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::error::Result;
use crate::models::{NewRawMessage, RawBatch, RawMessageRecord};
use crate::validation::InputValidator;

/// Why a single record was not written
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordError {
    /// Position in the batch
    pub index: usize,
    /// Message id when one could be read
    pub message_id: Option<i64>,
    /// Human-readable reason
    pub reason: String,
}

/// Outcome of loading one or more batches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadResult {
    /// Rows newly written
    pub inserted_count: usize,
    /// Duplicates plus malformed records
    pub skipped_count: usize,
    /// Per-record failures, in batch order
    pub errors: Vec<RecordError>,
}

impl LoadResult {
    /// Fold another result into this one
    pub fn merge(&mut self, other: Self) {
        self.inserted_count += other.inserted_count;
        self.skipped_count += other.skipped_count;
        self.errors.extend(other.errors);
    }
}

/// Merges collector records into the raw store
#[derive(Clone)]
pub struct IngestionLoader {
    db: Database,
}

impl IngestionLoader {
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Load a sequence of records.
    ///
    /// Malformed records are recorded and skipped. Storage failures abort the
    /// call; rows already written stay committed.
    pub fn load(&self, records: &[RawMessageRecord]) -> Result<LoadResult> {
        let mut result = LoadResult::default();

        for (index, record) in records.iter().enumerate() {
            let message = match normalize_record(record) {
                Ok(message) => message,
                Err(reason) => {
                    warn!(index, message_id = record.message_id, %reason, "Skipping malformed record");
                    result.skipped_count += 1;
                    result.errors.push(RecordError {
                        index,
                        message_id: Some(record.message_id),
                        reason,
                    });
                    continue;
                }
            };

            if self.db.insert_raw_message(&message)? {
                result.inserted_count += 1;
            } else {
                debug!(message_id = message.message_id, "Message already stored");
                result.skipped_count += 1;
            }
        }

        Ok(result)
    }

    /// Load a batch, counting elements that failed to deserialize as skipped
    pub fn load_batch(&self, batch: &RawBatch) -> Result<LoadResult> {
        let mut result = self.load(&batch.records)?;
        let offset = batch.records.len();
        for (i, reason) in batch.malformed.iter().enumerate() {
            result.skipped_count += 1;
            result.errors.push(RecordError {
                index: offset + i,
                message_id: None,
                reason: reason.clone(),
            });
        }
        info!(
            channel = batch.channel_name,
            date = %batch.collection_date,
            inserted = result.inserted_count,
            skipped = result.skipped_count,
            "Batch loaded"
        );
        Ok(result)
    }

    /// Load every batch file under one date folder
    pub fn load_dir(&self, dir: &Path) -> Result<LoadResult> {
        let mut total = LoadResult::default();
        for batch in read_batch_dir(dir)? {
            total.merge(self.load_batch(&batch)?);
        }
        Ok(total)
    }
}

/// Validate a collector record and apply field defaults
pub fn normalize_record(record: &RawMessageRecord) -> std::result::Result<NewRawMessage, String> {
    if record.message_id <= 0 {
        return Err(format!("message_id must be positive, got {}", record.message_id));
    }
    let channel_name = record.channel_name.trim();
    if channel_name.is_empty() {
        return Err("channel_name is empty".to_string());
    }
    if record.views < 0 || record.forwards < 0 {
        return Err(format!(
            "negative counters (views {}, forwards {})",
            record.views, record.forwards
        ));
    }

    let message_date = match record.message_date.as_deref() {
        None => None,
        Some(raw) => {
            let parsed = parse_timestamp(raw);
            if parsed.is_none() {
                warn!(message_id = record.message_id, value = raw, "Unparseable timestamp stored as null");
            }
            parsed
        }
    };

    let image_path = record
        .image_path
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(ToString::to_string);

    Ok(NewRawMessage {
        message_id: record.message_id,
        channel_name: channel_name.to_string(),
        message_date,
        text: record
            .message_text
            .as_deref()
            .map(InputValidator::sanitize_text)
            .unwrap_or_default(),
        has_media: record.has_media,
        image_path,
        views: record.views,
        forwards: record.forwards,
    })
}

/// Parse an ISO-8601 timestamp; naive values are taken as UTC
#[must_use]
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(value, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Write one channel's records to `<raw_dir>/<date>/<channel>.json`
pub fn write_batch(
    raw_dir: &Path,
    date: NaiveDate,
    channel: &str,
    records: &[RawMessageRecord],
) -> Result<PathBuf> {
    let dir = raw_dir.join(date.format("%Y-%m-%d").to_string());
    fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{channel}.json"));
    let json = serde_json::to_string_pretty(records)?;
    fs::write(&path, json)?;
    debug!(path = %path.display(), records = records.len(), "Batch written");
    Ok(path)
}

/// The most recent date folder under `raw_dir`, if any
pub fn latest_batch_dir(raw_dir: &Path) -> Result<Option<PathBuf>> {
    if !raw_dir.exists() {
        return Ok(None);
    }
    let mut latest: Option<(NaiveDate, PathBuf)> = None;
    for entry in fs::read_dir(raw_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let Ok(date) = NaiveDate::parse_from_str(&name, "%Y-%m-%d") else {
            continue;
        };
        if latest.as_ref().map_or(true, |(d, _)| date > *d) {
            latest = Some((date, entry.path()));
        }
    }
    Ok(latest.map(|(_, path)| path))
}

/// Read every `*.json` batch in a date folder, ordered by channel name.
///
/// Files that are not JSON arrays are logged and skipped.
pub fn read_batch_dir(dir: &Path) -> Result<Vec<RawBatch>> {
    let dir_name = dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let collection_date = NaiveDate::parse_from_str(&dir_name, "%Y-%m-%d").unwrap_or_else(|_| Utc::now().date_naive());

    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut batches = Vec::with_capacity(paths.len());
    for path in paths {
        let channel_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let values: Vec<serde_json::Value> = match fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()))
        {
            Ok(values) => values,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable batch file");
                continue;
            }
        };

        let mut records = Vec::with_capacity(values.len());
        let mut malformed = Vec::new();
        for value in values {
            match serde_json::from_value::<RawMessageRecord>(value) {
                Ok(record) => records.push(record),
                Err(e) => malformed.push(e.to_string()),
            }
        }

        batches.push(RawBatch {
            channel_name,
            collection_date,
            records,
            malformed,
        });
    }

    Ok(batches)
}
