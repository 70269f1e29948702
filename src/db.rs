use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::models::{
    ChannelDim, DateDim, Detection, DimensionalModel, ImageDetectionFact, MessageFact, NewDetection, NewRawMessage,
    RawMessage, StoreStats,
};
use crate::schema::{detections, dim_channels, dim_dates, fct_image_detections, fct_messages, raw_messages};

// Type alias for the database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// A raw message that references an image with no detection row yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingImage {
    /// Owning message
    pub message_id: i64,
    /// Channel of the owning message
    pub channel_name: String,
    /// Image reference
    pub image_path: String,
}

/// Database manager for handling connections and operations.
///
/// Cloning is cheap and shares the pool. Every operation checks out its own
/// connection and returns it to the pool when the operation ends.
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database connection pool with default sizing
    pub fn new(database_url: &str) -> Result<Self> {
        Self::with_pool(database_url, 8, Duration::from_secs(30))
    }

    /// Create a pool from configuration
    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::with_pool(
            &config.url,
            config.max_connections,
            Duration::from_secs(config.connection_timeout_secs),
        )
    }

    fn with_pool(database_url: &str, max_connections: u32, timeout: Duration) -> Result<Self> {
        let path = database_path(database_url);

        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")
        });
        let pool = Pool::builder()
            .max_size(max_connections)
            .connection_timeout(timeout)
            .build(manager)?;

        let conn = pool.get()?;
        Self::run_migrations(&conn)?;
        info!(path, "Database ready");

        Ok(Self { pool })
    }

    /// Run database migrations
    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(include_str!("../migrations/2026-01-10-000000_create_raw_store/up.sql"))?;
        conn.execute_batch(include_str!("../migrations/2026-01-10-000001_create_detections/up.sql"))?;
        conn.execute_batch(include_str!(
            "../migrations/2026-01-12-000000_create_dimensional_tables/up.sql"
        ))?;
        conn.execute_batch(include_str!(
            "../migrations/2026-01-15-000000_create_image_detection_facts/up.sql"
        ))?;
        Ok(())
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> Result<DbConnection> {
        Ok(self.pool.get()?)
    }

    /// Insert a message unless its id is already stored.
    ///
    /// Returns `true` when a row was written, `false` when the id already existed.
    pub fn insert_raw_message(&self, message: &NewRawMessage) -> Result<bool> {
        let conn = self.get_connection()?;
        let changed = conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT({}) DO NOTHING",
                raw_messages::TABLE,
                raw_messages::MESSAGE_ID,
                raw_messages::CHANNEL_NAME,
                raw_messages::MESSAGE_DATE,
                raw_messages::MESSAGE_TEXT,
                raw_messages::HAS_MEDIA,
                raw_messages::IMAGE_PATH,
                raw_messages::VIEWS,
                raw_messages::FORWARDS,
                raw_messages::INGESTED_AT,
                raw_messages::MESSAGE_ID,
            ),
            params![
                message.message_id,
                message.channel_name,
                message.message_date,
                message.text,
                message.has_media,
                message.image_path,
                message.views,
                message.forwards,
                Utc::now(),
            ],
        )?;
        Ok(changed == 1)
    }

    /// Count rows in the raw store
    pub fn count_raw_messages(&self) -> Result<usize> {
        let conn = self.get_connection()?;
        count_rows(&conn, raw_messages::TABLE)
    }

    /// Get a raw message by id
    pub fn get_raw_message(&self, message_id: i64) -> Result<Option<RawMessage>> {
        let conn = self.get_connection()?;
        let message = conn
            .query_row(
                &format!("SELECT * FROM {} WHERE {} = ?", raw_messages::TABLE, raw_messages::MESSAGE_ID),
                params![message_id],
                map_raw_message,
            )
            .optional()?;
        Ok(message)
    }

    /// All raw messages ordered by id
    pub fn raw_messages(&self) -> Result<Vec<RawMessage>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} ORDER BY {} ASC",
            raw_messages::TABLE,
            raw_messages::MESSAGE_ID
        ))?;
        let rows = stmt.query_map([], map_raw_message)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Raw messages referencing an image that has not been classified yet
    pub fn pending_images(&self) -> Result<Vec<PendingImage>> {
        let conn = self.get_connection()?;
        let query = format!(
            "SELECT m.{mid}, m.{chan}, m.{img} FROM {raw} m
             LEFT JOIN {det} d ON d.{dimg} = m.{img}
             WHERE m.{img} IS NOT NULL AND m.{img} != '' AND d.{did} IS NULL
             ORDER BY m.{mid} ASC",
            mid = raw_messages::MESSAGE_ID,
            chan = raw_messages::CHANNEL_NAME,
            img = raw_messages::IMAGE_PATH,
            raw = raw_messages::TABLE,
            det = detections::TABLE,
            dimg = detections::IMAGE_PATH,
            did = detections::ID,
        );
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map([], |row| {
            Ok(PendingImage {
                message_id: row.get(0)?,
                channel_name: row.get(1)?,
                image_path: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Insert a detection unless its image is already classified.
    ///
    /// The owning raw message must exist; the foreign key is enforced.
    pub fn insert_detection(&self, detection: &NewDetection) -> Result<bool> {
        let conn = self.get_connection()?;
        let pairs: Vec<(&str, f64)> = detection
            .detections
            .iter()
            .map(|d| (d.label.as_str(), d.confidence))
            .collect();
        let detections_json = serde_json::to_string(&pairs)?;
        let classification = &detection.classification;
        let detected_objects = if classification.labels.is_empty() {
            "none".to_string()
        } else {
            classification.labels.join(", ")
        };

        let changed = conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT({}) DO NOTHING",
                detections::TABLE,
                detections::IMAGE_PATH,
                detections::CHANNEL_NAME,
                detections::MESSAGE_ID,
                detections::DETECTIONS_JSON,
                detections::DETECTED_OBJECTS,
                detections::OBJECT_COUNT,
                detections::PRIMARY_OBJECT,
                detections::PRIMARY_CONFIDENCE,
                detections::IMAGE_CATEGORY,
                detections::HAS_PERSON,
                detections::HAS_CONTAINER,
                detections::HAS_MEDICAL,
                detections::DETECTED_AT,
                detections::IMAGE_PATH,
            ),
            params![
                detection.image_path,
                detection.channel_name,
                detection.message_id,
                detections_json,
                detected_objects,
                classification.object_count as i64,
                classification.primary_label,
                classification.primary_confidence,
                classification.category.as_str(),
                classification.has_person,
                classification.has_container,
                classification.has_medical,
                Utc::now(),
            ],
        )?;
        Ok(changed == 1)
    }

    /// All detections ordered by id
    pub fn detections(&self) -> Result<Vec<Detection>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} ORDER BY {} ASC",
            detections::TABLE,
            detections::ID
        ))?;
        let rows = stmt.query_map([], map_detection)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Atomically replace every dimensional table.
    ///
    /// Readers either see the previous model or the new one, never a mix.
    pub fn replace_dimensional_model(&self, model: &DimensionalModel) -> Result<()> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Facts first; they reference the dimensions
        tx.execute_batch(&format!(
            "DELETE FROM {}; DELETE FROM {}; DELETE FROM {}; DELETE FROM {};",
            fct_image_detections::TABLE,
            fct_messages::TABLE,
            dim_channels::TABLE,
            dim_dates::TABLE
        ))?;

        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                dim_channels::TABLE,
                dim_channels::CHANNEL_KEY,
                dim_channels::CHANNEL_NAME,
                dim_channels::CHANNEL_TYPE,
                dim_channels::FIRST_POST_DATE,
                dim_channels::LAST_POST_DATE,
                dim_channels::TOTAL_POSTS,
                dim_channels::AVG_VIEWS,
                dim_channels::AVG_FORWARDS,
                dim_channels::TOTAL_IMAGES,
                dim_channels::IMAGE_PERCENTAGE,
            ))?;
            for channel in &model.channels {
                stmt.execute(params![
                    channel.channel_key,
                    channel.channel_name,
                    channel.channel_type.as_str(),
                    channel.first_post_date,
                    channel.last_post_date,
                    channel.total_posts,
                    channel.avg_views,
                    channel.avg_forwards,
                    channel.total_images,
                    channel.image_percentage,
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                dim_dates::TABLE,
                dim_dates::DATE_KEY,
                dim_dates::FULL_DATE,
                dim_dates::YEAR,
                dim_dates::QUARTER,
                dim_dates::MONTH,
                dim_dates::MONTH_NAME,
                dim_dates::WEEK_OF_YEAR,
                dim_dates::DAY_OF_MONTH,
                dim_dates::DAY_OF_WEEK,
                dim_dates::DAY_NAME,
                dim_dates::IS_WEEKEND,
            ))?;
            for date in &model.dates {
                stmt.execute(params![
                    date.date_key,
                    date.full_date,
                    date.year,
                    i64::from(date.quarter),
                    i64::from(date.month),
                    date.month_name,
                    i64::from(date.week_of_year),
                    i64::from(date.day_of_month),
                    i64::from(date.day_of_week),
                    date.day_name,
                    date.is_weekend,
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                fct_messages::TABLE,
                fct_messages::MESSAGE_KEY,
                fct_messages::MESSAGE_ID,
                fct_messages::CHANNEL_KEY,
                fct_messages::DATE_KEY,
                fct_messages::MESSAGE_TEXT,
                fct_messages::MESSAGE_LENGTH,
                fct_messages::VIEWS,
                fct_messages::FORWARDS,
                fct_messages::HAS_IMAGE,
            ))?;
            for fact in &model.facts {
                stmt.execute(params![
                    fact.message_key,
                    fact.message_id,
                    fact.channel_key,
                    fact.date_key,
                    fact.text,
                    fact.text_length,
                    fact.views,
                    fact.forwards,
                    fact.has_image,
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                fct_image_detections::TABLE,
                fct_image_detections::DETECTION_ID,
                fct_image_detections::MESSAGE_KEY,
                fct_image_detections::MESSAGE_ID,
                fct_image_detections::CHANNEL_KEY,
                fct_image_detections::DATE_KEY,
                fct_image_detections::VIEWS,
                fct_image_detections::FORWARDS,
                fct_image_detections::IMAGE_CATEGORY,
                fct_image_detections::PRIMARY_OBJECT,
                fct_image_detections::PRIMARY_CONFIDENCE,
                fct_image_detections::OBJECT_COUNT,
            ))?;
            for fact in &model.image_detections {
                stmt.execute(params![
                    fact.detection_id,
                    fact.message_key,
                    fact.message_id,
                    fact.channel_key,
                    fact.date_key,
                    fact.views,
                    fact.forwards,
                    fact.category.as_str(),
                    fact.primary_object,
                    fact.primary_confidence,
                    fact.object_count,
                ])?;
            }
        }

        tx.commit()?;
        debug!(
            channels = model.channels.len(),
            dates = model.dates.len(),
            facts = model.facts.len(),
            image_detections = model.image_detections.len(),
            "Dimensional tables swapped"
        );
        Ok(())
    }

    /// Read the current dimensional model in canonical key order
    pub fn load_dimensional_model(&self) -> Result<DimensionalModel> {
        let mut conn = self.get_connection()?;
        // One read transaction so all tables come from the same commit
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;

        let channels = {
            let mut stmt = tx.prepare(&format!(
                "SELECT * FROM {} ORDER BY {} ASC",
                dim_channels::TABLE,
                dim_channels::CHANNEL_KEY
            ))?;
            let rows = stmt.query_map([], map_channel_dim)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let dates = {
            let mut stmt = tx.prepare(&format!(
                "SELECT * FROM {} ORDER BY {} ASC",
                dim_dates::TABLE,
                dim_dates::DATE_KEY
            ))?;
            let rows = stmt.query_map([], map_date_dim)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let facts = {
            let mut stmt = tx.prepare(&format!(
                "SELECT * FROM {} ORDER BY {} ASC",
                fct_messages::TABLE,
                fct_messages::MESSAGE_KEY
            ))?;
            let rows = stmt.query_map([], map_message_fact)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let image_detections = {
            let mut stmt = tx.prepare(&format!(
                "SELECT * FROM {} ORDER BY {} ASC",
                fct_image_detections::TABLE,
                fct_image_detections::DETECTION_ID
            ))?;
            let rows = stmt.query_map([], map_image_detection_fact)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        tx.commit()?;
        Ok(DimensionalModel {
            channels,
            dates,
            facts,
            image_detections,
        })
    }

    /// Row counts across all tables
    pub fn store_stats(&self) -> Result<StoreStats> {
        let conn = self.get_connection()?;

        let messages_by_channel = grouped_counts(
            &conn,
            &format!(
                "SELECT {c}, COUNT(*) FROM {t} GROUP BY {c} ORDER BY COUNT(*) DESC, {c} ASC",
                c = raw_messages::CHANNEL_NAME,
                t = raw_messages::TABLE
            ),
        )?;
        let detections_by_category = grouped_counts(
            &conn,
            &format!(
                "SELECT {c}, COUNT(*) FROM {t} GROUP BY {c} ORDER BY COUNT(*) DESC, {c} ASC",
                c = detections::IMAGE_CATEGORY,
                t = detections::TABLE
            ),
        )?;

        Ok(StoreStats {
            raw_messages: count_rows(&conn, raw_messages::TABLE)?,
            messages_by_channel,
            detections: count_rows(&conn, detections::TABLE)?,
            detections_by_category,
            channel_rows: count_rows(&conn, dim_channels::TABLE)?,
            date_rows: count_rows(&conn, dim_dates::TABLE)?,
            fact_rows: count_rows(&conn, fct_messages::TABLE)?,
            image_detection_rows: count_rows(&conn, fct_image_detections::TABLE)?,
        })
    }
}

/// Strip the `sqlite:` / `sqlite://` scheme from a database URL
#[must_use]
pub fn database_path(database_url: &str) -> &str {
    database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url)
}

fn count_rows(conn: &Connection, table: &str) -> Result<usize> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(usize::try_from(count).unwrap_or(0))
}

fn grouped_counts(conn: &Connection, query: &str) -> Result<Vec<(String, usize)>> {
    let mut stmt = conn.prepare(query)?;
    let rows = stmt.query_map([], |row| {
        let count: i64 = row.get(1)?;
        Ok((row.get::<_, String>(0)?, usize::try_from(count).unwrap_or(0)))
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn parse_column<T: FromStr<Err = String>>(idx: usize, value: &str) -> rusqlite::Result<T> {
    value
        .parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

/// Map a database row to a RawMessage
fn map_raw_message(row: &Row) -> rusqlite::Result<RawMessage> {
    Ok(RawMessage {
        message_id: row.get(raw_messages::MESSAGE_ID)?,
        channel_name: row.get(raw_messages::CHANNEL_NAME)?,
        message_date: row.get(raw_messages::MESSAGE_DATE)?,
        text: row.get(raw_messages::MESSAGE_TEXT)?,
        has_media: row.get(raw_messages::HAS_MEDIA)?,
        image_path: row.get(raw_messages::IMAGE_PATH)?,
        views: row.get(raw_messages::VIEWS)?,
        forwards: row.get(raw_messages::FORWARDS)?,
        ingested_at: row.get(raw_messages::INGESTED_AT)?,
    })
}

/// Map a database row to a Detection
fn map_detection(row: &Row) -> rusqlite::Result<Detection> {
    let category: String = row.get(detections::IMAGE_CATEGORY)?;
    let detections_json: String = row.get(detections::DETECTIONS_JSON)?;
    let pairs: Vec<(String, f64)> = serde_json::from_str(&detections_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    let primary_confidence: f64 = row.get(detections::PRIMARY_CONFIDENCE)?;

    Ok(Detection {
        detection_id: row.get(detections::ID)?,
        image_path: row.get(detections::IMAGE_PATH)?,
        channel_name: row.get(detections::CHANNEL_NAME)?,
        message_id: row.get(detections::MESSAGE_ID)?,
        detections: pairs,
        detected_objects: row.get(detections::DETECTED_OBJECTS)?,
        object_count: row.get(detections::OBJECT_COUNT)?,
        primary_object: row.get(detections::PRIMARY_OBJECT)?,
        primary_confidence,
        category: parse_column(9, &category)?,
        has_person: row.get(detections::HAS_PERSON)?,
        has_container: row.get(detections::HAS_CONTAINER)?,
        has_medical: row.get(detections::HAS_MEDICAL)?,
        detected_at: row.get(detections::DETECTED_AT)?,
    })
}

/// Map a database row to a ChannelDim
fn map_channel_dim(row: &Row) -> rusqlite::Result<ChannelDim> {
    let channel_type: String = row.get(dim_channels::CHANNEL_TYPE)?;
    Ok(ChannelDim {
        channel_key: row.get(dim_channels::CHANNEL_KEY)?,
        channel_name: row.get(dim_channels::CHANNEL_NAME)?,
        channel_type: parse_column(2, &channel_type)?,
        first_post_date: row.get::<_, Option<DateTime<Utc>>>(dim_channels::FIRST_POST_DATE)?,
        last_post_date: row.get::<_, Option<DateTime<Utc>>>(dim_channels::LAST_POST_DATE)?,
        total_posts: row.get(dim_channels::TOTAL_POSTS)?,
        avg_views: row.get(dim_channels::AVG_VIEWS)?,
        avg_forwards: row.get(dim_channels::AVG_FORWARDS)?,
        total_images: row.get(dim_channels::TOTAL_IMAGES)?,
        image_percentage: row.get(dim_channels::IMAGE_PERCENTAGE)?,
    })
}

/// Map a database row to a DateDim
fn map_date_dim(row: &Row) -> rusqlite::Result<DateDim> {
    Ok(DateDim {
        date_key: row.get(dim_dates::DATE_KEY)?,
        full_date: row.get::<_, NaiveDate>(dim_dates::FULL_DATE)?,
        year: row.get(dim_dates::YEAR)?,
        quarter: row.get(dim_dates::QUARTER)?,
        month: row.get(dim_dates::MONTH)?,
        month_name: row.get(dim_dates::MONTH_NAME)?,
        week_of_year: row.get(dim_dates::WEEK_OF_YEAR)?,
        day_of_month: row.get(dim_dates::DAY_OF_MONTH)?,
        day_of_week: row.get(dim_dates::DAY_OF_WEEK)?,
        day_name: row.get(dim_dates::DAY_NAME)?,
        is_weekend: row.get(dim_dates::IS_WEEKEND)?,
    })
}

/// Map a database row to a MessageFact
fn map_message_fact(row: &Row) -> rusqlite::Result<MessageFact> {
    Ok(MessageFact {
        message_key: row.get(fct_messages::MESSAGE_KEY)?,
        message_id: row.get(fct_messages::MESSAGE_ID)?,
        channel_key: row.get(fct_messages::CHANNEL_KEY)?,
        date_key: row.get(fct_messages::DATE_KEY)?,
        text: row.get(fct_messages::MESSAGE_TEXT)?,
        text_length: row.get(fct_messages::MESSAGE_LENGTH)?,
        views: row.get(fct_messages::VIEWS)?,
        forwards: row.get(fct_messages::FORWARDS)?,
        has_image: row.get(fct_messages::HAS_IMAGE)?,
    })
}

fn map_image_detection_fact(row: &Row) -> rusqlite::Result<ImageDetectionFact> {
    let category: String = row.get(fct_image_detections::IMAGE_CATEGORY)?;
    Ok(ImageDetectionFact {
        detection_id: row.get(fct_image_detections::DETECTION_ID)?,
        message_key: row.get(fct_image_detections::MESSAGE_KEY)?,
        message_id: row.get(fct_image_detections::MESSAGE_ID)?,
        channel_key: row.get(fct_image_detections::CHANNEL_KEY)?,
        date_key: row.get(fct_image_detections::DATE_KEY)?,
        views: row.get(fct_image_detections::VIEWS)?,
        forwards: row.get(fct_image_detections::FORWARDS)?,
        category: parse_column(7, &category)?,
        primary_object: row.get(fct_image_detections::PRIMARY_OBJECT)?,
        primary_confidence: row.get(fct_image_detections::PRIMARY_CONFIDENCE)?,
        object_count: row.get(fct_image_detections::OBJECT_COUNT)?,
    })
}
