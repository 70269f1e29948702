use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::collector::RetryPolicy;

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub ingest: IngestConfig,
    pub collector: CollectorConfig,
    pub classifier: ClassifierConfig,
    pub modeler: ModelerConfig,
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connection_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
    pub format: String, // "json" or "text"
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Root of `<date>/<channel>.json` batch folders
    pub raw_dir: String,
    /// Root of downloaded images, `<channel>/<message_id>.jpg`
    pub image_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    pub channels: Vec<String>,
    pub max_messages: usize,
    /// None retries rate limits forever
    pub max_attempts: Option<u32>,
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub jitter_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub confidence_threshold: f64,
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelerConfig {
    /// First calendar day of the date dimension (YYYY-MM-DD)
    pub date_start: String,
    /// Last calendar day of the date dimension, inclusive (YYYY-MM-DD)
    pub date_end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    pub default_top_n: usize,
    pub default_search_limit: usize,
    pub default_activity_days: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite:data/warehouse.db".to_string(),
                max_connections: 8,
                connection_timeout_secs: 30,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file_path: None,
                format: "text".to_string(),
            },
            ingest: IngestConfig {
                raw_dir: "data/raw/telegram_messages".to_string(),
                image_dir: "data/raw/images".to_string(),
            },
            collector: CollectorConfig {
                channels: ["CheMed123", "lobelia4cosmetics", "tikvahpharma", "EAHCI", "tenamereja"]
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
                max_messages: 50,
                max_attempts: None,
                base_backoff_secs: 5,
                max_backoff_secs: 900,
                jitter_factor: 0.1,
            },
            classifier: ClassifierConfig {
                confidence_threshold: 0.5,
                workers: 4,
            },
            modeler: ModelerConfig {
                date_start: "2024-01-01".to_string(),
                date_end: "2026-12-31".to_string(),
            },
            analytics: AnalyticsConfig {
                default_top_n: 10,
                default_search_limit: 20,
                default_activity_days: 7,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            // Start with default values
            .add_source(Config::try_from(&Self::default())?)
            // Add config files if they exist
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(File::with_name("warehouse").required(false))
            // Add environment variables with prefix
            .add_source(
                Environment::with_prefix("WAREHOUSE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Failed to deserialize configuration: {}", e))?;

        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("max_connections must be greater than 0"));
        }
        if self.database.connection_timeout_secs == 0 {
            return Err(anyhow::anyhow!("connection_timeout_secs must be greater than 0"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            ));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            ));
        }

        if self.collector.max_messages == 0 {
            return Err(anyhow::anyhow!("max_messages must be greater than 0"));
        }
        if self.collector.max_attempts == Some(0) {
            return Err(anyhow::anyhow!("max_attempts must be greater than 0 when set"));
        }
        if self.collector.base_backoff_secs > self.collector.max_backoff_secs {
            return Err(anyhow::anyhow!(
                "base_backoff_secs ({}) must not exceed max_backoff_secs ({})",
                self.collector.base_backoff_secs,
                self.collector.max_backoff_secs
            ));
        }
        if !(0.0..=1.0).contains(&self.collector.jitter_factor) {
            return Err(anyhow::anyhow!(
                "jitter_factor must be within [0, 1], got {}",
                self.collector.jitter_factor
            ));
        }

        let threshold = self.classifier.confidence_threshold;
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(anyhow::anyhow!(
                "confidence_threshold must be within (0, 1), got {}",
                threshold
            ));
        }
        if self.classifier.workers == 0 {
            return Err(anyhow::anyhow!("workers must be greater than 0"));
        }

        let (start, end) = self.date_range()?;
        if start > end {
            return Err(anyhow::anyhow!(
                "date_start ({}) must not be after date_end ({})",
                start,
                end
            ));
        }

        if self.analytics.default_top_n == 0 || self.analytics.default_search_limit == 0 {
            return Err(anyhow::anyhow!("analytics defaults must be greater than 0"));
        }

        Ok(())
    }

    /// Parsed, inclusive date-dimension range
    pub fn date_range(&self) -> Result<(NaiveDate, NaiveDate)> {
        let start = NaiveDate::parse_from_str(&self.modeler.date_start, "%Y-%m-%d")
            .map_err(|e| anyhow::anyhow!("Invalid date_start '{}': {}", self.modeler.date_start, e))?;
        let end = NaiveDate::parse_from_str(&self.modeler.date_end, "%Y-%m-%d")
            .map_err(|e| anyhow::anyhow!("Invalid date_end '{}': {}", self.modeler.date_end, e))?;
        Ok((start, end))
    }

    /// Retry policy for collector calls
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.collector.max_attempts,
            base_delay: Duration::from_secs(self.collector.base_backoff_secs),
            max_delay: Duration::from_secs(self.collector.max_backoff_secs),
            jitter_factor: self.collector.jitter_factor,
        }
    }

    /// Get database URL from environment or config
    #[must_use]
    pub fn get_database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.database.url.clone())
    }

    /// Get log level from environment or config
    #[must_use]
    pub fn get_log_level(&self) -> String {
        std::env::var("RUST_LOG").unwrap_or_else(|_| self.logging.level.clone())
    }
}
