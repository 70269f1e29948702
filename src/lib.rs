//! Medical Warehouse - Channel Content ETL and Analytics
//!
//! A Rust library that turns scraped channel messages into a query-ready
//! star schema.
//!
//! # Features
//!
//! - Idempotent ingestion of collector batches
//! - Rule-based visual classification of object-detector output
//! - Channel, date and message tables rebuilt atomically from the raw store
//! - Top-term, activity, search and visual-content analytics

/// Read-side aggregations
pub mod analytics;
/// Visual classification stage
pub mod classifier;
/// Collection stage and retry policy
pub mod collector;
/// Configuration management
pub mod config;
/// Database operations and connection pooling
pub mod db;
/// Error types
pub mod error;
/// CSV and JSON output
pub mod file_writer;
/// Batch files and the ingestion loader
pub mod ingest;
/// Logging setup and utilities
pub mod logging;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// Dimensional modeler
pub mod modeler;
/// Stage runner
pub mod pipeline;
/// Query envelope and service
pub mod query;
/// Database schema definitions
pub mod schema;
/// Product term extraction
pub mod terms;
/// Numeric helpers
pub mod utils;
/// Input validation and sanitization
pub mod validation;

// Re-export key components for easier access
pub use classifier::{classify, ObjectDetector, SidecarDetector};
pub use collector::{Collector, RetryPolicy};
pub use db::Database;
pub use error::{Result, WarehouseError};
pub use ingest::{IngestionLoader, LoadResult};
pub use models::{Classification, DetectedObject, DimensionalModel, ImageCategory, RawMessageRecord};
pub use pipeline::{Pipeline, RunOptions, RunReport};
pub use query::{QueryResponse, QueryService};
