use std::path::Path;

use crate::analytics::{MAX_ACTIVITY_DAYS, MAX_SEARCH_LIMIT};
use crate::error::{Result, WarehouseError};

/// Longest accepted channel name
const MAX_CHANNEL_NAME_LEN: usize = 64;
/// Longest accepted search query
const MAX_QUERY_LEN: usize = 200;

fn invalid(msg: impl Into<String>) -> WarehouseError {
    WarehouseError::InvalidInput(msg.into())
}

/// Validation utilities for caller-supplied parameters
#[derive(Debug, Copy, Clone)]
pub struct InputValidator;

impl InputValidator {
    /// Validate a channel username
    pub fn validate_channel_name(name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(invalid("Channel name cannot be empty"));
        }

        if name.chars().count() > MAX_CHANNEL_NAME_LEN {
            return Err(invalid(format!(
                "Channel name too long (max {MAX_CHANNEL_NAME_LEN} characters)"
            )));
        }

        if name.chars().any(|c| c.is_control() || c == '/' || c == '\\') {
            return Err(invalid("Channel name contains invalid characters"));
        }

        Ok(())
    }

    /// Validate an activity window length
    pub fn validate_days(days: u32) -> Result<()> {
        if !(1..=MAX_ACTIVITY_DAYS).contains(&days) {
            return Err(invalid(format!(
                "days must be between 1 and {MAX_ACTIVITY_DAYS}, got {days}"
            )));
        }
        Ok(())
    }

    /// Validate a search result limit
    pub fn validate_search_limit(limit: usize) -> Result<()> {
        if !(1..=MAX_SEARCH_LIMIT).contains(&limit) {
            return Err(invalid(format!(
                "limit must be between 1 and {MAX_SEARCH_LIMIT}, got {limit}"
            )));
        }
        Ok(())
    }

    /// Validate a keyword search query
    pub fn validate_search_query(query: &str) -> Result<()> {
        if query.trim().is_empty() {
            return Err(invalid("Search query cannot be empty"));
        }

        if query.chars().count() > MAX_QUERY_LEN {
            return Err(invalid(format!("Search query too long (max {MAX_QUERY_LEN} characters)")));
        }

        Ok(())
    }

    /// Validate classification worker count
    pub fn validate_workers(workers: usize) -> Result<()> {
        if workers == 0 {
            return Err(invalid("Worker count must be greater than 0"));
        }

        if workers > 64 {
            return Err(invalid("Worker count too large (max 64)"));
        }

        Ok(())
    }

    /// Validate an output file path
    pub fn validate_file_path(path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy();
        if path_str.is_empty() {
            return Err(invalid("File path cannot be empty"));
        }

        // Check for path traversal attempts
        if path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            return Err(invalid("File path must not contain '..'"));
        }

        if path_str.len() > 4096 {
            return Err(invalid("File path too long (max 4096 characters)"));
        }

        Ok(())
    }

    /// Validate database URL
    pub fn validate_database_url(url: &str) -> Result<()> {
        if url.trim().is_empty() {
            return Err(invalid("Database URL cannot be empty"));
        }

        if !url.starts_with("sqlite:") {
            return Err(invalid("Only SQLite databases are supported"));
        }

        if url.len() > 1000 {
            return Err(invalid("Database URL too long"));
        }

        Ok(())
    }

    /// Strip control characters and surrounding whitespace
    #[must_use]
    pub fn sanitize_text(text: &str) -> String {
        text.chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
            .collect::<String>()
            .trim()
            .to_string()
    }
}
