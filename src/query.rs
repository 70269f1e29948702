//! Query layer: the read operations wrapped in a uniform response envelope.
//!
//! Internal failures are logged with full detail and reported to callers only
//! as a generic `SERVICE_ERROR`.

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

use crate::analytics;
use crate::config::AnalyticsConfig;
use crate::db::Database;
use crate::error::{Result, WarehouseError};
use crate::metrics::record_query;
use crate::terms::TermExtractor;
use crate::validation::InputValidator;

const SERVICE_ERROR_MESSAGE: &str = "Internal service error";

/// Uniform result of a query operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub success: bool,
    pub message: String,
    pub data: Value,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
}

impl QueryResponse {
    fn ok(message: String, data: Value, count: usize) -> Self {
        Self {
            success: true,
            message,
            data,
            count,
            error_code: None,
        }
    }

    fn failure(operation: &'static str, err: &WarehouseError) -> Self {
        let message = if err.is_client_error() {
            err.to_string()
        } else {
            error!(operation, error = %err, "Query failed");
            SERVICE_ERROR_MESSAGE.to_string()
        };
        Self {
            success: false,
            message,
            data: Value::Null,
            count: 0,
            error_code: Some(err.code()),
        }
    }
}

/// Read-side service over the dimensional model
pub struct QueryService {
    db: Database,
    extractor: TermExtractor,
    defaults: AnalyticsConfig,
}

impl QueryService {
    pub fn new(db: Database, defaults: AnalyticsConfig) -> Result<Self> {
        Ok(Self {
            db,
            extractor: TermExtractor::new()?,
            defaults,
        })
    }

    fn respond(operation: &'static str, result: Result<QueryResponse>) -> QueryResponse {
        let response = result.unwrap_or_else(|e| QueryResponse::failure(operation, &e));
        record_query(operation, response.success);
        response
    }

    /// Most mentioned product terms; `limit` is clamped to [1, 50]
    pub fn top_products(&self, limit: Option<usize>) -> QueryResponse {
        Self::respond("top_products", self.top_products_inner(limit))
    }

    fn top_products_inner(&self, limit: Option<usize>) -> Result<QueryResponse> {
        let n = limit.unwrap_or(self.defaults.default_top_n);
        let model = self.db.load_dimensional_model()?;
        let top = analytics::top_terms(&model, &self.extractor, n);
        let count = top.terms.len();
        let message = if count == 0 {
            "No messages found".to_string()
        } else {
            format!("Top {count} medical products")
        };
        Ok(QueryResponse::ok(
            message,
            json!({
                "top_products": top.terms,
                "total_mentions": top.total_mentions,
                "distinct_terms": top.distinct_terms,
            }),
            count,
        ))
    }

    /// Daily activity of one channel over the last `days` days ending at `as_of`
    pub fn channel_activity(&self, channel_name: &str, days: Option<u32>, as_of: Option<NaiveDate>) -> QueryResponse {
        Self::respond("channel_activity", self.channel_activity_inner(channel_name, days, as_of))
    }

    fn channel_activity_inner(
        &self,
        channel_name: &str,
        days: Option<u32>,
        as_of: Option<NaiveDate>,
    ) -> Result<QueryResponse> {
        InputValidator::validate_channel_name(channel_name)?;
        let days = days.unwrap_or(self.defaults.default_activity_days);
        InputValidator::validate_days(days)?;
        let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());

        let model = self.db.load_dimensional_model()?;
        let activity = analytics::channel_activity(&model, channel_name, days, as_of)?;
        let count = activity.activity.len();
        Ok(QueryResponse::ok(
            format!("Activity for channel '{channel_name}'"),
            serde_json::to_value(&activity)?,
            count,
        ))
    }

    /// Keyword search with optional exact channel filter
    pub fn search_messages(&self, query: &str, channel_name: Option<&str>, limit: Option<usize>) -> QueryResponse {
        Self::respond("search_messages", self.search_inner(query, channel_name, limit))
    }

    fn search_inner(&self, query: &str, channel_name: Option<&str>, limit: Option<usize>) -> Result<QueryResponse> {
        InputValidator::validate_search_query(query)?;
        if let Some(channel) = channel_name {
            InputValidator::validate_channel_name(channel)?;
        }
        let limit = limit.unwrap_or(self.defaults.default_search_limit);

        let model = self.db.load_dimensional_model()?;
        let detections = self.db.detections()?;
        let hits = analytics::search_messages(&model, &detections, query, channel_name, limit)?;
        let count = hits.len();
        Ok(QueryResponse::ok(
            format!("Found {count} messages matching '{}'", query.trim()),
            json!({ "messages": hits }),
            count,
        ))
    }

    /// Image usage overall, per channel and per category
    pub fn visual_content(&self) -> QueryResponse {
        Self::respond("visual_content", self.visual_inner())
    }

    fn visual_inner(&self) -> Result<QueryResponse> {
        let model = self.db.load_dimensional_model()?;
        let detections = self.db.detections()?;
        let stats = analytics::visual_content_stats(&model, &detections);
        let count = stats.by_channel.len();
        Ok(QueryResponse::ok(
            "Visual content statistics".to_string(),
            serde_json::to_value(&stats)?,
            count,
        ))
    }

    /// Engagement by image category and the most detected objects
    pub fn image_engagement(&self, limit: Option<usize>) -> QueryResponse {
        Self::respond("image_engagement", self.engagement_inner(limit))
    }

    fn engagement_inner(&self, limit: Option<usize>) -> Result<QueryResponse> {
        let n = limit.unwrap_or(self.defaults.default_top_n);
        let model = self.db.load_dimensional_model()?;
        let by_category = analytics::category_engagement(&model);
        let top_objects = analytics::primary_object_ranking(&model, n);
        let count = model.image_detections.len();
        let message = if count == 0 {
            "No classified images found".to_string()
        } else {
            format!("Engagement across {count} classified images")
        };
        Ok(QueryResponse::ok(
            message,
            json!({
                "by_category": by_category,
                "top_objects": top_objects,
                "promotional_view_lift": analytics::promotional_view_lift(&by_category),
            }),
            count,
        ))
    }
}
