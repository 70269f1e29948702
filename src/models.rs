//! Data models for the warehouse
//!
//! Inbound collector records, the rows of the two source-of-truth stores, and
//! the derived dimensional rows.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A message as produced by the external collector.
///
/// Optional fields tolerate being absent or `null`; the loader applies the
/// documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawMessageRecord {
    /// Platform-assigned message identifier
    pub message_id: i64,
    /// Channel username
    pub channel_name: String,
    /// ISO-8601 timestamp, possibly malformed
    #[serde(default)]
    pub message_date: Option<String>,
    /// Message body
    #[serde(default)]
    pub message_text: Option<String>,
    /// Whether the post carried media
    #[serde(default)]
    pub has_media: bool,
    /// Path of the downloaded image, if any
    #[serde(default)]
    pub image_path: Option<String>,
    /// View counter
    #[serde(default)]
    pub views: i64,
    /// Forward counter
    #[serde(default)]
    pub forwards: i64,
}

/// All records collected for one channel on one collection date
#[derive(Debug, Clone)]
pub struct RawBatch {
    /// Channel the records belong to
    pub channel_name: String,
    /// Date the collector ran
    pub collection_date: NaiveDate,
    /// Records in collector order
    pub records: Vec<RawMessageRecord>,
    /// Array elements that did not deserialize, as error descriptions
    pub malformed: Vec<String>,
}

/// Data for inserting a message into the raw store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRawMessage {
    /// Natural key
    pub message_id: i64,
    /// Channel username
    pub channel_name: String,
    /// Parsed timestamp, `None` when the source value was malformed or absent
    pub message_date: Option<DateTime<Utc>>,
    /// Message body
    pub text: String,
    /// Whether the post carried media
    pub has_media: bool,
    /// Image reference
    pub image_path: Option<String>,
    /// View counter
    pub views: i64,
    /// Forward counter
    pub forwards: i64,
}

/// Raw store row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Natural key
    pub message_id: i64,
    /// Channel username
    pub channel_name: String,
    /// Post timestamp
    pub message_date: Option<DateTime<Utc>>,
    /// Message body
    pub text: String,
    /// Whether the post carried media
    pub has_media: bool,
    /// Image reference
    pub image_path: Option<String>,
    /// View counter
    pub views: i64,
    /// Forward counter
    pub forwards: i64,
    /// Time of first ingestion
    pub ingested_at: DateTime<Utc>,
}

/// One object reported by the detection model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectedObject {
    /// Class label
    pub label: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// x1, y1, x2, y2; ignored by the classifier
    #[serde(default)]
    pub bounding_box: [f32; 4],
}

impl DetectedObject {
    /// Convenience constructor without a bounding box
    #[must_use]
    pub fn new(label: &str, confidence: f64) -> Self {
        Self {
            label: label.to_string(),
            confidence,
            bounding_box: [0.0; 4],
        }
    }
}

/// Visual category of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageCategory {
    /// Person together with a product
    Promotional,
    /// Product or container without a person
    ProductDisplay,
    /// Person without a product
    Lifestyle,
    /// Anything else
    Other,
}

impl ImageCategory {
    /// Every category in reporting order
    pub const ALL: [Self; 4] = [Self::Promotional, Self::ProductDisplay, Self::Lifestyle, Self::Other];

    /// Stored representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Promotional => "promotional",
            Self::ProductDisplay => "product_display",
            Self::Lifestyle => "lifestyle",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ImageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "promotional" => Ok(Self::Promotional),
            "product_display" => Ok(Self::ProductDisplay),
            "lifestyle" => Ok(Self::Lifestyle),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown image category: {other}")),
        }
    }
}

/// Output of the visual classifier for one image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    /// Derived category
    pub category: ImageCategory,
    /// `person` detected
    pub has_person: bool,
    /// Container label detected
    pub has_container: bool,
    /// Medical label detected
    pub has_medical: bool,
    /// First accepted label, `none` when nothing was accepted
    pub primary_label: String,
    /// Confidence of the primary label, 0 when nothing was accepted
    pub primary_confidence: f64,
    /// Distinct accepted labels in first-seen order
    pub labels: Vec<String>,
    /// Number of accepted detections, duplicates included
    pub object_count: usize,
}

/// Data for inserting a classified image into the detection store
#[derive(Debug, Clone, PartialEq)]
pub struct NewDetection {
    /// Image reference
    pub image_path: String,
    /// Channel of the owning message
    pub channel_name: String,
    /// Owning message
    pub message_id: i64,
    /// Raw model output, in model order
    pub detections: Vec<DetectedObject>,
    /// Classification derived from `detections`
    pub classification: Classification,
}

/// Detection store row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    /// Synthetic key
    pub detection_id: i64,
    /// Image reference
    pub image_path: String,
    /// Channel of the owning message
    pub channel_name: String,
    /// Owning message
    pub message_id: i64,
    /// (label, confidence) pairs in model order
    pub detections: Vec<(String, f64)>,
    /// Comma-joined distinct accepted labels, or `none`
    pub detected_objects: String,
    /// Accepted detections
    pub object_count: i64,
    /// First accepted label
    pub primary_object: String,
    /// Confidence of `primary_object`
    pub primary_confidence: f64,
    /// Derived category
    pub category: ImageCategory,
    /// Person present
    pub has_person: bool,
    /// Container present
    pub has_container: bool,
    /// Medical object present
    pub has_medical: bool,
    /// When the row was written
    pub detected_at: DateTime<Utc>,
}

/// Channel type derived from the channel name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelType {
    /// Name mentions `pharma`
    #[serde(rename = "Pharmaceutical")]
    Pharmaceutical,
    /// Name mentions `cosmetic`
    #[serde(rename = "Cosmetics")]
    Cosmetics,
    /// Name mentions `med`
    #[serde(rename = "Medical")]
    Medical,
    /// Name mentions `health` or `info`
    #[serde(rename = "Health Information")]
    HealthInformation,
    /// Fallback
    #[serde(rename = "General Health")]
    GeneralHealth,
}

impl ChannelType {
    /// Stored representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pharmaceutical => "Pharmaceutical",
            Self::Cosmetics => "Cosmetics",
            Self::Medical => "Medical",
            Self::HealthInformation => "Health Information",
            Self::GeneralHealth => "General Health",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pharmaceutical" => Ok(Self::Pharmaceutical),
            "Cosmetics" => Ok(Self::Cosmetics),
            "Medical" => Ok(Self::Medical),
            "Health Information" => Ok(Self::HealthInformation),
            "General Health" => Ok(Self::GeneralHealth),
            other => Err(format!("unknown channel type: {other}")),
        }
    }
}

/// Channel dimension row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelDim {
    /// Surrogate key, 1-based by ascending channel name
    pub channel_key: i64,
    /// Channel username
    pub channel_name: String,
    /// Derived type
    pub channel_type: ChannelType,
    /// Earliest known post timestamp
    pub first_post_date: Option<DateTime<Utc>>,
    /// Latest known post timestamp
    pub last_post_date: Option<DateTime<Utc>>,
    /// Post count
    pub total_posts: i64,
    /// Mean views, two decimals
    pub avg_views: f64,
    /// Mean forwards, two decimals
    pub avg_forwards: f64,
    /// Posts with an image
    pub total_images: i64,
    /// `total_images / total_posts * 100`, two decimals, 0 when no posts
    pub image_percentage: f64,
}

/// Date dimension row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateDim {
    /// YYYYMMDD
    pub date_key: i64,
    /// Calendar day
    pub full_date: NaiveDate,
    /// Year
    pub year: i32,
    /// Quarter 1-4
    pub quarter: u32,
    /// Month 1-12
    pub month: u32,
    /// Full month name
    pub month_name: String,
    /// ISO week
    pub week_of_year: u32,
    /// Day of month
    pub day_of_month: u32,
    /// 0 = Sunday .. 6 = Saturday
    pub day_of_week: u32,
    /// Full day name
    pub day_name: String,
    /// Saturday or Sunday
    pub is_weekend: bool,
}

/// Message fact row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageFact {
    /// Surrogate key, 1-based by ascending message id
    pub message_key: i64,
    /// Natural key of the raw message
    pub message_id: i64,
    /// Resolved channel, `None` when unresolved
    pub channel_key: Option<i64>,
    /// Resolved date, `None` when the timestamp is null or outside the calendar
    pub date_key: Option<i64>,
    /// Message body
    pub text: String,
    /// Unicode scalar count of `text`
    pub text_length: i64,
    /// View counter
    pub views: i64,
    /// Forward counter
    pub forwards: i64,
    /// Whether an image is attached
    pub has_image: bool,
}

/// One classified image joined to its message fact
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageDetectionFact {
    /// Detection store key
    pub detection_id: i64,
    /// Owning message fact, `None` when the message is not in the model
    pub message_key: Option<i64>,
    /// Natural key of the owning message
    pub message_id: i64,
    /// Channel of the owning fact
    pub channel_key: Option<i64>,
    /// Date of the owning fact
    pub date_key: Option<i64>,
    /// Views of the owning message, 0 when unresolved
    pub views: i64,
    /// Forwards of the owning message, 0 when unresolved
    pub forwards: i64,
    pub category: ImageCategory,
    pub primary_object: String,
    pub primary_confidence: f64,
    pub object_count: i64,
}

/// The derived tables produced by one rebuild
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DimensionalModel {
    /// Channel dimension, ordered by key
    pub channels: Vec<ChannelDim>,
    /// Date dimension, ordered by key
    pub dates: Vec<DateDim>,
    /// Message facts, ordered by key
    pub facts: Vec<MessageFact>,
    /// Image detection facts, ordered by detection id
    pub image_detections: Vec<ImageDetectionFact>,
}

impl DimensionalModel {
    /// Look up a channel row by name
    #[must_use]
    pub fn channel(&self, name: &str) -> Option<&ChannelDim> {
        self.channels.iter().find(|c| c.channel_name == name)
    }
}

/// Row counts describing the stores
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    /// Raw store rows
    pub raw_messages: usize,
    /// Raw rows per channel, by channel name
    pub messages_by_channel: Vec<(String, usize)>,
    /// Detection store rows
    pub detections: usize,
    /// Detection rows per category
    pub detections_by_category: Vec<(String, usize)>,
    /// Channel dimension rows
    pub channel_rows: usize,
    /// Date dimension rows
    pub date_rows: usize,
    /// Fact rows
    pub fact_rows: usize,
    /// Image detection fact rows
    pub image_detection_rows: usize,
}
