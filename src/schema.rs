//! Database schema definitions
//!
//! Table and column name constants used when composing rusqlite statements.
//! `raw_messages` and `detections` are the sources of truth; the `dim_*` and
//! `fct_*` tables are derived and fully replaced on every rebuild.

/// Raw store: one row per ingested message
pub mod raw_messages {
    /// Table name
    pub const TABLE: &str = "raw_messages";
    /// Natural key assigned by the platform
    pub const MESSAGE_ID: &str = "message_id";
    /// Channel username
    pub const CHANNEL_NAME: &str = "channel_name";
    /// Post timestamp, NULL when the source value did not parse
    pub const MESSAGE_DATE: &str = "message_date";
    /// Message body
    pub const MESSAGE_TEXT: &str = "message_text";
    /// Whether the post carried any media
    pub const HAS_MEDIA: &str = "has_media";
    /// Downloaded image path
    pub const IMAGE_PATH: &str = "image_path";
    /// View counter
    pub const VIEWS: &str = "views";
    /// Forward counter
    pub const FORWARDS: &str = "forwards";
    /// When the row was first written
    pub const INGESTED_AT: &str = "ingested_at";
}

/// Detection store: one row per classified image
pub mod detections {
    /// Table name
    pub const TABLE: &str = "detections";
    /// Synthetic primary key
    pub const ID: &str = "detection_id";
    /// Image reference, unique
    pub const IMAGE_PATH: &str = "image_path";
    /// Channel of the owning message
    pub const CHANNEL_NAME: &str = "channel_name";
    /// Foreign key to raw_messages
    pub const MESSAGE_ID: &str = "message_id";
    /// JSON array of (label, confidence) pairs in model order
    pub const DETECTIONS_JSON: &str = "detections_json";
    /// Comma-joined distinct accepted labels
    pub const DETECTED_OBJECTS: &str = "detected_objects";
    /// Number of accepted detections
    pub const OBJECT_COUNT: &str = "object_count";
    /// First accepted label, or "none"
    pub const PRIMARY_OBJECT: &str = "primary_object";
    /// Confidence of the primary label
    pub const PRIMARY_CONFIDENCE: &str = "primary_confidence";
    /// Derived visual category
    pub const IMAGE_CATEGORY: &str = "image_category";
    /// Person present
    pub const HAS_PERSON: &str = "has_person";
    /// Container present
    pub const HAS_CONTAINER: &str = "has_container";
    /// Medical object present
    pub const HAS_MEDICAL: &str = "has_medical";
    /// Classification timestamp
    pub const DETECTED_AT: &str = "detected_at";
}

/// Channel dimension
pub mod dim_channels {
    /// Table name
    pub const TABLE: &str = "dim_channels";
    /// Surrogate key
    pub const CHANNEL_KEY: &str = "channel_key";
    /// Channel username
    pub const CHANNEL_NAME: &str = "channel_name";
    /// Derived channel type
    pub const CHANNEL_TYPE: &str = "channel_type";
    /// Earliest post timestamp
    pub const FIRST_POST_DATE: &str = "first_post_date";
    /// Latest post timestamp
    pub const LAST_POST_DATE: &str = "last_post_date";
    /// Post count
    pub const TOTAL_POSTS: &str = "total_posts";
    /// Mean views
    pub const AVG_VIEWS: &str = "avg_views";
    /// Mean forwards
    pub const AVG_FORWARDS: &str = "avg_forwards";
    /// Posts with an image
    pub const TOTAL_IMAGES: &str = "total_images";
    /// Share of posts with an image
    pub const IMAGE_PERCENTAGE: &str = "image_percentage";
}

/// Date dimension
pub mod dim_dates {
    /// Table name
    pub const TABLE: &str = "dim_dates";
    /// YYYYMMDD key
    pub const DATE_KEY: &str = "date_key";
    /// Calendar date
    pub const FULL_DATE: &str = "full_date";
    /// Calendar year
    pub const YEAR: &str = "year";
    /// Quarter 1-4
    pub const QUARTER: &str = "quarter";
    /// Month 1-12
    pub const MONTH: &str = "month";
    /// Full English month name
    pub const MONTH_NAME: &str = "month_name";
    /// ISO week number
    pub const WEEK_OF_YEAR: &str = "week_of_year";
    /// Day of month
    pub const DAY_OF_MONTH: &str = "day_of_month";
    /// 0 = Sunday
    pub const DAY_OF_WEEK: &str = "day_of_week";
    /// Full English day name
    pub const DAY_NAME: &str = "day_name";
    /// Saturday or Sunday
    pub const IS_WEEKEND: &str = "is_weekend";
}

/// Message fact table
pub mod fct_messages {
    /// Table name
    pub const TABLE: &str = "fct_messages";
    /// Surrogate key
    pub const MESSAGE_KEY: &str = "message_key";
    /// Natural key of the raw message
    pub const MESSAGE_ID: &str = "message_id";
    /// Foreign key to dim_channels, NULL when unresolved
    pub const CHANNEL_KEY: &str = "channel_key";
    /// Foreign key to dim_dates, NULL when unresolved
    pub const DATE_KEY: &str = "date_key";
    /// Message body
    pub const MESSAGE_TEXT: &str = "message_text";
    /// Character count of the body
    pub const MESSAGE_LENGTH: &str = "message_length";
    /// View counter
    pub const VIEWS: &str = "views";
    /// Forward counter
    pub const FORWARDS: &str = "forwards";
    /// Whether an image is attached
    pub const HAS_IMAGE: &str = "has_image";
}

/// Image detection fact table
pub mod fct_image_detections {
    /// Table name
    pub const TABLE: &str = "fct_image_detections";
    /// Key shared with the detection store
    pub const DETECTION_ID: &str = "detection_id";
    /// Foreign key to fct_messages, NULL when unresolved
    pub const MESSAGE_KEY: &str = "message_key";
    pub const MESSAGE_ID: &str = "message_id";
    pub const CHANNEL_KEY: &str = "channel_key";
    pub const DATE_KEY: &str = "date_key";
    pub const VIEWS: &str = "views";
    pub const FORWARDS: &str = "forwards";
    /// Derived visual category
    pub const IMAGE_CATEGORY: &str = "image_category";
    pub const PRIMARY_OBJECT: &str = "primary_object";
    pub const PRIMARY_CONFIDENCE: &str = "primary_confidence";
    pub const OBJECT_COUNT: &str = "object_count";
}
