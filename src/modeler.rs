//! Dimensional modeler.
//!
//! Derives the channel and date dimensions and the message fact table from the
//! raw store, plus the image detection facts joined from the detection store.
//! Every rebuild recomputes all tables from scratch and swaps them in with one
//! transaction.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Datelike, NaiveDate};
use tracing::{info, warn};

use crate::db::Database;
use crate::error::{Result, WarehouseError};
use crate::logging::OperationTimer;
use crate::models::{
    ChannelDim, ChannelType, DateDim, Detection, DimensionalModel, ImageDetectionFact, MessageFact, RawMessage,
};
use crate::utils::{mean_rounded, percentage};

/// Channel type rules, evaluated in order; the first matching substring wins
pub const CHANNEL_TYPE_RULES: &[(&str, ChannelType)] = &[
    ("pharma", ChannelType::Pharmaceutical),
    ("cosmetic", ChannelType::Cosmetics),
    ("med", ChannelType::Medical),
    ("medical", ChannelType::Medical),
    ("health", ChannelType::HealthInformation),
    ("info", ChannelType::HealthInformation),
];

/// Case-insensitive channel type lookup
#[must_use]
pub fn classify_channel_type(channel_name: &str) -> ChannelType {
    let lowered = channel_name.to_lowercase();
    CHANNEL_TYPE_RULES
        .iter()
        .find(|(pattern, _)| lowered.contains(pattern))
        .map_or(ChannelType::GeneralHealth, |(_, channel_type)| *channel_type)
}

/// `YYYYMMDD` key of a calendar day
#[must_use]
pub fn date_key(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 10_000 + i64::from(date.month()) * 100 + i64::from(date.day())
}

/// One row per day of `[start, end]`
pub fn build_date_dim(start: NaiveDate, end: NaiveDate) -> Result<Vec<DateDim>> {
    if start > end {
        return Err(WarehouseError::InvalidInput(format!(
            "date range start {start} is after end {end}"
        )));
    }

    Ok(start
        .iter_days()
        .take_while(|d| *d <= end)
        .map(|date| {
            let day_of_week = date.weekday().num_days_from_sunday();
            DateDim {
                date_key: date_key(date),
                full_date: date,
                year: date.year(),
                quarter: (date.month() - 1) / 3 + 1,
                month: date.month(),
                month_name: date.format("%B").to_string(),
                week_of_year: date.iso_week().week(),
                day_of_month: date.day(),
                day_of_week,
                day_name: date.format("%A").to_string(),
                is_weekend: day_of_week == 0 || day_of_week == 6,
            }
        })
        .collect())
}

/// One row per distinct channel, keyed 1.. by ascending channel name
#[must_use]
pub fn build_channel_dim(messages: &[RawMessage]) -> Vec<ChannelDim> {
    let mut by_channel: BTreeMap<&str, Vec<&RawMessage>> = BTreeMap::new();
    for message in messages {
        by_channel.entry(message.channel_name.as_str()).or_default().push(message);
    }

    by_channel
        .into_iter()
        .zip(1_i64..)
        .map(|((name, posts), channel_key)| {
            let total_posts = posts.len() as i64;
            let total_images = posts.iter().filter(|m| m.image_path.is_some()).count() as i64;
            let views: Vec<i64> = posts.iter().map(|m| m.views).collect();
            let forwards: Vec<i64> = posts.iter().map(|m| m.forwards).collect();

            ChannelDim {
                channel_key,
                channel_name: name.to_string(),
                channel_type: classify_channel_type(name),
                first_post_date: posts.iter().filter_map(|m| m.message_date).min(),
                last_post_date: posts.iter().filter_map(|m| m.message_date).max(),
                total_posts,
                avg_views: mean_rounded(&views),
                avg_forwards: mean_rounded(&forwards),
                total_images,
                image_percentage: percentage(total_images, total_posts),
            }
        })
        .collect()
}

/// One fact per message, keyed 1.. by ascending message id.
///
/// Unresolvable channel or date references are kept as `None`.
#[must_use]
pub fn build_message_facts(messages: &[RawMessage], channels: &[ChannelDim], dates: &[DateDim]) -> Vec<MessageFact> {
    let channel_keys: HashMap<&str, i64> = channels
        .iter()
        .map(|c| (c.channel_name.as_str(), c.channel_key))
        .collect();
    let date_keys: HashSet<i64> = dates.iter().map(|d| d.date_key).collect();

    let mut ordered: Vec<&RawMessage> = messages.iter().collect();
    ordered.sort_by_key(|m| m.message_id);

    ordered
        .into_iter()
        .zip(1_i64..)
        .map(|(message, message_key)| {
            let date_key = message
                .message_date
                .map(|ts| date_key(ts.date_naive()))
                .filter(|key| date_keys.contains(key));

            MessageFact {
                message_key,
                message_id: message.message_id,
                channel_key: channel_keys.get(message.channel_name.as_str()).copied(),
                date_key,
                text: message.text.clone(),
                text_length: message.text.chars().count() as i64,
                views: message.views,
                forwards: message.forwards,
                has_image: message.image_path.is_some(),
            }
        })
        .collect()
}

/// One row per detection, joined to its message fact by message id.
///
/// A detection whose message has no fact keeps null keys and zero counters.
#[must_use]
pub fn build_image_detection_facts(detections: &[Detection], facts: &[MessageFact]) -> Vec<ImageDetectionFact> {
    let by_message: HashMap<i64, &MessageFact> = facts.iter().map(|f| (f.message_id, f)).collect();

    let mut rows: Vec<ImageDetectionFact> = detections
        .iter()
        .map(|detection| {
            let fact = by_message.get(&detection.message_id);
            ImageDetectionFact {
                detection_id: detection.detection_id,
                message_key: fact.map(|f| f.message_key),
                message_id: detection.message_id,
                channel_key: fact.and_then(|f| f.channel_key),
                date_key: fact.and_then(|f| f.date_key),
                views: fact.map_or(0, |f| f.views),
                forwards: fact.map_or(0, |f| f.forwards),
                category: detection.category,
                primary_object: detection.primary_object.clone(),
                primary_confidence: detection.primary_confidence,
                object_count: detection.object_count,
            }
        })
        .collect();
    rows.sort_by_key(|r| r.detection_id);
    rows
}

/// Pure derivation of the message tables
pub fn build_model(messages: &[RawMessage], start: NaiveDate, end: NaiveDate) -> Result<DimensionalModel> {
    build_model_with_detections(messages, &[], start, end)
}

/// Pure derivation of every table
pub fn build_model_with_detections(
    messages: &[RawMessage],
    detections: &[Detection],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<DimensionalModel> {
    let dates = build_date_dim(start, end)?;
    let channels = build_channel_dim(messages);
    let facts = build_message_facts(messages, &channels, &dates);
    let image_detections = build_image_detection_facts(detections, &facts);
    Ok(DimensionalModel {
        channels,
        dates,
        facts,
        image_detections,
    })
}

/// Recompute the dimensional tables from the raw store and swap them in
pub fn rebuild(db: &Database, start: NaiveDate, end: NaiveDate) -> Result<DimensionalModel> {
    let timer = OperationTimer::new("rebuild_dimensional_model");

    let messages = db.raw_messages()?;
    let detections = db.detections()?;
    let model = build_model_with_detections(&messages, &detections, start, end)?;

    let unresolved = model
        .facts
        .iter()
        .filter(|f| f.channel_key.is_none() || f.date_key.is_none())
        .count();
    if unresolved > 0 {
        warn!(unresolved, "Facts with unresolved dimension keys kept with null keys");
    }

    db.replace_dimensional_model(&model)?;
    info!(
        channels = model.channels.len(),
        dates = model.dates.len(),
        facts = model.facts.len(),
        image_detections = model.image_detections.len(),
        "Dimensional model rebuilt"
    );
    timer.finish();

    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ImageCategory;
    use chrono::{TimeZone, Utc};

    fn message(id: i64, channel: &str, day: Option<u32>, image: bool, views: i64) -> RawMessage {
        RawMessage {
            message_id: id,
            channel_name: channel.to_string(),
            message_date: day.map(|d| Utc.with_ymd_and_hms(2026, 1, d, 9, 0, 0).unwrap()),
            text: "ፓራሲታሞል ok".to_string(),
            has_media: image,
            image_path: image.then(|| format!("{channel}/{id}.jpg")),
            views,
            forwards: 1,
            ingested_at: Utc::now(),
        }
    }

    #[test]
    fn test_channel_type_rules_in_order() {
        assert_eq!(classify_channel_type("tikvahpharma"), ChannelType::Pharmaceutical);
        assert_eq!(classify_channel_type("lobelia4cosmetics"), ChannelType::Cosmetics);
        assert_eq!(classify_channel_type("CheMed123"), ChannelType::Medical);
        assert_eq!(classify_channel_type("HealthNews"), ChannelType::HealthInformation);
        assert_eq!(classify_channel_type("pharmainfo"), ChannelType::Pharmaceutical);
        assert_eq!(classify_channel_type("tenamereja"), ChannelType::GeneralHealth);
    }

    #[test]
    fn test_date_dim_attributes() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 1, 14).unwrap();
        let dates = build_date_dim(start, end).unwrap();
        assert_eq!(dates.len(), 5);

        // 2026-01-11 is a Sunday
        let sunday = &dates[1];
        assert_eq!(sunday.date_key, 20_260_111);
        assert_eq!(sunday.day_of_week, 0);
        assert_eq!(sunday.day_name, "Sunday");
        assert!(sunday.is_weekend);
        assert_eq!(sunday.month_name, "January");
        assert_eq!(sunday.quarter, 1);

        let wednesday = &dates[4];
        assert_eq!(wednesday.day_of_week, 3);
        assert!(!wednesday.is_weekend);
        assert_eq!(wednesday.week_of_year, 3);
    }

    #[test]
    fn test_default_range_row_count() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 12, 31).unwrap();
        assert_eq!(build_date_dim(start, end).unwrap().len(), 366 + 365 + 365);
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let start = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert!(build_date_dim(start, end).is_err());
    }

    #[test]
    fn test_channel_keys_follow_name_order() {
        let messages = vec![
            message(3, "tikvahpharma", Some(2), false, 10),
            message(1, "CheMed123", Some(1), true, 5),
            message(2, "CheMed123", Some(1), false, 6),
            message(4, "EAHCI", None, false, 0),
        ];
        let channels = build_channel_dim(&messages);
        let names: Vec<&str> = channels.iter().map(|c| c.channel_name.as_str()).collect();
        assert_eq!(names, vec!["CheMed123", "EAHCI", "tikvahpharma"]);
        assert_eq!(channels[0].channel_key, 1);
        assert_eq!(channels[0].total_posts, 2);
        assert_eq!(channels[0].total_images, 1);
        assert!((channels[0].avg_views - 5.5).abs() < 1e-9);
        assert!((channels[0].image_percentage - 50.0).abs() < 1e-9);
        assert!(channels[1].first_post_date.is_none());
    }

    #[test]
    fn test_facts_keep_unresolved_dates() {
        let messages = vec![
            message(10, "EAHCI", Some(5), false, 1),
            message(11, "EAHCI", None, false, 1),
        ];
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 1, 3).unwrap();
        let model = build_model(&messages, start, end).unwrap();

        assert_eq!(model.facts.len(), messages.len());
        assert!(model.facts.iter().all(|f| f.date_key.is_none()));
        assert_eq!(model.facts[0].message_key, 1);
        assert_eq!(model.facts[0].channel_key, Some(1));
        assert_eq!(model.facts[0].text_length, 9);
    }

    fn detection(detection_id: i64, message_id: i64, category: ImageCategory) -> Detection {
        Detection {
            detection_id,
            image_path: format!("img/{message_id}.jpg"),
            channel_name: "CheMed123".to_string(),
            message_id,
            detections: vec![("bottle".to_string(), 0.8)],
            detected_objects: "bottle".to_string(),
            object_count: 1,
            primary_object: "bottle".to_string(),
            primary_confidence: 0.8,
            category,
            has_person: false,
            has_container: true,
            has_medical: true,
            detected_at: Utc::now(),
        }
    }

    #[test]
    fn test_image_detection_facts_join_message_facts() {
        let messages = vec![
            message(5, "CheMed123", Some(2), true, 40),
            message(6, "CheMed123", Some(3), true, 90),
        ];
        let detections = vec![
            detection(2, 6, ImageCategory::Promotional),
            detection(1, 5, ImageCategory::ProductDisplay),
            detection(3, 99, ImageCategory::Other),
        ];
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        let model = build_model_with_detections(&messages, &detections, start, end).unwrap();

        let rows = &model.image_detections;
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].detection_id, 1);
        assert_eq!(rows[0].message_key, Some(1));
        assert_eq!(rows[0].views, 40);
        assert_eq!(rows[0].date_key, Some(20_260_102));
        assert_eq!(rows[1].category, ImageCategory::Promotional);
        assert_eq!(rows[1].views, 90);
        assert_eq!(rows[1].channel_key, Some(1));
        assert_eq!(rows[2].message_key, None);
        assert_eq!(rows[2].views, 0);
    }

    #[test]
    fn test_build_is_deterministic() {
        let messages = vec![
            message(2, "b", Some(3), true, 7),
            message(1, "a", Some(4), false, 3),
        ];
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        let mut reversed = messages.clone();
        reversed.reverse();
        assert_eq!(
            build_model(&messages, start, end).unwrap(),
            build_model(&reversed, start, end).unwrap()
        );
    }
}
