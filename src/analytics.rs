//! Read-side aggregations over the dimensional model.
//!
//! Every function here is pure: the same tables always produce the same output.

use std::collections::{BTreeMap, HashMap};

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::error::{Result, WarehouseError};
use crate::models::{ChannelType, Detection, DimensionalModel, ImageCategory, MessageFact};
use crate::terms::TermExtractor;
use crate::utils::{mean_rounded, percentage, round2};

/// Bounds for caller-supplied sizes
pub const MAX_TOP_N: usize = 50;
pub const MAX_SEARCH_LIMIT: usize = 100;
pub const MAX_ACTIVITY_DAYS: u32 = 365;

/// One ranked term
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TermFrequency {
    pub product_term: String,
    pub frequency: usize,
    /// Share of all mentions, two decimals
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopTerms {
    pub terms: Vec<TermFrequency>,
    /// Mentions across every term, returned or not
    pub total_mentions: usize,
    pub distinct_terms: usize,
}

/// Mentions per term across all messages with a resolved channel
#[must_use]
pub fn term_counts(model: &DimensionalModel, extractor: &TermExtractor) -> BTreeMap<String, usize> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for fact in model.facts.iter().filter(|f| f.channel_key.is_some() && !f.text.is_empty()) {
        for term in extractor.terms_in(&fact.text) {
            *counts.entry(term).or_insert(0) += 1;
        }
    }
    counts
}

/// Top `n` terms by frequency, ties by term; `n` is clamped to [1, 50]
#[must_use]
pub fn top_terms(model: &DimensionalModel, extractor: &TermExtractor, n: usize) -> TopTerms {
    let n = n.clamp(1, MAX_TOP_N);
    let counts = term_counts(model, extractor);
    let total_mentions: usize = counts.values().sum();
    let distinct_terms = counts.len();

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let terms = ranked
        .into_iter()
        .take(n)
        .map(|(product_term, frequency)| TermFrequency {
            percentage: percentage(frequency as i64, total_mentions as i64),
            product_term,
            frequency,
        })
        .collect();

    TopTerms {
        terms,
        total_mentions,
        distinct_terms,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityDay {
    pub date: NaiveDate,
    pub message_count: usize,
    pub avg_views: f64,
    pub avg_forwards: f64,
}

/// Channel dimension figures echoed with the activity rollup
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelStatistics {
    pub total_posts: i64,
    pub avg_views: f64,
    pub avg_forwards: f64,
    pub image_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelActivity {
    pub channel_name: String,
    pub period_days: u32,
    pub as_of: NaiveDate,
    /// Newest first; days without posts are absent
    pub activity: Vec<ActivityDay>,
    pub statistics: ChannelStatistics,
}

/// Per-day rollup of one channel over `(as_of - days, as_of]`
pub fn channel_activity(
    model: &DimensionalModel,
    channel_name: &str,
    days: u32,
    as_of: NaiveDate,
) -> Result<ChannelActivity> {
    if !(1..=MAX_ACTIVITY_DAYS).contains(&days) {
        return Err(WarehouseError::InvalidInput(format!(
            "days must be between 1 and {MAX_ACTIVITY_DAYS}, got {days}"
        )));
    }
    let channel = model
        .channel(channel_name)
        .ok_or_else(|| WarehouseError::ChannelNotFound(channel_name.to_string()))?;

    let window_start = as_of - Duration::days(i64::from(days));
    let dates: HashMap<i64, NaiveDate> = model
        .dates
        .iter()
        .filter(|d| d.full_date > window_start && d.full_date <= as_of)
        .map(|d| (d.date_key, d.full_date))
        .collect();

    let mut by_day: BTreeMap<NaiveDate, Vec<&MessageFact>> = BTreeMap::new();
    for fact in model.facts.iter().filter(|f| f.channel_key == Some(channel.channel_key)) {
        if let Some(date) = fact.date_key.and_then(|key| dates.get(&key)) {
            by_day.entry(*date).or_default().push(fact);
        }
    }

    let activity = by_day
        .into_iter()
        .rev()
        .map(|(date, facts)| {
            let views: Vec<i64> = facts.iter().map(|f| f.views).collect();
            let forwards: Vec<i64> = facts.iter().map(|f| f.forwards).collect();
            ActivityDay {
                date,
                message_count: facts.len(),
                avg_views: mean_rounded(&views),
                avg_forwards: mean_rounded(&forwards),
            }
        })
        .collect();

    Ok(ChannelActivity {
        channel_name: channel.channel_name.clone(),
        period_days: days,
        as_of,
        activity,
        statistics: ChannelStatistics {
            total_posts: channel.total_posts,
            avg_views: channel.avg_views,
            avg_forwards: channel.avg_forwards,
            image_percentage: channel.image_percentage,
        },
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallVisualStats {
    pub total_messages: usize,
    pub messages_with_images: usize,
    pub image_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelVisualStats {
    pub channel_name: String,
    pub channel_type: ChannelType,
    pub total_messages: usize,
    pub messages_with_images: usize,
    pub image_percentage: f64,
    pub promotional_posts: usize,
    pub product_display_posts: usize,
    pub lifestyle_posts: usize,
    pub other_posts: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub category: ImageCategory,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualInsights {
    pub top_channel_for_images: String,
    pub most_common_category: String,
    pub total_images_analyzed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualContentStats {
    pub overall: OverallVisualStats,
    pub by_channel: Vec<ChannelVisualStats>,
    pub by_category: Vec<CategoryCount>,
    pub insights: VisualInsights,
}

/// Image usage overall, per channel and per category
#[must_use]
pub fn visual_content_stats(model: &DimensionalModel, detections: &[Detection]) -> VisualContentStats {
    let total_messages = model.facts.len();
    let messages_with_images = model.facts.iter().filter(|f| f.has_image).count();

    let mut categories_by_message: HashMap<i64, Vec<ImageCategory>> = HashMap::new();
    for detection in detections {
        categories_by_message
            .entry(detection.message_id)
            .or_default()
            .push(detection.category);
    }

    let mut by_channel: Vec<ChannelVisualStats> = model
        .channels
        .iter()
        .map(|channel| {
            let facts: Vec<&MessageFact> = model
                .facts
                .iter()
                .filter(|f| f.channel_key == Some(channel.channel_key))
                .collect();
            let with_images = facts.iter().filter(|f| f.has_image).count();

            let mut per_category: HashMap<ImageCategory, usize> = HashMap::new();
            for category in facts
                .iter()
                .filter_map(|f| categories_by_message.get(&f.message_id))
                .flatten()
            {
                *per_category.entry(*category).or_insert(0) += 1;
            }
            let posts = |c: ImageCategory| per_category.get(&c).copied().unwrap_or(0);

            ChannelVisualStats {
                channel_name: channel.channel_name.clone(),
                channel_type: channel.channel_type,
                total_messages: facts.len(),
                messages_with_images: with_images,
                image_percentage: percentage(with_images as i64, facts.len() as i64),
                promotional_posts: posts(ImageCategory::Promotional),
                product_display_posts: posts(ImageCategory::ProductDisplay),
                lifestyle_posts: posts(ImageCategory::Lifestyle),
                other_posts: posts(ImageCategory::Other),
            }
        })
        .collect();
    by_channel.sort_by(|a, b| {
        b.image_percentage
            .total_cmp(&a.image_percentage)
            .then_with(|| a.channel_name.cmp(&b.channel_name))
    });

    let by_category = category_ranking(detections);

    let insights = VisualInsights {
        top_channel_for_images: by_channel
            .first()
            .map_or_else(|| "N/A".to_string(), |c| c.channel_name.clone()),
        most_common_category: by_category
            .first()
            .map_or_else(|| "N/A".to_string(), |c| c.category.to_string()),
        total_images_analyzed: detections.len(),
    };

    VisualContentStats {
        overall: OverallVisualStats {
            total_messages,
            messages_with_images,
            image_percentage: percentage(messages_with_images as i64, total_messages as i64),
        },
        by_channel,
        by_category,
        insights,
    }
}

/// Detection counts per category, most frequent first
#[must_use]
pub fn category_ranking(detections: &[Detection]) -> Vec<CategoryCount> {
    let mut counts: BTreeMap<ImageCategory, usize> = BTreeMap::new();
    for detection in detections {
        *counts.entry(detection.category).or_insert(0) += 1;
    }
    let mut ranked: Vec<CategoryCount> = counts
        .into_iter()
        .map(|(category, count)| CategoryCount { category, count })
        .collect();
    ranked.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.category.as_str().cmp(b.category.as_str()))
    });
    ranked
}

/// Engagement of the posts carrying one image category
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryEngagement {
    pub category: ImageCategory,
    pub image_count: usize,
    pub avg_views: f64,
    pub avg_forwards: f64,
}

/// Views and forwards per image category over detections joined to a message.
///
/// Every category is listed, empty ones with zeros; most viewed first.
#[must_use]
pub fn category_engagement(model: &DimensionalModel) -> Vec<CategoryEngagement> {
    let mut rows: Vec<CategoryEngagement> = ImageCategory::ALL
        .iter()
        .map(|&category| {
            let (views, forwards): (Vec<i64>, Vec<i64>) = model
                .image_detections
                .iter()
                .filter(|d| d.category == category && d.message_key.is_some())
                .map(|d| (d.views, d.forwards))
                .unzip();
            CategoryEngagement {
                category,
                image_count: views.len(),
                avg_views: mean_rounded(&views),
                avg_forwards: mean_rounded(&forwards),
            }
        })
        .collect();
    // Stable sort keeps declaration order on ties
    rows.sort_by(|a, b| b.avg_views.total_cmp(&a.avg_views));
    rows
}

/// Average-view difference between promotional and product display posts
#[must_use]
pub fn promotional_view_lift(engagement: &[CategoryEngagement]) -> f64 {
    let avg = |category: ImageCategory| {
        engagement
            .iter()
            .find(|e| e.category == category)
            .map_or(0.0, |e| e.avg_views)
    };
    round2(avg(ImageCategory::Promotional) - avg(ImageCategory::ProductDisplay))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectFrequency {
    pub object: String,
    pub frequency: usize,
}

/// Most frequent primary objects, ignoring images with no accepted detection.
///
/// `n` is clamped to [1, 50]; ties are broken by object name.
#[must_use]
pub fn primary_object_ranking(model: &DimensionalModel, n: usize) -> Vec<ObjectFrequency> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for detection in model.image_detections.iter().filter(|d| d.primary_object != "none") {
        *counts.entry(detection.primary_object.as_str()).or_insert(0) += 1;
    }
    let mut ranked: Vec<ObjectFrequency> = counts
        .into_iter()
        .map(|(object, frequency)| ObjectFrequency {
            object: object.to_string(),
            frequency,
        })
        .collect();
    ranked.sort_by(|a, b| b.frequency.cmp(&a.frequency).then_with(|| a.object.cmp(&b.object)));
    ranked.truncate(n.clamp(1, MAX_TOP_N));
    ranked
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub message_id: i64,
    pub channel_name: String,
    pub message_text: String,
    pub views: i64,
    pub forwards: i64,
    pub has_image: bool,
    pub message_date: Option<NaiveDate>,
    pub image_category: Option<ImageCategory>,
    pub detected_objects: Option<String>,
}

/// Case-insensitive substring search, most viewed first
pub fn search_messages(
    model: &DimensionalModel,
    detections: &[Detection],
    query: &str,
    channel_filter: Option<&str>,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Err(WarehouseError::InvalidInput("search query cannot be empty".to_string()));
    }
    let limit = limit.clamp(1, MAX_SEARCH_LIMIT);

    let channels: HashMap<i64, &str> = model
        .channels
        .iter()
        .map(|c| (c.channel_key, c.channel_name.as_str()))
        .collect();
    let dates: HashMap<i64, NaiveDate> = model.dates.iter().map(|d| (d.date_key, d.full_date)).collect();

    // Lowest detection id wins when a message has several images
    let mut detection_by_message: HashMap<i64, &Detection> = HashMap::new();
    for detection in detections {
        detection_by_message
            .entry(detection.message_id)
            .and_modify(|d| {
                if detection.detection_id < d.detection_id {
                    *d = detection;
                }
            })
            .or_insert(detection);
    }

    let mut hits: Vec<SearchHit> = model
        .facts
        .iter()
        .filter_map(|fact| {
            let channel_name = *channels.get(&fact.channel_key?)?;
            if channel_filter.is_some_and(|c| c != channel_name) {
                return None;
            }
            if !fact.text.to_lowercase().contains(&needle) {
                return None;
            }
            let detection = detection_by_message.get(&fact.message_id);
            Some(SearchHit {
                message_id: fact.message_id,
                channel_name: channel_name.to_string(),
                message_text: fact.text.clone(),
                views: fact.views,
                forwards: fact.forwards,
                has_image: fact.has_image,
                message_date: fact.date_key.and_then(|k| dates.get(&k).copied()),
                image_category: detection.map(|d| d.category),
                detected_objects: detection.map(|d| d.detected_objects.clone()),
            })
        })
        .collect();

    hits.sort_by(|a, b| b.views.cmp(&a.views).then_with(|| a.message_id.cmp(&b.message_id)));
    hits.truncate(limit);
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modeler::{build_model, build_model_with_detections};
    use crate::models::RawMessage;
    use chrono::{TimeZone, Utc};

    fn message(id: i64, channel: &str, day: u32, text: &str, image: bool, views: i64) -> RawMessage {
        RawMessage {
            message_id: id,
            channel_name: channel.to_string(),
            message_date: Some(Utc.with_ymd_and_hms(2026, 1, day, 12, 0, 0).unwrap()),
            text: text.to_string(),
            has_media: image,
            image_path: image.then(|| format!("{channel}/{id}.jpg")),
            views,
            forwards: views / 10,
            ingested_at: Utc::now(),
        }
    }

    fn model(messages: &[RawMessage]) -> DimensionalModel {
        build_model(
            messages,
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
        )
        .unwrap()
    }

    fn detection(id: i64, message_id: i64, category: ImageCategory) -> Detection {
        Detection {
            detection_id: id,
            image_path: format!("{message_id}.jpg"),
            channel_name: "CheMed123".to_string(),
            message_id,
            detections: vec![],
            detected_objects: "person, bottle".to_string(),
            object_count: 2,
            primary_object: "person".to_string(),
            primary_confidence: 0.9,
            category,
            has_person: true,
            has_container: true,
            has_medical: true,
            detected_at: Utc::now(),
        }
    }

    #[test]
    fn test_top_terms_frequency_and_normalization() {
        let m = model(&[
            message(1, "CheMed123", 14, "need paracetamol now", false, 1),
            message(2, "CheMed123", 14, "Paracetamol available", false, 1),
            message(3, "CheMed123", 14, "vitamin C in stock", false, 1),
        ]);
        let extractor = TermExtractor::new().unwrap();
        let top = top_terms(&m, &extractor, 50);

        let paracetamol = top.terms.iter().find(|t| t.product_term == "paracetamol").unwrap();
        assert_eq!(paracetamol.frequency, 2);
        assert_eq!(top.terms[0].product_term, "paracetamol");

        let sum: f64 = top.terms.iter().map(|t| t.percentage).sum();
        assert!((sum - 100.0).abs() < 0.05, "sum {sum}");
    }

    #[test]
    fn test_top_n_is_clamped() {
        let m = model(&[message(1, "a", 1, "paracetamol aspirin ibuprofen", false, 1)]);
        let extractor = TermExtractor::new().unwrap();
        assert_eq!(top_terms(&m, &extractor, 0).terms.len(), 1);
        assert_eq!(top_terms(&m, &extractor, 500).terms.len(), 3);
    }

    #[test]
    fn test_activity_window_and_order() {
        let m = model(&[
            message(1, "CheMed123", 12, "a", false, 10),
            message(2, "CheMed123", 14, "b", false, 20),
            message(3, "CheMed123", 14, "c", true, 40),
            message(4, "EAHCI", 14, "d", false, 5),
        ]);
        let as_of = NaiveDate::from_ymd_opt(2026, 1, 14).unwrap();

        let one_day = channel_activity(&m, "CheMed123", 1, as_of).unwrap();
        assert_eq!(one_day.activity.len(), 1);
        assert_eq!(one_day.activity[0].message_count, 2);
        assert!((one_day.activity[0].avg_views - 30.0).abs() < 1e-9);

        let week = channel_activity(&m, "CheMed123", 7, as_of).unwrap();
        let dates: Vec<u32> = week.activity.iter().map(|d| chrono::Datelike::day(&d.date)).collect();
        assert_eq!(dates, vec![14, 12]);
        assert_eq!(week.statistics.total_posts, 3);
    }

    #[test]
    fn test_activity_errors() {
        let m = model(&[message(1, "CheMed123", 14, "a", false, 1)]);
        let as_of = NaiveDate::from_ymd_opt(2026, 1, 14).unwrap();
        assert!(matches!(
            channel_activity(&m, "ghost", 7, as_of),
            Err(WarehouseError::ChannelNotFound(_))
        ));
        assert!(matches!(
            channel_activity(&m, "CheMed123", 0, as_of),
            Err(WarehouseError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_visual_stats_left_join() {
        let m = model(&[
            message(1, "CheMed123", 14, "a", true, 1),
            message(2, "CheMed123", 14, "b", false, 1),
            message(3, "CheMed123", 14, "c", false, 1),
            message(4, "EAHCI", 14, "d", false, 1),
        ]);
        let detections = vec![detection(1, 1, ImageCategory::Promotional)];
        let stats = visual_content_stats(&m, &detections);

        assert_eq!(stats.overall.total_messages, 4);
        assert_eq!(stats.overall.messages_with_images, 1);
        assert!((stats.overall.image_percentage - 25.0).abs() < 1e-9);

        let chemed = &stats.by_channel[0];
        assert_eq!(chemed.channel_name, "CheMed123");
        assert_eq!(chemed.messages_with_images, 1);
        assert!((chemed.image_percentage - 33.33).abs() < 1e-9);
        assert_eq!(chemed.promotional_posts, 1);

        let eahci = &stats.by_channel[1];
        assert_eq!(eahci.promotional_posts, 0);
        assert!(eahci.image_percentage.abs() < f64::EPSILON);

        assert_eq!(stats.insights.top_channel_for_images, "CheMed123");
        assert_eq!(stats.insights.most_common_category, "promotional");
        assert_eq!(stats.insights.total_images_analyzed, 1);
    }

    #[test]
    fn test_visual_stats_empty() {
        let stats = visual_content_stats(&DimensionalModel::default(), &[]);
        assert_eq!(stats.insights.top_channel_for_images, "N/A");
        assert_eq!(stats.insights.most_common_category, "N/A");
        assert!(stats.overall.image_percentage.abs() < f64::EPSILON);
    }

    #[test]
    fn test_search_orders_by_views() {
        let m = model(&[
            message(1, "CheMed123", 14, "Vitamin C", false, 5),
            message(2, "EAHCI", 14, "vitamin D", true, 50),
            message(3, "EAHCI", 14, "no match", false, 500),
        ]);
        let detections = vec![detection(1, 2, ImageCategory::ProductDisplay)];

        let hits = search_messages(&m, &detections, "VITAMIN", None, 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].message_id, 2);
        assert_eq!(hits[0].image_category, Some(ImageCategory::ProductDisplay));
        assert!(hits[1].image_category.is_none());

        let filtered = search_messages(&m, &detections, "vitamin", Some("CheMed123"), 10).unwrap();
        assert_eq!(filtered.len(), 1);

        assert!(search_messages(&m, &detections, "   ", None, 10).is_err());
    }

    #[test]
    fn test_category_engagement_averages_joined_posts() {
        let messages = [
            message(1, "CheMed123", 14, "a", true, 300),
            message(2, "CheMed123", 14, "b", true, 100),
            message(3, "CheMed123", 15, "c", true, 50),
            message(4, "EAHCI", 15, "d", true, 70),
        ];
        let mut orphan = detection(5, 99, ImageCategory::Promotional);
        orphan.primary_object = "none".to_string();
        let mut bottle = detection(3, 3, ImageCategory::ProductDisplay);
        bottle.primary_object = "bottle".to_string();
        let detections = vec![
            detection(1, 1, ImageCategory::Promotional),
            detection(2, 2, ImageCategory::Promotional),
            bottle,
            detection(4, 4, ImageCategory::ProductDisplay),
            orphan,
        ];
        let m = build_model_with_detections(
            &messages,
            &detections,
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
        )
        .unwrap();

        let engagement = category_engagement(&m);
        assert_eq!(engagement.len(), ImageCategory::ALL.len());
        assert_eq!(engagement[0].category, ImageCategory::Promotional);
        assert_eq!(engagement[0].image_count, 2);
        assert!((engagement[0].avg_views - 200.0).abs() < 1e-9);
        assert!((engagement[0].avg_forwards - 20.0).abs() < 1e-9);
        assert_eq!(engagement[1].category, ImageCategory::ProductDisplay);
        assert!((engagement[1].avg_views - 60.0).abs() < 1e-9);
        assert_eq!(engagement[2].category, ImageCategory::Lifestyle);
        assert_eq!(engagement[2].image_count, 0);
        assert!((promotional_view_lift(&engagement) - 140.0).abs() < 1e-9);

        let objects = primary_object_ranking(&m, 10);
        assert_eq!(
            objects,
            vec![
                ObjectFrequency {
                    object: "person".to_string(),
                    frequency: 3
                },
                ObjectFrequency {
                    object: "bottle".to_string(),
                    frequency: 1
                },
            ]
        );
        assert_eq!(primary_object_ranking(&m, 0).len(), 1);
    }

    #[test]
    fn test_engagement_without_detections() {
        let engagement = category_engagement(&DimensionalModel::default());
        assert!(engagement.iter().all(|e| e.image_count == 0 && e.avg_views == 0.0));
        assert!(promotional_view_lift(&engagement).abs() < f64::EPSILON);
        assert!(primary_object_ranking(&DimensionalModel::default(), 5).is_empty());
    }
}
