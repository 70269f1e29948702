//! Visual classification.
//!
//! [`classify`] is a pure rule set over object-detector output. The detector
//! itself sits behind [`ObjectDetector`] so the stage can run against model
//! sidecar files in production and synthetic detections in tests.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::db::{Database, PendingImage};
use crate::error::{Result, WarehouseError};
use crate::models::{Classification, DetectedObject, ImageCategory, NewDetection};

/// Detections at or below this confidence are discarded
pub const CONFIDENCE_THRESHOLD: f64 = 0.5;

const PERSON_LABEL: &str = "person";
const PRODUCT_LABELS: [&str; 4] = ["bottle", "pills", "medicine", "package"];
const CONTAINER_LABELS: [&str; 4] = ["bottle", "cup", "bowl", "box"];
const MEDICAL_LABELS: [&str; 5] = ["bottle", "pills", "syringe", "medical", "medicine"];

/// Classify with the standard acceptance threshold
#[must_use]
pub fn classify(detections: &[DetectedObject]) -> Classification {
    classify_with_threshold(detections, CONFIDENCE_THRESHOLD)
}

/// Classify, accepting only detections with `confidence > threshold`
#[must_use]
pub fn classify_with_threshold(detections: &[DetectedObject], threshold: f64) -> Classification {
    let accepted: Vec<&DetectedObject> = detections.iter().filter(|d| d.confidence > threshold).collect();

    let mut labels: Vec<String> = Vec::new();
    for d in &accepted {
        if !labels.iter().any(|l| l == &d.label) {
            labels.push(d.label.clone());
        }
    }

    let has = |set: &[&str]| labels.iter().any(|l| set.contains(&l.as_str()));
    let has_person = labels.iter().any(|l| l == PERSON_LABEL);
    let has_product = has(&PRODUCT_LABELS);
    let has_container = has(&CONTAINER_LABELS);
    let has_medical = has(&MEDICAL_LABELS);

    let category = if has_person && has_product {
        ImageCategory::Promotional
    } else if has_container || has_product {
        ImageCategory::ProductDisplay
    } else if has_person {
        ImageCategory::Lifestyle
    } else {
        ImageCategory::Other
    };

    let (primary_label, primary_confidence) = accepted
        .first()
        .map_or_else(|| ("none".to_string(), 0.0), |d| (d.label.clone(), d.confidence));

    Classification {
        category,
        has_person,
        has_container,
        has_medical,
        primary_label,
        primary_confidence,
        object_count: accepted.len(),
        labels,
    }
}

/// Why the detector produced no output for an image
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DetectorError {
    /// The image file is missing; the image is skipped
    #[error("image not available: {0}")]
    ImageUnavailable(String),
    /// The model could not run; the stage stops
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
}

/// Black-box `image -> detections` capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    /// Detect objects in one image, in model output order
    async fn detect(&self, image_path: &str) -> std::result::Result<Vec<DetectedObject>, DetectorError>;
}

/// Reads model output written next to each image as `<image>.detections.json`
#[derive(Debug, Clone, Default)]
pub struct SidecarDetector {
    base_dir: Option<PathBuf>,
}

impl SidecarDetector {
    #[must_use]
    pub const fn new() -> Self {
        Self { base_dir: None }
    }

    /// Resolve relative image paths against `base_dir`
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    /// Resolve against the configured image root
    #[must_use]
    pub fn from_config(config: &IngestConfig) -> Self {
        Self::with_base_dir(&config.image_dir)
    }

    fn resolve(&self, image_path: &str) -> PathBuf {
        let path = Path::new(image_path);
        match &self.base_dir {
            Some(base) if path.is_relative() && !path.starts_with(base) => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Sidecar file for an image
    #[must_use]
    pub fn sidecar_path(image: &Path) -> PathBuf {
        let mut name = image.as_os_str().to_os_string();
        name.push(".detections.json");
        PathBuf::from(name)
    }
}

#[async_trait]
impl ObjectDetector for SidecarDetector {
    async fn detect(&self, image_path: &str) -> std::result::Result<Vec<DetectedObject>, DetectorError> {
        let image = self.resolve(image_path);
        if !tokio::fs::try_exists(&image).await.unwrap_or(false) {
            return Err(DetectorError::ImageUnavailable(image_path.to_string()));
        }

        let sidecar = Self::sidecar_path(&image);
        let contents = tokio::fs::read_to_string(&sidecar)
            .await
            .map_err(|e| DetectorError::ModelUnavailable(format!("{}: {e}", sidecar.display())))?;
        serde_json::from_str(&contents)
            .map_err(|e| DetectorError::ModelUnavailable(format!("{}: {e}", sidecar.display())))
    }
}

/// Outcome of one classification stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassifyReport {
    /// Detection rows written
    pub classified: usize,
    /// Images whose file was missing
    pub skipped_missing_image: usize,
    /// Images classified concurrently by another writer
    pub already_present: usize,
    /// Written rows per category
    pub by_category: BTreeMap<ImageCategory, usize>,
}

/// Classify every referenced image that has no detection row yet.
///
/// At most `workers` detector calls are in flight. Rows are committed one at a
/// time, so an error or cancellation keeps everything written before it.
pub async fn classify_pending<D: ObjectDetector + ?Sized>(
    db: &Database,
    detector: &D,
    workers: usize,
    threshold: f64,
    cancel: &CancellationToken,
) -> Result<ClassifyReport> {
    let mut pending = db.pending_images()?;
    let mut seen = HashSet::new();
    pending.retain(|p| seen.insert(p.image_path.clone()));
    info!(pending = pending.len(), workers, "Classifying images");

    let mut results = stream::iter(pending)
        .map(|image: PendingImage| async move {
            let outcome = detector.detect(&image.image_path).await;
            (image, outcome)
        })
        .buffer_unordered(workers.max(1));

    let mut report = ClassifyReport::default();
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(WarehouseError::Cancelled("classify")),
            next = results.next() => next,
        };
        let Some((image, outcome)) = next else {
            break;
        };

        let detections = match outcome {
            Ok(detections) => detections,
            Err(DetectorError::ImageUnavailable(path)) => {
                warn!(message_id = image.message_id, path, "Image missing, skipped");
                report.skipped_missing_image += 1;
                continue;
            }
            Err(DetectorError::ModelUnavailable(reason)) => {
                return Err(WarehouseError::ModelUnavailable(reason));
            }
        };

        let classification = classify_with_threshold(&detections, threshold);
        let category = classification.category;
        let row = NewDetection {
            image_path: image.image_path,
            channel_name: image.channel_name,
            message_id: image.message_id,
            detections,
            classification,
        };

        if db.insert_detection(&row)? {
            debug!(message_id = row.message_id, %category, "Image classified");
            report.classified += 1;
            *report.by_category.entry(category).or_insert(0) += 1;
        } else {
            report.already_present += 1;
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn obj(label: &str, confidence: f64) -> DetectedObject {
        DetectedObject::new(label, confidence)
    }

    #[test]
    fn test_person_with_bottle_is_promotional() {
        let c = classify(&[obj("person", 0.9), obj("bottle", 0.8)]);
        assert_eq!(c.category, ImageCategory::Promotional);
        assert!(c.has_person);
        assert!(c.has_container);
        assert!(c.has_medical);
        assert_eq!(c.primary_label, "person");
    }

    #[test]
    fn test_bottle_alone_is_product_display() {
        let c = classify(&[obj("bottle", 0.7)]);
        assert_eq!(c.category, ImageCategory::ProductDisplay);
        assert!(!c.has_person);
    }

    #[test]
    fn test_empty_is_other() {
        let c = classify(&[]);
        assert_eq!(c.category, ImageCategory::Other);
        assert_eq!(c.primary_label, "none");
        assert!(c.primary_confidence.abs() < f64::EPSILON);
        assert!(!c.has_person && !c.has_container && !c.has_medical);
        assert_eq!(c.object_count, 0);
    }

    #[test]
    fn test_person_alone_is_lifestyle() {
        assert_eq!(classify(&[obj("person", 0.95)]).category, ImageCategory::Lifestyle);
    }

    #[test]
    fn test_person_with_cup_is_product_display() {
        // cup is a container but not a product
        let c = classify(&[obj("person", 0.9), obj("cup", 0.9)]);
        assert_eq!(c.category, ImageCategory::ProductDisplay);
    }

    #[test]
    fn test_low_confidence_is_discarded() {
        let c = classify(&[obj("person", 0.5), obj("bottle", 0.3), obj("dog", 0.6)]);
        assert_eq!(c.category, ImageCategory::Other);
        assert_eq!(c.primary_label, "dog");
        assert_eq!(c.labels, vec!["dog".to_string()]);
    }

    #[test]
    fn test_duplicate_labels_counted_once_in_labels() {
        let c = classify(&[obj("bottle", 0.9), obj("bottle", 0.8)]);
        assert_eq!(c.labels.len(), 1);
        assert_eq!(c.object_count, 2);
    }

    fn label_strategy() -> impl Strategy<Value = String> {
        prop::sample::select(vec![
            "person", "bottle", "pills", "medicine", "package", "cup", "bowl", "box", "syringe", "dog", "car",
        ])
        .prop_map(ToString::to_string)
    }

    proptest! {
        #[test]
        fn prop_classification_is_deterministic(
            items in prop::collection::vec((label_strategy(), 0.0f64..=1.0), 0..12)
        ) {
            let detections: Vec<DetectedObject> =
                items.iter().map(|(l, c)| DetectedObject::new(l, *c)).collect();
            prop_assert_eq!(classify(&detections), classify(&detections));
        }

        #[test]
        fn prop_order_does_not_change_category(
            items in prop::collection::vec((label_strategy(), 0.0f64..=1.0), 0..12)
        ) {
            let detections: Vec<DetectedObject> =
                items.iter().map(|(l, c)| DetectedObject::new(l, *c)).collect();
            let mut reversed = detections.clone();
            reversed.reverse();
            let a = classify(&detections);
            let b = classify(&reversed);
            prop_assert_eq!(a.category, b.category);
            prop_assert_eq!(a.has_person, b.has_person);
            prop_assert_eq!(a.has_container, b.has_container);
            prop_assert_eq!(a.has_medical, b.has_medical);
        }
    }

    #[tokio::test]
    async fn test_sidecar_missing_image_is_unavailable() {
        let detector = SidecarDetector::new();
        let err = detector.detect("/definitely/not/here.jpg").await.unwrap_err();
        assert!(matches!(err, DetectorError::ImageUnavailable(_)));
    }

    #[tokio::test]
    async fn test_sidecar_reads_model_output() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("1.jpg");
        std::fs::write(&image, b"jpeg").unwrap();

        let detector = SidecarDetector::with_base_dir(dir.path());
        assert!(matches!(
            detector.detect("1.jpg").await,
            Err(DetectorError::ModelUnavailable(_))
        ));

        std::fs::write(
            SidecarDetector::sidecar_path(&image),
            r#"[{"label": "bottle", "confidence": 0.82, "bounding_box": [0, 0, 10, 10]}]"#,
        )
        .unwrap();
        let detections = detector.detect("1.jpg").await.unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, "bottle");
    }

    #[test]
    fn test_configured_image_root_resolves_relative_paths() {
        let config = IngestConfig {
            raw_dir: "data/raw/telegram_messages".to_string(),
            image_dir: "data/raw/images".to_string(),
        };
        let detector = SidecarDetector::from_config(&config);

        assert_eq!(
            detector.resolve("CheMed123/7.jpg"),
            PathBuf::from("data/raw/images/CheMed123/7.jpg")
        );
        assert_eq!(
            detector.resolve("data/raw/images/CheMed123/7.jpg"),
            PathBuf::from("data/raw/images/CheMed123/7.jpg")
        );
        assert_eq!(detector.resolve("/srv/images/7.jpg"), PathBuf::from("/srv/images/7.jpg"));
    }

    #[tokio::test]
    async fn test_mock_detector_is_injectable() {
        let mut mock = MockObjectDetector::new();
        mock.expect_detect()
            .returning(|_| Ok(vec![DetectedObject::new("person", 0.9), DetectedObject::new("pills", 0.9)]));
        let detections = mock.detect("any.jpg").await.unwrap();
        assert_eq!(classify(&detections).category, ImageCategory::Promotional);
    }

    fn store_with_images(count: i64) -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let db = Database::new(&format!("sqlite:{}", dir.path().join("w.db").display()))
            .expect("Failed to create database");
        for id in 1..=count {
            db.insert_raw_message(&crate::models::NewRawMessage {
                message_id: id,
                channel_name: "CheMed123".to_string(),
                message_date: None,
                text: format!("post {id}"),
                has_media: true,
                image_path: Some(format!("images/CheMed123/{id}.jpg")),
                views: 10,
                forwards: 0,
            })
            .expect("Failed to insert message");
        }
        (db, dir)
    }

    #[tokio::test]
    async fn test_model_failure_keeps_earlier_rows() {
        let (db, _dir) = store_with_images(3);
        let mut seq = mockall::Sequence::new();
        let mut mock = MockObjectDetector::new();
        mock.expect_detect()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![DetectedObject::new("bottle", 0.8)]));
        mock.expect_detect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(DetectorError::ModelUnavailable("weights missing".to_string())));

        let result = classify_pending(&db, &mock, 1, CONFIDENCE_THRESHOLD, &CancellationToken::new()).await;

        assert!(matches!(result, Err(WarehouseError::ModelUnavailable(_))));
        let stored = db.detections().expect("Failed to list detections");
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].message_id, 1);
        assert_eq!(stored[1].message_id, 2);
        assert_eq!(db.pending_images().expect("Failed to list pending").len(), 1);
    }

    /// Succeeds once, then cancels and never answers
    struct StallingDetector {
        cancel: CancellationToken,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl ObjectDetector for StallingDetector {
        async fn detect(&self, _image_path: &str) -> std::result::Result<Vec<DetectedObject>, DetectorError> {
            if self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                return Ok(vec![DetectedObject::new("person", 0.9)]);
            }
            self.cancel.cancel();
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancel_interrupts_stalled_detector() {
        let (db, _dir) = store_with_images(3);
        let cancel = CancellationToken::new();
        let detector = StallingDetector {
            cancel: cancel.clone(),
            calls: std::sync::atomic::AtomicUsize::new(0),
        };

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            classify_pending(&db, &detector, 1, CONFIDENCE_THRESHOLD, &cancel),
        )
        .await
        .expect("Classification did not observe cancellation");

        assert!(matches!(result, Err(WarehouseError::Cancelled("classify"))));
        let stored = db.detections().expect("Failed to list detections");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].category, ImageCategory::Lifestyle);
    }

    #[tokio::test]
    async fn test_stored_confidence_matches_detector_output() {
        let (db, _dir) = store_with_images(1);
        let mut mock = MockObjectDetector::new();
        mock.expect_detect()
            .returning(|_| Ok(vec![DetectedObject::new("bottle", 0.8)]));

        classify_pending(&db, &mock, 2, CONFIDENCE_THRESHOLD, &CancellationToken::new())
            .await
            .expect("Failed to classify");

        let stored = db.detections().expect("Failed to list detections");
        assert_eq!(stored[0].primary_confidence, 0.8);
        assert_eq!(stored[0].detections, vec![("bottle".to_string(), 0.8)]);
    }
}
