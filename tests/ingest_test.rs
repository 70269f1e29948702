//! Integration tests for batch files and the ingestion loader

use std::fs;

use chrono::NaiveDate;
use tempfile::{tempdir, TempDir};

use medical_warehouse::db::Database;
use medical_warehouse::ingest::{latest_batch_dir, read_batch_dir, write_batch};
use medical_warehouse::{IngestionLoader, RawMessageRecord, WarehouseError};

fn create_test_db(temp_dir: &TempDir) -> Database {
    let db_path = temp_dir.path().join("warehouse.db");
    Database::new(&format!("sqlite:{}", db_path.display())).expect("Failed to create database")
}

fn record(id: i64, channel: &str, date: Option<&str>) -> RawMessageRecord {
    RawMessageRecord {
        message_id: id,
        channel_name: channel.to_string(),
        message_date: date.map(ToString::to_string),
        message_text: Some(format!("Amoxicillin available, post {id}")),
        has_media: false,
        image_path: None,
        views: 120,
        forwards: 2,
    }
}

#[test]
fn test_loading_same_batch_twice_is_idempotent() {
    let temp_dir = tempdir().expect("Failed to create temp directory");
    let db = create_test_db(&temp_dir);
    let loader = IngestionLoader::new(db.clone());
    let records: Vec<_> = (1..=5)
        .map(|id| record(id, "CheMed123", Some("2026-01-14T10:00:00+00:00")))
        .collect();

    let first = loader.load(&records).expect("Failed to load batch");
    assert_eq!(first.inserted_count, 5);
    assert_eq!(first.skipped_count, 0);

    let second = loader.load(&records).expect("Failed to reload batch");
    assert_eq!(second.inserted_count, 0);
    assert_eq!(second.skipped_count, 5);
    assert!(second.errors.is_empty());

    assert_eq!(db.count_raw_messages().expect("Failed to count"), 5);
}

#[test]
fn test_malformed_record_does_not_block_others() {
    let temp_dir = tempdir().expect("Failed to create temp directory");
    let db = create_test_db(&temp_dir);
    let loader = IngestionLoader::new(db.clone());

    let mut bad_channel = record(2, "", None);
    bad_channel.channel_name = "   ".to_string();
    let mut negative_views = record(3, "CheMed123", None);
    negative_views.views = -5;
    let records = vec![record(1, "CheMed123", None), bad_channel, negative_views, record(4, "CheMed123", None)];

    let result = loader.load(&records).expect("Failed to load batch");
    assert_eq!(result.inserted_count, 2);
    assert_eq!(result.skipped_count, 2);
    assert_eq!(result.errors.len(), 2);
    assert_eq!(result.errors[0].index, 1);
    assert_eq!(result.errors[1].message_id, Some(3));
    assert_eq!(db.count_raw_messages().expect("Failed to count"), 2);
}

#[test]
fn test_storage_failure_aborts_and_keeps_earlier_rows() {
    let temp_dir = tempdir().expect("Failed to create temp directory");
    let db = create_test_db(&temp_dir);
    db.get_connection()
        .expect("Failed to get connection")
        .execute_batch(
            "CREATE TRIGGER reject_third BEFORE INSERT ON raw_messages
             WHEN NEW.message_id = 3
             BEGIN SELECT RAISE(ABORT, 'storage unavailable'); END;",
        )
        .expect("Failed to create trigger");

    let loader = IngestionLoader::new(db.clone());
    let records: Vec<_> = (1..=4).map(|id| record(id, "CheMed123", None)).collect();
    let result = loader.load(&records);

    assert!(matches!(result, Err(WarehouseError::Database(_))));
    assert_eq!(db.count_raw_messages().expect("Failed to count"), 2);
    assert!(db.get_raw_message(2).expect("Failed to read").is_some());
    assert!(db.get_raw_message(4).expect("Failed to read").is_none());
}

#[test]
fn test_unparseable_timestamp_is_stored_as_null() {
    let temp_dir = tempdir().expect("Failed to create temp directory");
    let db = create_test_db(&temp_dir);
    let loader = IngestionLoader::new(db.clone());

    loader
        .load(&[record(10, "tikvahpharma", Some("yesterday-ish"))])
        .expect("Failed to load batch");

    let stored = db
        .get_raw_message(10)
        .expect("Failed to read message")
        .expect("Message should exist");
    assert!(stored.message_date.is_none());
}

#[test]
fn test_missing_optional_fields_get_defaults() {
    let temp_dir = tempdir().expect("Failed to create temp directory");
    let db = create_test_db(&temp_dir);
    let loader = IngestionLoader::new(db.clone());
    let records: Vec<RawMessageRecord> =
        serde_json::from_str(r#"[{"message_id": 11, "channel_name": "EAHCI", "message_text": null}]"#)
            .expect("Failed to parse records");

    loader.load(&records).expect("Failed to load batch");

    let stored = db
        .get_raw_message(11)
        .expect("Failed to read message")
        .expect("Message should exist");
    assert_eq!(stored.text, "");
    assert_eq!(stored.views, 0);
    assert!(!stored.has_media);
    assert!(stored.image_path.is_none());
}

#[test]
fn test_write_and_read_batch_dir() {
    let temp_dir = tempdir().expect("Failed to create temp directory");
    let raw_dir = temp_dir.path().join("raw");
    let date = NaiveDate::from_ymd_opt(2026, 1, 14).unwrap();

    write_batch(&raw_dir, date, "tikvahpharma", &[record(3, "tikvahpharma", None)])
        .expect("Failed to write batch");
    let path = write_batch(&raw_dir, date, "CheMed123", &[record(1, "CheMed123", None), record(2, "CheMed123", None)])
        .expect("Failed to write batch");
    assert!(path.ends_with("2026-01-14/CheMed123.json"));

    let batches = read_batch_dir(&raw_dir.join("2026-01-14")).expect("Failed to read batches");
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].channel_name, "CheMed123");
    assert_eq!(batches[0].records.len(), 2);
    assert_eq!(batches[0].collection_date, date);
    assert_eq!(batches[1].channel_name, "tikvahpharma");
}

#[test]
fn test_malformed_elements_and_files_are_skipped() {
    let temp_dir = tempdir().expect("Failed to create temp directory");
    let db = create_test_db(&temp_dir);
    let dir = temp_dir.path().join("raw/2026-01-15");
    fs::create_dir_all(&dir).expect("Failed to create batch dir");
    fs::write(
        dir.join("CheMed123.json"),
        r#"[{"message_id": 1, "channel_name": "CheMed123"}, {"channel_name": "CheMed123"}, "garbage"]"#,
    )
    .expect("Failed to write batch");
    fs::write(dir.join("broken.json"), "{ not an array").expect("Failed to write batch");
    fs::write(dir.join("notes.txt"), "ignored").expect("Failed to write file");

    let batches = read_batch_dir(&dir).expect("Failed to read batches");
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].records.len(), 1);
    assert_eq!(batches[0].malformed.len(), 2);

    let result = IngestionLoader::new(db).load_dir(&dir).expect("Failed to load dir");
    assert_eq!(result.inserted_count, 1);
    assert_eq!(result.skipped_count, 2);
    assert_eq!(result.errors.len(), 2);
    assert!(result.errors.iter().all(|e| e.message_id.is_none()));
}

#[test]
fn test_latest_batch_dir() {
    let temp_dir = tempdir().expect("Failed to create temp directory");
    let raw_dir = temp_dir.path().join("raw");

    assert!(latest_batch_dir(&raw_dir).expect("Failed to scan").is_none());

    for name in ["2026-01-02", "2026-01-14", "2025-12-31", "not-a-date"] {
        fs::create_dir_all(raw_dir.join(name)).expect("Failed to create dir");
    }
    let latest = latest_batch_dir(&raw_dir)
        .expect("Failed to scan")
        .expect("A batch dir should exist");
    assert!(latest.ends_with("2026-01-14"));
}
