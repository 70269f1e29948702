//! Comprehensive unit tests for validation module

use std::path::Path;

use medical_warehouse::validation::InputValidator;
use medical_warehouse::WarehouseError;

#[test]
fn test_validate_channel_name_valid() {
    assert!(InputValidator::validate_channel_name("CheMed123").is_ok());
    assert!(InputValidator::validate_channel_name("lobelia4cosmetics").is_ok());
    assert!(InputValidator::validate_channel_name("ፋርማሲ").is_ok());
}

#[test]
fn test_validate_channel_name_invalid() {
    assert!(InputValidator::validate_channel_name("").is_err());
    assert!(InputValidator::validate_channel_name("   ").is_err());
    assert!(InputValidator::validate_channel_name("a/b").is_err());
    assert!(InputValidator::validate_channel_name("bad\nname").is_err());
    assert!(InputValidator::validate_channel_name(&"x".repeat(65)).is_err());
}

#[test]
fn test_validation_errors_are_client_errors() {
    let err = InputValidator::validate_channel_name("").unwrap_err();
    assert!(matches!(err, WarehouseError::InvalidInput(_)));
    assert_eq!(err.code(), "INVALID_INPUT");
    assert!(err.is_client_error());
}

#[test]
fn test_validate_days() {
    assert!(InputValidator::validate_days(1).is_ok());
    assert!(InputValidator::validate_days(7).is_ok());
    assert!(InputValidator::validate_days(365).is_ok());
    assert!(InputValidator::validate_days(0).is_err());
    assert!(InputValidator::validate_days(366).is_err());
}

#[test]
fn test_validate_search_limit() {
    assert!(InputValidator::validate_search_limit(1).is_ok());
    assert!(InputValidator::validate_search_limit(100).is_ok());
    assert!(InputValidator::validate_search_limit(0).is_err());
    assert!(InputValidator::validate_search_limit(101).is_err());
}

#[test]
fn test_validate_search_query() {
    assert!(InputValidator::validate_search_query("paracetamol").is_ok());
    assert!(InputValidator::validate_search_query("").is_err());
    assert!(InputValidator::validate_search_query("  \t ").is_err());
    assert!(InputValidator::validate_search_query(&"q".repeat(201)).is_err());
}

#[test]
fn test_validate_workers() {
    assert!(InputValidator::validate_workers(1).is_ok());
    assert!(InputValidator::validate_workers(64).is_ok());
    assert!(InputValidator::validate_workers(0).is_err());
    assert!(InputValidator::validate_workers(65).is_err());
}

#[test]
fn test_validate_file_path() {
    assert!(InputValidator::validate_file_path(Path::new("data/processed/detections.csv")).is_ok());
    assert!(InputValidator::validate_file_path(Path::new("/tmp/report.json")).is_ok());
    assert!(InputValidator::validate_file_path(Path::new("")).is_err());
    assert!(InputValidator::validate_file_path(Path::new("../etc/passwd")).is_err());
    assert!(InputValidator::validate_file_path(Path::new("data/../../secret")).is_err());
}

#[test]
fn test_validate_database_url() {
    assert!(InputValidator::validate_database_url("sqlite:data/warehouse.db").is_ok());
    assert!(InputValidator::validate_database_url("sqlite:///tmp/w.db").is_ok());
    assert!(InputValidator::validate_database_url("").is_err());
    assert!(InputValidator::validate_database_url("postgres://localhost/w").is_err());
}

#[test]
fn test_sanitize_text() {
    assert_eq!(InputValidator::sanitize_text("  hello  "), "hello");
    assert_eq!(InputValidator::sanitize_text("a\u{0007}b"), "ab");
    assert_eq!(InputValidator::sanitize_text("line1\nline2"), "line1\nline2");
}
