//! Integration-level unit tests for the SettingsEngine public API.
//!
//! These tests exercise the SettingsEngine through its public trait interface,
//! validating default loading, value persistence, and reset behavior.

use serde_json::json;
use smartmarks::services::settings_engine::{SettingsEngine, SettingsEngineTrait};
use smartmarks::types::errors::SettingsError;
use smartmarks::types::settings::ClientSettings;
use tempfile::TempDir;

/// Helper: create a SettingsEngine backed by a temp directory that lives for the
/// duration of the test (the caller holds the `TempDir` handle).
fn engine_in_temp(dir: &TempDir) -> SettingsEngine {
    let path = dir
        .path()
        .join("settings.json")
        .to_string_lossy()
        .to_string();
    SettingsEngine::new(Some(path))
}

#[test]
fn test_load_defaults_when_no_config_file_exists() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in_temp(&dir);

    let settings = engine.load().unwrap();
    assert_eq!(settings, ClientSettings::default());
    assert_eq!(settings.backend.table, "bookmarks");
    assert_eq!(settings.realtime.channel_prefix, "bookmarks-realtime");
    assert_eq!(settings.logging.level, "info");
}

#[test]
fn test_set_value_persists_to_disk() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in_temp(&dir);
    engine.load().unwrap();

    engine
        .set_value("backend.url", json!("https://project.example.co"))
        .unwrap();
    engine.set_value("realtime.event_buffer", json!(64)).unwrap();

    let mut reloaded = engine_in_temp(&dir);
    let settings = reloaded.load().unwrap();
    assert_eq!(settings.backend.url, "https://project.example.co");
    assert_eq!(settings.realtime.event_buffer, 64);
}

#[test]
fn test_set_value_rejects_unknown_key() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in_temp(&dir);

    let result = engine.set_value("backend.nope", json!("x"));
    assert!(matches!(result, Err(SettingsError::InvalidKey(_))));

    let result = engine.set_value("missing.section", json!("x"));
    assert!(matches!(result, Err(SettingsError::InvalidKey(_))));

    let result = engine.set_value("", json!("x"));
    assert!(matches!(result, Err(SettingsError::InvalidKey(_))));
}

#[test]
fn test_set_value_rejects_invalid_value_and_keeps_old_one() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in_temp(&dir);

    let wrong_type = engine.set_value("realtime.event_buffer", json!("lots"));
    assert!(matches!(wrong_type, Err(SettingsError::InvalidValue(_))));

    let zero = engine.set_value("realtime.event_buffer", json!(0));
    assert!(matches!(zero, Err(SettingsError::InvalidValue(_))));

    let bad_url = engine.set_value("backend.url", json!("not a url"));
    assert!(matches!(bad_url, Err(SettingsError::InvalidValue(_))));

    assert_eq!(engine.get_settings(), &ClientSettings::default());
}

#[test]
fn test_malformed_config_file_is_a_serialization_error() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("settings.json"), "{ not json").unwrap();
    let mut engine = engine_in_temp(&dir);

    assert!(matches!(engine.load(), Err(SettingsError::SerializationError(_))));
}

#[test]
fn test_partial_config_file_fills_in_defaults() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("settings.json"),
        r#"{"backend": {"url": "https://project.example.co"}}"#,
    )
    .unwrap();
    let mut engine = engine_in_temp(&dir);

    let settings = engine.load().unwrap();
    assert_eq!(settings.backend.url, "https://project.example.co");
    assert_eq!(settings.backend.table, "bookmarks");
    assert_eq!(settings.realtime, ClientSettings::default().realtime);
}

#[test]
fn test_reset_restores_defaults() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in_temp(&dir);
    engine.set_value("logging.level", json!("debug")).unwrap();
    assert_eq!(engine.get_settings().logging.level, "debug");

    engine.reset().unwrap();
    assert_eq!(engine.get_settings(), &ClientSettings::default());

    let mut reloaded = engine_in_temp(&dir);
    assert_eq!(reloaded.load().unwrap(), ClientSettings::default());
}
