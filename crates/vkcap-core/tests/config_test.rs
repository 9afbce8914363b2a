//! Configuration and handle-vocabulary tests.

use vkcap_core::config::{CaptureConfig, VkcapConfig};
use vkcap_core::{CoreError, DesyncPolicy, HandleKey, HandleType, TrackedTypes, UnknownExtensionPolicy};

#[test]
fn test_defaults_track_everything_and_abort() {
    let config = VkcapConfig::default();
    assert_eq!(config.capture.tracked_types().unwrap(), TrackedTypes::all());
    assert_eq!(config.replay.tracked_types().unwrap(), TrackedTypes::all());
    assert_eq!(config.capture.on_desync, DesyncPolicy::Abort);
    assert_eq!(config.capture.unknown_extensions, UnknownExtensionPolicy::Skip);
    assert!(!config.capture.trace_calls);
}

#[test]
fn test_parse_capture_section() {
    let config = VkcapConfig::parse(
        r#"
        [capture]
        tracked = ["device", "buffer"]
        unknown_extensions = "reject"
        on_desync = "log"
        trace_calls = true
        "#,
    )
    .unwrap();

    let tracked = config.capture.tracked_types().unwrap();
    assert!(tracked.tracks(HandleType::Device));
    assert!(tracked.tracks(HandleType::Buffer));
    assert!(!tracked.tracks(HandleType::Image));
    assert_eq!(config.capture.unknown_extensions, UnknownExtensionPolicy::Reject);
    assert_eq!(config.capture.on_desync, DesyncPolicy::Log);
    assert!(config.capture.trace_calls);

    // Missing section falls back to defaults
    assert_eq!(config.replay.tracked_types().unwrap(), TrackedTypes::all());
}

#[test]
fn test_parse_rejects_unknown_type_name() {
    let err = VkcapConfig::parse(
        r#"
        [capture]
        tracked = ["buffer", "texture"]
        "#,
    )
    .unwrap_err();
    match err {
        CoreError::UnknownHandleType(name) => assert_eq!(name, "texture"),
        other => panic!("expected UnknownHandleType, got {:?}", other),
    }
}

#[test]
fn test_none_selects_empty_set() {
    let capture = CaptureConfig {
        tracked: vec!["none".to_string()],
        ..CaptureConfig::default()
    };
    assert!(capture.tracked_types().unwrap().is_empty());
}

#[test]
fn test_toml_round_trip_keeps_policies() {
    let mut config = VkcapConfig::default();
    config.capture.on_desync = DesyncPolicy::Log;
    config.capture.tracked = vec!["swapchain".to_string(), "image".to_string()];

    let text = config.to_toml().unwrap();
    let parsed = VkcapConfig::parse(&text).unwrap();
    assert_eq!(parsed.capture.on_desync, DesyncPolicy::Log);
    assert_eq!(
        parsed.capture.tracked_types().unwrap(),
        TrackedTypes::SWAPCHAIN | TrackedTypes::IMAGE
    );
}

#[test]
fn test_load_or_default_on_missing_file() {
    let config = VkcapConfig::load_or_default("/nonexistent/vkcap.toml");
    assert_eq!(config.capture.tracked_types().unwrap(), TrackedTypes::all());
}

#[test]
fn test_flag_bits_match_discriminants() {
    for ty in HandleType::ALL {
        assert_eq!(ty.flag().bits().count_ones(), 1, "{} flag", ty);
        assert_eq!(ty.name().parse::<HandleType>().unwrap(), ty);
    }
    assert_eq!(HandleType::Buffer.flag(), TrackedTypes::BUFFER);
    assert_eq!(HandleType::Swapchain.flag(), TrackedTypes::SWAPCHAIN);
    assert_eq!(
        TrackedTypes::all().types().count(),
        HandleType::ALL.len()
    );
}

#[test]
fn test_handle_key_display() {
    let key = HandleKey::new(HandleType::Buffer, 0x2a);
    assert_eq!(key.to_string(), "buffer(0x2a)");
    assert!(HandleKey::new(HandleType::Image, 0).is_null());
}
