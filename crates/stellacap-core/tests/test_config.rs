use std::path::PathBuf;

use tempfile::tempdir;

use stellacap_core::calibration::DarkFallbackPolicy;
use stellacap_core::config::{AppConfig, SlewPolicy};
use stellacap_core::error::{ErrorCategory, StellacapError};
use stellacap_core::solve::BrightBody;
use stellacap_core::stack::{RejectionMethod, ZeroInclusionPolicy};

#[test]
fn test_defaults_are_valid() {
    let config = AppConfig::default();
    config.validate().unwrap();
    assert_eq!(config.calibration.tolerance, 0.1);
    assert_eq!(config.calibration.dark_fallback, DarkFallbackPolicy::NearestExposure);
    assert_eq!(config.masters.rejection, RejectionMethod::SigmaClip);
    assert_eq!(config.masters.zero_inclusion, ZeroInclusionPolicy::Zero);
    assert_eq!(config.gating.policy, SlewPolicy::Skip);
    assert_eq!(config.bright_body.bodies, vec![BrightBody::Moon]);
}

#[test]
fn test_empty_toml_gives_defaults() {
    let config = AppConfig::from_toml_str("").unwrap();
    assert_eq!(config.capture.interval_secs, AppConfig::default().capture.interval_secs);
}

#[test]
fn test_partial_sections_merge_with_defaults() {
    let text = r#"
        [capture]
        exposure_time = 2.5
        gain = 120.0

        [calibration]
        master_dir = "/data/masters"
        dark_fallback = "none"

        [masters]
        rejection = "minmax"

        [gating]
        policy = "wait"
        wait_timeout_secs = 30.0

        [bright_body]
        bodies = ["moon", "jupiter"]
    "#;
    let config = AppConfig::from_toml_str(text).unwrap();
    assert_eq!(config.capture.exposure_time, 2.5);
    assert_eq!(config.capture.gain, Some(120.0));
    assert_eq!(config.capture.offset, None);
    assert_eq!(config.capture.display_format, "png");
    assert_eq!(config.calibration.master_dir, PathBuf::from("/data/masters"));
    assert_eq!(config.calibration.dark_fallback, DarkFallbackPolicy::None);
    assert_eq!(config.masters.rejection, RejectionMethod::MinMax);
    assert_eq!(config.gating.policy, SlewPolicy::Wait);
    assert_eq!(config.gating.wait_timeout_secs, 30.0);
    assert!(config.gating.check_after_capture);
    assert_eq!(config.bright_body.bodies, vec![BrightBody::Moon, BrightBody::Jupiter]);
}

#[test]
fn test_round_trip_through_toml() {
    let mut config = AppConfig::default();
    config.capture.exposure_time = 7.0;
    config.solver.regions = 400;
    let text = config.to_toml_string().unwrap();
    let back = AppConfig::from_toml_str(&text).unwrap();
    assert_eq!(back.capture.exposure_time, 7.0);
    assert_eq!(back.solver.regions, 400);
}

#[test]
fn test_invalid_values_are_rejected() {
    for text in [
        "[capture]\nexposure_time = 0.0",
        "[capture]\ninterval_secs = -1.0",
        "[calibration]\ntolerance = -0.5",
        "[masters]\nsigma_threshold = 0.0",
        "[solver]\nregions = 0",
        "[bright_body]\ndead_center_fraction = 1.5",
    ] {
        let err = AppConfig::from_toml_str(text).unwrap_err();
        assert!(matches!(err, StellacapError::Config(_)), "{text}: {err}");
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }
}

#[test]
fn test_non_finite_values_are_rejected() {
    for text in [
        "[capture]\ninterval_secs = inf",
        "[capture]\ngain = nan",
        "[masters]\nsigma_threshold = nan",
        "[solver]\ntimeout_secs = nan",
        "[retry]\ncooldown_secs = inf",
        "[bright_body]\nlast_good_max_age_secs = -inf",
        "[cooling]\npoll_secs = inf",
    ] {
        let err = AppConfig::from_toml_str(text).unwrap_err();
        assert!(matches!(err, StellacapError::Config(_)), "{text}: {err}");
        assert!(err.to_string().contains("finite"), "{text}: {err}");
    }
}

#[test]
fn test_unknown_enum_value_is_parse_error() {
    let err = AppConfig::from_toml_str("[masters]\nrejection = \"median\"").unwrap_err();
    assert!(matches!(err, StellacapError::ConfigParse(_)));
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[test]
fn test_load_from_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stellacap.toml");
    std::fs::write(&path, "[capture]\ninterval_secs = 15.0\n").unwrap();
    let config = AppConfig::load(&path).unwrap();
    assert_eq!(config.capture.interval_secs, 15.0);

    let err = AppConfig::load(&dir.path().join("missing.toml")).unwrap_err();
    assert!(matches!(err, StellacapError::Config(_)));
}

#[test]
fn test_field_of_view() {
    let config = AppConfig::default();
    let (w, h) = config.optics.field_of_view_deg();
    assert!(w > h);
    assert!((w - 0.3535).abs() < 1e-3);
}
