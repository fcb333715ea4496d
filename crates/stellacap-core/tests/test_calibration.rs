mod common;

use std::path::Path;

use ndarray::Array2;
use tempfile::tempdir;

use stellacap_core::calibration::matcher::select_dark;
use stellacap_core::calibration::{
    CalibrationApplier, DarkFallbackPolicy, MatchPolicy, ReferenceStore,
};
use stellacap_core::config::CalibrationConfig;
use stellacap_core::frame::{FrameMetadata, FrameType, ImageData};
use stellacap_core::io::fits::write_fits;
use stellacap_core::io::header::header_from_metadata;
use stellacap_core::io::naming::{master_dark_name, master_flat_name};
use stellacap_core::status::StatusLevel;

use common::{light_frame, settings, uniform, write_frame, write_plain};

const TS: &str = "20250101_120000";

fn write_dark(dir: &Path, exposure: f64, value: f32) {
    write_frame(
        &dir.join(master_dark_name(exposure, TS)),
        uniform(4, 6, value),
        FrameType::MasterDark,
        &settings(exposure),
    );
}

fn store_with_darks(exposures: &[f64]) -> (tempfile::TempDir, ReferenceStore) {
    let dir = tempdir().unwrap();
    for &e in exposures {
        write_dark(dir.path(), e, e as f32 * 10.0);
    }
    let store = ReferenceStore::load(dir.path()).unwrap();
    (dir, store)
}

fn config(dir: &Path) -> CalibrationConfig {
    CalibrationConfig {
        master_dir: dir.to_path_buf(),
        ..Default::default()
    }
}

#[test]
fn test_store_loads_masters_by_prefix() {
    let dir = tempdir().unwrap();
    write_dark(dir.path(), 1.0, 5.0);
    write_dark(dir.path(), 2.0, 10.0);
    write_frame(
        &dir.path().join(master_flat_name(1.0, TS)),
        uniform(4, 6, 1.0),
        FrameType::MasterFlat,
        &settings(1.0),
    );
    write_plain(&dir.path().join("light_0001.fits"), uniform(4, 6, 3.0));
    std::fs::write(dir.path().join("master_dark_9.000s_broken.fits"), b"not fits").unwrap();

    let store = ReferenceStore::load(dir.path()).unwrap();
    assert_eq!(store.dark_exposures(), vec![1.0, 2.0]);
    assert!(store.flat.is_some());
    assert!(store.bias.is_none());
    let flat = store.flat.as_ref().unwrap();
    assert_eq!(flat.tags.gain, Some(100.0));
    assert_eq!(flat.tags.offset, Some(10));
}

#[test]
fn test_missing_directory_gives_empty_store() {
    let dir = tempdir().unwrap();
    let store = ReferenceStore::load(&dir.path().join("nope")).unwrap();
    assert!(store.is_empty());
}

#[test]
fn test_newer_dark_replaces_older_at_same_exposure() {
    let dir = tempdir().unwrap();
    write_frame(
        &dir.path().join(master_dark_name(2.0, "20240101_000000")),
        uniform(4, 6, 1.0),
        FrameType::MasterDark,
        &settings(2.0),
    );
    write_frame(
        &dir.path().join(master_dark_name(2.0, "20250101_000000")),
        uniform(4, 6, 2.0),
        FrameType::MasterDark,
        &settings(2.0),
    );
    let store = ReferenceStore::load(dir.path()).unwrap();
    assert_eq!(store.darks.len(), 1);
    let dark = store.nearest_dark(2.0).unwrap();
    assert_eq!(dark.data[[0, 0]], 2.0);
}

#[test]
fn test_dark_within_tolerance_is_selected() {
    let (_dir, store) = store_with_darks(&[1.0, 2.0, 4.0]);
    let policy = MatchPolicy {
        tolerance: 0.1,
        dark_fallback: DarkFallbackPolicy::NearestExposure,
    };
    let m = select_dark(&store, 2.05, &settings(2.05), &policy).unwrap();
    assert_eq!(m.entry.exposure_time, Some(2.0));
    assert!(!m.fallback);
}

#[test]
fn test_tolerance_boundary_is_inclusive() {
    let (_dir, store) = store_with_darks(&[2.0]);
    let policy = MatchPolicy {
        tolerance: 0.1,
        dark_fallback: DarkFallbackPolicy::None,
    };
    assert!(select_dark(&store, 2.1, &settings(2.1), &policy).is_some());
    assert!(select_dark(&store, 2.2, &settings(2.2), &policy).is_none());
}

#[test]
fn test_fallback_nearest_prefers_shorter_on_tie() {
    let (_dir, store) = store_with_darks(&[1.0, 2.0, 4.0]);
    let policy = MatchPolicy {
        tolerance: 0.1,
        dark_fallback: DarkFallbackPolicy::NearestExposure,
    };
    let m = select_dark(&store, 3.0, &settings(3.0), &policy).unwrap();
    assert_eq!(m.entry.exposure_time, Some(2.0));
    assert!(m.fallback);
}

#[test]
fn test_fallback_none_skips_dark() {
    let (_dir, store) = store_with_darks(&[1.0, 2.0, 4.0]);
    let policy = MatchPolicy {
        tolerance: 0.1,
        dark_fallback: DarkFallbackPolicy::None,
    };
    assert!(select_dark(&store, 3.0, &settings(3.0), &policy).is_none());
}

#[test]
fn test_settings_break_ties_within_tolerance() {
    let dir = tempdir().unwrap();
    let mut other_gain = settings(2.0);
    other_gain.gain = Some(300.0);
    write_frame(
        &dir.path().join(master_dark_name(2.0, TS)),
        uniform(4, 6, 1.0),
        FrameType::MasterDark,
        &other_gain,
    );
    write_frame(
        &dir.path().join(master_dark_name(2.05, TS)),
        uniform(4, 6, 2.0),
        FrameType::MasterDark,
        &settings(2.05),
    );
    let store = ReferenceStore::load(dir.path()).unwrap();
    let policy = MatchPolicy {
        tolerance: 0.1,
        dark_fallback: DarkFallbackPolicy::None,
    };
    let m = select_dark(&store, 2.0, &settings(2.0), &policy).unwrap();
    assert_eq!(m.entry.exposure_time, Some(2.05));
}

#[test]
fn test_empty_store_passes_frame_through_bit_exact() {
    let dir = tempdir().unwrap();
    let applier = CalibrationApplier::from_config(&config(dir.path())).unwrap();
    let data = Array2::from_shape_fn((6, 4), |(y, x)| (y * 31 + x * 7) as f32 + 0.125);
    let frame = light_frame(data.clone(), 2.0);

    let outcome = applier.apply(&frame);
    assert_eq!(outcome.frame.data, ImageData::Mono(data));
    assert!(!outcome.details.applied());
    assert!(!outcome.details.reoriented);
    assert_eq!(outcome.details.dark_skip_reason.as_deref(), Some("no master frames"));
    assert_eq!(outcome.status().level, StatusLevel::Warning);
}

#[test]
fn test_disabled_calibration_passes_through() {
    let (dir, _) = store_with_darks(&[2.0]);
    let cfg = CalibrationConfig {
        enabled: false,
        ..config(dir.path())
    };
    let applier = CalibrationApplier::from_config(&cfg).unwrap();
    let frame = light_frame(uniform(4, 6, 50.0), 2.0);
    let outcome = applier.apply(&frame);
    assert_eq!(outcome.frame.data, frame.data);
    assert!(!outcome.details.enabled);
}

#[test]
fn test_dark_and_flat_are_applied() {
    let dir = tempdir().unwrap();
    write_dark(dir.path(), 2.0, 10.0);
    write_frame(
        &dir.path().join(master_flat_name(1.0, TS)),
        uniform(4, 6, 0.5),
        FrameType::MasterFlat,
        &settings(1.0),
    );
    let applier = CalibrationApplier::from_config(&config(dir.path())).unwrap();
    let outcome = applier.apply(&light_frame(uniform(4, 6, 110.0), 2.0));

    let ImageData::Mono(out) = &outcome.frame.data else {
        panic!("expected mono");
    };
    assert!(out.iter().all(|&v| (v - 200.0).abs() < 1e-4));
    assert!(outcome.details.dark_applied);
    assert!(outcome.details.flat_applied);
    assert!(outcome.frame.metadata.calibration.applied());
    assert_eq!(outcome.status().level, StatusLevel::Success);
}

#[test]
fn test_flat_with_other_gain_is_skipped() {
    let dir = tempdir().unwrap();
    write_dark(dir.path(), 2.0, 10.0);
    let mut flat_settings = settings(1.0);
    flat_settings.gain = Some(200.0);
    write_frame(
        &dir.path().join(master_flat_name(1.0, TS)),
        uniform(4, 6, 0.5),
        FrameType::MasterFlat,
        &flat_settings,
    );
    let applier = CalibrationApplier::from_config(&config(dir.path())).unwrap();
    let outcome = applier.apply(&light_frame(uniform(4, 6, 110.0), 2.0));

    assert!(outcome.details.dark_applied);
    assert!(!outcome.details.flat_applied);
    let reason = outcome.details.flat_skip_reason.unwrap();
    assert!(reason.contains("gain"), "{reason}");
    let ImageData::Mono(out) = &outcome.frame.data else {
        panic!("expected mono");
    };
    assert!((out[[0, 0]] - 100.0).abs() < 1e-4);
}

#[test]
fn test_shape_mismatch_skips_reference() {
    let dir = tempdir().unwrap();
    write_dark(dir.path(), 2.0, 10.0);
    let applier = CalibrationApplier::from_config(&config(dir.path())).unwrap();
    let frame = light_frame(uniform(8, 10, 110.0), 2.0);
    let outcome = applier.apply(&frame);
    assert!(!outcome.details.dark_applied);
    assert!(outcome
        .details
        .dark_skip_reason
        .as_deref()
        .is_some_and(|r| r.contains("shape mismatch")));
    assert_eq!(outcome.frame.data, frame.data);
}

#[test]
fn test_portrait_frame_is_reoriented() {
    let dir = tempdir().unwrap();
    write_dark(dir.path(), 2.0, 10.0);
    let applier = CalibrationApplier::from_config(&config(dir.path())).unwrap();
    let data = Array2::from_shape_fn((6, 4), |(y, x)| 100.0 + (y * 4 + x) as f32);
    let outcome = applier.apply(&light_frame(data.clone(), 2.0));

    assert!(outcome.details.reoriented);
    assert!(outcome.details.dark_applied);
    let ImageData::Mono(out) = &outcome.frame.data else {
        panic!("expected mono");
    };
    assert_eq!(out.dim(), (4, 6));
    assert!((out[[1, 2]] - (data[[2, 1]] - 10.0)).abs() < 1e-4);
}

#[test]
fn test_apply_file_uses_header_settings() {
    let masters = tempdir().unwrap();
    write_dark(masters.path(), 2.0, 10.0);
    write_dark(masters.path(), 4.0, 40.0);
    let frames = tempdir().unwrap();
    let light = write_frame(
        &frames.path().join("light.fits"),
        uniform(4, 6, 100.0),
        FrameType::Light,
        &settings(4.0),
    );

    let applier = CalibrationApplier::from_config(&config(masters.path())).unwrap();
    let outcome = applier.apply_file(&light).unwrap();
    assert_eq!(outcome.details.original_exposure_time, 4.0);
    let ImageData::Mono(out) = &outcome.frame.data else {
        panic!("expected mono");
    };
    assert!((out[[0, 0]] - 60.0).abs() < 1e-4);
}

#[test]
fn test_apply_file_skips_dark_already_in_header() {
    let masters = tempdir().unwrap();
    write_dark(masters.path(), 2.0, 10.0);
    write_frame(
        &masters.path().join(master_flat_name(1.0, TS)),
        uniform(4, 6, 0.5),
        FrameType::MasterFlat,
        &settings(1.0),
    );
    let frames = tempdir().unwrap();
    let path = frames.path().join("dark_subtracted.fits");
    let mut meta = FrameMetadata::light(settings(2.0));
    meta.calibration.dark_applied = true;
    meta.calibration.master_dark = Some("earlier_dark.fits".into());
    let data = ImageData::Mono(uniform(4, 6, 100.0));
    write_fits(&path, &data, &header_from_metadata(&meta)).unwrap();

    let applier = CalibrationApplier::from_config(&config(masters.path())).unwrap();
    let outcome = applier.apply_file(&path).unwrap();
    assert!(!outcome.details.dark_applied);
    assert_eq!(outcome.details.dark_skip_reason.as_deref(), Some("dark already applied"));
    assert!(outcome.details.flat_applied);
    let ImageData::Mono(out) = &outcome.frame.data else {
        panic!("expected mono");
    };
    assert!(out.iter().all(|&v| (v - 200.0).abs() < 1e-4));

    let flags = &outcome.frame.metadata.calibration;
    assert!(flags.dark_applied && flags.flat_applied);
    assert_eq!(flags.master_dark.as_deref(), Some(Path::new("earlier_dark.fits")));
}

#[test]
fn test_fully_calibrated_frame_passes_through() {
    let dir = tempdir().unwrap();
    write_dark(dir.path(), 2.0, 10.0);
    let applier = CalibrationApplier::from_config(&config(dir.path())).unwrap();
    let mut frame = light_frame(uniform(4, 6, 110.0), 2.0);
    frame.metadata.calibration.dark_applied = true;
    frame.metadata.calibration.flat_applied = true;

    let outcome = applier.apply(&frame);
    assert!(!outcome.details.applied());
    assert_eq!(outcome.details.dark_skip_reason.as_deref(), Some("already applied"));
    assert_eq!(outcome.frame.data, frame.data);
    assert!(outcome.frame.metadata.calibration.applied());
}

#[test]
fn test_replace_store_switches_references() {
    let dir = tempdir().unwrap();
    let mut applier = CalibrationApplier::from_config(&config(dir.path())).unwrap();
    assert!(applier.store().is_empty());
    assert_eq!(applier.calibration_status().level, StatusLevel::Warning);

    write_dark(dir.path(), 2.0, 10.0);
    let summary = applier.reload(dir.path()).unwrap();
    assert_eq!(summary.darks.len(), 1);
    assert_eq!(applier.calibration_status().level, StatusLevel::Success);
    assert_eq!(
        applier.calibration_status().detail("available_exposure_times"),
        Some("2.000")
    );
}
