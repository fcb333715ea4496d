use std::time::Duration;

use tempfile::tempdir;

use stellacap_core::capture::{share_camera, CoolingCache, CoolingService, SimulatedCamera};
use stellacap_core::config::CoolingConfig;
use stellacap_core::status::StatusLevel;

fn config(dir: &std::path::Path) -> CoolingConfig {
    CoolingConfig {
        enabled: true,
        target_temperature: -10.0,
        wait_for_cooling: true,
        stabilization_timeout_secs: 5.0,
        stabilization_tolerance: 0.5,
        poll_secs: 0.005,
        cache_path: dir.join("cache/cooling.toml"),
        ..Default::default()
    }
}

#[test]
fn test_cools_and_stabilizes() {
    let dir = tempdir().unwrap();
    let camera = share_camera(SimulatedCamera::new(8, 8).with_cooler(20.0));
    let mut cooling = CoolingService::new(camera, config(dir.path()));

    let status = cooling.initialize_and_stabilize();
    assert_eq!(status.level, StatusLevel::Success, "{}", status.message);
    let snapshot = status.data.unwrap();
    assert!(snapshot.is_cooling);
    assert_eq!(snapshot.cooler_on, Some(true));
    assert!((snapshot.temperature.unwrap() + 10.0).abs() <= 0.5);

    let cache = CoolingCache::load(cooling.cache_path()).unwrap();
    assert_eq!(cache.target_temperature, Some(-10.0));
    assert!(cache.is_cooling);
}

#[test]
fn test_camera_without_cooler_is_warning() {
    let dir = tempdir().unwrap();
    let camera = share_camera(SimulatedCamera::new(8, 8));
    let mut cooling = CoolingService::new(camera, config(dir.path()));
    let status = cooling.initialize_and_stabilize();
    assert_eq!(status.level, StatusLevel::Warning);
    assert!(cooling.set_target_temperature(-5.0).level >= StatusLevel::Error);
}

#[test]
fn test_stabilization_times_out() {
    let dir = tempdir().unwrap();
    let camera = share_camera(SimulatedCamera::new(8, 8).with_cooler(20.0));
    let mut cooling = CoolingService::new(
        camera,
        CoolingConfig {
            wait_for_cooling: false,
            ..config(dir.path())
        },
    );
    assert!(cooling.initialize_and_stabilize().is_success());
    let status = cooling.wait_for_stabilization(Duration::from_millis(20), 0.0001);
    assert_eq!(status.level, StatusLevel::Warning);
}

#[test]
fn test_warmup_ramps_then_turns_cooler_off() {
    let dir = tempdir().unwrap();
    let camera = share_camera(SimulatedCamera::new(8, 8).with_cooler(20.0));
    let mut cooling = CoolingService::new(
        camera,
        CoolingConfig {
            wait_for_cooling: false,
            warmup_rate_per_min: 60_000.0,
            warmup_final_temp: 15.0,
            ..config(dir.path())
        },
    );
    assert!(cooling.initialize_and_stabilize().is_success());

    let started = cooling.start_warmup();
    assert!(started.is_success(), "{}", started.message);
    assert!(cooling.is_warming_up());

    let done = cooling.wait_for_warmup_completion(Duration::from_secs(5));
    assert!(done.is_success(), "{}", done.message);
    assert!(!cooling.is_warming_up());
    let status = cooling.cooling_status();
    assert_eq!(status.cooler_on, Some(false));
    assert_eq!(status.target_temperature, Some(15.0));

    let cache = CoolingCache::load(cooling.cache_path()).unwrap();
    assert!(!cache.cooler_on);
    assert!(!cache.is_warming_up);
}

#[test]
fn test_warmup_can_be_stopped() {
    let dir = tempdir().unwrap();
    let camera = share_camera(SimulatedCamera::new(8, 8).with_cooler(20.0));
    let mut cooling = CoolingService::new(
        camera,
        CoolingConfig {
            wait_for_cooling: false,
            warmup_rate_per_min: 0.001,
            poll_secs: 0.01,
            ..config(dir.path())
        },
    );
    assert!(cooling.initialize_and_stabilize().is_success());
    assert!(cooling.start_warmup().is_success());

    let stopped = cooling.stop_warmup();
    assert!(stopped.is_success(), "{}", stopped.message);
    assert!(!cooling.is_warming_up());
}
