use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::calibration::matcher::DarkFallbackPolicy;
use crate::consts::{
    DEFAULT_CALIBRATION_TOLERANCE, DEFAULT_IMAGE_READY_POLL, DEFAULT_MIN_EXPOSURE,
    DEFAULT_READOUT_GRACE, DEFAULT_SIGMA_THRESHOLD,
};
use crate::error::{Result, StellacapError};
use crate::frame::AcquisitionSettings;
use crate::solve::ephemeris::BrightBody;
use crate::stack::normalize::NormalizationMethod;
use crate::stack::{RejectionMethod, ZeroInclusionPolicy};

/// Top-level configuration, one TOML table per section.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub masters: MasterConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub gating: GatingConfig,
    #[serde(default)]
    pub optics: OpticsConfig,
    #[serde(default)]
    pub bright_body: BrightBodyConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cooling: CoolingConfig,
}

impl AppConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            StellacapError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| StellacapError::Config(e.to_string()))
    }

    /// Reject settings that would make the pipeline misbehave rather than fail.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(StellacapError::Config(msg));
        for (name, value) in self.float_settings() {
            if !value.is_finite() {
                return fail(format!("{name} must be a finite number, got {value}"));
            }
        }
        if self.capture.exposure_time <= 0.0 {
            return fail(format!(
                "capture.exposure_time must be positive, got {}",
                self.capture.exposure_time
            ));
        }
        if self.capture.interval_secs < 0.0 {
            return fail(format!(
                "capture.interval_secs must not be negative, got {}",
                self.capture.interval_secs
            ));
        }
        if self.calibration.tolerance < 0.0 {
            return fail(format!(
                "calibration.tolerance must not be negative, got {}",
                self.calibration.tolerance
            ));
        }
        if self.masters.sigma_threshold <= 0.0 {
            return fail(format!(
                "masters.sigma_threshold must be positive, got {}",
                self.masters.sigma_threshold
            ));
        }
        if self.gating.check_interval_secs <= 0.0 {
            return fail(format!(
                "gating.check_interval_secs must be positive, got {}",
                self.gating.check_interval_secs
            ));
        }
        if self.optics.focal_length_mm <= 0.0 {
            return fail(format!(
                "optics.focal_length_mm must be positive, got {}",
                self.optics.focal_length_mm
            ));
        }
        if self.solver.regions == 0 {
            return fail("solver.regions must be at least 1".into());
        }
        let fraction = self.bright_body.dead_center_fraction;
        if !(0.0..=1.0).contains(&fraction) {
            return fail(format!(
                "bright_body.dead_center_fraction must be within 0..=1, got {fraction}"
            ));
        }
        Ok(())
    }
}

impl AppConfig {
    fn float_settings(&self) -> Vec<(&'static str, f64)> {
        let mut values = vec![
            ("calibration.tolerance", self.calibration.tolerance),
            ("masters.sigma_threshold", f64::from(self.masters.sigma_threshold)),
            ("masters.min_exposure", self.masters.min_exposure),
            ("capture.exposure_time", self.capture.exposure_time),
            ("capture.interval_secs", self.capture.interval_secs),
            ("capture.readout_grace_secs", self.capture.readout_grace_secs),
            ("solver.timeout_secs", self.solver.timeout_secs),
            ("solver.min_solve_interval_secs", self.solver.min_solve_interval_secs),
            ("solver.sidecar_timeout_secs", self.solver.sidecar_timeout_secs),
            ("gating.wait_timeout_secs", self.gating.wait_timeout_secs),
            ("gating.check_interval_secs", self.gating.check_interval_secs),
            ("optics.focal_length_mm", self.optics.focal_length_mm),
            ("optics.sensor_width_mm", self.optics.sensor_width_mm),
            ("optics.sensor_height_mm", self.optics.sensor_height_mm),
            ("bright_body.dead_center_fraction", self.bright_body.dead_center_fraction),
            ("bright_body.max_exposure_secs", self.bright_body.max_exposure_secs),
            ("bright_body.override_window_secs", self.bright_body.override_window_secs),
            ("bright_body.last_good_max_age_secs", self.bright_body.last_good_max_age_secs),
            ("retry.cooldown_secs", self.retry.cooldown_secs),
            ("cooling.target_temperature", self.cooling.target_temperature),
            ("cooling.stabilization_timeout_secs", self.cooling.stabilization_timeout_secs),
            ("cooling.stabilization_tolerance", self.cooling.stabilization_tolerance),
            ("cooling.warmup_rate_per_min", self.cooling.warmup_rate_per_min),
            ("cooling.warmup_final_temp", self.cooling.warmup_final_temp),
            ("cooling.poll_secs", self.cooling.poll_secs),
        ];
        if let Some(gain) = self.capture.gain {
            values.push(("capture.gain", gain));
        }
        if let Some(size) = self.optics.pixel_size_um {
            values.push(("optics.pixel_size_um", size));
        }
        values
    }
}

/// Non-finite input saturates; `validate` rejects it before use.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub enabled: bool,
    pub master_dir: PathBuf,
    /// Absolute tolerance for exposure (seconds) and for gain/offset/readout.
    pub tolerance: f64,
    pub dark_fallback: DarkFallbackPolicy,
    pub enforce_long_side_horizontal: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            master_dir: PathBuf::from("master_frames"),
            tolerance: DEFAULT_CALIBRATION_TOLERANCE,
            dark_fallback: DarkFallbackPolicy::default(),
            enforce_long_side_horizontal: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Holds one `exp_<seconds>s/` subdirectory per dark exposure.
    pub dark_dir: PathBuf,
    pub flat_dir: PathBuf,
    pub output_dir: PathBuf,
    pub rejection: RejectionMethod,
    pub sigma_threshold: f32,
    pub normalization: NormalizationMethod,
    /// A master dark at this exposure is written as the master bias.
    pub min_exposure: f64,
    pub zero_inclusion: ZeroInclusionPolicy,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            dark_dir: PathBuf::from("darks"),
            flat_dir: PathBuf::from("flats"),
            output_dir: PathBuf::from("master_frames"),
            rejection: RejectionMethod::SigmaClip,
            sigma_threshold: DEFAULT_SIGMA_THRESHOLD,
            normalization: NormalizationMethod::Mean,
            min_exposure: DEFAULT_MIN_EXPOSURE,
            zero_inclusion: ZeroInclusionPolicy::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub exposure_time: f64,
    pub gain: Option<f64>,
    pub offset: Option<i32>,
    pub readout_mode: Option<i32>,
    pub binning: u32,
    /// Minimum time between the starts of consecutive cycles.
    pub interval_secs: f64,
    pub output_dir: PathBuf,
    /// Extension of the display copy ("png", "tiff").
    pub display_format: String,
    /// Write a display copy next to the archival FITS.
    pub save_frames: bool,
    pub save_raw: bool,
    pub raw_dir: PathBuf,
    pub use_timestamps: bool,
    pub readout_grace_secs: f64,
    pub image_ready_poll_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            exposure_time: 5.0,
            gain: None,
            offset: None,
            readout_mode: None,
            binning: 1,
            interval_secs: 60.0,
            output_dir: PathBuf::from("captures"),
            display_format: "png".into(),
            save_frames: true,
            save_raw: false,
            raw_dir: PathBuf::from("captures/raw"),
            use_timestamps: true,
            readout_grace_secs: DEFAULT_READOUT_GRACE.as_secs_f64(),
            image_ready_poll_ms: DEFAULT_IMAGE_READY_POLL.as_millis() as u64,
        }
    }
}

impl CaptureConfig {
    pub fn acquisition_settings(&self) -> AcquisitionSettings {
        AcquisitionSettings {
            exposure_time: self.exposure_time,
            gain: self.gain,
            offset: self.offset,
            readout_mode: self.readout_mode,
            binning: Some(self.binning),
        }
    }

    pub fn interval(&self) -> Duration {
        secs(self.interval_secs)
    }

    pub fn readout_grace(&self) -> Duration {
        secs(self.readout_grace_secs)
    }

    pub fn image_ready_poll(&self) -> Duration {
        Duration::from_millis(self.image_ready_poll_ms.max(1))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub enabled: bool,
    pub executable: PathBuf,
    pub working_dir: Option<PathBuf>,
    pub timeout_secs: f64,
    pub regions: u32,
    pub min_solve_interval_secs: f64,
    pub sidecar_timeout_secs: f64,
    pub sidecar_poll_ms: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            executable: PathBuf::from("PlateSolve2.exe"),
            working_dir: None,
            timeout_secs: 60.0,
            regions: 1,
            min_solve_interval_secs: 30.0,
            sidecar_timeout_secs: 10.0,
            sidecar_poll_ms: 500,
        }
    }
}

impl SolverConfig {
    pub fn timeout(&self) -> Duration {
        secs(self.timeout_secs)
    }

    pub fn min_solve_interval(&self) -> Duration {
        secs(self.min_solve_interval_secs)
    }

    pub fn sidecar_timeout(&self) -> Duration {
        secs(self.sidecar_timeout_secs)
    }

    pub fn sidecar_poll(&self) -> Duration {
        Duration::from_millis(self.sidecar_poll_ms.max(1))
    }
}

/// What the pre-capture gate does while the mount is slewing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlewPolicy {
    #[default]
    Skip,
    Wait,
}

impl std::fmt::Display for SlewPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skip => write!(f, "Skip"),
            Self::Wait => write!(f, "Wait"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GatingConfig {
    pub enabled: bool,
    pub check_before_capture: bool,
    pub check_after_capture: bool,
    pub policy: SlewPolicy,
    pub wait_timeout_secs: f64,
    pub check_interval_secs: f64,
    pub require_tracking: bool,
}

impl Default for GatingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_before_capture: true,
            check_after_capture: true,
            policy: SlewPolicy::Skip,
            wait_timeout_secs: 300.0,
            check_interval_secs: 1.0,
            require_tracking: false,
        }
    }
}

impl GatingConfig {
    pub fn wait_timeout(&self) -> Duration {
        secs(self.wait_timeout_secs)
    }

    pub fn check_interval(&self) -> Duration {
        secs(self.check_interval_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OpticsConfig {
    pub focal_length_mm: f64,
    pub sensor_width_mm: f64,
    pub sensor_height_mm: f64,
    pub pixel_size_um: Option<f64>,
}

impl Default for OpticsConfig {
    fn default() -> Self {
        Self {
            focal_length_mm: 1000.0,
            sensor_width_mm: 6.17,
            sensor_height_mm: 4.55,
            pixel_size_um: None,
        }
    }
}

impl OpticsConfig {
    /// Field of view (width, height) in degrees from sensor size and focal
    /// length.
    pub fn field_of_view_deg(&self) -> (f64, f64) {
        let fov = |sensor: f64| (2.0 * (sensor / (2.0 * self.focal_length_mm)).atan()).to_degrees();
        (fov(self.sensor_width_mm), fov(self.sensor_height_mm))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BrightBodyConfig {
    pub enabled: bool,
    pub bodies: Vec<BrightBody>,
    /// A body closer to the centre than this fraction of the smaller field
    /// dimension counts as dead-centre.
    pub dead_center_fraction: f64,
    /// Exposure cap while the override is active.
    pub max_exposure_secs: f64,
    pub override_window_secs: f64,
    /// Oldest last-good solve that may stand in for a failed one.
    pub last_good_max_age_secs: f64,
}

impl Default for BrightBodyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bodies: vec![BrightBody::Moon],
            dead_center_fraction: 0.2,
            max_exposure_secs: 1.0,
            override_window_secs: 600.0,
            last_good_max_age_secs: 900.0,
        }
    }
}

impl BrightBodyConfig {
    pub fn override_window(&self) -> Duration {
        secs(self.override_window_secs)
    }

    pub fn last_good_max_age(&self) -> Duration {
        secs(self.last_good_max_age_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// The run ends once this many cycles in a row have failed.
    pub max_consecutive_failures: u32,
    pub cooldown_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            cooldown_secs: 5.0,
        }
    }
}

impl RetryConfig {
    pub fn cooldown(&self) -> Duration {
        secs(self.cooldown_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CoolingConfig {
    pub enabled: bool,
    pub target_temperature: f64,
    pub wait_for_cooling: bool,
    pub stabilization_timeout_secs: f64,
    pub stabilization_tolerance: f64,
    /// Set-point ramp during warm-up, degrees C per minute.
    pub warmup_rate_per_min: f64,
    pub warmup_final_temp: f64,
    pub warmup_on_stop: bool,
    pub poll_secs: f64,
    pub cache_path: PathBuf,
}

impl Default for CoolingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_temperature: -10.0,
            wait_for_cooling: true,
            stabilization_timeout_secs: 300.0,
            stabilization_tolerance: 1.0,
            warmup_rate_per_min: 2.0,
            warmup_final_temp: 15.0,
            warmup_on_stop: true,
            poll_secs: 5.0,
            cache_path: PathBuf::from("cache/cooling_state.toml"),
        }
    }
}

impl CoolingConfig {
    pub fn stabilization_timeout(&self) -> Duration {
        secs(self.stabilization_timeout_secs)
    }

    pub fn poll(&self) -> Duration {
        secs(self.poll_secs)
    }
}
