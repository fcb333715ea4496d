use std::time::Duration;

/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f32 = 1e-10;

/// Default sigma threshold for sigma-clipped master combination.
pub const DEFAULT_SIGMA_THRESHOLD: f32 = 3.0;

/// Default matching tolerance between frame and reference settings.
pub const DEFAULT_CALIBRATION_TOLERANCE: f64 = 0.1;

/// Weight of the exposure difference in the dark score.
pub const EXPOSURE_SCORE_WEIGHT: f64 = 10.0;

/// Score contribution of a setting missing on either side of a comparison.
pub const MISSING_SETTING_PENALTY: f64 = 1000.0;

/// Exposure (seconds) at or below which a master dark is stored as the bias.
pub const DEFAULT_MIN_EXPOSURE: f64 = 0.001;

/// Dark exposures are keyed at this resolution (seconds).
pub const EXPOSURE_KEY_RESOLUTION: f64 = 0.001;

/// Timestamp format used in master and capture filenames.
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Extra time allowed on top of the exposure for readout and download.
pub const DEFAULT_READOUT_GRACE: Duration = Duration::from_secs(30);

/// Poll interval while waiting for a camera image.
pub const DEFAULT_IMAGE_READY_POLL: Duration = Duration::from_millis(100);

/// Lower bound on a scheduler wait so a late cycle does not spin.
pub const MIN_SCHEDULER_WAIT: Duration = Duration::from_millis(50);

/// How long `stop()` waits for the worker thread to finish.
pub const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Confidence reported for a PlateSolve2 result marked valid.
pub const PLATESOLVE2_CONFIDENCE: f64 = 0.99;

/// Extension of the PlateSolve2 sidecar result file.
pub const PLATESOLVE2_SIDECAR_EXT: &str = "apm";

/// Arcseconds per degree.
pub const ARCSEC_PER_DEGREE: f64 = 3600.0;

/// FITS logical record length.
pub const FITS_BLOCK_SIZE: usize = 2880;

/// FITS header card length.
pub const FITS_CARD_SIZE: usize = 80;
