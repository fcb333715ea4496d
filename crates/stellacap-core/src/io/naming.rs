//! File naming for reference frames and captures.

use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, Local};
use regex::Regex;

use crate::consts::FILE_TIMESTAMP_FORMAT;
use crate::frame::AcquisitionSettings;

/// Kind of reference frame, recognised from its filename prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MasterKind {
    Bias,
    Dark,
    Flat,
}

impl MasterKind {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Bias => "master_bias_",
            Self::Dark => "master_dark_",
            Self::Flat => "master_flat_",
        }
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        [Self::Bias, Self::Dark, Self::Flat]
            .into_iter()
            .find(|k| name.starts_with(k.prefix()))
    }
}

pub fn timestamp(now: DateTime<Local>) -> String {
    now.format(FILE_TIMESTAMP_FORMAT).to_string()
}

fn fmt_exposure(seconds: f64) -> String {
    format!("{seconds:.3}s")
}

pub fn master_bias_name(ts: &str) -> String {
    format!("master_bias_{ts}.fits")
}

pub fn master_dark_name(exposure: f64, ts: &str) -> String {
    format!("master_dark_{}_{ts}.fits", fmt_exposure(exposure))
}

pub fn master_flat_name(exposure: f64, ts: &str) -> String {
    format!("master_flat_{}_{ts}.fits", fmt_exposure(exposure))
}

/// Directory name holding raw darks of one exposure, e.g. `exp_2.000s`.
pub fn exposure_dir_name(exposure: f64) -> String {
    format!("exp_{}", fmt_exposure(exposure))
}

/// Base name (no extension) of a live capture:
/// `capture[_<ts>]_<exp>s_g<gain>_o<offset>_r<readout>_b<bin>_<id:04>`.
pub fn capture_basename(
    settings: &AcquisitionSettings,
    ts: Option<&str>,
    capture_id: Option<u64>,
) -> String {
    fn opt<T: std::fmt::Display>(v: Option<T>) -> String {
        v.map(|v| v.to_string()).unwrap_or_else(|| "none".into())
    }
    let mut parts = vec!["capture".to_string()];
    if let Some(ts) = ts {
        parts.push(ts.to_string());
    }
    parts.push(fmt_exposure(settings.exposure_time));
    parts.push(format!("g{}", opt(settings.gain.map(|g| g.round() as i64))));
    parts.push(format!("o{}", opt(settings.offset)));
    parts.push(format!("r{}", opt(settings.readout_mode)));
    parts.push(format!("b{}", opt(settings.binning)));
    if let Some(id) = capture_id {
        parts.push(format!("{id:04}"));
    }
    parts.join("_")
}

fn exposure_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"exp_(\d+\.?\d*)s").expect("valid regex"),
            Regex::new(r"_(\d+\.?\d*)s_").expect("valid regex"),
        ]
    })
}

/// Exposure in seconds encoded in a path, e.g. `exp_2.000s/` or
/// `master_dark_2.000s_<ts>.fits`.
pub fn parse_exposure(path: &Path) -> Option<f64> {
    let text = path.to_string_lossy();
    exposure_patterns()
        .iter()
        .find_map(|re| re.captures(&text))
        .and_then(|c| c[1].parse().ok())
}
