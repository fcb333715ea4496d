use serde::{Deserialize, Serialize};

use crate::config::CalibrationConfig;
use crate::consts::{EXPOSURE_SCORE_WEIGHT, MISSING_SETTING_PENALTY};
use crate::frame::AcquisitionSettings;

use super::store::{ReferenceEntry, ReferenceStore, SettingTags};

/// Float slack on tolerance comparisons, so 2.1 vs 2.0 at tolerance 0.1
/// still counts as within.
const TOLERANCE_SLACK: f64 = 1e-9;

/// What happens when no dark is within tolerance of the frame exposure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DarkFallbackPolicy {
    /// Use the dark with the closest exposure, however far off.
    #[default]
    NearestExposure,
    /// Skip dark subtraction.
    None,
}

impl std::fmt::Display for DarkFallbackPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NearestExposure => write!(f, "nearest_exposure"),
            Self::None => write!(f, "none"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatchPolicy {
    /// Absolute: seconds for exposure, native units for the other settings.
    pub tolerance: f64,
    pub dark_fallback: DarkFallbackPolicy,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self::from(&CalibrationConfig::default())
    }
}

impl From<&CalibrationConfig> for MatchPolicy {
    fn from(config: &CalibrationConfig) -> Self {
        Self {
            tolerance: config.tolerance,
            dark_fallback: config.dark_fallback,
        }
    }
}

/// Chosen dark and why.
#[derive(Clone, Copy, Debug)]
pub struct DarkMatch<'a> {
    pub entry: &'a ReferenceEntry,
    pub score: f64,
    /// Selected by the fallback policy rather than within tolerance.
    pub fallback: bool,
}

fn setting_diff<T: Into<f64>>(a: Option<T>, b: Option<T>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => (a.into() - b.into()).abs(),
        _ => MISSING_SETTING_PENALTY,
    }
}

/// Lower is better. Exposure dominates; a setting missing on either side
/// costs a fixed penalty.
pub fn dark_score(
    dark_exposure: f64,
    tags: &SettingTags,
    exposure: f64,
    settings: &AcquisitionSettings,
) -> f64 {
    EXPOSURE_SCORE_WEIGHT * (dark_exposure - exposure).abs()
        + setting_diff(tags.gain, settings.gain)
        + setting_diff(tags.offset, settings.offset)
        + setting_diff(tags.readout_mode, settings.readout_mode)
}

/// Pick the master dark for a frame.
///
/// Darks within tolerance of `exposure` compete on [`dark_score`]. If none is
/// within tolerance, `policy.dark_fallback` decides. Ties go to the shorter
/// exposure.
pub fn select_dark<'a>(
    store: &'a ReferenceStore,
    exposure: f64,
    settings: &AcquisitionSettings,
    policy: &MatchPolicy,
) -> Option<DarkMatch<'a>> {
    let mut best: Option<DarkMatch<'a>> = None;
    for (key, entry) in &store.darks {
        let dark_exposure = key.secs();
        if (dark_exposure - exposure).abs() > policy.tolerance + TOLERANCE_SLACK {
            continue;
        }
        let score = dark_score(dark_exposure, &entry.tags, exposure, settings);
        if best.map_or(true, |b| score < b.score) {
            best = Some(DarkMatch {
                entry,
                score,
                fallback: false,
            });
        }
    }
    if best.is_some() {
        return best;
    }

    match policy.dark_fallback {
        DarkFallbackPolicy::None => None,
        DarkFallbackPolicy::NearestExposure => store.nearest_dark(exposure).map(|entry| DarkMatch {
            entry,
            score: dark_score(
                entry.exposure_time.unwrap_or_default(),
                &entry.tags,
                exposure,
                settings,
            ),
            fallback: true,
        }),
    }
}

/// Whether the stored flat suits a frame: gain, offset and readout mode must
/// each be within tolerance. A setting missing on either side is a mismatch.
pub fn check_flat(
    flat: &ReferenceEntry,
    settings: &AcquisitionSettings,
    tolerance: f64,
) -> std::result::Result<(), String> {
    fn check<T: Into<f64> + Copy>(
        name: &str,
        flat: Option<T>,
        frame: Option<T>,
        tolerance: f64,
    ) -> std::result::Result<(), String> {
        match (flat, frame) {
            (None, _) => Err(format!("master flat has no {name} tag")),
            (_, None) => Err(format!("frame has no {name} setting")),
            (Some(f), Some(v)) => {
                let (f, v) = (f.into(), v.into());
                if (f - v).abs() <= tolerance + TOLERANCE_SLACK {
                    Ok(())
                } else {
                    Err(format!("{name} mismatch: flat {f}, frame {v}"))
                }
            }
        }
    }

    check("gain", flat.tags.gain, settings.gain, tolerance)?;
    check("offset", flat.tags.offset, settings.offset, tolerance)?;
    check("readout mode", flat.tags.readout_mode, settings.readout_mode, tolerance)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_setting_costs_penalty() {
        let tags = SettingTags {
            gain: Some(100.0),
            ..Default::default()
        };
        let settings = AcquisitionSettings {
            exposure_time: 1.0,
            gain: Some(100.0),
            ..Default::default()
        };
        let score = dark_score(1.0, &tags, 1.0, &settings);
        assert!((score - 2.0 * MISSING_SETTING_PENALTY).abs() < 1e-9);
    }

    #[test]
    fn test_exposure_weighted() {
        let tags = SettingTags {
            gain: Some(0.0),
            offset: Some(0),
            readout_mode: Some(0),
            binning: None,
        };
        let settings = AcquisitionSettings {
            exposure_time: 2.5,
            gain: Some(1.0),
            offset: Some(0),
            readout_mode: Some(0),
            binning: None,
        };
        let score = dark_score(2.0, &tags, 2.5, &settings);
        assert!((score - 6.0).abs() < 1e-9);
    }
}
