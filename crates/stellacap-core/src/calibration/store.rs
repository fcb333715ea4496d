use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::consts::EXPOSURE_KEY_RESOLUTION;
use crate::error::{Result, StellacapError};
use crate::frame::{AcquisitionSettings, ImageData};
use crate::io::fits::{read_fits, FitsHeader};
use crate::io::header::settings_from_header;
use crate::io::naming::{parse_exposure, MasterKind};

/// Sensor settings a reference frame was taken with.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SettingTags {
    pub gain: Option<f64>,
    pub offset: Option<i32>,
    pub readout_mode: Option<i32>,
    pub binning: Option<u32>,
}

impl SettingTags {
    pub fn from_settings(s: &AcquisitionSettings) -> Self {
        Self {
            gain: s.gain,
            offset: s.offset,
            readout_mode: s.readout_mode,
            binning: s.binning,
        }
    }

    pub fn from_header(h: &FitsHeader) -> Self {
        Self::from_settings(&settings_from_header(h))
    }
}

/// One loaded master frame.
#[derive(Clone, Debug)]
pub struct ReferenceEntry {
    pub data: Array2<f32>,
    pub source_file: PathBuf,
    /// Seconds; always set for darks.
    pub exposure_time: Option<f64>,
    pub tags: SettingTags,
}

impl ReferenceEntry {
    /// Load a master from disk. Tags come from the header, the exposure from
    /// `EXPTIME` or else the filename.
    pub fn load(path: &Path) -> Result<Self> {
        let image = read_fits(path)?;
        let data = match image.data {
            ImageData::Mono(data) => data,
            ImageData::Planes(_) => {
                return Err(StellacapError::Calibration(format!(
                    "{}: master frames must be single-plane",
                    path.display()
                )))
            }
        };
        let exposure_time = image
            .header
            .get_f64("EXPTIME")
            .or_else(|| parse_exposure(path));
        Ok(Self {
            data,
            source_file: path.to_path_buf(),
            exposure_time,
            tags: SettingTags::from_header(&image.header),
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn info(&self) -> ReferenceInfo {
        ReferenceInfo {
            file: self.source_file.clone(),
            exposure_time: self.exposure_time,
            shape: self.shape(),
            tags: self.tags.clone(),
        }
    }
}

/// Dark exposure rounded to whole milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExposureKey(i64);

impl ExposureKey {
    pub fn from_secs(seconds: f64) -> Self {
        Self((seconds * Self::per_second()).round() as i64)
    }

    pub fn secs(self) -> f64 {
        self.0 as f64 / Self::per_second()
    }

    fn per_second() -> f64 {
        (1.0 / EXPOSURE_KEY_RESOLUTION).round()
    }
}

/// Loaded masters: at most one bias, one flat and one dark per exposure.
///
/// Read-only while frames are calibrated; a reload builds a fresh store.
#[derive(Clone, Debug, Default)]
pub struct ReferenceStore {
    pub bias: Option<ReferenceEntry>,
    pub darks: BTreeMap<ExposureKey, ReferenceEntry>,
    pub flat: Option<ReferenceEntry>,
}

impl ReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `dir` for `master_{bias,dark,flat}_*.fits`. Unreadable files are
    /// skipped. Where two files compete for one slot the later file name
    /// (newer timestamp) wins.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut store = Self::new();
        if !dir.is_dir() {
            warn!(dir = %dir.display(), "Master frame directory not found");
            return Ok(store);
        }

        let pattern = format!(
            "{}/master_*.fit*",
            glob::Pattern::escape(&dir.to_string_lossy())
        );
        let mut paths: Vec<PathBuf> = glob::glob(&pattern)
            .map_err(|e| StellacapError::Config(format!("bad master directory pattern: {e}")))?
            .filter_map(|entry| entry.ok())
            .collect();
        paths.sort();

        for path in paths {
            let Some(kind) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(MasterKind::from_file_name)
            else {
                continue;
            };
            let entry = match ReferenceEntry::load(&path) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Skipping unreadable master frame");
                    continue;
                }
            };
            match kind {
                MasterKind::Bias => replace_slot(&mut store.bias, entry, "bias"),
                MasterKind::Flat => replace_slot(&mut store.flat, entry, "flat"),
                MasterKind::Dark => {
                    if let Err(e) = store.insert_dark(entry) {
                        warn!(file = %path.display(), error = %e, "Skipping master dark");
                    }
                }
            }
        }

        info!(
            dir = %dir.display(),
            darks = store.darks.len(),
            flat = store.flat.is_some(),
            bias = store.bias.is_some(),
            "Loaded master frames"
        );
        Ok(store)
    }

    /// Insert a dark keyed by its rounded exposure, replacing any dark
    /// already at that key.
    pub fn insert_dark(&mut self, entry: ReferenceEntry) -> Result<()> {
        let exposure = entry.exposure_time.ok_or_else(|| {
            StellacapError::Calibration(format!(
                "{}: master dark has no exposure time",
                entry.source_file.display()
            ))
        })?;
        let key = ExposureKey::from_secs(exposure);
        if let Some(old) = self.darks.insert(key, entry) {
            warn!(
                exposure = key.secs(),
                replaced = %old.source_file.display(),
                "Duplicate master dark exposure; keeping the newer file"
            );
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.bias.is_none() && self.darks.is_empty() && self.flat.is_none()
    }

    pub fn dark_exposures(&self) -> Vec<f64> {
        self.darks.keys().map(|k| k.secs()).collect()
    }

    /// Dark with the exposure closest to `exposure`; ties go to the shorter.
    pub fn nearest_dark(&self, exposure: f64) -> Option<&ReferenceEntry> {
        let mut best: Option<(f64, &ReferenceEntry)> = None;
        for (key, entry) in &self.darks {
            let diff = (key.secs() - exposure).abs();
            match best {
                Some((d, _)) if diff >= d => {}
                _ => best = Some((diff, entry)),
            }
        }
        best.map(|(_, entry)| entry)
    }

    pub fn summary(&self) -> StoreSummary {
        StoreSummary {
            bias: self.bias.as_ref().map(ReferenceEntry::info),
            darks: self.darks.values().map(ReferenceEntry::info).collect(),
            flat: self.flat.as_ref().map(ReferenceEntry::info),
        }
    }
}

fn replace_slot(slot: &mut Option<ReferenceEntry>, entry: ReferenceEntry, kind: &str) {
    if let Some(old) = slot.replace(entry) {
        debug!(kind, replaced = %old.source_file.display(), "Newer master frame replaces older");
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ReferenceInfo {
    pub file: PathBuf,
    pub exposure_time: Option<f64>,
    pub shape: (usize, usize),
    pub tags: SettingTags,
}

/// Description of what a store holds, for status reports.
#[derive(Clone, Debug, Default, Serialize)]
pub struct StoreSummary {
    pub bias: Option<ReferenceInfo>,
    pub darks: Vec<ReferenceInfo>,
    pub flat: Option<ReferenceInfo>,
}
