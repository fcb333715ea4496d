use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayView2, Axis, Zip};
use tracing::{info, warn};

use crate::config::CalibrationConfig;
use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::Result;
use crate::frame::{AcquisitionSettings, CalibrationFlags, Frame, ImageData};
use crate::io::fits::read_fits;
use crate::io::header::metadata_from_header;
use crate::status::Status;

use super::matcher::{check_flat, select_dark, MatchPolicy};
use super::store::{ReferenceStore, StoreSummary};

/// What calibration did to one frame and why.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CalibrationDetails {
    pub enabled: bool,
    pub original_exposure_time: f64,
    pub dark_applied: bool,
    pub flat_applied: bool,
    pub master_dark: Option<PathBuf>,
    pub master_flat: Option<PathBuf>,
    pub dark_score: Option<f64>,
    /// The dark was chosen by the fallback policy, outside tolerance.
    pub dark_fallback: bool,
    pub dark_skip_reason: Option<String>,
    pub flat_skip_reason: Option<String>,
    /// The frame was transposed to put its long side horizontal.
    pub reoriented: bool,
    /// A reference was transposed to match the frame.
    pub reference_transposed: bool,
}

impl CalibrationDetails {
    pub fn applied(&self) -> bool {
        self.dark_applied || self.flat_applied
    }

    pub fn flags(&self) -> CalibrationFlags {
        CalibrationFlags {
            dark_applied: self.dark_applied,
            flat_applied: self.flat_applied,
            master_dark: self.master_dark.clone(),
            master_flat: self.master_flat.clone(),
        }
    }

    fn skip_both(&mut self, reason: &str) {
        self.dark_skip_reason = Some(reason.to_string());
        self.flat_skip_reason = Some(reason.to_string());
    }
}

/// A calibrated frame and its record.
#[derive(Clone, Debug)]
pub struct CalibrationOutcome {
    pub frame: Frame,
    pub details: CalibrationDetails,
}

impl CalibrationOutcome {
    /// `Success` when dark or flat was applied, `Warning` for a pass-through.
    pub fn status(&self) -> Status<CalibrationDetails> {
        let d = &self.details;
        let mut status = if !d.enabled {
            Status::warning("Calibration disabled", Some(d.clone()))
        } else if d.applied() {
            Status::success("Frame calibration completed", d.clone())
        } else {
            Status::warning("No calibration applied", Some(d.clone()))
        };

        status = status
            .with_detail("calibration_applied", d.applied())
            .with_detail("dark_subtraction_applied", d.dark_applied)
            .with_detail("flat_correction_applied", d.flat_applied)
            .with_detail("original_exposure_time", d.original_exposure_time)
            .with_detail("reoriented", d.reoriented);
        if let Some(p) = &d.master_dark {
            status = status.with_detail("master_dark_used", p.display());
        }
        if let Some(p) = &d.master_flat {
            status = status.with_detail("master_flat_used", p.display());
        }
        if d.dark_fallback {
            status = status.with_detail("dark_fallback", true);
        }
        if let Some(r) = &d.dark_skip_reason {
            status = status.with_detail("dark_skip_reason", r);
        }
        if let Some(r) = &d.flat_skip_reason {
            status = status.with_detail("flat_skip_reason", r);
        }
        status
    }
}

/// Applies master darks and flats to live frames.
///
/// Never fails: anything that prevents a step from applying is recorded as a
/// skip reason and the frame passes through.
pub struct CalibrationApplier {
    store: ReferenceStore,
    config: CalibrationConfig,
}

impl CalibrationApplier {
    pub fn new(store: ReferenceStore, config: CalibrationConfig) -> Self {
        Self { store, config }
    }

    /// Build from config, loading masters from `config.master_dir` when
    /// calibration is enabled.
    pub fn from_config(config: &CalibrationConfig) -> Result<Self> {
        let store = if config.enabled {
            ReferenceStore::load(&config.master_dir)?
        } else {
            ReferenceStore::new()
        };
        Ok(Self::new(store, config.clone()))
    }

    pub fn store(&self) -> &ReferenceStore {
        &self.store
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Swap in a freshly loaded store.
    pub fn replace_store(&mut self, store: ReferenceStore) {
        self.store = store;
    }

    /// Reload masters from `dir`. The current store is kept if loading fails.
    pub fn reload(&mut self, dir: &Path) -> Result<StoreSummary> {
        let store = ReferenceStore::load(dir)?;
        self.config.master_dir = dir.to_path_buf();
        self.replace_store(store);
        Ok(self.store.summary())
    }

    /// Overview of the loaded masters and settings.
    pub fn calibration_status(&self) -> Status<StoreSummary> {
        let exposures: Vec<String> = self
            .store
            .dark_exposures()
            .iter()
            .map(|e| format!("{e:.3}"))
            .collect();
        let message = if self.store.is_empty() {
            "No master frames loaded"
        } else {
            "Master frames loaded"
        };
        let status = if self.store.is_empty() && self.config.enabled {
            Status::warning(message, Some(self.store.summary()))
        } else {
            Status::success(message, self.store.summary())
        };
        status
            .with_detail("enable_calibration", self.config.enabled)
            .with_detail("calibration_tolerance", self.config.tolerance)
            .with_detail("dark_fallback", self.config.dark_fallback)
            .with_detail("master_directory", self.config.master_dir.display())
            .with_detail("master_darks_loaded", self.store.darks.len())
            .with_detail("master_flat_loaded", self.store.flat.is_some())
            .with_detail("available_exposure_times", exposures.join(","))
    }

    /// Calibrate a frame using its own exposure and settings. Steps its
    /// metadata marks as already applied are skipped.
    pub fn apply(&self, frame: &Frame) -> CalibrationOutcome {
        let settings = frame.settings();
        let prior = &frame.metadata.calibration;
        let (data, details) = self.calibrate(&frame.data, settings.exposure_time, settings, prior);
        let mut metadata = frame.metadata.clone();
        let mut flags = details.flags();
        if prior.dark_applied && !flags.dark_applied {
            flags.dark_applied = true;
            flags.master_dark = prior.master_dark.clone();
        }
        if prior.flat_applied && !flags.flat_applied {
            flags.flat_applied = true;
            flags.master_flat = prior.master_flat.clone();
        }
        metadata.calibration = flags;
        CalibrationOutcome {
            frame: Frame {
                data,
                metadata,
                raw: frame.raw.clone(),
            },
            details,
        }
    }

    /// Calibrate a FITS file from disk, taking settings from its header.
    pub fn apply_file(&self, path: &Path) -> Result<CalibrationOutcome> {
        let image = read_fits(path)?;
        let frame = Frame::new(image.data, metadata_from_header(&image.header));
        Ok(self.apply(&frame))
    }

    /// Calibrate raw pixel data. Returns the input unchanged (not even
    /// reoriented) when neither dark nor flat applies.
    pub fn apply_array(
        &self,
        data: &ImageData,
        exposure: f64,
        settings: &AcquisitionSettings,
    ) -> (ImageData, CalibrationDetails) {
        self.calibrate(data, exposure, settings, &CalibrationFlags::default())
    }

    fn calibrate(
        &self,
        data: &ImageData,
        exposure: f64,
        settings: &AcquisitionSettings,
        prior: &CalibrationFlags,
    ) -> (ImageData, CalibrationDetails) {
        let mut details = CalibrationDetails {
            enabled: self.config.enabled,
            original_exposure_time: exposure,
            ..Default::default()
        };

        if !self.config.enabled {
            details.skip_both("calibration disabled");
            return (data.clone(), details);
        }
        if self.store.darks.is_empty() && self.store.flat.is_none() {
            warn!("No master frames available for calibration");
            details.skip_both("no master frames");
            return (data.clone(), details);
        }
        if prior.dark_applied && prior.flat_applied {
            info!("Frame already calibrated");
            details.skip_both("already applied");
            return (data.clone(), details);
        }

        let (mut work, reoriented) = if self.config.enforce_long_side_horizontal {
            orient_long_side_horizontal(data)
        } else {
            (data.clone(), false)
        };
        let shape = work.dim();
        let policy = MatchPolicy::from(&self.config);

        if prior.dark_applied {
            details.dark_skip_reason = Some("dark already applied".into());
        } else {
            match select_dark(&self.store, exposure, settings, &policy) {
                Some(m) => match fit_reference(&m.entry.data, shape) {
                    Some((dark, transposed)) => {
                        work = work.map_planes(|plane| subtract(plane, dark));
                        details.dark_applied = true;
                        details.master_dark = Some(m.entry.source_file.clone());
                        details.dark_score = Some(m.score);
                        details.dark_fallback = m.fallback;
                        details.reference_transposed |= transposed;
                        if m.fallback {
                            warn!(
                                exposure,
                                dark = %m.entry.source_file.display(),
                                "No master dark within tolerance; using nearest exposure"
                            );
                        }
                    }
                    None => {
                        details.dark_skip_reason = Some(format!(
                            "shape mismatch: dark {:?}, frame {:?}",
                            m.entry.shape(),
                            shape
                        ));
                    }
                },
                None => {
                    details.dark_skip_reason = Some(if self.store.darks.is_empty() {
                        "no master darks loaded".to_string()
                    } else {
                        format!("no master dark within {:.3}s of {exposure:.3}s", policy.tolerance)
                    });
                }
            }
        }

        if prior.flat_applied {
            details.flat_skip_reason = Some("flat already applied".into());
        } else {
            match &self.store.flat {
                Some(flat) => match check_flat(flat, settings, policy.tolerance) {
                    Ok(()) => match fit_reference(&flat.data, shape) {
                        Some((flat_view, transposed)) => {
                            work = work.map_planes(|plane| divide(plane, flat_view));
                            details.flat_applied = true;
                            details.master_flat = Some(flat.source_file.clone());
                            details.reference_transposed |= transposed;
                        }
                        None => {
                            details.flat_skip_reason = Some(format!(
                                "shape mismatch: flat {:?}, frame {:?}",
                                flat.shape(),
                                shape
                            ));
                        }
                    },
                    Err(reason) => details.flat_skip_reason = Some(reason),
                },
                None => details.flat_skip_reason = Some("no master flat loaded".into()),
            }
        }

        if !details.applied() {
            warn!(
                dark = details.dark_skip_reason.as_deref().unwrap_or(""),
                flat = details.flat_skip_reason.as_deref().unwrap_or(""),
                "No calibration applied to frame"
            );
            return (data.clone(), details);
        }

        details.reoriented = reoriented;
        if details.dark_skip_reason.is_some() || details.flat_skip_reason.is_some() {
            warn!(
                dark = details.dark_applied,
                flat = details.flat_applied,
                "Frame partially calibrated"
            );
        } else {
            info!(dark = details.dark_applied, flat = details.flat_applied, "Frame calibrated");
        }
        (work, details)
    }
}

/// Transpose portrait data so the long side is horizontal.
pub fn orient_long_side_horizontal(data: &ImageData) -> (ImageData, bool) {
    let (h, w) = data.dim();
    if h <= w {
        return (data.clone(), false);
    }
    let rotated = match data {
        ImageData::Mono(a) => ImageData::Mono(a.t().to_owned()),
        ImageData::Planes(a) => {
            ImageData::Planes(a.view().permuted_axes([0, 2, 1]).as_standard_layout().into_owned())
        }
    };
    (rotated, true)
}

/// A view of `reference` with the frame's shape, transposing if that is
/// the only difference.
fn fit_reference(
    reference: &Array2<f32>,
    shape: (usize, usize),
) -> Option<(ArrayView2<'_, f32>, bool)> {
    if reference.dim() == shape {
        Some((reference.view(), false))
    } else if reference.t().dim() == shape {
        Some((reference.t(), true))
    } else {
        None
    }
}

fn subtract(plane: ArrayView2<'_, f32>, dark: ArrayView2<'_, f32>) -> Array2<f32> {
    let mut out = plane.to_owned();
    let zip = Zip::from(&mut out).and(&dark);
    if out_is_large(plane) {
        zip.par_for_each(|o, &d| *o -= d);
    } else {
        zip.for_each(|o, &d| *o -= d);
    }
    out
}

/// Divide by the flat, leaving pixels with a non-positive flat untouched.
fn divide(plane: ArrayView2<'_, f32>, flat: ArrayView2<'_, f32>) -> Array2<f32> {
    let guard = |o: &mut f32, &f: &f32| {
        if f > 0.0 {
            *o /= f;
        }
    };
    let mut out = plane.to_owned();
    let zip = Zip::from(&mut out).and(&flat);
    if out_is_large(plane) {
        zip.par_for_each(guard);
    } else {
        zip.for_each(guard);
    }
    out
}

fn out_is_large(plane: ArrayView2<'_, f32>) -> bool {
    plane.len_of(Axis(0)) * plane.len_of(Axis(1)) >= PARALLEL_PIXEL_THRESHOLD
}
