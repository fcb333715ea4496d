use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{info, warn};

use crate::config::MasterConfig;
use crate::error::{Result, StellacapError};
use crate::frame::{FrameType, ImageData};
use crate::io::fits::{read_fits_header, write_fits, FitsHeader};
use crate::io::header::{
    KEY_DATE, KEY_EXPOSURE, KEY_GAIN, KEY_IMAGE_TYPE, KEY_NCOMBINE, KEY_NORM_FACTOR,
    KEY_NORM_METHOD, KEY_OFFSET, KEY_READOUT, KEY_REJECT, KEY_SIGMA, KEY_XBINNING, KEY_YBINNING,
};
use crate::io::naming::{
    master_bias_name, master_dark_name, master_flat_name, parse_exposure, timestamp,
};
use crate::progress::{ProgressReporter, ProgressStage};
use crate::stack::normalize::normalize;
use crate::stack::{
    combine_source, CombineParams, Combined, DarkSubtractedSource, FitsFrameSource,
    RejectionMethod,
};
use crate::status::Status;

use super::store::{ExposureKey, ReferenceStore, SettingTags};

/// One master written to disk.
#[derive(Clone, Debug)]
pub struct MasterFile {
    pub path: PathBuf,
    pub frame_type: FrameType,
    pub exposure_time: f64,
    pub frames_used: usize,
    pub skipped: usize,
}

#[derive(Clone, Debug, Default)]
pub struct MasterSummary {
    pub bias: Option<MasterFile>,
    pub darks: Vec<MasterFile>,
    pub flat: Option<MasterFile>,
    /// One message per batch that could not be combined.
    pub failures: Vec<String>,
}

impl MasterSummary {
    pub fn written(&self) -> usize {
        self.darks.len() + self.bias.is_some() as usize + self.flat.is_some() as usize
    }
}

/// Builds master bias, darks and flat from raw calibration batches.
///
/// Darks are read from `exp_<seconds>s/` subdirectories of `dark_dir`; the
/// batch at `min_exposure` becomes the bias. The flat batch in `flat_dir` is
/// dark-subtracted on the fly with the nearest master dark, then normalized.
pub struct MasterFrameBuilder {
    config: MasterConfig,
}

impl MasterFrameBuilder {
    pub fn new(config: MasterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    fn params(&self) -> CombineParams {
        CombineParams {
            method: self.config.rejection,
            sigma: self.config.sigma_threshold,
            zero_inclusion: self.config.zero_inclusion,
        }
    }

    /// `exp_<x>s` subdirectories of the dark directory with their exposure,
    /// sorted by exposure.
    pub fn find_exposure_dirs(&self) -> Result<Vec<(f64, PathBuf)>> {
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(&self.config.dark_dir)? {
            let path = entry?.path();
            let is_exp_dir = path.is_dir()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("exp_"));
            if !is_exp_dir {
                continue;
            }
            match parse_exposure(&path) {
                Some(exposure) => dirs.push((exposure, path)),
                None => warn!(dir = %path.display(), "Could not read exposure from directory name"),
            }
        }
        dirs.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(dirs)
    }

    /// Build every master: darks (and bias) first, then the flat.
    pub fn build_all(&self, reporter: &dyn ProgressReporter) -> Status<MasterSummary> {
        info!(
            dark_dir = %self.config.dark_dir.display(),
            flat_dir = %self.config.flat_dir.display(),
            method = %self.config.rejection,
            "Starting master frame creation"
        );
        let ts = timestamp(Local::now());
        let mut summary = MasterSummary::default();

        if let Err(e) = self.build_darks(&ts, &mut summary, reporter) {
            return Status::error(format!("Failed to create master darks: {e}"));
        }
        if summary.darks.is_empty() && summary.bias.is_none() {
            return Status::error("No master darks could be created")
                .with_detail("failures", summary.failures.join("; "));
        }

        let flat_outcome = if self.config.flat_dir.is_dir() {
            self.build_flat(&ts, reporter)
        } else {
            Err(StellacapError::Config(format!(
                "flat directory not found: {}",
                self.config.flat_dir.display()
            )))
        };
        match flat_outcome {
            Ok(flat) => summary.flat = Some(flat),
            Err(e) => {
                warn!(error = %e, "Master flat not created");
                summary.failures.push(format!("flat: {e}"));
            }
        }

        let written = summary.written();
        let failures = summary.failures.len();
        let status = if failures == 0 {
            Status::success("All master frames created", summary)
        } else {
            Status::warning(
                format!("{written} master frames created, {failures} failed"),
                Some(summary),
            )
        };
        status
            .with_detail("created_count", written)
            .with_detail("failed_count", failures)
            .with_detail("output_directory", self.config.output_dir.display())
    }

    /// Build one master dark per exposure directory. A batch that fails is
    /// recorded in `summary.failures` and the rest continue.
    pub fn build_darks(
        &self,
        ts: &str,
        summary: &mut MasterSummary,
        reporter: &dyn ProgressReporter,
    ) -> Result<()> {
        let dirs = self.find_exposure_dirs()?;
        if dirs.is_empty() {
            return Err(StellacapError::Config(format!(
                "no exp_<seconds>s directories in {}",
                self.config.dark_dir.display()
            )));
        }
        info!(count = dirs.len(), "Found dark exposure directories");

        let bias_key = ExposureKey::from_secs(self.config.min_exposure);
        for (exposure, dir) in dirs {
            let is_bias = ExposureKey::from_secs(exposure) == bias_key;
            let stage = if is_bias {
                ProgressStage::MasterBias
            } else {
                ProgressStage::MasterDark(exposure)
            };
            match self.build_dark(&dir, exposure, is_bias, ts, stage, reporter) {
                Ok(master) if is_bias => summary.bias = Some(master),
                Ok(master) => summary.darks.push(master),
                Err(e) => {
                    warn!(exposure, error = %e, "Failed to create master dark");
                    summary.failures.push(format!("dark {exposure:.3}s: {e}"));
                }
            }
        }
        Ok(())
    }

    fn build_dark(
        &self,
        dir: &Path,
        exposure: f64,
        is_bias: bool,
        ts: &str,
        stage: ProgressStage,
        reporter: &dyn ProgressReporter,
    ) -> Result<MasterFile> {
        let files = fits_files(dir)?;
        info!(exposure, files = files.len(), "Combining dark frames");
        let tags = first_tags(&files);

        reporter.begin_stage(stage, None);
        let source = FitsFrameSource::new(files);
        let combined = combine_source(&source, &self.params(), reporter);
        reporter.finish_stage();
        let combined = combined?;

        let (frame_type, name) = if is_bias {
            (FrameType::MasterBias, master_bias_name(ts))
        } else {
            (FrameType::MasterDark, master_dark_name(exposure, ts))
        };
        let mut header = self.master_header(frame_type, exposure, &tags, &combined);
        header.set(KEY_DATE, ts);
        self.write_master(&name, combined, frame_type, exposure, header, reporter)
    }

    /// Build the master flat, subtracting the exposure-nearest master dark
    /// found in the output directory.
    pub fn build_flat(&self, ts: &str, reporter: &dyn ProgressReporter) -> Result<MasterFile> {
        let files = fits_files(&self.config.flat_dir)?;
        let exposure = files
            .first()
            .and_then(|f| {
                read_fits_header(f)
                    .ok()
                    .and_then(|h| h.get_f64(KEY_EXPOSURE))
                    .or_else(|| parse_exposure(f))
            })
            .ok_or_else(|| {
                StellacapError::Calibration("could not determine flat exposure time".into())
            })?;

        let store = ReferenceStore::load(&self.config.output_dir)?;
        let dark = store.nearest_dark(exposure).ok_or_else(|| {
            StellacapError::Calibration(format!("no master dark for {exposure:.3}s flats"))
        })?;
        info!(
            exposure,
            files = files.len(),
            dark = %dark.source_file.display(),
            "Combining dark-subtracted flat frames"
        );
        let tags = first_tags(&files);

        reporter.begin_stage(ProgressStage::MasterFlat(exposure), None);
        let source = DarkSubtractedSource::new(FitsFrameSource::new(files), dark.data.clone());
        let combined = combine_source(&source, &self.params(), reporter);
        reporter.finish_stage();
        let mut combined = combined?;

        let factor = normalize(&mut combined.data, self.config.normalization);
        if factor <= 0.0 {
            warn!(factor, "Flat normalization factor not positive; left unnormalized");
        }
        info!(method = %self.config.normalization, factor, "Normalized master flat");

        let mut header = self.master_header(FrameType::MasterFlat, exposure, &tags, &combined);
        header.set(KEY_NORM_METHOD, self.config.normalization.to_string());
        header.set(KEY_NORM_FACTOR, factor);
        header.set("DARKFILE", file_name(&dark.source_file));
        header.set(KEY_DATE, ts);
        self.write_master(
            &master_flat_name(exposure, ts),
            combined,
            FrameType::MasterFlat,
            exposure,
            header,
            reporter,
        )
    }

    fn master_header(
        &self,
        frame_type: FrameType,
        exposure: f64,
        tags: &SettingTags,
        combined: &Combined,
    ) -> FitsHeader {
        let mut h = FitsHeader::new();
        h.set(KEY_IMAGE_TYPE, frame_type.fits_name());
        h.set(KEY_EXPOSURE, exposure);
        h.set(KEY_NCOMBINE, combined.frames_used);
        h.set(KEY_REJECT, self.config.rejection.to_string());
        if self.config.rejection == RejectionMethod::SigmaClip {
            h.set(KEY_SIGMA, self.config.sigma_threshold);
        }
        h.set_opt(KEY_GAIN, tags.gain);
        h.set_opt(KEY_OFFSET, tags.offset);
        h.set_opt(KEY_READOUT, tags.readout_mode);
        h.set_opt(KEY_XBINNING, tags.binning);
        h.set_opt(KEY_YBINNING, tags.binning);
        h
    }

    fn write_master(
        &self,
        name: &str,
        combined: Combined,
        frame_type: FrameType,
        exposure: f64,
        header: FitsHeader,
        reporter: &dyn ProgressReporter,
    ) -> Result<MasterFile> {
        std::fs::create_dir_all(&self.config.output_dir)?;
        let path = self.config.output_dir.join(name);
        reporter.begin_stage(ProgressStage::Writing, None);
        let written = write_fits(&path, &ImageData::Mono(combined.data), &header);
        reporter.finish_stage();
        written?;
        info!(path = %path.display(), frames = combined.frames_used, "Master frame saved");
        Ok(MasterFile {
            path,
            frame_type,
            exposure_time: exposure,
            frames_used: combined.frames_used,
            skipped: combined.skipped,
        })
    }
}

/// FITS files directly inside `dir`, sorted.
pub fn fits_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    let mut files = Vec::new();
    for ext in ["fits", "fit", "FITS", "FIT"] {
        let pattern = format!("{escaped}/*.{ext}");
        let paths = glob::glob(&pattern)
            .map_err(|e| StellacapError::Config(format!("bad pattern {pattern}: {e}")))?;
        files.extend(paths.filter_map(|p| p.ok()));
    }
    files.sort();
    files.dedup();
    if files.is_empty() {
        return Err(StellacapError::EmptySequence);
    }
    Ok(files)
}

/// Setting tags of the first file whose header can be read.
fn first_tags(files: &[PathBuf]) -> SettingTags {
    files
        .iter()
        .find_map(|f| read_fits_header(f).ok())
        .map(|h| SettingTags::from_header(&h))
        .unwrap_or_default()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

