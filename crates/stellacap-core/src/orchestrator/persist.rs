use std::path::{Path, PathBuf};

use chrono::{Local, Utc};
use tracing::{debug, info, warn};

use crate::config::CaptureConfig;
use crate::error::Result;
use crate::frame::{CalibrationFlags, Frame, ImageData};
use crate::io::fits::write_fits;
use crate::io::header::header_from_metadata;
use crate::io::image_io::save_display;
use crate::io::naming::{capture_basename, timestamp};

use super::types::SavedFrame;

/// Writes each capture as a display image, an archival FITS and, for colour
/// cameras, the raw mosaic.
pub struct FramePersister {
    config: CaptureConfig,
}

impl FramePersister {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    pub fn basename(&self, frame: &Frame) -> String {
        let ts = self.config.use_timestamps.then(|| {
            let when = frame.metadata.capture_started_at.unwrap_or_else(Utc::now);
            timestamp(when.with_timezone(&Local))
        });
        capture_basename(frame.settings(), ts.as_deref(), frame.metadata.capture_id)
    }

    /// Save what is configured. A write that fails is logged and leaves its
    /// path unset; it never fails the cycle.
    pub fn save(&self, frame: &Frame) -> SavedFrame {
        let base = self.basename(frame);
        let out = &self.config.output_dir;
        let mut saved = SavedFrame::default();

        if self.config.save_frames {
            let path = out.join(format!("{base}.{}", self.config.display_format));
            saved.display = attempt("display", &path, || {
                ensure_parent(&path)?;
                save_display(frame, &path)
            });
        }

        let path = out.join(format!("{base}.fits"));
        saved.archive = attempt("archive", &path, || {
            ensure_parent(&path)?;
            write_fits(&path, &frame.data, &header_from_metadata(&frame.metadata))
        });

        if let Some(raw) = frame.raw.as_ref().filter(|_| self.config.save_raw) {
            let path = self.config.raw_dir.join(format!("{base}_raw.fits"));
            let mut meta = frame.metadata.clone();
            meta.calibration = CalibrationFlags::default();
            saved.raw = attempt("raw", &path, || {
                ensure_parent(&path)?;
                write_fits(&path, &ImageData::Mono(raw.clone()), &header_from_metadata(&meta))
            });
        }

        info!(
            display = ?saved.display,
            archive = ?saved.archive,
            raw = ?saved.raw,
            "Frame saved"
        );
        saved
    }

    /// Delete every file of a saved frame. Returns how many were removed.
    pub fn discard(&self, saved: &SavedFrame) -> usize {
        let mut removed = 0;
        for path in saved.paths() {
            match std::fs::remove_file(path) {
                Ok(()) => {
                    debug!(path = %path.display(), "Removed");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Could not remove discarded frame"),
            }
        }
        removed
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn attempt(kind: &str, path: &Path, write: impl FnOnce() -> Result<()>) -> Option<PathBuf> {
    match write() {
        Ok(()) => Some(path.to_path_buf()),
        Err(e) => {
            warn!(kind, path = %path.display(), error = %e, "Failed to save frame");
            None
        }
    }
}
