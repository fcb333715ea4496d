//! Mapping between frame metadata and FITS header cards.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::frame::{AcquisitionSettings, CalibrationFlags, FrameMetadata, FrameType};
use crate::io::fits::FitsHeader;

pub const KEY_IMAGE_TYPE: &str = "IMAGETYP";
pub const KEY_EXPOSURE: &str = "EXPTIME";
pub const KEY_GAIN: &str = "GAIN";
pub const KEY_OFFSET: &str = "OFFSET";
pub const KEY_READOUT: &str = "READOUT";
pub const KEY_XBINNING: &str = "XBINNING";
pub const KEY_YBINNING: &str = "YBINNING";
pub const KEY_PIXEL_SIZE: &str = "XPIXSZ";
pub const KEY_FOCAL_LENGTH: &str = "FOCALLEN";
pub const KEY_CCD_TEMP: &str = "CCD-TEMP";
pub const KEY_DARK_APPLIED: &str = "DARKCOR";
pub const KEY_FLAT_APPLIED: &str = "FLATCOR";
pub const KEY_CALIBRATION_STATUS: &str = "CALSTAT";
pub const KEY_MASTER_DARK: &str = "MSTDARK";
pub const KEY_MASTER_FLAT: &str = "MSTFLAT";
pub const KEY_CAPTURE_ID: &str = "CAPTURE";
pub const KEY_CAPTURE_START: &str = "CAPSTRT";
pub const KEY_CAPTURE_END: &str = "CAPEND";
pub const KEY_DATE_OBS: &str = "DATE-OBS";
pub const KEY_DATE: &str = "DATE";
pub const KEY_NCOMBINE: &str = "NCOMBINE";
pub const KEY_REJECT: &str = "REJECT";
pub const KEY_SIGMA: &str = "SIGMA";
pub const KEY_NORM_METHOD: &str = "NORMMETH";
pub const KEY_NORM_FACTOR: &str = "NORMFAC";

/// Build the archival header for a frame. Settings the camera did not report
/// are left out rather than written as zero.
pub fn header_from_metadata(meta: &FrameMetadata) -> FitsHeader {
    let mut h = FitsHeader::new();
    let s = &meta.settings;

    h.set(KEY_IMAGE_TYPE, meta.frame_type.fits_name());
    h.set(KEY_EXPOSURE, s.exposure_time);
    h.set_opt(KEY_GAIN, s.gain);
    h.set_opt(KEY_OFFSET, s.offset);
    h.set_opt(KEY_READOUT, s.readout_mode);
    h.set_opt(KEY_XBINNING, s.binning);
    h.set_opt(KEY_YBINNING, s.binning);
    h.set_opt(KEY_PIXEL_SIZE, meta.pixel_size_um);
    h.set_opt(KEY_FOCAL_LENGTH, meta.focal_length_mm);
    h.set_opt(KEY_CCD_TEMP, meta.ccd_temperature);

    let cal = &meta.calibration;
    h.set(KEY_DARK_APPLIED, cal.dark_applied);
    h.set(KEY_FLAT_APPLIED, cal.flat_applied);
    h.set(KEY_CALIBRATION_STATUS, calibration_status(cal));
    h.set_opt(KEY_MASTER_DARK, cal.master_dark.as_deref().map(file_label));
    h.set_opt(KEY_MASTER_FLAT, cal.master_flat.as_deref().map(file_label));

    h.set_opt(KEY_CAPTURE_ID, meta.capture_id);
    if let Some(t) = meta.capture_started_at {
        h.set(KEY_DATE_OBS, iso(t));
        h.set(KEY_CAPTURE_START, iso(t));
    }
    h.set_opt(KEY_CAPTURE_END, meta.capture_finished_at.map(iso));
    h
}

/// Read acquisition settings back from a header.
pub fn settings_from_header(h: &FitsHeader) -> AcquisitionSettings {
    AcquisitionSettings {
        exposure_time: h
            .get_f64(KEY_EXPOSURE)
            .or_else(|| h.get_f64("EXPOSURE"))
            .unwrap_or(0.0),
        gain: h.get_f64(KEY_GAIN),
        offset: h.get_i64(KEY_OFFSET).map(|v| v as i32),
        readout_mode: h.get_i64(KEY_READOUT).map(|v| v as i32),
        binning: h.get_i64(KEY_XBINNING).map(|v| v as u32),
    }
}

pub fn metadata_from_header(h: &FitsHeader) -> FrameMetadata {
    FrameMetadata {
        frame_type: h
            .get_str(KEY_IMAGE_TYPE)
            .and_then(FrameType::from_fits_name)
            .unwrap_or_default(),
        settings: settings_from_header(h),
        capture_id: h.get_i64(KEY_CAPTURE_ID).map(|v| v as u64),
        capture_started_at: h.get_str(KEY_CAPTURE_START).and_then(parse_time),
        capture_finished_at: h.get_str(KEY_CAPTURE_END).and_then(parse_time),
        calibration: CalibrationFlags {
            dark_applied: h
                .get(KEY_DARK_APPLIED)
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            flat_applied: h
                .get(KEY_FLAT_APPLIED)
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            master_dark: h.get_str(KEY_MASTER_DARK).map(PathBuf::from),
            master_flat: h.get_str(KEY_MASTER_FLAT).map(PathBuf::from),
        },
        ccd_temperature: h.get_f64(KEY_CCD_TEMP),
        pixel_size_um: h.get_f64(KEY_PIXEL_SIZE),
        focal_length_mm: h.get_f64(KEY_FOCAL_LENGTH),
    }
}

/// "DARK,FLAT", "DARK", "FLAT" or "NONE".
pub fn calibration_status(cal: &CalibrationFlags) -> String {
    let mut parts = Vec::new();
    if cal.dark_applied {
        parts.push("DARK");
    }
    if cal.flat_applied {
        parts.push("FLAT");
    }
    if parts.is_empty() {
        "NONE".into()
    } else {
        parts.join(",")
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn iso(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
