use std::path::PathBuf;

use chrono::{DateTime, Utc};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Pixel payload of a frame, in sensor ADU.
#[derive(Clone, Debug, PartialEq)]
pub enum ImageData {
    /// Shape = (height, width).
    Mono(Array2<f32>),
    /// Shape = (planes, height, width), planes in R, G, B order.
    Planes(Array3<f32>),
}

impl ImageData {
    /// (height, width) of a single plane.
    pub fn dim(&self) -> (usize, usize) {
        match self {
            Self::Mono(a) => a.dim(),
            Self::Planes(a) => {
                let (_, h, w) = a.dim();
                (h, w)
            }
        }
    }

    pub fn plane_count(&self) -> usize {
        match self {
            Self::Mono(_) => 1,
            Self::Planes(a) => a.len_of(Axis(0)),
        }
    }

    pub fn is_color(&self) -> bool {
        matches!(self, Self::Planes(_))
    }

    pub fn planes(&self) -> Vec<ArrayView2<'_, f32>> {
        match self {
            Self::Mono(a) => vec![a.view()],
            Self::Planes(a) => a.axis_iter(Axis(0)).collect(),
        }
    }

    /// Apply `f` to every plane, producing new data of the same kind.
    pub fn map_planes(&self, mut f: impl FnMut(ArrayView2<'_, f32>) -> Array2<f32>) -> ImageData {
        match self {
            Self::Mono(a) => Self::Mono(f(a.view())),
            Self::Planes(a) => {
                let planes: Vec<Array2<f32>> = a.axis_iter(Axis(0)).map(&mut f).collect();
                Self::Planes(stack_planes(&planes))
            }
        }
    }

    /// Single-plane view used for display and solving. Colour data is
    /// reduced to its green plane.
    pub fn luminance_plane(&self) -> ArrayView2<'_, f32> {
        match self {
            Self::Mono(a) => a.view(),
            Self::Planes(a) => {
                let idx = if a.len_of(Axis(0)) >= 2 { 1 } else { 0 };
                a.index_axis(Axis(0), idx)
            }
        }
    }
}

/// Stack equally shaped planes into a (planes, h, w) array.
pub fn stack_planes(planes: &[Array2<f32>]) -> Array3<f32> {
    let (h, w) = planes.first().map(|p| p.dim()).unwrap_or((0, 0));
    let mut out = Array3::<f32>::zeros((planes.len(), h, w));
    for (i, plane) in planes.iter().enumerate() {
        out.index_axis_mut(Axis(0), i).assign(plane);
    }
    out
}

/// A captured or calibrated image with its acquisition record.
///
/// Frames are never mutated after capture; calibration builds a new one.
#[derive(Clone, Debug)]
pub struct Frame {
    pub data: ImageData,
    pub metadata: FrameMetadata,
    /// Undebayered sensor mosaic kept alongside colour data for archival.
    pub raw: Option<Array2<f32>>,
}

impl Frame {
    pub fn new(data: ImageData, metadata: FrameMetadata) -> Self {
        Self {
            data,
            metadata,
            raw: None,
        }
    }

    pub fn mono(data: Array2<f32>, metadata: FrameMetadata) -> Self {
        Self::new(ImageData::Mono(data), metadata)
    }

    pub fn with_raw(mut self, raw: Array2<f32>) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn width(&self) -> usize {
        self.data.dim().1
    }

    pub fn height(&self) -> usize {
        self.data.dim().0
    }

    /// (width, height) in pixels.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width(), self.height())
    }

    pub fn settings(&self) -> &AcquisitionSettings {
        &self.metadata.settings
    }
}

/// Sensor settings in effect for an exposure. Anything the camera did not
/// report is `None`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    /// Exposure duration in seconds.
    pub exposure_time: f64,
    pub gain: Option<f64>,
    pub offset: Option<i32>,
    pub readout_mode: Option<i32>,
    pub binning: Option<u32>,
}

impl AcquisitionSettings {
    pub fn with_exposure(exposure_time: f64) -> Self {
        Self {
            exposure_time,
            ..Default::default()
        }
    }
}

/// Kind of exposure, written to the `IMAGETYP` header card.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameType {
    #[default]
    Light,
    Dark,
    Flat,
    Bias,
    MasterDark,
    MasterFlat,
    MasterBias,
}

impl FrameType {
    pub fn fits_name(self) -> &'static str {
        match self {
            Self::Light => "Light Frame",
            Self::Dark => "Dark Frame",
            Self::Flat => "Flat Field",
            Self::Bias => "Bias Frame",
            Self::MasterDark => "Master Dark",
            Self::MasterFlat => "Master Flat",
            Self::MasterBias => "Master Bias",
        }
    }

    pub fn from_fits_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_lowercase();
        let master = lower.starts_with("master");
        let kind = if lower.contains("dark") {
            if master { Self::MasterDark } else { Self::Dark }
        } else if lower.contains("flat") {
            if master { Self::MasterFlat } else { Self::Flat }
        } else if lower.contains("bias") || lower.contains("offset") {
            if master { Self::MasterBias } else { Self::Bias }
        } else if lower.contains("light") || lower.contains("object") {
            Self::Light
        } else {
            return None;
        };
        Some(kind)
    }

    /// Light exposures open the shutter; everything else is a calibration
    /// exposure.
    pub fn is_light(self) -> bool {
        matches!(self, Self::Light | Self::Flat)
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.fits_name())
    }
}

/// What calibration actually did to a frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CalibrationFlags {
    pub dark_applied: bool,
    pub flat_applied: bool,
    pub master_dark: Option<PathBuf>,
    pub master_flat: Option<PathBuf>,
}

impl CalibrationFlags {
    pub fn applied(&self) -> bool {
        self.dark_applied || self.flat_applied
    }
}

#[derive(Clone, Debug, Default)]
pub struct FrameMetadata {
    pub frame_type: FrameType,
    pub settings: AcquisitionSettings,
    pub capture_id: Option<u64>,
    pub capture_started_at: Option<DateTime<Utc>>,
    pub capture_finished_at: Option<DateTime<Utc>>,
    pub calibration: CalibrationFlags,
    pub ccd_temperature: Option<f64>,
    pub pixel_size_um: Option<f64>,
    pub focal_length_mm: Option<f64>,
}

impl FrameMetadata {
    pub fn light(settings: AcquisitionSettings) -> Self {
        Self {
            frame_type: FrameType::Light,
            settings,
            ..Default::default()
        }
    }
}
