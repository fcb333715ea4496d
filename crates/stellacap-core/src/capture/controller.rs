use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::color::debayer::debayer;
use crate::config::CaptureConfig;
use crate::error::{Result, StellacapError};
use crate::frame::{AcquisitionSettings, Frame, FrameMetadata, ImageData};

use super::device::SharedCamera;

/// Takes single exposures from a shared camera.
pub struct CaptureController {
    camera: SharedCamera,
    readout_grace: Duration,
    poll: Duration,
    focal_length_mm: Option<f64>,
    next_capture_id: u64,
}

impl CaptureController {
    pub fn new(camera: SharedCamera, config: &CaptureConfig) -> Self {
        Self {
            camera,
            readout_grace: config.readout_grace(),
            poll: config.image_ready_poll(),
            focal_length_mm: None,
            next_capture_id: 1,
        }
    }

    pub fn with_focal_length(mut self, focal_length_mm: f64) -> Self {
        self.focal_length_mm = Some(focal_length_mm);
        self
    }

    pub fn camera(&self) -> &SharedCamera {
        &self.camera
    }

    /// Expose once and read the image. Blocks for the exposure plus readout.
    /// Colour sensors are debayered; the mosaic is kept as the raw variant.
    pub fn capture(&mut self, settings: &AcquisitionSettings) -> Result<Frame> {
        let mut camera = self
            .camera
            .lock()
            .map_err(|_| StellacapError::Pipeline("camera lock poisoned".into()))?;
        let caps = camera.capabilities().clone();

        let applied = camera.apply_settings(settings)?;
        let exposure = Duration::from_secs_f64(settings.exposure_time.max(0.0));
        let capture_id = self.next_capture_id;
        self.next_capture_id += 1;

        debug!(capture_id, exposure = settings.exposure_time, "Starting exposure");
        let started = Utc::now();
        camera.start_exposure(exposure, true)?;
        camera.wait_for_image_ready(exposure + self.readout_grace, self.poll)?;
        let raw = camera.get_image_array()?;
        let finished = Utc::now();
        let ccd_temperature = camera.ccd_temperature();
        drop(camera);

        let metadata = FrameMetadata {
            capture_id: Some(capture_id),
            capture_started_at: Some(started),
            capture_finished_at: Some(finished),
            ccd_temperature,
            pixel_size_um: caps.pixel_size_um,
            focal_length_mm: self.focal_length_mm,
            ..FrameMetadata::light(AcquisitionSettings {
                exposure_time: settings.exposure_time,
                ..applied
            })
        };

        let frame = match (caps.is_color, caps.bayer) {
            (true, Some(pattern)) => {
                Frame::new(ImageData::Planes(debayer(&raw, pattern)), metadata).with_raw(raw)
            }
            _ => Frame::mono(raw, metadata),
        };
        info!(
            capture_id,
            exposure = settings.exposure_time,
            width = frame.width(),
            height = frame.height(),
            color = frame.data.is_color(),
            "Frame captured"
        );
        Ok(frame)
    }
}
