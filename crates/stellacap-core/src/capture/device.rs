use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use ndarray::Array2;
use serde::Serialize;

use crate::color::debayer::BayerPattern;
use crate::error::DeviceError;
use crate::frame::AcquisitionSettings;

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// What a camera can do, resolved once when it connects.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CameraCapabilities {
    pub name: String,
    pub can_set_temperature: bool,
    pub can_get_power: bool,
    pub is_color: bool,
    /// Mosaic layout of a colour sensor.
    pub bayer: Option<BayerPattern>,
    pub fast_readout: bool,
    pub width: usize,
    pub height: usize,
    pub pixel_size_um: Option<f64>,
}

/// Sensor cooling, present only on cameras that have a cooler.
pub trait TemperatureControl: Send {
    fn ccd_temperature(&mut self) -> DeviceResult<f64>;

    fn target_temperature(&mut self) -> DeviceResult<f64>;

    fn set_target_temperature(&mut self, celsius: f64) -> DeviceResult<()>;

    fn cooler_on(&mut self) -> DeviceResult<bool>;

    fn set_cooler_on(&mut self, on: bool) -> DeviceResult<()>;

    /// Cooler duty in percent.
    fn cooler_power(&mut self) -> DeviceResult<f64> {
        Err(DeviceError::Unsupported("cooler power".into()))
    }
}

/// A single-shot imaging camera.
pub trait Camera: Send {
    fn capabilities(&self) -> &CameraCapabilities;

    /// Apply exposure settings and return what the camera actually reports.
    /// Settings the camera does not have come back as `None`.
    fn apply_settings(&mut self, settings: &AcquisitionSettings) -> DeviceResult<AcquisitionSettings>;

    fn start_exposure(&mut self, duration: Duration, is_light: bool) -> DeviceResult<()>;

    fn image_ready(&mut self) -> DeviceResult<bool>;

    /// Fetch the last exposure as (height, width) ADU.
    fn get_image_array(&mut self) -> DeviceResult<Array2<f32>>;

    /// Block until the exposure is readable, polling `image_ready`.
    fn wait_for_image_ready(&mut self, timeout: Duration, poll: Duration) -> DeviceResult<()> {
        let start = Instant::now();
        loop {
            if self.image_ready()? {
                return Ok(());
            }
            let waited = start.elapsed();
            if waited >= timeout {
                return Err(DeviceError::Timeout {
                    what: "image ready".into(),
                    waited,
                });
            }
            thread::sleep(poll.min(timeout - waited));
        }
    }

    fn temperature_control(&mut self) -> Option<&mut dyn TemperatureControl> {
        None
    }

    fn ccd_temperature(&mut self) -> Option<f64> {
        self.temperature_control()
            .and_then(|t| t.ccd_temperature().ok())
    }

    fn disconnect(&mut self) -> DeviceResult<()> {
        Ok(())
    }
}

/// A motorised mount, queried for pointing safety.
pub trait Mount: Send {
    fn is_slewing(&mut self) -> DeviceResult<bool>;

    fn is_tracking(&mut self) -> DeviceResult<bool> {
        Err(DeviceError::Unsupported("tracking state".into()))
    }

    /// Current pointing as (RA, Dec) in degrees.
    fn coordinates(&mut self) -> DeviceResult<(f64, f64)>;

    fn disconnect(&mut self) -> DeviceResult<()> {
        Ok(())
    }
}

pub type SharedCamera = Arc<Mutex<Box<dyn Camera>>>;
pub type SharedMount = Arc<Mutex<Box<dyn Mount>>>;

pub fn share_camera(camera: impl Camera + 'static) -> SharedCamera {
    Arc::new(Mutex::new(Box::new(camera)))
}

pub fn share_mount(mount: impl Mount + 'static) -> SharedMount {
    Arc::new(Mutex::new(Box::new(mount)))
}
