use std::collections::VecDeque;
use std::time::{Duration, Instant};

use ndarray::Array2;

use crate::color::debayer::BayerPattern;
use crate::error::DeviceError;
use crate::frame::AcquisitionSettings;

use super::device::{Camera, CameraCapabilities, DeviceResult, Mount, TemperatureControl};

/// Fraction of the remaining difference the simulated sensor closes per
/// temperature reading.
const COOLER_APPROACH: f64 = 0.5;

/// Thermal signal per second of exposure, in ADU.
const DARK_RATE: f32 = 2.0;

/// Sensor cooler that drifts toward its set-point (cooler on) or the
/// ambient temperature (cooler off) each time it is read.
#[derive(Clone, Debug)]
pub struct SimCooler {
    pub ambient: f64,
    pub temperature: f64,
    pub target: f64,
    pub on: bool,
}

impl SimCooler {
    pub fn new(ambient: f64) -> Self {
        Self {
            ambient,
            temperature: ambient,
            target: ambient,
            on: false,
        }
    }
}

impl TemperatureControl for SimCooler {
    fn ccd_temperature(&mut self) -> DeviceResult<f64> {
        let goal = if self.on { self.target } else { self.ambient };
        self.temperature += (goal - self.temperature) * COOLER_APPROACH;
        if (goal - self.temperature).abs() < 0.01 {
            self.temperature = goal;
        }
        Ok(self.temperature)
    }

    fn target_temperature(&mut self) -> DeviceResult<f64> {
        Ok(self.target)
    }

    fn set_target_temperature(&mut self, celsius: f64) -> DeviceResult<()> {
        self.target = celsius;
        Ok(())
    }

    fn cooler_on(&mut self) -> DeviceResult<bool> {
        Ok(self.on)
    }

    fn set_cooler_on(&mut self, on: bool) -> DeviceResult<()> {
        self.on = on;
        Ok(())
    }

    fn cooler_power(&mut self) -> DeviceResult<f64> {
        if !self.on {
            return Ok(0.0);
        }
        Ok(((self.ambient - self.temperature) * 3.0).clamp(0.0, 100.0))
    }
}

/// Deterministic camera: a pedestal, a horizontal gradient, a thermal term
/// proportional to exposure and a fixed grid of stars.
pub struct SimulatedCamera {
    caps: CameraCapabilities,
    settings: AcquisitionSettings,
    exposure: Option<(Instant, Duration)>,
    cooler: Option<SimCooler>,
    pedestal: f32,
    failures_left: u32,
    exposures_taken: u64,
}

impl SimulatedCamera {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            caps: CameraCapabilities {
                name: "Simulated camera".into(),
                width,
                height,
                pixel_size_um: Some(3.76),
                ..Default::default()
            },
            settings: AcquisitionSettings::default(),
            exposure: None,
            cooler: None,
            pedestal: 100.0,
            failures_left: 0,
            exposures_taken: 0,
        }
    }

    pub fn with_color(mut self, pattern: BayerPattern) -> Self {
        self.caps.is_color = true;
        self.caps.bayer = Some(pattern);
        self
    }

    pub fn with_cooler(mut self, ambient: f64) -> Self {
        self.cooler = Some(SimCooler::new(ambient));
        self.caps.can_set_temperature = true;
        self.caps.can_get_power = true;
        self
    }

    pub fn with_pedestal(mut self, pedestal: f32) -> Self {
        self.pedestal = pedestal;
        self
    }

    /// Make the next `n` image reads fail.
    pub fn with_failures(mut self, n: u32) -> Self {
        self.failures_left = n;
        self
    }

    pub fn exposures_taken(&self) -> u64 {
        self.exposures_taken
    }

    /// The image the camera would return for `exposure` seconds.
    pub fn render(&self, exposure: f64) -> Array2<f32> {
        let (h, w) = (self.caps.height, self.caps.width);
        let thermal = DARK_RATE * exposure as f32;
        let star_amp = 500.0 * exposure.max(0.01) as f32;
        let mut image = Array2::from_shape_fn((h, w), |(y, x)| {
            self.pedestal + thermal + 10.0 * x as f32 / w.max(1) as f32
        });
        let step = (w.min(h) / 4).max(4);
        for sy in (step / 2..h).step_by(step) {
            for sx in (step / 2..w).step_by(step) {
                for dy in -2i64..=2 {
                    for dx in -2i64..=2 {
                        let (y, x) = (sy as i64 + dy, sx as i64 + dx);
                        if y < 0 || x < 0 || y >= h as i64 || x >= w as i64 {
                            continue;
                        }
                        let r2 = (dx * dx + dy * dy) as f32;
                        image[[y as usize, x as usize]] += star_amp * (-r2 / 2.0).exp();
                    }
                }
            }
        }
        image
    }
}

impl Camera for SimulatedCamera {
    fn capabilities(&self) -> &CameraCapabilities {
        &self.caps
    }

    fn apply_settings(&mut self, settings: &AcquisitionSettings) -> DeviceResult<AcquisitionSettings> {
        self.settings = settings.clone();
        Ok(self.settings.clone())
    }

    fn start_exposure(&mut self, duration: Duration, _is_light: bool) -> DeviceResult<()> {
        self.exposure = Some((Instant::now(), duration));
        self.exposures_taken += 1;
        Ok(())
    }

    fn image_ready(&mut self) -> DeviceResult<bool> {
        match self.exposure {
            Some((started, duration)) => Ok(started.elapsed() >= duration),
            None => Err(DeviceError::Failed("no exposure started".into())),
        }
    }

    fn get_image_array(&mut self) -> DeviceResult<Array2<f32>> {
        let (_, duration) = self
            .exposure
            .take()
            .ok_or_else(|| DeviceError::Failed("no exposure started".into()))?;
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(DeviceError::Failed("simulated readout failure".into()));
        }
        Ok(self.render(duration.as_secs_f64()))
    }

    fn temperature_control(&mut self) -> Option<&mut dyn TemperatureControl> {
        self.cooler.as_mut().map(|c| c as &mut dyn TemperatureControl)
    }
}

/// Mount whose slewing answers come from a script; once the script runs
/// out every query returns `default_slewing`.
pub struct SimulatedMount {
    slewing: VecDeque<bool>,
    default_slewing: bool,
    tracking: Option<bool>,
    ra: f64,
    dec: f64,
    queries: usize,
}

impl SimulatedMount {
    pub fn new(ra: f64, dec: f64) -> Self {
        Self {
            slewing: VecDeque::new(),
            default_slewing: false,
            tracking: Some(true),
            ra,
            dec,
            queries: 0,
        }
    }

    pub fn with_slewing_script(mut self, script: impl IntoIterator<Item = bool>) -> Self {
        self.slewing = script.into_iter().collect();
        self
    }

    pub fn with_default_slewing(mut self, slewing: bool) -> Self {
        self.default_slewing = slewing;
        self
    }

    /// `None` makes `is_tracking` unsupported.
    pub fn with_tracking(mut self, tracking: Option<bool>) -> Self {
        self.tracking = tracking;
        self
    }

    pub fn slew_queries(&self) -> usize {
        self.queries
    }
}

impl Mount for SimulatedMount {
    fn is_slewing(&mut self) -> DeviceResult<bool> {
        self.queries += 1;
        Ok(self.slewing.pop_front().unwrap_or(self.default_slewing))
    }

    fn is_tracking(&mut self) -> DeviceResult<bool> {
        self.tracking
            .ok_or_else(|| DeviceError::Unsupported("tracking state".into()))
    }

    fn coordinates(&mut self) -> DeviceResult<(f64, f64)> {
        Ok((self.ra, self.dec))
    }
}
