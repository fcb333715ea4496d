pub mod ephemeris;
pub mod platesolve2;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::OpticsConfig;
use crate::error::SolveError;

pub use ephemeris::{assess_field, BodyVerdict, BrightBody};
pub use platesolve2::PlateSolve2;

/// Outcome of one successful plate solve. Angles are in degrees.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlateSolveResult {
    pub ra_center: f64,
    pub dec_center: f64,
    pub fov_width: f64,
    pub fov_height: f64,
    pub position_angle: f64,
    /// (width, height) in pixels, when known.
    pub image_size: Option<(u32, u32)>,
    pub confidence: f64,
    pub is_flipped: bool,
    #[serde(with = "duration_secs")]
    pub solving_time: Duration,
    pub method: String,
    pub stars_detected: Option<u32>,
    /// Arcseconds per pixel.
    pub pixel_scale: Option<f64>,
}

/// Starting point for a solve. Missing coordinates default to (0, 0).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SolveHint {
    pub ra_deg: Option<f64>,
    pub dec_deg: Option<f64>,
    pub fov_width_deg: f64,
    pub fov_height_deg: f64,
}

impl SolveHint {
    pub fn from_optics(optics: &OpticsConfig) -> Self {
        let (fov_width_deg, fov_height_deg) = optics.field_of_view_deg();
        Self {
            ra_deg: None,
            dec_deg: None,
            fov_width_deg,
            fov_height_deg,
        }
    }

    pub fn at(mut self, ra_deg: f64, dec_deg: f64) -> Self {
        self.ra_deg = Some(ra_deg);
        self.dec_deg = Some(dec_deg);
        self
    }
}

/// An astrometric solver behind a process or library boundary.
pub trait PlateSolver: Send {
    fn name(&self) -> &str;

    fn solve(&mut self, image: &Path, hint: &SolveHint) -> Result<PlateSolveResult, SolveError>;
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}
