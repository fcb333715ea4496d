use astro::angle::anglr_sepr;
use astro::coords::{asc_frm_ecl, dec_frm_ecl, EclPoint};
use astro::ecliptic::mn_oblq_IAU;
use astro::planet::{geocent_apprnt_ecl_coords, Planet};
use astro::time::{julian_day, CalType, Date};
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Solar-system bodies bright enough to spoil a solve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrightBody {
    Moon,
    Venus,
    Mars,
    Jupiter,
    Saturn,
}

impl std::fmt::Display for BrightBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Moon => write!(f, "Moon"),
            Self::Venus => write!(f, "Venus"),
            Self::Mars => write!(f, "Mars"),
            Self::Jupiter => write!(f, "Jupiter"),
            Self::Saturn => write!(f, "Saturn"),
        }
    }
}

/// Where a bright body sits relative to a field.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BodyVerdict {
    Clear,
    InField { body: BrightBody, separation_deg: f64 },
    DeadCenter { body: BrightBody, separation_deg: f64 },
}

impl BodyVerdict {
    pub fn body(&self) -> Option<BrightBody> {
        match *self {
            Self::Clear => None,
            Self::InField { body, .. } | Self::DeadCenter { body, .. } => Some(body),
        }
    }
}

pub fn julian_day_utc(when: DateTime<Utc>) -> f64 {
    let day_fraction = when.time().num_seconds_from_midnight() as f64 / 86_400.0
        + when.time().nanosecond() as f64 / 86_400e9;
    let date = Date {
        year: when.year() as i16,
        month: when.month() as u8,
        decimal_day: when.day() as f64 + day_fraction,
        cal_type: CalType::Gregorian,
    };
    julian_day(&date)
}

/// Geocentric (RA, Dec) of `body` in degrees at `when`.
pub fn body_position(body: BrightBody, when: DateTime<Utc>) -> (f64, f64) {
    let jd = julian_day_utc(when);
    let ecl: EclPoint = match body {
        BrightBody::Moon => astro::lunar::geocent_ecl_pos(jd).0,
        BrightBody::Venus => geocent_apprnt_ecl_coords(&Planet::Venus, jd).0,
        BrightBody::Mars => geocent_apprnt_ecl_coords(&Planet::Mars, jd).0,
        BrightBody::Jupiter => geocent_apprnt_ecl_coords(&Planet::Jupiter, jd).0,
        BrightBody::Saturn => geocent_apprnt_ecl_coords(&Planet::Saturn, jd).0,
    };
    let oblq = mn_oblq_IAU(jd);
    let ra = asc_frm_ecl(ecl.long, ecl.lat, oblq).rem_euclid(std::f64::consts::TAU);
    let dec = dec_frm_ecl(ecl.long, ecl.lat, oblq);
    (ra.to_degrees(), dec.to_degrees())
}

/// Great-circle distance between two (RA, Dec) points, all in degrees.
pub fn angular_separation_deg(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    anglr_sepr(
        ra1.to_radians(),
        dec1.to_radians(),
        ra2.to_radians(),
        dec2.to_radians(),
    )
    .to_degrees()
}

/// Gnomonic offsets (xi, eta) in degrees of `point` from `center`, or `None`
/// for the far hemisphere.
fn tangent_offsets(center: (f64, f64), point: (f64, f64)) -> Option<(f64, f64)> {
    let (ra0, dec0) = (center.0.to_radians(), center.1.to_radians());
    let (ra, dec) = (point.0.to_radians(), point.1.to_radians());
    let d_ra = ra - ra0;
    let cos_c = dec0.sin() * dec.sin() + dec0.cos() * dec.cos() * d_ra.cos();
    if cos_c <= 0.0 {
        return None;
    }
    let xi = dec.cos() * d_ra.sin() / cos_c;
    let eta = (dec0.cos() * dec.sin() - dec0.sin() * dec.cos() * d_ra.cos()) / cos_c;
    Some((xi.atan().to_degrees(), eta.atan().to_degrees()))
}

/// Classify `position` against a field centred on `center` of size `fov`
/// (width, height), all in degrees. The frame is taken as north-up.
pub fn classify(
    body: BrightBody,
    position: (f64, f64),
    center: (f64, f64),
    fov: (f64, f64),
    dead_center_fraction: f64,
) -> BodyVerdict {
    let separation_deg = angular_separation_deg(center.0, center.1, position.0, position.1);
    if separation_deg <= dead_center_fraction * fov.0.min(fov.1) {
        return BodyVerdict::DeadCenter {
            body,
            separation_deg,
        };
    }
    match tangent_offsets(center, position) {
        Some((xi, eta)) if xi.abs() <= fov.0 / 2.0 && eta.abs() <= fov.1 / 2.0 => {
            BodyVerdict::InField {
                body,
                separation_deg,
            }
        }
        _ => BodyVerdict::Clear,
    }
}

/// The most severe verdict over `bodies` at `when`. A dead-centre body wins
/// over one merely in the field.
pub fn assess_field(
    center: (f64, f64),
    fov: (f64, f64),
    bodies: &[BrightBody],
    when: DateTime<Utc>,
    dead_center_fraction: f64,
) -> BodyVerdict {
    let mut verdict = BodyVerdict::Clear;
    for &body in bodies {
        match classify(body, body_position(body, when), center, fov, dead_center_fraction) {
            v @ BodyVerdict::DeadCenter { .. } => return v,
            v @ BodyVerdict::InField { .. } if verdict == BodyVerdict::Clear => verdict = v,
            _ => {}
        }
    }
    verdict
}
