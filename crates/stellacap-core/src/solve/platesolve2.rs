use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::SolverConfig;
use crate::consts::{ARCSEC_PER_DEGREE, PLATESOLVE2_CONFIDENCE, PLATESOLVE2_SIDECAR_EXT};
use crate::error::SolveError;
use crate::io::fits::read_fits_header;
use crate::io::image_io::image_dimensions;

use super::{PlateSolveResult, PlateSolver, SolveHint};

/// Poll interval while waiting for the solver process to exit.
const PROCESS_POLL: Duration = Duration::from_millis(100);

/// Values read from a PlateSolve2 `.apm` result file.
#[derive(Clone, Debug, PartialEq)]
pub struct Sidecar {
    pub ra_deg: f64,
    pub dec_deg: f64,
    pub code: i64,
    /// Arcseconds per pixel.
    pub pixel_scale: f64,
    /// Degrees, already corrected for a flipped image.
    pub position_angle: f64,
    pub flipped: bool,
    pub stars: u32,
    pub valid: bool,
}

/// Adapter for the PlateSolve2 executable.
///
/// The solver takes a single comma-joined argument and writes its answer to
/// `<image stem>.apm` next to the image.
pub struct PlateSolve2 {
    config: SolverConfig,
}

impl PlateSolve2 {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Where the solver writes its result for `image`.
    pub fn sidecar_path(image: &Path) -> PathBuf {
        image.with_extension(PLATESOLVE2_SIDECAR_EXT)
    }

    /// `ra,dec,fov_w,fov_h,regions,path,0` with angles in radians.
    pub fn build_command(&self, image: &Path, hint: &SolveHint) -> String {
        let path = image.to_string_lossy().replace('\\', "/");
        [
            hint.ra_deg.unwrap_or(0.0).to_radians().to_string(),
            hint.dec_deg.unwrap_or(0.0).to_radians().to_string(),
            hint.fov_width_deg.to_radians().to_string(),
            hint.fov_height_deg.to_radians().to_string(),
            self.config.regions.to_string(),
            path,
            "0".to_string(),
        ]
        .join(",")
    }

    fn working_dir(&self) -> Option<PathBuf> {
        self.config.working_dir.clone().or_else(|| {
            self.config
                .executable
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
        })
    }

    /// Run the executable, killing it if it outlives the configured timeout.
    fn run(&self, command: &str) -> Result<(), SolveError> {
        let mut cmd = Command::new(&self.config.executable);
        cmd.arg(command).stdout(Stdio::null()).stderr(Stdio::null());
        if let Some(dir) = self.working_dir() {
            cmd.current_dir(dir);
        }
        debug!(?cmd, "Launching PlateSolve2");

        let mut child = cmd
            .spawn()
            .map_err(|e| SolveError::Process(format!("cannot start {}: {e}", self.config.executable.display())))?;
        let timeout = self.config.timeout();
        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => return Ok(()),
                Ok(Some(status)) => {
                    return Err(SolveError::Process(format!("PlateSolve2 exited with {status}")))
                }
                Ok(None) if start.elapsed() >= timeout => {
                    warn!(?timeout, "PlateSolve2 timed out; killing");
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SolveError::Timeout(timeout));
                }
                Ok(None) => thread::sleep(PROCESS_POLL),
                Err(e) => return Err(SolveError::Process(e.to_string())),
            }
        }
    }

    fn wait_for_sidecar(&self, path: &Path) -> Result<(), SolveError> {
        let timeout = self.config.sidecar_timeout();
        let start = Instant::now();
        while !path.exists() {
            if start.elapsed() >= timeout {
                return Err(SolveError::SidecarMissing(timeout));
            }
            thread::sleep(self.config.sidecar_poll());
        }
        Ok(())
    }
}

impl PlateSolver for PlateSolve2 {
    fn name(&self) -> &str {
        "platesolve2"
    }

    fn solve(&mut self, image: &Path, hint: &SolveHint) -> Result<PlateSolveResult, SolveError> {
        let start = Instant::now();
        match std::fs::metadata(image) {
            Ok(m) if m.len() > 0 => {}
            Ok(_) => return Err(SolveError::Io(format!("image is empty: {}", image.display()))),
            Err(e) => return Err(SolveError::Io(format!("{}: {e}", image.display()))),
        }

        let sidecar = Self::sidecar_path(image);
        if sidecar.exists() {
            std::fs::remove_file(&sidecar).map_err(|e| SolveError::Io(e.to_string()))?;
        }

        let command = self.build_command(image, hint);
        info!(image = %image.display(), %command, "Running PlateSolve2");
        self.run(&command)?;
        self.wait_for_sidecar(&sidecar)?;

        let text = std::fs::read_to_string(&sidecar).map_err(|e| SolveError::Io(e.to_string()))?;
        let parsed = parse_sidecar(&text)?;
        if !parsed.valid {
            return Err(SolveError::NoSolution(format!(
                "no valid solution ({} stars)",
                parsed.stars
            )));
        }

        let image_size = image_size(image);
        let (fov_width, fov_height) = match image_size {
            Some((w, h)) => (
                parsed.pixel_scale * w as f64 / ARCSEC_PER_DEGREE,
                parsed.pixel_scale * h as f64 / ARCSEC_PER_DEGREE,
            ),
            None => {
                warn!(image = %image.display(), "Could not determine image size; using hint field of view");
                (hint.fov_width_deg, hint.fov_height_deg)
            }
        };

        let result = PlateSolveResult {
            ra_center: parsed.ra_deg,
            dec_center: parsed.dec_deg,
            fov_width,
            fov_height,
            position_angle: parsed.position_angle,
            image_size,
            confidence: PLATESOLVE2_CONFIDENCE,
            is_flipped: parsed.flipped,
            solving_time: start.elapsed(),
            method: self.name().to_string(),
            stars_detected: Some(parsed.stars),
            pixel_scale: Some(parsed.pixel_scale),
        };
        info!(
            ra = result.ra_center,
            dec = result.dec_center,
            pa = result.position_angle,
            stars = parsed.stars,
            secs = result.solving_time.as_secs_f64(),
            "Plate solved"
        );
        Ok(result)
    }
}

/// Parse the three-line `.apm` file.
///
/// Decimal numbers are split across two comma fields (`0,45138` is 0.45138).
/// Line 1: `ra_int,ra_frac,dec_int,dec_frac,code` in radians.
/// Line 2: `scale_int,scale_frac,pa_int,pa_frac,flipped,code2,c3_int,c3_frac,stars`.
/// Line 3 contains `Valid` for an accepted solution.
pub fn parse_sidecar(text: &str) -> Result<Sidecar, SolveError> {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    if lines.len() < 3 {
        return Err(SolveError::Parse(format!(
            "expected 3 lines, found {}",
            lines.len()
        )));
    }

    let first: Vec<&str> = lines[0].split(',').collect();
    if first.len() != 5 {
        return Err(SolveError::Parse(format!(
            "line 1 has {} fields, expected 5: {}",
            first.len(),
            lines[0]
        )));
    }
    let ra_rad = joined(first[0], first[1])?;
    let dec_rad = joined(first[2], first[3])?;
    let code = int(first[4])?;

    let second: Vec<&str> = lines[1].split(',').collect();
    if second.len() != 9 {
        return Err(SolveError::Parse(format!(
            "line 2 has {} fields, expected 9: {}",
            second.len(),
            lines[1]
        )));
    }
    let pixel_scale = joined(second[0], second[1])?;
    let mut position_angle = joined(second[2], second[3])?;
    let flipped = int(second[4])? >= 1;
    let stars = u32::try_from(int(second[8])?)
        .map_err(|_| SolveError::Parse(format!("bad star count: {}", second[8])))?;
    if flipped {
        position_angle = (position_angle + 180.0) % 360.0;
    }

    Ok(Sidecar {
        ra_deg: ra_rad.to_degrees(),
        dec_deg: dec_rad.to_degrees(),
        code,
        pixel_scale,
        position_angle,
        flipped,
        stars,
        valid: lines[2].contains("Valid"),
    })
}

fn joined(int_part: &str, frac_part: &str) -> Result<f64, SolveError> {
    let text = format!("{}.{}", int_part.trim(), frac_part.trim());
    text.parse()
        .map_err(|_| SolveError::Parse(format!("bad number: {text}")))
}

fn int(field: &str) -> Result<i64, SolveError> {
    field
        .trim()
        .parse()
        .map_err(|_| SolveError::Parse(format!("bad integer: {field}")))
}

/// Pixel dimensions from the FITS header, or from the image file itself.
fn image_size(image: &Path) -> Option<(u32, u32)> {
    let is_fits = image
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "fits" | "fit" | "fts"));
    if is_fits {
        let header = read_fits_header(image).ok()?;
        let w = header.get_i64("NAXIS1")?;
        let h = header.get_i64("NAXIS2")?;
        return Some((u32::try_from(w).ok()?, u32::try_from(h).ok()?));
    }
    image_dimensions(image).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "1,23456,0,34567,1\n0,45138,146,64,-1,0002,0,00004,388\nValid plate solution\n";

    #[test]
    fn test_parse_sample() {
        let s = parse_sidecar(SAMPLE).unwrap();
        assert!((s.ra_deg - 1.23456f64.to_degrees()).abs() < 1e-9);
        assert!((s.dec_deg - 0.34567f64.to_degrees()).abs() < 1e-9);
        assert!((s.pixel_scale - 0.45138).abs() < 1e-12);
        assert!((s.position_angle - 146.64).abs() < 1e-9);
        assert!(!s.flipped);
        assert_eq!(s.stars, 388);
        assert!(s.valid);
    }

    #[test]
    fn test_flipped_rotates_position_angle() {
        let text = "1,0,0,5,1\n1,0,270,0,1,0002,0,00004,12\nValid\n";
        let s = parse_sidecar(text).unwrap();
        assert!(s.flipped);
        assert!((s.position_angle - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_wrong_field_count() {
        let err = parse_sidecar("1,2,3\n0,1,2,3,4,5,6,7,8\nValid\n").unwrap_err();
        assert!(matches!(err, SolveError::Parse(_)));
    }

    #[test]
    fn test_command_uses_radians_and_forward_slashes() {
        let solver = PlateSolve2::new(SolverConfig {
            regions: 100,
            ..Default::default()
        });
        let hint = SolveHint {
            ra_deg: Some(180.0),
            dec_deg: None,
            fov_width_deg: 1.0,
            fov_height_deg: 0.5,
        };
        let cmd = solver.build_command(Path::new(r"C:\img\frame.fits"), &hint);
        let fields: Vec<&str> = cmd.split(',').collect();
        assert_eq!(fields.len(), 7);
        assert!((fields[0].parse::<f64>().unwrap() - std::f64::consts::PI).abs() < 1e-12);
        assert_eq!(fields[1], "0");
        assert_eq!(fields[4], "100");
        assert_eq!(fields[5], "C:/img/frame.fits");
        assert_eq!(fields[6], "0");
    }

    #[test]
    fn test_sidecar_path_same_stem() {
        assert_eq!(
            PlateSolve2::sidecar_path(Path::new("out/capture_1.fits")),
            PathBuf::from("out/capture_1.apm")
        );
    }
}
