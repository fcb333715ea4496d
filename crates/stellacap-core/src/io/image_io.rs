use std::path::Path;

use image::{GrayImage, ImageBuffer, ImageFormat, Luma, Rgb, RgbImage};
use ndarray::ArrayView2;
use rayon::prelude::*;

use crate::consts::{EPSILON, PARALLEL_PIXEL_THRESHOLD};
use crate::error::{Result, StellacapError};
use crate::frame::{Frame, ImageData};

/// Lower/upper percentiles used to stretch ADU data for display.
const STRETCH_LOW: f32 = 0.01;
const STRETCH_HIGH: f32 = 0.99;

/// Percentile bounds of a plane, falling back to min/max when the
/// percentiles collapse.
pub fn stretch_bounds(plane: ArrayView2<'_, f32>) -> (f32, f32) {
    let mut values: Vec<f32> = plane.iter().copied().filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        return (0.0, 1.0);
    }
    if values.len() >= PARALLEL_PIXEL_THRESHOLD {
        values.par_sort_unstable_by(f32::total_cmp);
    } else {
        values.sort_unstable_by(f32::total_cmp);
    }
    let at = |q: f32| values[((values.len() - 1) as f32 * q).round() as usize];
    let (mut lo, mut hi) = (at(STRETCH_LOW), at(STRETCH_HIGH));
    if hi - lo <= EPSILON {
        lo = values[0];
        hi = values[values.len() - 1];
    }
    if hi - lo <= EPSILON {
        hi = lo + 1.0;
    }
    (lo, hi)
}

#[inline]
fn scale(v: f32, lo: f32, hi: f32) -> f32 {
    ((v - lo) / (hi - lo)).clamp(0.0, 1.0)
}

/// Save a frame as a stretched 8-bit PNG (grey or RGB).
pub fn save_png(frame: &Frame, path: &Path) -> Result<()> {
    let (h, w) = frame.data.dim();
    match &frame.data {
        ImageData::Mono(data) => {
            let (lo, hi) = stretch_bounds(data.view());
            let mut img = GrayImage::new(w as u32, h as u32);
            for ((row, col), &v) in data.indexed_iter() {
                let val = (scale(v, lo, hi) * 255.0) as u8;
                img.put_pixel(col as u32, row as u32, Luma([val]));
            }
            img.save_with_format(path, ImageFormat::Png)?;
        }
        ImageData::Planes(_) => {
            let planes = frame.data.planes();
            let bounds: Vec<(f32, f32)> = planes.iter().map(|p| stretch_bounds(p.view())).collect();
            let mut img = RgbImage::new(w as u32, h as u32);
            for row in 0..h {
                for col in 0..w {
                    let mut px = [0u8; 3];
                    for (c, out) in px.iter_mut().enumerate() {
                        let plane = &planes[c.min(planes.len() - 1)];
                        let (lo, hi) = bounds[c.min(bounds.len() - 1)];
                        *out = (scale(plane[[row, col]], lo, hi) * 255.0) as u8;
                    }
                    img.put_pixel(col as u32, row as u32, Rgb(px));
                }
            }
            img.save_with_format(path, ImageFormat::Png)?;
        }
    }
    Ok(())
}

/// Save the luminance plane as a stretched 16-bit grayscale TIFF.
pub fn save_tiff(frame: &Frame, path: &Path) -> Result<()> {
    let plane = frame.data.luminance_plane();
    let (h, w) = plane.dim();
    let (lo, hi) = stretch_bounds(plane);

    let pixels: Vec<u16> = plane
        .iter()
        .map(|&v| (scale(v, lo, hi) * 65535.0) as u16)
        .collect();

    let img = ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(w as u32, h as u32, pixels)
        .ok_or_else(|| StellacapError::Pipeline("buffer size does not match dimensions".into()))?;
    img.save_with_format(path, ImageFormat::Tiff)?;
    Ok(())
}

/// Save a display copy, choosing format from the file extension.
pub fn save_display(frame: &Frame, path: &Path) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("tiff" | "tif") => save_tiff(frame, path),
        _ => save_png(frame, path),
    }
}

/// Pixel dimensions (width, height) of a display image on disk.
pub fn image_dimensions(path: &Path) -> Result<(u32, u32)> {
    Ok(image::image_dimensions(path)?)
}
