use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::frame::stack_planes;

/// Colour filter layout of a one-shot-colour sensor, named by the 2x2 cell
/// starting at pixel (0,0).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum BayerPattern {
    #[default]
    RGGB,
    GRBG,
    GBRG,
    BGGR,
}

impl BayerPattern {
    /// Returns `(row_parity, col_parity)` of the red pixel within the 2x2 cell.
    fn red_position(self) -> (usize, usize) {
        match self {
            Self::RGGB => (0, 0),
            Self::GRBG => (0, 1),
            Self::GBRG => (1, 0),
            Self::BGGR => (1, 1),
        }
    }
}

impl std::fmt::Display for BayerPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::RGGB => "RGGB",
            Self::GRBG => "GRBG",
            Self::GBRG => "GBRG",
            Self::BGGR => "BGGR",
        };
        write!(f, "{name}")
    }
}

/// Bilinear demosaic of a raw mosaic into (3, h, w) R, G, B planes.
pub fn debayer(raw: &Array2<f32>, pattern: BayerPattern) -> Array3<f32> {
    let (h, w) = raw.dim();
    let (r_row, r_col) = pattern.red_position();

    let mut red = Array2::<f32>::zeros((h, w));
    let mut green = Array2::<f32>::zeros((h, w));
    let mut blue = Array2::<f32>::zeros((h, w));

    for row in 0..h {
        let ri = row as isize;
        let is_red_row = (row % 2) == r_row;
        for col in 0..w {
            let ci = col as isize;
            let is_red_col = (col % 2) == r_col;
            let native = raw[[row, col]];

            let (r, g, b) = match (is_red_row, is_red_col) {
                (true, true) => (native, avg_cross(raw, ri, ci), avg_diagonal(raw, ri, ci)),
                // Green on red row
                (true, false) => (avg_horizontal(raw, ri, ci), native, avg_vertical(raw, ri, ci)),
                // Green on blue row
                (false, true) => (avg_vertical(raw, ri, ci), native, avg_horizontal(raw, ri, ci)),
                (false, false) => (avg_diagonal(raw, ri, ci), avg_cross(raw, ri, ci), native),
            };
            red[[row, col]] = r;
            green[[row, col]] = g;
            blue[[row, col]] = b;
        }
    }

    stack_planes(&[red, green, blue])
}

/// Clamped indexing into the raw mosaic.
#[inline]
fn px(raw: &Array2<f32>, row: isize, col: isize) -> f32 {
    let (h, w) = raw.dim();
    let r = row.clamp(0, h as isize - 1) as usize;
    let c = col.clamp(0, w as isize - 1) as usize;
    raw[[r, c]]
}

#[inline]
fn avg_cross(raw: &Array2<f32>, r: isize, c: isize) -> f32 {
    (px(raw, r - 1, c) + px(raw, r + 1, c) + px(raw, r, c - 1) + px(raw, r, c + 1)) * 0.25
}

#[inline]
fn avg_diagonal(raw: &Array2<f32>, r: isize, c: isize) -> f32 {
    (px(raw, r - 1, c - 1)
        + px(raw, r - 1, c + 1)
        + px(raw, r + 1, c - 1)
        + px(raw, r + 1, c + 1))
        * 0.25
}

#[inline]
fn avg_horizontal(raw: &Array2<f32>, r: isize, c: isize) -> f32 {
    (px(raw, r, c - 1) + px(raw, r, c + 1)) * 0.5
}

#[inline]
fn avg_vertical(raw: &Array2<f32>, r: isize, c: isize) -> f32 {
    (px(raw, r - 1, c) + px(raw, r + 1, c)) * 0.5
}
