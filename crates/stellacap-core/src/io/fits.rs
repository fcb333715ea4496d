use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use memmap2::Mmap;
use ndarray::{Array2, Array3};

use crate::consts::{FITS_BLOCK_SIZE, FITS_CARD_SIZE};
use crate::error::{Result, StellacapError};
use crate::frame::ImageData;

/// Keywords that describe the data layout. They are derived from the array
/// on write and never copied from a caller's header.
const STRUCTURAL_KEYS: &[&str] = &[
    "SIMPLE", "BITPIX", "NAXIS", "NAXIS1", "NAXIS2", "NAXIS3", "EXTEND", "BZERO", "BSCALE", "END",
];

/// A header card value.
#[derive(Clone, Debug, PartialEq)]
pub enum HeaderValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl HeaderValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Str(s) => s.trim().parse().ok(),
            Self::Bool(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Self::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn format_value(&self) -> String {
        match self {
            Self::Str(s) => format!("'{:<8}'", s.replace('\'', "''")),
            Self::Int(v) => format!("{v:>20}"),
            Self::Float(v) => format!("{:>20}", format_float(*v)),
            Self::Bool(b) => format!("{:>20}", if *b { "T" } else { "F" }),
        }
    }
}

impl std::fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{}", format_float(*v)),
            Self::Bool(b) => write!(f, "{}", if *b { "T" } else { "F" }),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<i64> for HeaderValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for HeaderValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<u32> for HeaderValue {
    fn from(v: u32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<u64> for HeaderValue {
    fn from(v: u64) -> Self {
        Self::Int(v as i64)
    }
}

impl From<usize> for HeaderValue {
    fn from(v: usize) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for HeaderValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<f32> for HeaderValue {
    fn from(v: f32) -> Self {
        Self::Float(v as f64)
    }
}

impl From<bool> for HeaderValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Ordered list of header cards. Keys are stored upper-case; setting an
/// existing key replaces its value in place.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FitsHeader {
    cards: Vec<(String, HeaderValue)>,
}

impl FitsHeader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<HeaderValue>) {
        let key = key.to_uppercase();
        let value = value.into();
        if let Some(card) = self.cards.iter_mut().find(|(k, _)| *k == key) {
            card.1 = value;
        } else {
            self.cards.push((key, value));
        }
    }

    /// Set only when `value` is present.
    pub fn set_opt<V: Into<HeaderValue>>(&mut self, key: &str, value: Option<V>) {
        if let Some(v) = value {
            self.set(key, v);
        }
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        let key = key.to_uppercase();
        self.cards.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(HeaderValue::as_f64)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(HeaderValue::as_i64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(HeaderValue::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<HeaderValue> {
        let key = key.to_uppercase();
        let idx = self.cards.iter().position(|(k, _)| *k == key)?;
        Some(self.cards.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.cards.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

/// Decoded primary HDU.
#[derive(Clone, Debug)]
pub struct FitsImage {
    pub data: ImageData,
    pub header: FitsHeader,
}

/// Read the primary image of a FITS file. Supports BITPIX 8, 16, 32, -32 and
/// -64 with BZERO/BSCALE, 2 axes or 3 axes (colour planes).
pub fn read_fits(path: &Path) -> Result<FitsImage> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };

    let (header, data_offset) = parse_header_blocks(&mmap)?;
    let layout = DataLayout::from_header(&header)?;

    let expected = data_offset
        .checked_add(layout.byte_len()?)
        .ok_or_else(|| StellacapError::InvalidFits("Data size overflows".into()))?;
    if mmap.len() < expected {
        return Err(StellacapError::InvalidFits(format!(
            "File truncated: expected at least {} bytes, got {}",
            expected,
            mmap.len()
        )));
    }

    let values = decode_values(&mmap[data_offset..expected], &layout)?;
    let data = match layout.planes {
        None => ImageData::Mono(
            Array2::from_shape_vec((layout.height, layout.width), values)
                .map_err(|e| StellacapError::InvalidFits(e.to_string()))?,
        ),
        Some(planes) => ImageData::Planes(
            Array3::from_shape_vec((planes, layout.height, layout.width), values)
                .map_err(|e| StellacapError::InvalidFits(e.to_string()))?,
        ),
    };

    Ok(FitsImage { data, header })
}

/// Read only the header cards, without touching the data unit.
pub fn read_fits_header(path: &Path) -> Result<FitsHeader> {
    let mut file = File::open(path)?;
    let mut buf = Vec::new();
    let mut block = vec![0u8; FITS_BLOCK_SIZE];
    loop {
        file.read_exact(&mut block).map_err(|_| {
            StellacapError::InvalidFits("Header ended without END card".into())
        })?;
        buf.extend_from_slice(&block);
        if block_has_end(&block) {
            break;
        }
    }
    let (header, _) = parse_header_blocks(&buf)?;
    Ok(header)
}

/// Write `data` as a 32-bit float primary HDU with the given extra cards.
pub fn write_fits(path: &Path, data: &ImageData, header: &FitsHeader) -> Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);

    let (h, width) = data.dim();
    let mut cards: Vec<String> = vec![
        card("SIMPLE", &HeaderValue::Bool(true)),
        card("BITPIX", &HeaderValue::Int(-32)),
    ];
    match data {
        ImageData::Mono(_) => {
            cards.push(card("NAXIS", &HeaderValue::Int(2)));
            cards.push(card("NAXIS1", &HeaderValue::from(width)));
            cards.push(card("NAXIS2", &HeaderValue::from(h)));
        }
        ImageData::Planes(_) => {
            cards.push(card("NAXIS", &HeaderValue::Int(3)));
            cards.push(card("NAXIS1", &HeaderValue::from(width)));
            cards.push(card("NAXIS2", &HeaderValue::from(h)));
            cards.push(card("NAXIS3", &HeaderValue::from(data.plane_count())));
        }
    }
    for (key, value) in header.iter() {
        if STRUCTURAL_KEYS.contains(&key) {
            continue;
        }
        cards.push(card(key, value));
    }
    cards.push(format!("{:<80}", "END"));

    let mut written = 0usize;
    for c in &cards {
        w.write_all(c.as_bytes())?;
        written += FITS_CARD_SIZE;
    }
    write_padding(&mut w, written, b' ')?;

    let mut data_bytes = 0usize;
    let mut write_plane = |plane: ndarray::ArrayView2<'_, f32>| -> Result<()> {
        for &v in plane.iter() {
            w.write_f32::<BigEndian>(v)?;
            data_bytes += 4;
        }
        Ok(())
    };
    for plane in data.planes() {
        write_plane(plane)?;
    }
    write_padding(&mut w, data_bytes, 0)?;
    w.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

struct DataLayout {
    bitpix: i32,
    width: usize,
    height: usize,
    planes: Option<usize>,
    bzero: f64,
    bscale: f64,
}

impl DataLayout {
    fn from_header(header: &FitsHeader) -> Result<Self> {
        let bitpix = header
            .get_i64("BITPIX")
            .ok_or_else(|| StellacapError::InvalidFits("Missing BITPIX".into()))?
            as i32;
        if !matches!(bitpix, 8 | 16 | 32 | -32 | -64) {
            return Err(StellacapError::InvalidFits(format!(
                "Unsupported BITPIX {bitpix}"
            )));
        }
        let naxis = header.get_i64("NAXIS").unwrap_or(0);
        let axis = |n: usize| -> Result<usize> {
            header
                .get_i64(&format!("NAXIS{n}"))
                .filter(|v| *v > 0)
                .map(|v| v as usize)
                .ok_or_else(|| StellacapError::InvalidFits(format!("Missing NAXIS{n}")))
        };
        let planes = match naxis {
            2 => None,
            3 => Some(axis(3)?),
            other => {
                return Err(StellacapError::InvalidFits(format!(
                    "Expected 2 or 3 axes, found {other}"
                )))
            }
        };
        Ok(Self {
            bitpix,
            width: axis(1)?,
            height: axis(2)?,
            planes,
            bzero: header.get_f64("BZERO").unwrap_or(0.0),
            bscale: header.get_f64("BSCALE").unwrap_or(1.0),
        })
    }

    fn pixel_count(&self) -> Result<usize> {
        self.width
            .checked_mul(self.height)
            .and_then(|n| n.checked_mul(self.planes.unwrap_or(1)))
            .ok_or_else(|| StellacapError::InvalidFits("Image dimensions overflow".into()))
    }

    fn byte_len(&self) -> Result<usize> {
        self.pixel_count()?
            .checked_mul(self.bitpix.unsigned_abs() as usize / 8)
            .ok_or_else(|| StellacapError::InvalidFits("Data size overflows".into()))
    }
}

fn decode_values(bytes: &[u8], layout: &DataLayout) -> Result<Vec<f32>> {
    let n = layout.pixel_count()?;
    let mut cursor = std::io::Cursor::new(bytes);
    let raw: Vec<f64> = match layout.bitpix {
        8 => bytes[..n].iter().map(|&b| b as f64).collect(),
        16 => {
            let mut v = vec![0i16; n];
            cursor.read_i16_into::<BigEndian>(&mut v)?;
            v.into_iter().map(f64::from).collect()
        }
        32 => {
            let mut v = vec![0i32; n];
            cursor.read_i32_into::<BigEndian>(&mut v)?;
            v.into_iter().map(f64::from).collect()
        }
        -32 => {
            let mut v = vec![0f32; n];
            cursor.read_f32_into::<BigEndian>(&mut v)?;
            v.into_iter().map(f64::from).collect()
        }
        _ => {
            let mut v = vec![0f64; n];
            cursor.read_f64_into::<BigEndian>(&mut v)?;
            v
        }
    };
    let scaled = layout.bzero != 0.0 || layout.bscale != 1.0;
    Ok(raw
        .into_iter()
        .map(|v| {
            if scaled {
                (layout.bzero + layout.bscale * v) as f32
            } else {
                v as f32
            }
        })
        .collect())
}

/// Parse header cards up to END; returns the header and the byte offset of
/// the data unit.
fn parse_header_blocks(buf: &[u8]) -> Result<(FitsHeader, usize)> {
    if buf.len() < FITS_BLOCK_SIZE || &buf[..6] != b"SIMPLE" {
        return Err(StellacapError::InvalidFits("Missing SIMPLE card".into()));
    }
    let mut header = FitsHeader::new();
    let mut offset = 0usize;
    loop {
        if offset + FITS_CARD_SIZE > buf.len() {
            return Err(StellacapError::InvalidFits(
                "Header ended without END card".into(),
            ));
        }
        let raw = &buf[offset..offset + FITS_CARD_SIZE];
        offset += FITS_CARD_SIZE;
        if !raw.is_ascii() {
            continue;
        }
        let text = String::from_utf8_lossy(raw);
        let key = text[..8].trim().to_string();
        if key == "END" {
            break;
        }
        if key.is_empty() || key == "COMMENT" || key == "HISTORY" || &text[8..10] != "= " {
            continue;
        }
        if let Some(value) = parse_value(&text[10..]) {
            header.set(&key, value);
        }
    }
    let data_offset = offset.div_ceil(FITS_BLOCK_SIZE) * FITS_BLOCK_SIZE;
    Ok((header, data_offset))
}

fn parse_value(field: &str) -> Option<HeaderValue> {
    let field = field.trim_start();
    if let Some(rest) = field.strip_prefix('\'') {
        // Quoted string; '' is an escaped quote.
        let mut out = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    out.push('\'');
                    chars.next();
                } else {
                    break;
                }
            } else {
                out.push(c);
            }
        }
        return Some(HeaderValue::Str(out.trim_end().to_string()));
    }
    let value = field.split('/').next().unwrap_or("").trim();
    match value {
        "" => None,
        "T" => Some(HeaderValue::Bool(true)),
        "F" => Some(HeaderValue::Bool(false)),
        _ => {
            if let Ok(i) = value.parse::<i64>() {
                Some(HeaderValue::Int(i))
            } else {
                value
                    .replace(['D', 'd'], "E")
                    .parse::<f64>()
                    .ok()
                    .map(HeaderValue::Float)
            }
        }
    }
}

fn block_has_end(block: &[u8]) -> bool {
    block
        .chunks(FITS_CARD_SIZE)
        .any(|c| c.len() >= 8 && &c[..8] == b"END     ")
}

fn card(key: &str, value: &HeaderValue) -> String {
    let mut s = format!("{:<8}= {}", key, value.format_value());
    s.truncate(FITS_CARD_SIZE);
    format!("{s:<80}")
}

fn format_float(v: f64) -> String {
    if !v.is_finite() {
        return "0.0".into();
    }
    let mut s = format!("{v}");
    if !s.contains('.') {
        s.push_str(".0");
    }
    if s.len() > 20 {
        s = format!("{v:E}");
    }
    s
}

fn write_padding(w: &mut impl Write, written: usize, fill: u8) -> Result<()> {
    let rem = written % FITS_BLOCK_SIZE;
    if rem != 0 {
        w.write_all(&vec![fill; FITS_BLOCK_SIZE - rem])?;
    }
    Ok(())
}
