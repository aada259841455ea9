//! Minimal reader for NumPy `.npy` arrays.
//!
//! Supports format versions 1-3, boolean/integer/float dtypes in either byte
//! order, and both C and Fortran memory order. Values are widened to `f64`.

use regex::Regex;
use std::sync::LazyLock;

use crate::schedule::ScheduleError;

const MAGIC: &[u8] = b"\x93NUMPY";

static DESCR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'descr'\s*:\s*'([<>|=])([biuf])(\d+)'").expect("valid regex"));
static ORDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'fortran_order'\s*:\s*(True|False)").expect("valid regex"));
static SHAPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'shape'\s*:\s*\(([^)]*)\)").expect("valid regex"));

/// A decoded array.
#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    /// Dimensions, outermost first
    pub shape: Vec<usize>,

    /// Column-major storage
    pub fortran_order: bool,

    /// Flat element storage in file order
    pub data: Vec<f64>,
}

impl NpyArray {
    /// Returns the element at a full multi-index, or `None` if out of range.
    pub fn get(&self, index: &[usize]) -> Option<f64> {
        if index.len() != self.shape.len() || index.iter().zip(&self.shape).any(|(i, d)| i >= d) {
            return None;
        }

        let mut flat = 0usize;
        if self.fortran_order {
            for (i, d) in index.iter().zip(&self.shape).rev() {
                flat = flat * d + i;
            }
        } else {
            for (i, d) in index.iter().zip(&self.shape) {
                flat = flat * d + i;
            }
        }
        self.data.get(flat).copied()
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Bool,
    Int,
    Uint,
    Float,
}

fn format_err(msg: impl Into<String>) -> ScheduleError {
    ScheduleError::Format(msg.into())
}

/// Decodes a complete `.npy` file.
pub fn parse_npy(bytes: &[u8]) -> Result<NpyArray, ScheduleError> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(format_err("missing .npy magic"));
    }

    let major = bytes[6];
    let (header_len, header_start): (usize, usize) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(format_err("truncated .npy preamble"));
            }
            (u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize, 12)
        }
        v => return Err(format_err(format!("unsupported .npy version {v}"))),
    };

    let header_end = header_start
        .checked_add(header_len)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| format_err("truncated .npy header"))?;
    let header = std::str::from_utf8(&bytes[header_start..header_end])
        .map_err(|_| format_err("non-text .npy header"))?;

    let descr = DESCR_RE
        .captures(header)
        .ok_or_else(|| format_err(format!("unsupported or missing dtype in header: {header}")))?;
    let big_endian = &descr[1] == ">";
    let kind = match &descr[2] {
        "b" => Kind::Bool,
        "i" => Kind::Int,
        "u" => Kind::Uint,
        _ => Kind::Float,
    };
    let width: usize = descr[3].parse().map_err(|_| format_err("bad dtype width"))?;

    let fortran_order = ORDER_RE
        .captures(header)
        .map(|c| &c[1] == "True")
        .ok_or_else(|| format_err("missing fortran_order in header"))?;

    let shape_text = SHAPE_RE
        .captures(header)
        .ok_or_else(|| format_err("missing shape in header"))?;
    let shape = shape_text[1]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|_| format_err(format!("bad shape entry `{s}`"))))
        .collect::<Result<Vec<_>, _>>()?;

    let count = shape
        .iter()
        .try_fold(1usize, |acc, d| acc.checked_mul(*d))
        .ok_or_else(|| format_err("shape overflows"))?;
    let payload = &bytes[header_end..];
    let needed = count
        .checked_mul(width)
        .ok_or_else(|| format_err("shape overflows"))?;
    if payload.len() < needed {
        return Err(format_err(format!(
            "truncated .npy payload: expected {needed} bytes, found {}",
            payload.len()
        )));
    }

    let data = payload[..needed]
        .chunks_exact(width)
        .map(|chunk| decode(chunk, kind, big_endian))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(NpyArray {
        shape,
        fortran_order,
        data,
    })
}

fn decode(chunk: &[u8], kind: Kind, big_endian: bool) -> Result<f64, ScheduleError> {
    let mut buf = [0u8; 8];
    let n = chunk.len();
    if big_endian {
        for (dst, src) in buf.iter_mut().zip(chunk.iter().rev()) {
            *dst = *src;
        }
    } else {
        buf[..n].copy_from_slice(chunk);
    }

    let value = match (kind, n) {
        (Kind::Bool, 1) | (Kind::Uint, 1) => f64::from(buf[0]),
        (Kind::Int, 1) => f64::from(buf[0] as i8),
        (Kind::Uint, 2) => f64::from(u16::from_le_bytes([buf[0], buf[1]])),
        (Kind::Int, 2) => f64::from(i16::from_le_bytes([buf[0], buf[1]])),
        (Kind::Uint, 4) => f64::from(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
        (Kind::Int, 4) => f64::from(i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
        (Kind::Uint, 8) => u64::from_le_bytes(buf) as f64,
        (Kind::Int, 8) => i64::from_le_bytes(buf) as f64,
        (Kind::Float, 4) => f64::from(f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
        (Kind::Float, 8) => f64::from_le_bytes(buf),
        (kind, n) => return Err(format_err(format!("unsupported dtype {kind:?} of width {n}"))),
    };
    Ok(value)
}

/// Encodes a little-endian `u1` array in format version 1.
#[cfg(test)]
pub(crate) fn encode_u8(shape: &[usize], data: &[u8], fortran_order: bool) -> Vec<u8> {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    let shape_text = if dims.len() == 1 {
        format!("({},)", dims[0])
    } else {
        format!("({})", dims.join(", "))
    };
    let order = if fortran_order { "True" } else { "False" };
    let mut header = format!("{{'descr': '|u1', 'fortran_order': {order}, 'shape': {shape_text}, }}");
    while (10 + header.len() + 1) % 64 != 0 {
        header.push(' ');
    }
    header.push('\n');

    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(data);
    out
}
