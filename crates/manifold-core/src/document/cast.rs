//! Scalar cast matrix for columnar document export
//!
//! For every (source value, target type) pair the cast is one of:
//!
//! - **exact** — the target carries the value faithfully;
//! - **lossy** — the value survives but changed representation or lost
//!   precision; the `converted` diagnostic bit is set;
//! - **impossible** — the value cannot be carried at all; reported as a
//!   `collision` bit on the output plane, never as a call failure.
//!
//! Numeric-family casts that preserve the value exactly (such as an
//! in-range `i64` narrowing to `i32`) are exact; formatting and parsing
//! casts to and from strings are always lossy; out-of-range and
//! non-numeric sources are impossible.

use super::DocValue;
use half::f16;

/// Target scalar types for field reads and `gather` columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// Boolean, one byte per cell
    Bool,
    /// Signed 8-bit integer
    I8,
    /// Signed 16-bit integer
    I16,
    /// Signed 32-bit integer
    I32,
    /// Signed 64-bit integer
    I64,
    /// Unsigned 8-bit integer
    U8,
    /// Unsigned 16-bit integer
    U16,
    /// Unsigned 32-bit integer
    U32,
    /// Unsigned 64-bit integer
    U64,
    /// Half-precision float
    F16,
    /// Single-precision float
    F32,
    /// Double-precision float
    F64,
    /// UTF-8 string; variable width, exported as offsets plus a tape
    Str,
    /// Raw binary; variable width, exported as offsets plus a tape
    Bytes,
}

impl ScalarType {
    /// Fixed cell width in bytes; zero for the variable-width types
    pub fn cell_size(self) -> usize {
        match self {
            ScalarType::Bool | ScalarType::I8 | ScalarType::U8 => 1,
            ScalarType::I16 | ScalarType::U16 | ScalarType::F16 => 2,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::I64 | ScalarType::U64 | ScalarType::F64 => 8,
            ScalarType::Str | ScalarType::Bytes => 0,
        }
    }

    /// Whether cells of this type are variable-width
    pub fn is_variable(self) -> bool {
        matches!(self, ScalarType::Str | ScalarType::Bytes)
    }

    fn signed_bounds(self) -> Option<(i128, i128)> {
        Some(match self {
            ScalarType::I8 => (i8::MIN as i128, i8::MAX as i128),
            ScalarType::I16 => (i16::MIN as i128, i16::MAX as i128),
            ScalarType::I32 => (i32::MIN as i128, i32::MAX as i128),
            ScalarType::I64 => (i64::MIN as i128, i64::MAX as i128),
            ScalarType::U8 => (0, u8::MAX as i128),
            ScalarType::U16 => (0, u16::MAX as i128),
            ScalarType::U32 => (0, u32::MAX as i128),
            ScalarType::U64 => (0, u64::MAX as i128),
            _ => return None,
        })
    }

    fn is_unsigned(self) -> bool {
        matches!(
            self,
            ScalarType::U8 | ScalarType::U16 | ScalarType::U32 | ScalarType::U64
        )
    }
}

/// A successfully cast scalar, normalized per target family
#[derive(Debug, Clone, PartialEq)]
pub enum CastScalar {
    /// Boolean result
    Bool(bool),
    /// Signed integer result, already range-checked for its target
    Int(i64),
    /// Unsigned integer result, already range-checked for its target
    UInt(u64),
    /// Floating result; narrowing to f32/f16 happens at cell write time
    Float(f64),
    /// String result
    Str(String),
    /// Binary result
    Bytes(Vec<u8>),
}

/// Cast outcome: the value plus the lossiness diagnosis
#[derive(Debug, Clone, PartialEq)]
pub struct Casted {
    /// The cast value
    pub value: CastScalar,
    /// Set when the cast was lossy or representation-changing
    pub converted: bool,
}

impl Casted {
    fn exact(value: CastScalar) -> Option<Casted> {
        Some(Casted {
            value,
            converted: false,
        })
    }

    fn lossy(value: CastScalar) -> Option<Casted> {
        Some(Casted {
            value,
            converted: true,
        })
    }
}

/// Cast a document node to a target scalar type
///
/// `None` is the impossible-cast outcome, reported upstream as a
/// collision bit.
pub fn cast_scalar(value: &DocValue, target: ScalarType) -> Option<Casted> {
    match target {
        ScalarType::Bool => cast_to_bool(value),
        ScalarType::I8
        | ScalarType::I16
        | ScalarType::I32
        | ScalarType::I64
        | ScalarType::U8
        | ScalarType::U16
        | ScalarType::U32
        | ScalarType::U64 => cast_to_integer(value, target),
        ScalarType::F16 | ScalarType::F32 | ScalarType::F64 => cast_to_float(value, target),
        ScalarType::Str => cast_to_string(value),
        ScalarType::Bytes => cast_to_bytes(value),
    }
}

fn cast_to_bool(value: &DocValue) -> Option<Casted> {
    match value {
        DocValue::Bool(b) => Casted::exact(CastScalar::Bool(*b)),
        DocValue::Int(0) | DocValue::UInt(0) => Casted::exact(CastScalar::Bool(false)),
        DocValue::Int(1) | DocValue::UInt(1) => Casted::exact(CastScalar::Bool(true)),
        DocValue::Int(_) | DocValue::UInt(_) => Casted::lossy(CastScalar::Bool(true)),
        DocValue::Float(f) if *f == 0.0 => Casted::exact(CastScalar::Bool(false)),
        DocValue::Float(f) if *f == 1.0 => Casted::exact(CastScalar::Bool(true)),
        DocValue::Float(f) if f.is_finite() => Casted::lossy(CastScalar::Bool(true)),
        DocValue::Str(s) if s == "true" => Casted::lossy(CastScalar::Bool(true)),
        DocValue::Str(s) if s == "false" => Casted::lossy(CastScalar::Bool(false)),
        _ => None,
    }
}

fn cast_to_integer(value: &DocValue, target: ScalarType) -> Option<Casted> {
    let (wide, lossy) = match value {
        DocValue::Int(i) => (*i as i128, false),
        DocValue::UInt(u) => (*u as i128, false),
        DocValue::Bool(b) => (*b as i128, false),
        DocValue::Float(f) => {
            if !f.is_finite() {
                return None;
            }
            let trunc = f.trunc();
            // Saturating float-to-int conversion; the bound check below
            // rejects anything that saturated past the target range.
            (trunc as i128, trunc != *f)
        }
        DocValue::Str(s) => {
            if let Ok(parsed) = s.parse::<i128>() {
                (parsed, true)
            } else if let Ok(parsed) = s.parse::<f64>() {
                if !parsed.is_finite() {
                    return None;
                }
                (parsed.trunc() as i128, true)
            } else {
                return None;
            }
        }
        _ => return None,
    };

    let (min, max) = target.signed_bounds()?;
    if wide < min || wide > max {
        return None;
    }
    let value = if target.is_unsigned() {
        CastScalar::UInt(wide as u64)
    } else {
        CastScalar::Int(wide as i64)
    };
    Some(Casted {
        value,
        converted: lossy,
    })
}

fn cast_to_float(value: &DocValue, target: ScalarType) -> Option<Casted> {
    let (wide, lossy_source) = match value {
        DocValue::Float(f) => (*f, false),
        DocValue::Int(i) => {
            let f = *i as f64;
            // Compare in i128: a saturating round trip through i64 would
            // report the extremes as exact.
            (f, f as i128 != *i as i128)
        }
        DocValue::UInt(u) => {
            let f = *u as f64;
            (f, f as u128 != *u as u128)
        }
        DocValue::Bool(b) => (*b as u8 as f64, false),
        DocValue::Str(s) => match s.parse::<f64>() {
            Ok(parsed) => (parsed, true),
            Err(_) => return None,
        },
        _ => return None,
    };

    let narrowed = match target {
        ScalarType::F64 => wide,
        ScalarType::F32 => wide as f32 as f64,
        ScalarType::F16 => f16::from_f64(wide).to_f64(),
        _ => unreachable!("cast_to_float called with a non-float target"),
    };
    let lossy = lossy_source || (narrowed != wide && !(narrowed.is_nan() && wide.is_nan()));
    Some(Casted {
        value: CastScalar::Float(narrowed),
        converted: lossy,
    })
}

fn cast_to_string(value: &DocValue) -> Option<Casted> {
    match value {
        DocValue::Str(s) => Casted::exact(CastScalar::Str(s.clone())),
        DocValue::Bool(b) => Casted::lossy(CastScalar::Str(b.to_string())),
        DocValue::Int(i) => Casted::lossy(CastScalar::Str(i.to_string())),
        DocValue::UInt(u) => Casted::lossy(CastScalar::Str(u.to_string())),
        DocValue::Float(f) => Casted::lossy(CastScalar::Str(f.to_string())),
        DocValue::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => Casted::lossy(CastScalar::Str(text.to_string())),
            Err(_) => None,
        },
        DocValue::Array(_) | DocValue::Object(_) => {
            Casted::lossy(CastScalar::Str(value.to_json_string()))
        }
        DocValue::Null => None,
    }
}

fn cast_to_bytes(value: &DocValue) -> Option<Casted> {
    match value {
        DocValue::Bytes(bytes) => Casted::exact(CastScalar::Bytes(bytes.clone())),
        DocValue::Str(s) => Casted::lossy(CastScalar::Bytes(s.as_bytes().to_vec())),
        _ => None,
    }
}

/// Write a fixed-width cast result into its little-endian cell
///
/// `out` must be exactly `target.cell_size()` bytes. Variable-width
/// targets are exported through offsets and a tape instead and are not
/// accepted here.
pub fn write_cell(target: ScalarType, value: &CastScalar, out: &mut [u8]) {
    debug_assert_eq!(out.len(), target.cell_size());
    match (target, value) {
        (ScalarType::Bool, CastScalar::Bool(b)) => out[0] = *b as u8,
        (ScalarType::I8, CastScalar::Int(i)) => out.copy_from_slice(&(*i as i8).to_le_bytes()),
        (ScalarType::I16, CastScalar::Int(i)) => out.copy_from_slice(&(*i as i16).to_le_bytes()),
        (ScalarType::I32, CastScalar::Int(i)) => out.copy_from_slice(&(*i as i32).to_le_bytes()),
        (ScalarType::I64, CastScalar::Int(i)) => out.copy_from_slice(&i.to_le_bytes()),
        (ScalarType::U8, CastScalar::UInt(u)) => out.copy_from_slice(&(*u as u8).to_le_bytes()),
        (ScalarType::U16, CastScalar::UInt(u)) => out.copy_from_slice(&(*u as u16).to_le_bytes()),
        (ScalarType::U32, CastScalar::UInt(u)) => out.copy_from_slice(&(*u as u32).to_le_bytes()),
        (ScalarType::U64, CastScalar::UInt(u)) => out.copy_from_slice(&u.to_le_bytes()),
        (ScalarType::F16, CastScalar::Float(f)) => {
            out.copy_from_slice(&f16::from_f64(*f).to_le_bytes())
        }
        (ScalarType::F32, CastScalar::Float(f)) => {
            out.copy_from_slice(&(*f as f32).to_le_bytes())
        }
        (ScalarType::F64, CastScalar::Float(f)) => out.copy_from_slice(&f.to_le_bytes()),
        _ => debug_assert!(false, "cast result does not match its target family"),
    }
}
