// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Field codec: scalar, UTF-8 string, and n-dimensional array encode/decode
//! with truncation semantics and per-field status bits.
//!
//! Bounds-checked primitive access follows the same shape as a CDR2
//! `Cursor`/`CursorMut` generated accessor: fixed
//! byte ranges, copy in or out, never trust caller-supplied lengths
//! without checking them against the destination slice first. Unlike CDR2
//! this codec is native-endian only: there is no cross-endian interop, the
//! region is only ever read by processes on the machine that wrote it.

use crate::error::{FlexShmError, Result};
use crate::schema::{Dtype, FieldKind, ScalarKind};

/// Per-field status bits.
///
/// Exactly one of `UNWRITTEN`, `TRUNCATED`, `VALID` holds at any stable
/// read; `MODIFIED` may co-occur with `VALID` or `TRUNCATED` but never
/// with `UNWRITTEN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldStatus(u8);

impl FieldStatus {
    pub const VALID: u8 = 1 << 0;
    pub const MODIFIED: u8 = 1 << 1;
    pub const TRUNCATED: u8 = 1 << 2;
    pub const UNWRITTEN: u8 = 1 << 3;

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn unwritten() -> Self {
        Self(Self::UNWRITTEN)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn valid(self) -> bool {
        self.0 & Self::VALID != 0
    }

    #[must_use]
    pub const fn modified(self) -> bool {
        self.0 & Self::MODIFIED != 0
    }

    #[must_use]
    pub const fn truncated(self) -> bool {
        self.0 & Self::TRUNCATED != 0
    }

    #[must_use]
    pub const fn unwritten_flag(self) -> bool {
        self.0 & Self::UNWRITTEN != 0
    }

    /// Clear `MODIFIED`, preserving the rest (used by `reset_modified=true`
    /// reads, and by ring-slot propagation onto a freshly claimed slot).
    #[must_use]
    pub const fn without_modified(self) -> Self {
        Self(self.0 & !Self::MODIFIED)
    }
}

/// Untagged array payload, one variant per supported dtype.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    /// 0/1 per element, one byte each.
    Bool8(Vec<u8>),
}

macro_rules! array_data_common {
    ($( $variant:ident($t:ty) ),* $(,)?) => {
        impl ArrayData {
            #[must_use]
            pub fn dtype(&self) -> Dtype {
                match self {
                    $( Self::$variant(_) => Dtype::$variant, )*
                }
            }

            #[must_use]
            pub fn len(&self) -> usize {
                match self {
                    $( Self::$variant(v) => v.len(), )*
                }
            }

            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }

            /// Flatten to native-endian bytes in row-major (declaration) order.
            #[must_use]
            pub fn to_ne_bytes(&self) -> Vec<u8> {
                match self {
                    $( Self::$variant(v) => v.iter().flat_map(|x| x.to_ne_bytes()).collect(), )*
                }
            }
        }
    };
}

array_data_common!(
    F32(f32), F64(f64), I8(i8), I16(i16), I32(i32), I64(i64),
    U8(u8), U16(u16), U32(u32), U64(u64), Bool8(u8),
);

impl ArrayData {
    /// Read `count` native-endian elements of `dtype` out of `src`.
    ///
    /// `src` must contain at least `count * dtype.size()` bytes.
    fn from_ne_bytes(dtype: Dtype, src: &[u8], count: usize) -> Self {
        macro_rules! collect {
            ($t:ty) => {{
                let w = std::mem::size_of::<$t>();
                (0..count)
                    .map(|i| {
                        let mut buf = [0u8; std::mem::size_of::<$t>()];
                        buf.copy_from_slice(&src[i * w..i * w + w]);
                        <$t>::from_ne_bytes(buf)
                    })
                    .collect()
            }};
        }
        match dtype {
            Dtype::F32 => Self::F32(collect!(f32)),
            Dtype::F64 => Self::F64(collect!(f64)),
            Dtype::I8 => Self::I8(collect!(i8)),
            Dtype::I16 => Self::I16(collect!(i16)),
            Dtype::I32 => Self::I32(collect!(i32)),
            Dtype::I64 => Self::I64(collect!(i64)),
            Dtype::U8 => Self::U8(collect!(u8)),
            Dtype::U16 => Self::U16(collect!(u16)),
            Dtype::U32 => Self::U32(collect!(u32)),
            Dtype::U64 => Self::U64(collect!(u64)),
            Dtype::Bool8 => Self::Bool8(src[..count].to_vec()),
        }
    }
}

/// A value supplied to `write`. `write` takes `&[(&str, FieldValue)]` rather
/// than keyword arguments, since Rust has no kwargs surface.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    F64(f64),
    I32(i32),
    Bool8(bool),
    Str(String),
    Array { data: ArrayData, shape: Vec<usize> },
}

/// A value decoded from a snapshot, paired with its [`FieldStatus`] by the
/// caller into a plain record of tagged values plus a parallel array of
/// status bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    F64(f64),
    I32(i32),
    Bool8(bool),
    Str(String),
    Array { data: ArrayData, shape: Vec<usize> },
}

/// Encode `value` into `dst` (exactly `kind.byte_capacity()` bytes) per the
/// field's declared kind, returning the resulting status. `MODIFIED` is
/// always set, regardless of whether the new value differs from the old one.
///
/// # Errors
///
/// Returns [`FlexShmError::KindMismatch`] if `value`'s variant does not
/// match `kind`.
pub fn encode_field(field_name: &str, kind: &FieldKind, value: &FieldValue, dst: &mut [u8]) -> Result<FieldStatus> {
    debug_assert_eq!(dst.len(), kind.byte_capacity());
    match (kind, value) {
        (FieldKind::Scalar(ScalarKind::F64), FieldValue::F64(v)) => {
            dst.copy_from_slice(&v.to_ne_bytes());
            Ok(FieldStatus::from_bits(FieldStatus::VALID | FieldStatus::MODIFIED))
        }
        (FieldKind::Scalar(ScalarKind::I32), FieldValue::I32(v)) => {
            dst.copy_from_slice(&v.to_ne_bytes());
            Ok(FieldStatus::from_bits(FieldStatus::VALID | FieldStatus::MODIFIED))
        }
        (FieldKind::Scalar(ScalarKind::Bool8), FieldValue::Bool8(v)) => {
            dst[0] = u8::from(*v);
            Ok(FieldStatus::from_bits(FieldStatus::VALID | FieldStatus::MODIFIED))
        }
        (FieldKind::String { capacity_chars }, FieldValue::Str(s)) => {
            Ok(encode_string(*capacity_chars, s, dst))
        }
        (FieldKind::Array { dtype, shape }, FieldValue::Array { data, shape: src_shape }) => {
            encode_array(field_name, *dtype, shape, data, src_shape, dst)
        }
        _ => Err(FlexShmError::KindMismatch {
            field: field_name.to_string(),
            expected: kind.kind_name(),
        }),
    }
}

/// Decode the field's current status byte and data block into a value.
#[must_use]
pub fn decode_field(kind: &FieldKind, status: FieldStatus, src: &[u8]) -> DecodedValue {
    debug_assert_eq!(src.len(), kind.byte_capacity());
    match kind {
        FieldKind::Scalar(ScalarKind::F64) => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(src);
            DecodedValue::F64(f64::from_ne_bytes(buf))
        }
        FieldKind::Scalar(ScalarKind::I32) => {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(src);
            DecodedValue::I32(i32::from_ne_bytes(buf))
        }
        FieldKind::Scalar(ScalarKind::Bool8) => DecodedValue::Bool8(src[0] != 0),
        FieldKind::String { capacity_chars } => decode_string(*capacity_chars, status, src),
        FieldKind::Array { dtype, shape } => {
            let count: usize = shape.iter().product();
            DecodedValue::Array {
                data: ArrayData::from_ne_bytes(*dtype, src, count),
                shape: shape.clone(),
            }
        }
    }
}

/// Encode a UTF-8 string, truncating on a character boundary if it
/// overflows `capacity_chars` characters or `4 * capacity_chars` bytes.
fn encode_string(capacity_chars: usize, value: &str, dst: &mut [u8]) -> FieldStatus {
    let max_bytes = 4 * capacity_chars;
    let char_count = value.chars().count();

    let (prefix_len, status) = if value.len() <= max_bytes && char_count <= capacity_chars {
        (value.len(), FieldStatus::VALID)
    } else {
        let mut byte_len = 0usize;
        let mut chars = 0usize;
        for ch in value.chars() {
            let next_bytes = byte_len + ch.len_utf8();
            if next_bytes > max_bytes || chars + 1 > capacity_chars {
                break;
            }
            byte_len = next_bytes;
            chars += 1;
        }
        (byte_len, FieldStatus::TRUNCATED)
    };

    dst[..4].copy_from_slice(&(prefix_len as u32).to_ne_bytes());
    dst[4..4 + prefix_len].copy_from_slice(value[..prefix_len].as_bytes());
    for b in &mut dst[4 + prefix_len..] {
        *b = 0;
    }
    FieldStatus::from_bits(status | FieldStatus::MODIFIED)
}

fn decode_string(capacity_chars: usize, status: FieldStatus, src: &[u8]) -> DecodedValue {
    if status.unwritten_flag() {
        return DecodedValue::Str(String::new());
    }
    let mut len_buf = [0u8; 4];
    len_buf.copy_from_slice(&src[..4]);
    let len = (u32::from_ne_bytes(len_buf) as usize).min(4 * capacity_chars);
    let payload = &src[4..4 + len];
    // Only this codec ever writes `payload`, always on a char boundary.
    let s = std::str::from_utf8(payload).unwrap_or("").to_string();
    DecodedValue::Str(s)
}

/// Encode an array, truncating (copy-prefix, zero-fill remainder) when the
/// source's dtype-matched byte length or shape does not exactly match the
/// declared capacity. `VALID` is only set when both the byte length and the
/// shape match exactly.
///
/// # Errors
///
/// Returns [`FlexShmError::KindMismatch`] if `data`'s dtype differs from
/// the declared dtype.
fn encode_array(
    field_name: &str,
    declared_dtype: Dtype,
    declared_shape: &[usize],
    data: &ArrayData,
    src_shape: &[usize],
    dst: &mut [u8],
) -> Result<FieldStatus> {
    if data.dtype() != declared_dtype {
        return Err(FlexShmError::KindMismatch {
            field: field_name.to_string(),
            expected: "array",
        });
    }
    let src_bytes = data.to_ne_bytes();
    let capacity = dst.len();
    let exact = src_bytes.len() == capacity && src_shape == declared_shape;

    let status = if exact {
        dst.copy_from_slice(&src_bytes);
        FieldStatus::VALID
    } else {
        let n = src_bytes.len().min(capacity);
        dst[..n].copy_from_slice(&src_bytes[..n]);
        for b in &mut dst[n..] {
            *b = 0;
        }
        FieldStatus::TRUNCATED
    };
    Ok(FieldStatus::from_bits(status | FieldStatus::MODIFIED))
}
