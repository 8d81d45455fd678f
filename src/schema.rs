// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Record schema and type-token parsing.
//!
//! A [`Schema`] is an ordered list of [`Field`]s. Each field has a
//! [`FieldKind`] — scalar, string, or array — produced either directly or
//! by parsing a type token such as `"f64"`, `"str[32]"`, or
//! `"u8[2,2]"`. The declaration-generation surface that turns a
//! user-declared record type into this normalized list lives outside the
//! core; this module is the narrow interface it targets.

use crate::error::{FlexShmError, Result};
use std::fmt;

/// Fixed-width scalar kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    F64,
    I32,
    Bool8,
}

impl ScalarKind {
    /// Width in bytes, which doubles as the field's required alignment.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::F64 => 8,
            Self::I32 => 4,
            Self::Bool8 => 1,
        }
    }

    const fn token(self) -> &'static str {
        match self {
            Self::F64 => "f64",
            Self::I32 => "i32",
            Self::Bool8 => "bool8",
        }
    }
}

/// Numeric array element dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dtype {
    F32,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    Bool8,
}

impl Dtype {
    /// Element size in bytes, which doubles as the array's required alignment.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 | Self::Bool8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::F32 | Self::I32 | Self::U32 => 4,
            Self::F64 | Self::I64 | Self::U64 => 8,
        }
    }

    const fn token(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::Bool8 => "bool8",
        }
    }

    fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "f32" => Self::F32,
            "f64" => Self::F64,
            "i8" => Self::I8,
            "i16" => Self::I16,
            "i32" => Self::I32,
            "i64" => Self::I64,
            "u8" => Self::U8,
            "u16" => Self::U16,
            "u32" => Self::U32,
            "u64" => Self::U64,
            "bool8" => Self::Bool8,
            _ => return None,
        })
    }
}

/// A field's kind and kind-specific parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(ScalarKind),
    String { capacity_chars: usize },
    Array { dtype: Dtype, shape: Vec<usize> },
}

impl FieldKind {
    /// Natural alignment for this field's data: scalar width, array
    /// element size, or 4 for a string's length prefix.
    #[must_use]
    pub fn alignment(&self) -> usize {
        match self {
            Self::Scalar(s) => s.size(),
            Self::String { .. } => 4,
            Self::Array { dtype, .. } => dtype.size(),
        }
    }

    /// On-wire byte capacity of this field's data block.
    #[must_use]
    pub fn byte_capacity(&self) -> usize {
        match self {
            Self::Scalar(s) => s.size(),
            Self::String { capacity_chars } => 4 + 4 * capacity_chars,
            Self::Array { dtype, shape } => {
                shape.iter().product::<usize>() * dtype.size()
            }
        }
    }

    /// Canonical normalized token, e.g. `"f64"`, `"str[32]"`, `"u8[2,2]"`,
    /// used both for round-tripping and as schema-hash input.
    #[must_use]
    pub fn canonical_token(&self) -> String {
        match self {
            Self::Scalar(s) => s.token().to_string(),
            Self::String { capacity_chars } => format!("str[{capacity_chars}]"),
            Self::Array { dtype, shape } => {
                let dims: Vec<String> = shape.iter().map(ToString::to_string).collect();
                format!("{}[{}]", dtype.token(), dims.join(","))
            }
        }
    }

    /// A short type name for error messages (e.g. `KindMismatch`).
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Scalar(ScalarKind::F64) => "f64",
            Self::Scalar(ScalarKind::I32) => "i32",
            Self::Scalar(ScalarKind::Bool8) => "bool8",
            Self::String { .. } => "string",
            Self::Array { .. } => "array",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_token())
    }
}

/// Parse a type token into a [`FieldKind`].
///
/// Accepted shapes: a bare scalar tag (`f64`, `i32`, `bool8`), `str[N]`
/// with `N` a non-negative integer character count, or `dtype[d1,d2,...]`
/// with a recognized dtype and a non-empty shape of non-negative integers.
///
/// # Errors
///
/// Returns [`FlexShmError::SchemaError`] for an unknown tag, malformed
/// brackets, a non-integer or negative dimension, or an unknown dtype.
pub fn parse_type_token(token: &str) -> Result<FieldKind> {
    let token = token.trim();

    if let Some(kind) = bare_scalar(token) {
        return Ok(FieldKind::Scalar(kind));
    }

    let Some(open) = token.find('[') else {
        return Err(FlexShmError::SchemaError(format!(
            "unknown type token: {token:?}"
        )));
    };
    if !token.ends_with(']') {
        return Err(FlexShmError::SchemaError(format!(
            "malformed brackets in type token: {token:?}"
        )));
    }
    let head = &token[..open];
    let body = &token[open + 1..token.len() - 1];

    if head == "str" {
        let n = parse_dim(body, token)?;
        return Ok(FieldKind::String { capacity_chars: n });
    }

    let Some(dtype) = Dtype::parse(head) else {
        return Err(FlexShmError::SchemaError(format!(
            "unknown dtype: {head:?}"
        )));
    };
    if body.is_empty() {
        return Err(FlexShmError::SchemaError(format!(
            "array shape must be non-empty: {token:?}"
        )));
    }
    let mut shape = Vec::new();
    for part in body.split(',') {
        shape.push(parse_dim(part, token)?);
    }
    Ok(FieldKind::Array { dtype, shape })
}

fn bare_scalar(token: &str) -> Option<ScalarKind> {
    match token {
        "f64" => Some(ScalarKind::F64),
        "i32" => Some(ScalarKind::I32),
        "bool8" => Some(ScalarKind::Bool8),
        _ => None,
    }
}

fn parse_dim(part: &str, whole: &str) -> Result<usize> {
    let part = part.trim();
    if part.starts_with('-') {
        return Err(FlexShmError::SchemaError(format!(
            "negative dimension in {whole:?}"
        )));
    }
    part.parse::<usize>().map_err(|_| {
        FlexShmError::SchemaError(format!("non-integer dimension in {whole:?}"))
    })
}

/// One named field in a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
}

impl Field {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self { name: name.into(), kind }
    }
}

/// An ordered, validated record schema.
///
/// `default` values from the user-facing record declaration
/// (`(name, kind_token, default)`) are accepted by [`Schema::from_tokens`]
/// for API symmetry with that external interface but have no effect on
/// core behavior: slots always start `UNWRITTEN` regardless of any
/// declared default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Build and validate a schema from already-parsed fields.
    ///
    /// # Errors
    ///
    /// Returns [`FlexShmError::SchemaError`] on a duplicate field name.
    pub fn new(fields: Vec<Field>) -> Result<Self> {
        let mut seen = std::collections::HashSet::with_capacity(fields.len());
        for f in &fields {
            if !seen.insert(f.name.as_str()) {
                return Err(FlexShmError::SchemaError(format!(
                    "duplicate field name: {}",
                    f.name
                )));
            }
        }
        Ok(Self { fields })
    }

    /// Build and validate a schema from `(name, type_token, default)` triples,
    /// the normalized shape of the external interface.
    ///
    /// # Errors
    ///
    /// Returns [`FlexShmError::SchemaError`] for a bad type token or a
    /// duplicate field name.
    pub fn from_tokens<S: AsRef<str>>(
        decls: impl IntoIterator<Item = (S, S)>,
    ) -> Result<Self> {
        let mut fields = Vec::new();
        for (name, token) in decls {
            let kind = parse_type_token(token.as_ref())?;
            fields.push(Field::new(name.as_ref(), kind));
        }
        Self::new(fields)
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_scalars() {
        assert_eq!(parse_type_token("f64").unwrap(), FieldKind::Scalar(ScalarKind::F64));
        assert_eq!(parse_type_token("i32").unwrap(), FieldKind::Scalar(ScalarKind::I32));
        assert_eq!(parse_type_token("bool8").unwrap(), FieldKind::Scalar(ScalarKind::Bool8));
    }

    #[test]
    fn parses_string_capacity() {
        let kind = parse_type_token("str[4]").unwrap();
        assert_eq!(kind, FieldKind::String { capacity_chars: 4 });
        assert_eq!(kind.byte_capacity(), 4 + 4 * 4);
    }

    #[test]
    fn parses_zero_length_string() {
        let kind = parse_type_token("str[0]").unwrap();
        assert_eq!(kind.byte_capacity(), 4);
    }

    #[test]
    fn parses_array_shape() {
        let kind = parse_type_token("u8[2,2]").unwrap();
        assert_eq!(
            kind,
            FieldKind::Array { dtype: Dtype::U8, shape: vec![2, 2] }
        );
        assert_eq!(kind.byte_capacity(), 4);
    }

    #[test]
    fn parses_zero_sized_array() {
        let kind = parse_type_token("f32[0]").unwrap();
        assert_eq!(kind.byte_capacity(), 0);
    }

    #[test]
    fn rejects_unknown_tag() {
        assert!(parse_type_token("frobnicate").is_err());
    }

    #[test]
    fn rejects_malformed_brackets() {
        assert!(parse_type_token("u8[2,2").is_err());
        assert!(parse_type_token("u82,2]").is_err());
    }

    #[test]
    fn rejects_non_integer_dims() {
        assert!(parse_type_token("u8[2,x]").is_err());
    }

    #[test]
    fn rejects_negative_dims() {
        assert!(parse_type_token("u8[-1]").is_err());
    }

    #[test]
    fn rejects_unknown_dtype() {
        assert!(parse_type_token("q16[4]").is_err());
    }

    #[test]
    fn rejects_empty_array_shape() {
        assert!(parse_type_token("u8[]").is_err());
    }

    #[test]
    fn canonical_token_round_trips() {
        for token in ["f64", "i32", "bool8", "str[4]", "u8[2,2]", "f32[3]"] {
            let kind = parse_type_token(token).unwrap();
            assert_eq!(kind.canonical_token(), token);
        }
    }

    #[test]
    fn schema_rejects_duplicate_names() {
        let fields = vec![
            Field::new("x", FieldKind::Scalar(ScalarKind::F64)),
            Field::new("x", FieldKind::Scalar(ScalarKind::I32)),
        ];
        assert!(Schema::new(fields).is_err());
    }

    #[test]
    fn empty_schema_is_valid() {
        assert!(Schema::new(Vec::new()).is_ok());
    }

    #[test]
    fn from_tokens_builds_schema() {
        let schema = Schema::from_tokens([("x", "f64"), ("y", "f64"), ("msg", "str[4]")]).unwrap();
        assert_eq!(schema.fields().len(), 3);
        assert_eq!(schema.field_index("msg"), Some(2));
    }
}
