// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Crate-wide error type.
//!
//! One enum covers every fallible boundary in the crate: schema
//! compilation, region attach, write-time argument errors, and the
//! read-time retry/timeout outcomes. Each variant carries the context a
//! caller needs to decide whether to retry.

use std::fmt;
use std::io;

/// Errors returned by `flexshm` operations.
#[derive(Debug)]
pub enum FlexShmError {
    /// Bad type token, duplicate field name, or unsupported dtype.
    SchemaError(String),
    /// Attach-time header disagreement (magic, version, slot layout, or schema hash).
    SchemaMismatch(String),
    /// A producer already holds this name open in this process.
    NameInUse(String),
    /// Named region does not exist.
    NotFound(String),
    /// The injected shared-memory provider failed.
    ProviderError(io::Error),
    /// `write` referenced a field name absent from the schema.
    UnknownField(String),
    /// `write` supplied a value whose dtype does not match the field's declared kind.
    KindMismatch { field: String, expected: &'static str },
    /// Read retry budget exhausted without observing a stable (even) sequence.
    TornRead { attempts: u32 },
    /// `read` deadline elapsed with no new data.
    Timeout,
    /// Operation attempted on a detached exchange.
    Closed,
    /// `reset_modified=true` used with `K>1`, or `finalize()` called with `K==1`.
    ModeError(String),
}

impl fmt::Display for FlexShmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SchemaError(msg) => write!(f, "schema error: {msg}"),
            Self::SchemaMismatch(msg) => write!(f, "schema mismatch: {msg}"),
            Self::NameInUse(name) => write!(f, "name already in use by this process: {name}"),
            Self::NotFound(name) => write!(f, "region not found: {name}"),
            Self::ProviderError(e) => write!(f, "shared-memory provider error: {e}"),
            Self::UnknownField(name) => write!(f, "unknown field: {name}"),
            Self::KindMismatch { field, expected } => {
                write!(f, "field '{field}' kind mismatch: expected {expected}")
            }
            Self::TornRead { attempts } => write!(f, "torn read after {attempts} attempts"),
            Self::Timeout => write!(f, "read timed out"),
            Self::Closed => write!(f, "operation on closed exchange"),
            Self::ModeError(msg) => write!(f, "mode error: {msg}"),
        }
    }
}

impl std::error::Error for FlexShmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ProviderError(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for `flexshm` operations.
pub type Result<T> = std::result::Result<T, FlexShmError>;
