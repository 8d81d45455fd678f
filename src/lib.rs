// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # flexshm - lock-free SPMC shared-memory record exchange
//!
//! A single producer publishes fixed-layout records into a named shared
//! memory region; any number of consumers in other processes attach and
//! read them without taking a lock. The byte layout is derived once from a
//! [`Schema`] ([`schema`]) into a [`layout::Layout`], so any process that
//! compiles the same schema agrees on where every field lives.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use flexshm::transport::shm::segment::PosixProvider;
//! use flexshm::{Exchange, FieldValue, Schema};
//!
//! fn main() -> flexshm::Result<()> {
//!     let schema = Schema::from_tokens([("x", "f64"), ("y", "f64")])?;
//!     let provider = Arc::new(PosixProvider);
//!
//!     let mut writer = Exchange::new(provider.clone(), schema.clone(), "/pose", true, 4)?;
//!     writer.write(&[("x", FieldValue::F64(1.0)), ("y", FieldValue::F64(2.0))])?;
//!     writer.finalize()?;
//!
//!     let mut reader = Exchange::new(provider, schema, "/pose", false, 4)?;
//!     if let Some(snap) = reader.read(Duration::from_millis(50), false, false)? {
//!         println!("x = {:?}", snap.field("x").unwrap().value);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------------------------------+
//! |                            Exchange                             |
//! |    new / write / finalize / read / close / unlink              |
//! +-----------------------------------------------------------------+
//! |  Region              |  RingController        |  codec          |
//! |  header + attach     |  slot claim, FIFO/      |  scalar/string/ |
//! |  validation          |  latest, lap handling   |  array encode   |
//! +-----------------------------------------------------------------+
//! |  slot: even/odd seq publication protocol                        |
//! +-----------------------------------------------------------------+
//! |  segment: injected ShmProvider (POSIX shm, or an in-memory      |
//! |  test double)                                                   |
//! +-----------------------------------------------------------------+
//! |  schema -> layout: deterministic byte offsets                   |
//! +-----------------------------------------------------------------+
//! ```
//!
//! ## Modules
//!
//! - [`schema`] - record schema and type-token parsing
//! - [`layout`] - schema-to-byte-layout compiler
//! - [`codec`] - scalar/string/array field encode and decode
//! - [`region`] - region header, create/attach, validation
//! - [`transport::shm`] - injected provider, slot protocol, ring controller
//! - [`registry`] - process-local producer name registry
//! - [`exchange`] - the public `Exchange` API
//! - [`error`] - crate-wide error type
//! - [`config`] - tunable constants (retry budgets, poll interval)

pub mod codec;
pub mod config;
pub mod error;
pub mod exchange;
pub mod layout;
pub mod region;
pub mod registry;
pub mod schema;
pub mod transport;

pub use codec::{ArrayData, DecodedValue, FieldStatus, FieldValue};
pub use error::{FlexShmError, Result};
pub use exchange::{Exchange, FieldView, Snapshot};
pub use schema::{Dtype, Field, FieldKind, Schema, ScalarKind};

/// `flexshm` version string.
pub const VERSION: &str = "0.1.0";
