// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compile-time tunables — single source of truth.
//!
//! Level 1 (static): the constants below are fixed by the wire format and
//! the retry/backoff policy. There is no Level 2 (dynamic) tier — unlike a
//! discovery protocol's port negotiation, a schema and its derived layout
//! are fixed for the lifetime of a region.

/// Region header magic: ASCII "FSM1" read as a native `u32`.
pub const MAGIC: u32 = 0x4653_4D31;

/// Region/slot-layout format version. Attach fails on a differing value.
pub const VERSION: u16 = 1;

/// Bounded retry budget for a torn snapshot read before `TornRead` is reported.
pub const DEFAULT_TORN_READ_RETRIES: u32 = 256;

/// Sleep granularity a blocking `read(timeout>0)` falls back to once
/// `crossbeam::utils::Backoff` has exhausted its spin/yield budget and the
/// ring is still empty.
pub const POLL_SLEEP: std::time::Duration = std::time::Duration::from_micros(200);

/// Round a size up to the OS page size (4 KiB on every target this crate
/// supports; region sizing does not need `sysconf(_SC_PAGESIZE)` precision
/// because over-rounding only wastes address space, never correctness).
#[must_use]
pub fn round_to_page(size: usize) -> usize {
    const PAGE_SIZE: usize = 4096;
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}
