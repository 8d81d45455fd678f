// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Even/odd sequence-number slot publication protocol.
//!
//! A slot whose header is fixed (16 bytes: `seq`, `write_id`) but whose
//! status block and data block are schema-derived and addressed through a
//! [`crate::layout::Layout`] rather than a `repr(C)` struct.
//!
//! # Memory Ordering
//!
//! - **Relaxed** on the odd ("writing") transition: the odd value alone
//!   tells readers "don't trust this payload", regardless of ordering —
//!   readers spin until they observe the even commit.
//! - **Release** on the even ("committed") transition: guarantees every
//!   status byte and data byte written since the odd transition is visible
//!   to any reader whose matching load is Acquire.
//! - **Acquire** on both reads of `seq` in a snapshot: pairs with the
//!   writer's Release so a reader that sees an even, unchanged `seq` is
//!   guaranteed to see the bytes that went with it.
//!
//! Field-level encode/decode against the copied snapshot lives in
//! [`crate::codec`]; this module only owns the raw byte protocol.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::Backoff;

use crate::config::DEFAULT_TORN_READ_RETRIES;
use crate::error::{FlexShmError, Result};

/// Byte offset of the `seq` field within a slot.
pub const SEQ_OFFSET: usize = 0;
/// Byte offset of the `write_id` field within a slot.
pub const WRITE_ID_OFFSET: usize = 8;

/// View an 8-byte-aligned region of a live slot as an atomic `u64`.
///
/// # Safety
///
/// `base` must point at a slot at least `offset + 8` bytes long, living in
/// memory that outlives the returned reference, and `offset` must be
/// 8-byte aligned (true for `SEQ_OFFSET`/`WRITE_ID_OFFSET` by construction:
/// [`crate::layout::SLOT_HEADER_SIZE`] is 16).
unsafe fn atomic_u64_at<'a>(base: *mut u8, offset: usize) -> &'a AtomicU64 {
    &*base.add(offset).cast::<AtomicU64>()
}

fn read_u64_at(slot: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&slot[offset..offset + 8]);
    u64::from_ne_bytes(buf)
}

/// Mutable access to one live slot within the mapped region, scoped to a
/// single producer publication.
pub struct SlotWriter<'a> {
    slot: &'a mut [u8],
}

impl<'a> SlotWriter<'a> {
    /// # Panics
    ///
    /// Panics if `slot` is shorter than the slot header.
    #[must_use]
    pub fn new(slot: &'a mut [u8]) -> Self {
        assert!(slot.len() >= crate::layout::SLOT_HEADER_SIZE, "slot shorter than header");
        Self { slot }
    }

    #[must_use]
    pub fn seq(&self) -> u64 {
        read_u64_at(self.slot, SEQ_OFFSET)
    }

    #[must_use]
    pub fn write_id(&self) -> u64 {
        read_u64_at(self.slot, WRITE_ID_OFFSET)
    }

    /// Step 1: transition `seq` to odd (previous + 1), marking the slot as
    /// being written. Returns the new (odd) sequence value.
    pub fn begin_publish(&mut self) -> u64 {
        let prev = self.seq();
        let next = prev + 1;
        // SAFETY: slot is at least SLOT_HEADER_SIZE bytes (checked in `new`).
        let atomic = unsafe { atomic_u64_at(self.slot.as_mut_ptr(), SEQ_OFFSET) };
        atomic.store(next, Ordering::Relaxed);
        next
    }

    /// Mutable access to the status block + field data block (everything
    /// after the 16-byte header), for [`crate::codec`] to write into.
    pub fn body_mut(&mut self) -> &mut [u8] {
        &mut self.slot[crate::layout::SLOT_HEADER_SIZE..]
    }

    /// Step 3: record the new global publication id.
    pub fn set_write_id(&mut self, write_id: u64) {
        // SAFETY: see `begin_publish`.
        let atomic = unsafe { atomic_u64_at(self.slot.as_mut_ptr(), WRITE_ID_OFFSET) };
        atomic.store(write_id, Ordering::Relaxed);
    }

    /// Step 4: transition `seq` to even (odd + 1) with Release ordering,
    /// publishing the slot.
    pub fn commit(&mut self) {
        let odd = self.seq();
        // SAFETY: see `begin_publish`.
        let atomic = unsafe { atomic_u64_at(self.slot.as_mut_ptr(), SEQ_OFFSET) };
        atomic.store(odd + 1, Ordering::Release);
    }
}

/// Take a consistent snapshot of `slot` using the bounded retry-on-tear
/// protocol.
///
/// # Errors
///
/// Returns [`FlexShmError::TornRead`] if `seq` never stabilizes within
/// `retry_budget` attempts.
pub fn snapshot(slot: &[u8], retry_budget: u32) -> Result<Vec<u8>> {
    // SAFETY: `slot` outlives this call; offset 0 is 8-byte aligned.
    let atomic = unsafe { atomic_u64_at(slot.as_ptr() as *mut u8, SEQ_OFFSET) };
    let backoff = Backoff::new();
    for _ in 0..retry_budget {
        let seq0 = atomic.load(Ordering::Acquire);
        if seq0 & 1 == 1 {
            backoff.snooze();
            continue;
        }
        let buf = slot.to_vec();
        let seq1 = atomic.load(Ordering::Acquire);
        if seq1 != seq0 {
            backoff.snooze();
            continue;
        }
        return Ok(buf);
    }
    Err(FlexShmError::TornRead { attempts: retry_budget })
}

/// Default-budget convenience wrapper over [`snapshot`].
///
/// # Errors
///
/// See [`snapshot`].
pub fn snapshot_default(slot: &[u8]) -> Result<Vec<u8>> {
    snapshot(slot, DEFAULT_TORN_READ_RETRIES)
}

#[must_use]
pub fn seq_of(slot: &[u8]) -> u64 {
    read_u64_at(slot, SEQ_OFFSET)
}

#[must_use]
pub fn write_id_of(slot: &[u8]) -> u64 {
    read_u64_at(slot, WRITE_ID_OFFSET)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::SLOT_HEADER_SIZE;

    fn blank_slot(extra: usize) -> Vec<u8> {
        vec![0u8; SLOT_HEADER_SIZE + extra]
    }

    #[test]
    fn publish_cycle_leaves_seq_even() {
        let mut slot = blank_slot(8);
        let mut w = SlotWriter::new(&mut slot);
        let odd = w.begin_publish();
        assert_eq!(odd % 2, 1);
        w.body_mut()[0] = 0xAB;
        w.set_write_id(1);
        w.commit();
        assert_eq!(w.seq() % 2, 0);
        assert_eq!(w.write_id(), 1);
    }

    #[test]
    fn snapshot_succeeds_on_stable_even_seq() {
        let mut slot = blank_slot(4);
        {
            let mut w = SlotWriter::new(&mut slot);
            w.begin_publish();
            w.set_write_id(7);
            w.commit();
        }
        let snap = snapshot_default(&slot).unwrap();
        assert_eq!(write_id_of(&snap), 7);
    }

    #[test]
    fn snapshot_fails_when_seq_stays_odd() {
        let mut slot = blank_slot(0);
        {
            let mut w = SlotWriter::new(&mut slot);
            w.begin_publish(); // never committed: seq stuck odd
        }
        let err = snapshot(&slot, 4).unwrap_err();
        match err {
            FlexShmError::TornRead { attempts } => assert_eq!(attempts, 4),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn sequential_publications_increment_seq_by_two() {
        let mut slot = blank_slot(0);
        let mut w = SlotWriter::new(&mut slot);
        w.begin_publish();
        w.commit();
        let first = w.seq();
        w.begin_publish();
        w.commit();
        assert_eq!(w.seq(), first + 2);
    }
}
