// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Ring controller: slot claiming, FIFO/`latest` reads, lap handling, and
//! status propagation across slot reuse.
//!
//! Field-level write-staging across possibly several [`crate::codec`] calls
//! followed by an explicit `finalize()`, supporting both `K==1`
//! (single-slot, implicit finalize) and `K>1` (ring, explicit finalize)
//! from one controller.

use crate::codec::FieldStatus;
use crate::error::{FlexShmError, Result};
use crate::layout::SLOT_HEADER_SIZE;
use crate::region::Region;
use crate::transport::shm::segment::ShmHandle;
use crate::transport::shm::slot::SlotWriter;

/// The slot a reader should snapshot next, and the cursor value to adopt
/// after a successful snapshot.
pub struct NextRead {
    pub index: u32,
    pub new_cursor: u64,
}

/// Per-producer ring state: which write cycle is open and the next global
/// `write_id` to assign. Not shared across processes — only the producer
/// mutates slot bodies and `write_idx`.
pub struct RingController {
    slot_count: u32,
    next_write_id: u64,
    cycle_open: bool,
}

impl RingController {
    #[must_use]
    pub fn new(slot_count: u32) -> Self {
        Self { slot_count, next_write_id: 0, cycle_open: false }
    }

    #[must_use]
    pub fn is_single_slot(&self) -> bool {
        self.slot_count == 1
    }

    fn slot_index<H: ShmHandle>(&self, region: &Region<H>) -> u32 {
        (region.write_idx() % u64::from(self.slot_count)) as u32
    }

    /// Open the current write cycle if it is not already open: mark the
    /// staging slot's `seq` odd, and in ring mode propagate status from the
    /// previously finalized slot onto the freshly claimed one. In
    /// single-slot mode there is no previous-slot propagation: `MODIFIED`
    /// accumulates until an explicit `reset_modified=true` read.
    pub fn begin_write_if_needed<H: ShmHandle>(&mut self, region: &mut Region<H>) {
        if self.cycle_open {
            return;
        }
        let idx = self.slot_index(region);
        if self.slot_count > 1 {
            self.propagate_status(region, idx);
        }
        let mut w = SlotWriter::new(region.slot_bytes_mut(idx));
        w.begin_publish();
        self.cycle_open = true;
    }

    fn propagate_status<H: ShmHandle>(&self, region: &mut Region<H>, cur_idx: u32) {
        if region.write_idx() == 0 {
            return; // nothing finalized yet; slot is already all-UNWRITTEN.
        }
        let k = u64::from(self.slot_count);
        let prev_idx = ((region.write_idx() + k - 1) % k) as u32;
        let (status_off, status_len) = {
            let l = region.layout();
            (l.status_block_offset, l.status_block_len)
        };
        let prev_status = region.slot_bytes(prev_idx)[status_off..status_off + status_len].to_vec();
        let block = &mut region.slot_bytes_mut(cur_idx)[status_off..status_off + status_len];
        for (dst, src) in block.iter_mut().zip(prev_status.iter()) {
            *dst = src & !FieldStatus::MODIFIED;
        }
    }

    /// Mutable access to the current staging slot's status+data block, for
    /// [`crate::codec`] to encode into. Panics if called before
    /// [`begin_write_if_needed`] opens a cycle.
    pub fn body_mut<'a, H: ShmHandle>(&self, region: &'a mut Region<H>) -> &'a mut [u8] {
        debug_assert!(self.cycle_open, "body_mut called with no open write cycle");
        let idx = self.slot_index(region);
        &mut region.slot_bytes_mut(idx)[SLOT_HEADER_SIZE..]
    }

    /// Explicit `finalize()`: runs the publish protocol's remaining steps
    /// (set `write_id`, commit) then advances `write_idx`. Ring mode only.
    ///
    /// # Errors
    ///
    /// Returns [`FlexShmError::ModeError`] if `slot_count == 1`.
    pub fn finalize<H: ShmHandle>(&mut self, region: &mut Region<H>) -> Result<u64> {
        if self.is_single_slot() {
            return Err(FlexShmError::ModeError(
                "finalize() is invalid in single-slot mode; write() implicitly finalizes".into(),
            ));
        }
        self.begin_write_if_needed(region); // allow finalize() with no prior write(): publishes an empty-delta slot
        Ok(self.commit_current(region))
    }

    /// Single-slot mode's implicit finalize, run by `Exchange::write` after
    /// every call: in single-slot mode every `write()` implicitly finalizes.
    pub fn finalize_single_slot<H: ShmHandle>(&mut self, region: &mut Region<H>) -> u64 {
        debug_assert!(self.is_single_slot());
        self.commit_current(region)
    }

    fn commit_current<H: ShmHandle>(&mut self, region: &mut Region<H>) -> u64 {
        let idx = self.slot_index(region);
        self.next_write_id += 1;
        let write_id = self.next_write_id;
        {
            let mut w = SlotWriter::new(region.slot_bytes_mut(idx));
            w.set_write_id(write_id);
            w.commit();
        }
        region.set_write_idx(region.write_idx() + 1);
        self.cycle_open = false;
        write_id
    }

    /// Occupancy: how many unread, not-yet-overwritten publications exist
    /// ahead of `cursor`.
    #[must_use]
    pub fn occupancy<H: ShmHandle>(&self, region: &Region<H>, cursor: u64) -> u64 {
        region.write_idx().saturating_sub(cursor).min(u64::from(self.slot_count))
    }

    /// Compute the next slot a reader should snapshot.
    /// Returns `None` if empty (`write_idx == cursor`, non-`latest` mode
    /// only — `latest` mode is "empty" only when nothing has ever been
    /// published).
    #[must_use]
    pub fn next_read<H: ShmHandle>(&self, region: &Region<H>, cursor: u64, latest: bool) -> Option<NextRead> {
        let w = region.write_idx();
        let k = u64::from(self.slot_count);
        if latest {
            if w == 0 || cursor >= w {
                return None;
            }
            let r = w - 1;
            return Some(NextRead { index: (r % k) as u32, new_cursor: w });
        }
        if w == cursor {
            return None;
        }
        let r = if w > cursor + k { w - k } else { cursor };
        Some(NextRead { index: (r % k) as u32, new_cursor: r + 1 })
    }
}

/// Clear all `MODIFIED` bits in `slot_index`'s status block, for an
/// explicit `reset_modified=true` read. Caller must ensure single-slot
/// mode — this
/// module does not re-check, since the mode error is reported by
/// [`crate::exchange`] before calling here.
pub fn clear_modified<H: ShmHandle>(region: &mut Region<H>, slot_index: u32) {
    let (status_off, status_len) = {
        let l = region.layout();
        (l.status_block_offset, l.status_block_len)
    };
    let block = &mut region.slot_bytes_mut(slot_index)[status_off..status_off + status_len];
    for b in block.iter_mut() {
        *b &= !FieldStatus::MODIFIED;
    }
}
