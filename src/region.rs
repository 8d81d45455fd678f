// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Region header and attach-time validation.
//!
//! Bit-exact header layout:
//!
//! ```text
//! 0  magic u32       4  version u16      6  reserved u16
//! 8  slot_count u32  12 slot_size u32    16 schema_hash u64
//! 24 write_idx u64   32 read_hint u64    40 producer_alive u8
//! 41 reserved[7]     48 slot[0] .. slot[K-1]
//! ```
//!
//! Everything here is native-endian (no cross-endian interop: the region
//! is meaningful only to processes on the machine that created it) and
//! operates on the raw bytes of an injected
//! [`crate::transport::shm::segment::ShmHandle`] rather than a `repr(C)`
//! struct, since `slot_count`/`slot_size` are only known once the schema
//! is compiled.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{round_to_page, MAGIC, VERSION};
use crate::error::{FlexShmError, Result};
use crate::layout::Layout;
use crate::schema::Schema;
use crate::transport::shm::segment::{ShmHandle, ShmProvider};

pub const HEADER_SIZE: usize = 48;

const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = 4;
const OFF_SLOT_COUNT: usize = 8;
const OFF_SLOT_SIZE: usize = 12;
const OFF_SCHEMA_HASH: usize = 16;
const OFF_WRITE_IDX: usize = 24;
const OFF_READ_HINT: usize = 32;
const OFF_PRODUCER_ALIVE: usize = 40;

/// A mapped, validated region: header + `slot_count` slots of `layout.slot_size` bytes.
pub struct Region<H: ShmHandle> {
    handle: H,
    layout: Layout,
    slot_count: u32,
}

impl<H: ShmHandle> Region<H> {
    /// Create a new region via `provider` and write its header.
    ///
    /// # Errors
    ///
    /// Returns [`FlexShmError::ProviderError`] if the provider fails, or
    /// [`FlexShmError::SchemaError`] if `slot_count == 0`.
    pub fn create<P: ShmProvider<Handle = H>>(
        provider: &P,
        name: &str,
        schema: &Schema,
        slot_count: u32,
    ) -> Result<Self> {
        if slot_count == 0 {
            return Err(FlexShmError::SchemaError("slot_count must be >= 1".into()));
        }
        let layout = Layout::compile(schema);
        let size = round_to_page(HEADER_SIZE + slot_count as usize * layout.slot_size);
        let mut handle = provider.create(name, size)?;

        let bytes = handle.bytes_mut();
        bytes[OFF_MAGIC..OFF_MAGIC + 4].copy_from_slice(&MAGIC.to_ne_bytes());
        bytes[OFF_VERSION..OFF_VERSION + 2].copy_from_slice(&VERSION.to_ne_bytes());
        bytes[OFF_SLOT_COUNT..OFF_SLOT_COUNT + 4].copy_from_slice(&slot_count.to_ne_bytes());
        bytes[OFF_SLOT_SIZE..OFF_SLOT_SIZE + 4]
            .copy_from_slice(&(layout.slot_size as u32).to_ne_bytes());
        bytes[OFF_SCHEMA_HASH..OFF_SCHEMA_HASH + 8].copy_from_slice(&layout.schema_hash.to_ne_bytes());
        // write_idx, read_hint, producer_alive, reserved bytes are already
        // zeroed by the provider.

        log::debug!("[flexshm] created region {name} ({slot_count} slots x {} bytes)", layout.slot_size);
        Ok(Self { handle, layout, slot_count })
    }

    /// Attach to an existing region and validate its header against
    /// `schema` and `expected_slot_count`.
    ///
    /// # Errors
    ///
    /// Returns [`FlexShmError::NotFound`] if the name does not exist, or
    /// [`FlexShmError::SchemaMismatch`] naming the first disagreeing field
    /// (magic, version, slot_count, slot_size, or schema_hash).
    pub fn attach<P: ShmProvider<Handle = H>>(
        provider: &P,
        name: &str,
        schema: &Schema,
        expected_slot_count: u32,
    ) -> Result<Self> {
        let handle = provider.open(name)?;
        let layout = Layout::compile(schema);

        let bytes = handle.bytes();
        if bytes.len() < HEADER_SIZE {
            return Err(FlexShmError::SchemaMismatch(format!(
                "region {name} is smaller than the header ({} < {HEADER_SIZE})",
                bytes.len()
            )));
        }

        let magic = read_u32(bytes, OFF_MAGIC);
        if magic != MAGIC {
            return Err(FlexShmError::SchemaMismatch(format!(
                "magic mismatch: expected {MAGIC:#x}, found {magic:#x}"
            )));
        }
        let version = read_u16(bytes, OFF_VERSION);
        if version != VERSION {
            return Err(FlexShmError::SchemaMismatch(format!(
                "version mismatch: expected {VERSION}, found {version}"
            )));
        }
        let slot_count = read_u32(bytes, OFF_SLOT_COUNT);
        if slot_count != expected_slot_count {
            return Err(FlexShmError::SchemaMismatch(format!(
                "slot_count mismatch: expected {expected_slot_count}, found {slot_count}"
            )));
        }
        let slot_size = read_u32(bytes, OFF_SLOT_SIZE) as usize;
        if slot_size != layout.slot_size {
            return Err(FlexShmError::SchemaMismatch(format!(
                "slot_size mismatch: expected {}, found {slot_size}",
                layout.slot_size
            )));
        }
        let schema_hash = read_u64(bytes, OFF_SCHEMA_HASH);
        if schema_hash != layout.schema_hash {
            return Err(FlexShmError::SchemaMismatch(format!(
                "schema_hash mismatch: expected {:#018x}, found {schema_hash:#018x}",
                layout.schema_hash
            )));
        }

        log::debug!("[flexshm] attached region {name} ({slot_count} slots x {slot_size} bytes)");
        Ok(Self { handle, layout, slot_count })
    }

    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    #[must_use]
    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    fn slot_offset(&self, index: u32) -> usize {
        HEADER_SIZE + index as usize * self.layout.slot_size
    }

    #[must_use]
    pub fn slot_bytes(&self, index: u32) -> &[u8] {
        let off = self.slot_offset(index);
        &self.handle.bytes()[off..off + self.layout.slot_size]
    }

    pub fn slot_bytes_mut(&mut self, index: u32) -> &mut [u8] {
        let off = self.slot_offset(index);
        let size = self.layout.slot_size;
        &mut self.handle.bytes_mut()[off..off + size]
    }

    fn write_idx_atomic(&self) -> &AtomicU64 {
        // SAFETY: OFF_WRITE_IDX is 8-byte aligned and within the header,
        // which is always present (checked in `attach`/written in `create`).
        unsafe { &*self.handle.bytes().as_ptr().add(OFF_WRITE_IDX).cast::<AtomicU64>() }
    }

    #[must_use]
    pub fn write_idx(&self) -> u64 {
        self.write_idx_atomic().load(Ordering::Acquire)
    }

    pub fn set_write_idx(&self, value: u64) {
        self.write_idx_atomic().store(value, Ordering::Release);
    }

    fn read_hint_atomic(&self) -> &AtomicU64 {
        // SAFETY: see `write_idx_atomic`.
        unsafe { &*self.handle.bytes().as_ptr().add(OFF_READ_HINT).cast::<AtomicU64>() }
    }

    #[must_use]
    pub fn read_hint(&self) -> u64 {
        self.read_hint_atomic().load(Ordering::Relaxed)
    }

    pub fn set_read_hint(&self, value: u64) {
        self.read_hint_atomic().store(value, Ordering::Relaxed);
    }

    #[must_use]
    pub fn producer_alive(&self) -> bool {
        self.handle.bytes()[OFF_PRODUCER_ALIVE] != 0
    }

    pub fn set_producer_alive(&mut self, alive: bool) {
        self.handle.bytes_mut()[OFF_PRODUCER_ALIVE] = u8::from(alive);
    }
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    let mut buf = [0u8; 2];
    buf.copy_from_slice(&bytes[offset..offset + 2]);
    u16::from_ne_bytes(buf)
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_ne_bytes(buf)
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_ne_bytes(buf)
}
