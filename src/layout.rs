// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Schema → layout compiler.
//!
//! Turns a [`Schema`] into a [`Layout`]: deterministic per-field byte
//! offsets, a per-field status-byte offset, and an overall slot size.
//! Two processes compiling the same schema must produce byte-identical
//! offsets and `schema_hash` — the compiler is a pure function of field
//! declaration order and the fixed alignment rules, nothing else.

use crate::schema::Schema;

/// Byte size of the slot header (`seq: u64`, `write_id: u64`) that
/// precedes the status block in every slot.
pub const SLOT_HEADER_SIZE: usize = 16;

/// One field's position within a compiled [`Layout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutField {
    pub name: String,
    /// Byte offset of this field's data, relative to the start of the slot.
    pub data_offset: usize,
    /// Byte capacity of this field's data block.
    pub data_capacity: usize,
    /// Byte offset of this field's status byte, relative to the start of the slot.
    pub status_offset: usize,
}

/// A compiled, deterministic byte layout for a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    fields: Vec<LayoutField>,
    /// Offset of the first status byte (always [`SLOT_HEADER_SIZE`], which
    /// is already 8-byte aligned).
    pub status_block_offset: usize,
    /// Number of status bytes, one per field.
    pub status_block_len: usize,
    /// Total slot size, padded up to a multiple of 8 bytes.
    pub slot_size: usize,
    /// Stable 64-bit hash of `(name, kind)` tuples in declaration order.
    pub schema_hash: u64,
}

impl Layout {
    /// Compile a schema into a deterministic layout.
    #[must_use]
    pub fn compile(schema: &Schema) -> Self {
        let status_block_offset = SLOT_HEADER_SIZE;
        let status_block_len = schema.fields().len();

        let mut cursor = status_block_offset + status_block_len;
        let mut fields = Vec::with_capacity(schema.fields().len());
        for (i, field) in schema.fields().iter().enumerate() {
            let align = field.kind.alignment().max(1);
            let data_offset = ceil_to(cursor, align);
            let data_capacity = field.kind.byte_capacity();
            fields.push(LayoutField {
                name: field.name.clone(),
                data_offset,
                data_capacity,
                status_offset: status_block_offset + i,
            });
            cursor = data_offset + data_capacity;
        }
        let slot_size = ceil_to(cursor, 8);

        Self {
            schema_hash: hash_schema(schema),
            fields,
            status_block_offset,
            status_block_len,
            slot_size,
        }
    }

    #[must_use]
    pub fn fields(&self) -> &[LayoutField] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, index: usize) -> &LayoutField {
        &self.fields[index]
    }
}

const fn ceil_to(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

/// FNV-1a, widened to 64 bits and fed the schema's canonical byte
/// encoding.
fn hash_schema(schema: &Schema) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

    let mut hash = FNV_OFFSET;
    let mut mix = |bytes: &[u8]| {
        for &b in bytes {
            hash ^= u64::from(b);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    };
    for field in schema.fields() {
        mix(field.name.as_bytes());
        mix(&[0]); // separator, prevents ("ab","c") colliding with ("a","bc")
        mix(field.kind.canonical_token().as_bytes());
        mix(&[0]);
    }
    hash
}
