// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Public exchange API: construct, write, finalize, read, close, unlink.
//!
//! Thin composition over [`crate::region`], [`crate::transport::shm::ring`],
//! [`crate::transport::shm::slot`], and [`crate::codec`] — this layer does
//! nothing but wire those four together behind one surface.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::utils::Backoff;

use crate::codec::{self, DecodedValue, FieldStatus, FieldValue};
use crate::config::POLL_SLEEP;
use crate::error::{FlexShmError, Result};
use crate::layout::SLOT_HEADER_SIZE;
use crate::region::Region;
use crate::registry::{self, ProducerGuard};
use crate::schema::Schema;
use crate::transport::shm::ring::RingController;
use crate::transport::shm::segment::ShmProvider;
use crate::transport::shm::slot;

/// One field's decoded value and status, as returned in a [`Snapshot`]:
/// a plain record of tagged values plus a parallel array of status bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldView {
    pub value: DecodedValue,
    pub status: FieldStatus,
}

impl FieldView {
    #[must_use]
    pub fn valid(&self) -> bool {
        self.status.valid()
    }

    #[must_use]
    pub fn modified(&self) -> bool {
        self.status.modified()
    }

    #[must_use]
    pub fn truncated(&self) -> bool {
        self.status.truncated()
    }

    #[must_use]
    pub fn unwritten(&self) -> bool {
        self.status.unwritten_flag()
    }
}

/// A consumer's decoded view of one published slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    write_id: u64,
    fields: HashMap<String, FieldView>,
}

impl Snapshot {
    #[must_use]
    pub fn write_id(&self) -> u64 {
        self.write_id
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldView> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldView)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// The public surface of the exchange.
pub struct Exchange<P: ShmProvider> {
    provider: Arc<P>,
    name: String,
    region: Region<P::Handle>,
    schema: Schema,
    field_index: HashMap<String, usize>,
    ring: RingController,
    is_producer: bool,
    reader_cursor: u64,
    closed: bool,
    unlinked: bool,
    _producer_guard: Option<ProducerGuard>,
}

impl<P: ShmProvider> Exchange<P> {
    /// Construct or attach to a named exchange.
    ///
    /// # Errors
    ///
    /// `SchemaError`, `NameInUse`, `NotFound`, `SchemaMismatch`, or
    /// `ProviderError`.
    pub fn new(provider: Arc<P>, schema: Schema, name: &str, create: bool, slots: u32) -> Result<Self> {
        let field_index = schema
            .fields()
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();

        let (region, guard) = if create {
            let guard = registry::register_producer(name)?;
            let mut region = Region::create(provider.as_ref(), name, &schema, slots)?;
            region.set_producer_alive(true);
            (region, Some(guard))
        } else {
            (Region::attach(provider.as_ref(), name, &schema, slots)?, None)
        };

        let ring = RingController::new(region.slot_count());

        Ok(Self {
            provider,
            name: name.to_string(),
            region,
            schema,
            field_index,
            ring,
            is_producer: create,
            reader_cursor: 0,
            closed: false,
            unlinked: false,
            _producer_guard: guard,
        })
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn require_open(&self) -> Result<()> {
        if self.closed {
            return Err(FlexShmError::Closed);
        }
        Ok(())
    }

    fn require_producer(&self) -> Result<()> {
        if !self.is_producer {
            return Err(FlexShmError::ModeError("this operation requires a producer exchange".into()));
        }
        Ok(())
    }

    /// Stage one or more fields. In single-slot mode this call implicitly
    /// finalizes.
    ///
    /// # Errors
    ///
    /// `Closed`, `UnknownField`, or `KindMismatch`.
    pub fn write(&mut self, values: &[(&str, FieldValue)]) -> Result<()> {
        self.require_open()?;
        self.require_producer()?;

        self.ring.begin_write_if_needed(&mut self.region);

        for (name, value) in values {
            let &index = self
                .field_index
                .get(*name)
                .ok_or_else(|| FlexShmError::UnknownField((*name).to_string()))?;
            let field = &self.schema.fields()[index];
            let layout_field = self.region.layout().field(index).clone();
            let data_off = layout_field.data_offset - SLOT_HEADER_SIZE;
            let data_cap = layout_field.data_capacity;
            let status_off = layout_field.status_offset - SLOT_HEADER_SIZE;

            let body = self.ring.body_mut(&mut self.region);
            let status = codec::encode_field(name, &field.kind, value, &mut body[data_off..data_off + data_cap])?;
            body[status_off] = status.bits();
        }

        if self.ring.is_single_slot() {
            self.ring.finalize_single_slot(&mut self.region);
        }
        Ok(())
    }

    /// Publish staged writes. Ring mode only.
    ///
    /// # Errors
    ///
    /// `Closed`, or `ModeError` if this exchange is in single-slot mode.
    pub fn finalize(&mut self) -> Result<u64> {
        self.require_open()?;
        self.require_producer()?;
        self.ring.finalize(&mut self.region)
    }

    /// Read the next available publication.
    ///
    /// `timeout == Duration::ZERO` returns `Ok(None)` immediately if empty.
    /// `timeout > 0` blocks (busy-spin, then yield, then sleep) until data
    /// arrives or the deadline passes.
    ///
    /// # Errors
    ///
    /// `Closed`; `ModeError` if `reset_modified` is requested outside
    /// single-slot mode; `TornRead` if the retry budget is exhausted;
    /// `Timeout` if the deadline passes with no new data.
    pub fn read(&mut self, timeout: Duration, latest: bool, reset_modified: bool) -> Result<Option<Snapshot>> {
        self.require_open()?;
        if reset_modified && !self.ring.is_single_slot() {
            return Err(FlexShmError::ModeError("reset_modified=true is only valid in single-slot mode".into()));
        }

        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();

        loop {
            if let Some(next) = self.ring.next_read(&self.region, self.reader_cursor, latest) {
                let raw = slot::snapshot_default(self.region.slot_bytes(next.index))?;
                self.reader_cursor = next.new_cursor;
                self.region.set_read_hint(self.reader_cursor);
                if reset_modified {
                    crate::transport::shm::ring::clear_modified(&mut self.region, next.index);
                }
                return Ok(Some(self.decode_snapshot(&raw)));
            }

            if timeout.is_zero() {
                return Ok(None);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(FlexShmError::Timeout);
            }
            if backoff.is_completed() {
                std::thread::sleep(POLL_SLEEP.min(deadline - now));
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }
    }

    fn decode_snapshot(&self, raw: &[u8]) -> Snapshot {
        let write_id = slot::write_id_of(raw);
        let mut fields = HashMap::with_capacity(self.schema.fields().len());
        for (field, layout_field) in self.schema.fields().iter().zip(self.region.layout().fields()) {
            let status = FieldStatus::from_bits(raw[layout_field.status_offset]);
            let data = &raw[layout_field.data_offset..layout_field.data_offset + layout_field.data_capacity];
            let value = codec::decode_field(&field.kind, status, data);
            fields.insert(field.name.clone(), FieldView { value, status });
        }
        Snapshot { write_id, fields }
    }

    /// Detach from the mapping. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if self.is_producer {
            self.region.set_producer_alive(false);
        }
        self.closed = true;
    }

    /// Remove the region's name. Idempotent after the first success.
    ///
    /// # Errors
    ///
    /// Returns [`FlexShmError::ProviderError`] if the provider's unlink
    /// call fails for a reason other than the name already being gone.
    pub fn unlink(&mut self) -> Result<()> {
        if self.unlinked {
            return Ok(());
        }
        self.provider.unlink(&self.name)?;
        self.unlinked = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use crate::transport::shm::segment::InMemoryProvider;

    fn provider() -> Arc<InMemoryProvider> {
        Arc::new(InMemoryProvider::new())
    }

    #[test]
    fn single_slot_write_then_read_round_trips() {
        let p = provider();
        let schema = Schema::from_tokens([("x", "f64"), ("y", "f64"), ("msg", "str[4]")]).unwrap();
        let mut writer = Exchange::new(p.clone(), schema.clone(), "/ex-a", true, 1).unwrap();
        writer
            .write(&[
                ("x", FieldValue::F64(1.5)),
                ("y", FieldValue::F64(2.5)),
                ("msg", FieldValue::Str("héllo".into())),
            ])
            .unwrap();

        let mut reader = Exchange::new(p, schema, "/ex-a", false, 1).unwrap();
        let snap = reader.read(Duration::ZERO, false, false).unwrap().unwrap();
        assert_eq!(snap.field("x").unwrap().value, DecodedValue::F64(1.5));
        assert!(snap.field("x").unwrap().valid());
        assert_eq!(snap.field("msg").unwrap().value, DecodedValue::Str("héll".into()));
        assert!(!snap.field("msg").unwrap().valid());
        assert!(snap.field("msg").unwrap().truncated());
    }

    #[test]
    fn ring_mode_drops_oldest_under_fifo_reads() {
        let p = provider();
        let schema = Schema::from_tokens([("a", "i32")]).unwrap();
        let mut writer = Exchange::new(p.clone(), schema.clone(), "/ex-b", true, 3).unwrap();
        for v in 1..=4 {
            writer.write(&[("a", FieldValue::I32(v))]).unwrap();
            writer.finalize().unwrap();
        }

        let mut reader = Exchange::new(p, schema, "/ex-b", false, 3).unwrap();
        let mut seen = Vec::new();
        while let Some(snap) = reader.read(Duration::ZERO, false, false).unwrap() {
            seen.push(snap.field("a").unwrap().value.clone());
        }
        assert_eq!(seen, vec![DecodedValue::I32(2), DecodedValue::I32(3), DecodedValue::I32(4)]);
    }

    #[test]
    fn latest_read_then_empty_times_out() {
        let p = provider();
        let schema = Schema::from_tokens([("a", "i32")]).unwrap();
        let mut writer = Exchange::new(p.clone(), schema.clone(), "/ex-c", true, 3).unwrap();
        for v in 1..=4 {
            writer.write(&[("a", FieldValue::I32(v))]).unwrap();
            writer.finalize().unwrap();
        }

        let mut reader = Exchange::new(p, schema, "/ex-c", false, 3).unwrap();
        let snap = reader.read(Duration::ZERO, true, false).unwrap().unwrap();
        assert_eq!(snap.field("a").unwrap().value, DecodedValue::I32(4));
        let err = reader.read(Duration::from_millis(20), true, false).unwrap_err();
        assert!(matches!(err, FlexShmError::Timeout));
    }

    #[test]
    fn array_shape_mismatch_truncates_but_still_decodes_declared_shape() {
        let p = provider();
        let schema = Schema::from_tokens([("img", "u8[2,2]")]).unwrap();
        let mut writer = Exchange::new(p.clone(), schema.clone(), "/ex-d", true, 1).unwrap();
        writer
            .write(&[("img", FieldValue::Array {
                data: codec::ArrayData::U8(vec![1, 2, 3, 4]),
                shape: vec![2, 2],
            })])
            .unwrap();

        let mut reader = Exchange::new(p.clone(), schema.clone(), "/ex-d", false, 1).unwrap();
        let snap = reader.read(Duration::ZERO, false, false).unwrap().unwrap();
        assert!(snap.field("img").unwrap().valid());

        writer
            .write(&[("img", FieldValue::Array { data: codec::ArrayData::U8(vec![1, 2, 3]), shape: vec![1, 3] })])
            .unwrap();
        let snap2 = reader.read(Duration::ZERO, false, false).unwrap().unwrap();
        let view = snap2.field("img").unwrap();
        assert!(view.truncated());
        assert!(!view.valid());
        match &view.value {
            DecodedValue::Array { data: codec::ArrayData::U8(bytes), .. } => {
                assert_eq!(bytes, &vec![1, 2, 3, 0]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn schema_mismatch_attach_fails_and_region_is_unchanged() {
        let p = provider();
        let schema = Schema::from_tokens([("x", "f64"), ("y", "f64")]).unwrap();
        let _writer = Exchange::new(p.clone(), schema, "/ex-e", true, 1).unwrap();

        let other = Schema::from_tokens([("x", "f64"), ("z", "f64")]).unwrap();
        assert!(matches!(
            Exchange::new(p, other, "/ex-e", false, 1),
            Err(FlexShmError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn finalize_in_single_slot_mode_is_mode_error() {
        let p = provider();
        let schema = Schema::from_tokens([("a", "i32")]).unwrap();
        let mut writer = Exchange::new(p, schema, "/ex-f", true, 1).unwrap();
        writer.write(&[("a", FieldValue::I32(1))]).unwrap();
        assert!(matches!(writer.finalize(), Err(FlexShmError::ModeError(_))));
    }

    #[test]
    fn reset_modified_in_ring_mode_is_mode_error() {
        let p = provider();
        let schema = Schema::from_tokens([("a", "i32")]).unwrap();
        let mut writer = Exchange::new(p.clone(), schema.clone(), "/ex-g", true, 2).unwrap();
        writer.write(&[("a", FieldValue::I32(1))]).unwrap();
        writer.finalize().unwrap();

        let mut reader = Exchange::new(p, schema, "/ex-g", false, 2).unwrap();
        assert!(matches!(
            reader.read(Duration::ZERO, false, true),
            Err(FlexShmError::ModeError(_))
        ));
    }

    #[test]
    fn reset_modified_clears_bit_in_single_slot_mode() {
        let p = provider();
        let schema = Schema::from_tokens([("a", "i32")]).unwrap();
        let mut writer = Exchange::new(p.clone(), schema.clone(), "/ex-h", true, 1).unwrap();
        writer.write(&[("a", FieldValue::I32(1))]).unwrap();

        let mut reader = Exchange::new(p, schema, "/ex-h", false, 1).unwrap();
        let snap = reader.read(Duration::ZERO, false, true).unwrap().unwrap();
        assert!(snap.field("a").unwrap().modified());
        let snap2 = reader.read(Duration::ZERO, false, false).unwrap().unwrap();
        assert!(!snap2.field("a").unwrap().modified());
    }

    #[test]
    fn unknown_field_name_is_rejected() {
        let p = provider();
        let schema = Schema::from_tokens([("a", "i32")]).unwrap();
        let mut writer = Exchange::new(p, schema, "/ex-i", true, 1).unwrap();
        assert!(matches!(
            writer.write(&[("nope", FieldValue::I32(1))]),
            Err(FlexShmError::UnknownField(_))
        ));
    }

    #[test]
    fn duplicate_local_producer_name_is_rejected() {
        let p = provider();
        let schema = Schema::from_tokens([("a", "i32")]).unwrap();
        let _writer = Exchange::new(p.clone(), schema.clone(), "/ex-j", true, 1).unwrap();
        assert!(matches!(
            Exchange::new(p, schema, "/ex-j", true, 1),
            Err(FlexShmError::NameInUse(_))
        ));
    }

    #[test]
    fn unlink_is_idempotent() {
        let p = provider();
        let schema = Schema::from_tokens([("a", "i32")]).unwrap();
        let mut writer = Exchange::new(p, schema, "/ex-k", true, 1).unwrap();
        assert!(writer.unlink().is_ok());
        assert!(writer.unlink().is_ok());
    }

    #[test]
    fn closed_exchange_rejects_write() {
        let p = provider();
        let schema = Schema::from_tokens([("a", "i32")]).unwrap();
        let mut writer = Exchange::new(p, schema, "/ex-l", true, 1).unwrap();
        writer.close();
        assert!(matches!(
            writer.write(&[("a", FieldValue::I32(1))]),
            Err(FlexShmError::Closed)
        ));
    }
}
