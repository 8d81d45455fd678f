// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Black-box scenarios over the public `Exchange` API, using the
//! in-memory provider so producer and consumer observe the same bytes
//! without touching real shared memory.

use std::sync::Arc;
use std::time::Duration;

use flexshm::transport::shm::segment::InMemoryProvider;
use flexshm::{DecodedValue, Exchange, FieldValue, FlexShmError, Schema};

fn provider() -> Arc<InMemoryProvider> {
    Arc::new(InMemoryProvider::new())
}

/// Scenario 1: single-slot `{x:f64, y:f64, msg:str[4]}`, a string field
/// overflows its 4-character capacity.
#[test]
fn scenario_single_slot_string_truncation() {
    let p = provider();
    let schema = Schema::from_tokens([("x", "f64"), ("y", "f64"), ("msg", "str[4]")]).unwrap();
    let mut writer = Exchange::new(p.clone(), schema.clone(), "/scenario-1", true, 1).unwrap();
    writer
        .write(&[
            ("x", FieldValue::F64(1.5)),
            ("y", FieldValue::F64(2.5)),
            ("msg", FieldValue::Str("héllo".into())),
        ])
        .unwrap();

    let mut reader = Exchange::new(p, schema, "/scenario-1", false, 1).unwrap();
    let snap = reader.read(Duration::ZERO, false, false).unwrap().unwrap();

    let x = snap.field("x").unwrap();
    assert_eq!(x.value, DecodedValue::F64(1.5));
    assert!(x.valid());

    let y = snap.field("y").unwrap();
    assert_eq!(y.value, DecodedValue::F64(2.5));
    assert!(y.valid());

    let msg = snap.field("msg").unwrap();
    assert!(!msg.valid());
    assert!(msg.truncated());
    assert_eq!(msg.value, DecodedValue::Str("héll".into()));
}

/// Scenario 2: ring of 3 slots, 4 publications before any read — FIFO
/// delivers the newest 3, oldest dropped.
#[test]
fn scenario_ring_fifo_drops_oldest() {
    let p = provider();
    let schema = Schema::from_tokens([("a", "i32")]).unwrap();
    let mut writer = Exchange::new(p.clone(), schema.clone(), "/scenario-2", true, 3).unwrap();
    for v in 1..=4 {
        writer.write(&[("a", FieldValue::I32(v))]).unwrap();
        writer.finalize().unwrap();
    }

    let mut reader = Exchange::new(p, schema, "/scenario-2", false, 3).unwrap();
    let mut seen = Vec::new();
    while let Some(snap) = reader.read(Duration::ZERO, false, false).unwrap() {
        seen.push(snap.field("a").unwrap().value.clone());
    }
    assert_eq!(
        seen,
        vec![DecodedValue::I32(2), DecodedValue::I32(3), DecodedValue::I32(4)]
    );
}

/// Scenario 3: same as scenario 2, but `latest=true` jumps straight to
/// the newest publication, then a subsequent read times out.
#[test]
fn scenario_latest_then_timeout() {
    let p = provider();
    let schema = Schema::from_tokens([("a", "i32")]).unwrap();
    let mut writer = Exchange::new(p.clone(), schema.clone(), "/scenario-3", true, 3).unwrap();
    for v in 1..=4 {
        writer.write(&[("a", FieldValue::I32(v))]).unwrap();
        writer.finalize().unwrap();
    }

    let mut reader = Exchange::new(p, schema, "/scenario-3", false, 3).unwrap();
    let snap = reader.read(Duration::ZERO, true, false).unwrap().unwrap();
    assert_eq!(snap.field("a").unwrap().value, DecodedValue::I32(4));

    let err = reader.read(Duration::from_millis(50), true, false).unwrap_err();
    assert!(matches!(err, FlexShmError::Timeout));
}

/// Scenario 4: array field, exact shape is valid, a later shape-mismatched
/// write truncates with zero-fill.
#[test]
fn scenario_array_shape_mismatch_truncates() {
    let p = provider();
    let schema = Schema::from_tokens([("img", "u8[2,2]")]).unwrap();
    let mut writer = Exchange::new(p.clone(), schema.clone(), "/scenario-4", true, 1).unwrap();
    let mut reader = Exchange::new(p, schema, "/scenario-4", false, 1).unwrap();

    writer
        .write(&[(
            "img",
            FieldValue::Array {
                data: flexshm::ArrayData::U8(vec![1, 2, 3, 4]),
                shape: vec![2, 2],
            },
        )])
        .unwrap();
    let snap = reader.read(Duration::ZERO, false, false).unwrap().unwrap();
    let img = snap.field("img").unwrap();
    assert!(img.valid());
    match &img.value {
        DecodedValue::Array { data: flexshm::ArrayData::U8(bytes), .. } => {
            assert_eq!(bytes, &vec![1, 2, 3, 4]);
        }
        _ => panic!("wrong variant"),
    }

    writer
        .write(&[(
            "img",
            FieldValue::Array { data: flexshm::ArrayData::U8(vec![1, 2, 3]), shape: vec![1, 3] },
        )])
        .unwrap();
    let snap2 = reader.read(Duration::ZERO, false, false).unwrap().unwrap();
    let img2 = snap2.field("img").unwrap();
    assert!(img2.truncated());
    assert!(!img2.valid());
    match &img2.value {
        DecodedValue::Array { data: flexshm::ArrayData::U8(bytes), .. } => {
            assert_eq!(bytes, &vec![1, 2, 3, 0]);
        }
        _ => panic!("wrong variant"),
    }
}

/// Scenario 5: attach with a disagreeing schema fails `SchemaMismatch` and
/// does not disturb the existing region.
#[test]
fn scenario_schema_mismatch_leaves_region_unchanged() {
    let p = provider();
    let schema = Schema::from_tokens([("x", "f64"), ("y", "f64")]).unwrap();
    let mut writer = Exchange::new(p.clone(), schema.clone(), "/scenario-5", true, 1).unwrap();
    writer.write(&[("x", FieldValue::F64(9.0)), ("y", FieldValue::F64(1.0))]).unwrap();

    let other = Schema::from_tokens([("x", "f64"), ("z", "f64")]).unwrap();
    assert!(matches!(
        Exchange::new(p.clone(), other, "/scenario-5", false, 1),
        Err(FlexShmError::SchemaMismatch(_))
    ));

    let mut reader = Exchange::new(p, schema, "/scenario-5", false, 1).unwrap();
    let snap = reader.read(Duration::ZERO, false, false).unwrap().unwrap();
    assert_eq!(snap.field("x").unwrap().value, DecodedValue::F64(9.0));
}

/// Scenario 6: a publication that never reaches `commit()` (a simulated
/// crash mid-publish) leaves `seq` odd; a bounded retry reports
/// `TornRead`, and the next real publication restores a readable even
/// `seq`. Exercised directly against the region and slot protocol, since
/// a real crash has no path through the public API.
#[test]
fn scenario_simulated_crash_mid_publish_is_torn_then_recovers() {
    use flexshm::region::Region;
    use flexshm::transport::shm::slot::{snapshot, write_id_of, SlotWriter};

    let provider = InMemoryProvider::new();
    let schema = Schema::from_tokens([("a", "i32")]).unwrap();
    let mut region = Region::create(&provider, "/scenario-6", &schema, 1).unwrap();

    {
        let mut w = SlotWriter::new(region.slot_bytes_mut(0));
        w.begin_publish();
        w.set_write_id(1);
        w.commit();
    }
    assert_eq!(flexshm::transport::shm::slot::seq_of(region.slot_bytes(0)) % 2, 0);

    {
        // Crash between step 1 (seq odd) and step 4 (commit): never call commit().
        let mut w = SlotWriter::new(region.slot_bytes_mut(0));
        w.begin_publish();
    }
    assert!(matches!(snapshot(region.slot_bytes(0), 4), Err(FlexShmError::TornRead { attempts: 4 })));

    {
        let mut w = SlotWriter::new(region.slot_bytes_mut(0));
        w.begin_publish();
        w.set_write_id(2);
        w.commit();
    }
    let recovered = snapshot(region.slot_bytes(0), 4).unwrap();
    assert_eq!(write_id_of(&recovered), 2);
}
