//! Identity preservation across graph encode/decode.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use proptest::prelude::*;
use shmap_codec::graph::{
    Externalizable, GraphMarshaller, GraphObject, ObjectInput, ObjectKind, ObjectOutput,
    ObjectRef, Value,
};
use shmap_codec::{CodecError, Marshaller};

fn round_trip(m: &GraphMarshaller, obj: &ObjectRef) -> ObjectRef {
    let mut buf = Vec::new();
    Marshaller::<ObjectRef>::write(m, obj, &mut buf).unwrap();
    Marshaller::<ObjectRef>::read(m, &buf).unwrap()
}

#[test]
fn record_containing_array_containing_itself() {
    let cycle = GraphObject::record("StupidCycle");
    let arr = GraphObject::array("Object[]", vec![Value::Object(cycle.clone())]);
    cycle.set("cycle", arr);

    let decoded = round_trip(&GraphMarshaller::new(), &cycle);
    assert!(!GraphObject::same(&decoded, &cycle));
    assert_eq!(decoded.class(), "StupidCycle");

    let arr = decoded.get("cycle").unwrap();
    let arr = arr.as_object().unwrap();
    assert_eq!(arr.kind(), ObjectKind::Array);
    let first = arr.element(0).unwrap();
    assert!(GraphObject::same(first.as_object().unwrap(), &decoded));

    cycle.clear();
    decoded.clear();
}

#[test]
fn shared_sub_object_decodes_to_one_instance() {
    let shared = GraphObject::record("Leaf");
    shared.set("n", 1_i64);
    let root = GraphObject::record("Pair");
    root.set("left", shared.clone());
    root.set("right", shared);

    let decoded = round_trip(&GraphMarshaller::new(), &root);
    let left = decoded.get("left").unwrap();
    let right = decoded.get("right").unwrap();
    assert!(GraphObject::same(
        left.as_object().unwrap(),
        right.as_object().unwrap()
    ));

    left.as_object().unwrap().set("n", 2_i64);
    assert_eq!(right.as_object().unwrap().get("n").unwrap().as_int(), Some(2));
}

/// Writes its `cycle` field as a nested value so back-references into the
/// enclosing graph must resolve through the shared identity table.
struct CycleExternalizer;

impl Externalizable for CycleExternalizer {
    fn write_external(
        &self,
        object: &GraphObject,
        out: &mut ObjectOutput<'_>,
    ) -> shmap_codec::Result<()> {
        out.write_value(&object.get("cycle").unwrap_or_default())
    }

    fn read_external(
        &self,
        object: &ObjectRef,
        input: &mut ObjectInput<'_>,
    ) -> shmap_codec::Result<()> {
        let value = input.read_value()?;
        object.set("cycle", value);
        Ok(())
    }
}

#[test]
fn externalized_object_keeps_identity() {
    let m = GraphMarshaller::new().with_external("StupidCycle2", Arc::new(CycleExternalizer));

    let cycle = GraphObject::external("StupidCycle2");
    let arr = GraphObject::array("Object[]", vec![Value::Object(cycle.clone())]);
    cycle.set("cycle", arr);

    let decoded = round_trip(&m, &cycle);
    assert_eq!(decoded.kind(), ObjectKind::External);
    let arr = decoded.get("cycle").unwrap();
    let inner = arr.as_object().unwrap().element(0).unwrap();
    assert!(GraphObject::same(inner.as_object().unwrap(), &decoded));

    cycle.clear();
    decoded.clear();
}

#[test]
fn decoding_external_without_registration_fails() {
    let with = GraphMarshaller::new().with_external("StupidCycle2", Arc::new(CycleExternalizer));
    let cycle = GraphObject::external("StupidCycle2");
    cycle.set("cycle", Value::Null);

    let mut buf = Vec::new();
    Marshaller::<ObjectRef>::write(&with, &cycle, &mut buf).unwrap();
    let err = Marshaller::<ObjectRef>::read(&GraphMarshaller::new(), &buf).unwrap_err();
    assert!(matches!(err, CodecError::UnknownClass(c) if c == "StupidCycle2"));
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        "[a-z]{0,12}".prop_map(Value::Str),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
    ]
}

fn same_scalar(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Bytes(x), Value::Bytes(y)) => x == y,
        _ => false,
    }
}

proptest! {
    #[test]
    fn array_elements_survive(elements in prop::collection::vec(scalar(), 0..24)) {
        let arr = GraphObject::array("Object[]", elements.clone());
        let decoded = round_trip(&GraphMarshaller::new(), &arr);
        let back = decoded.elements();
        prop_assert_eq!(back.len(), elements.len());
        for (a, b) in elements.iter().zip(&back) {
            prop_assert!(same_scalar(a, b));
        }
    }

    #[test]
    fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        let mut input = vec![0x47, 0x53, 0x01];
        input.extend_from_slice(&bytes);
        let _ = GraphMarshaller::new().decode(&input);
    }
}
