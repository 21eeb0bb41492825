//! Cyclic object graphs stored as map values.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use shmap_codec::graph::{
    Externalizable, GraphMarshaller, GraphObject, ObjectInput, ObjectOutput, ObjectRef, Value,
};
use shmap_codec::{Marshallable, Marshaller};
use shmap_store::{MapConfig, SharedHashMap};

fn config(dir: &tempfile::TempDir, name: &str) -> MapConfig {
    MapConfig::new(dir.path().join(name))
        .with_entries(1024)
        .with_segments(4)
        .with_entry_size(256)
}

/// Record whose `cycle` field is an array holding the record itself.
fn stupid_cycle(class: &str, external: bool) -> ObjectRef {
    let obj = if external {
        GraphObject::external(class)
    } else {
        GraphObject::record(class)
    };
    let arr = GraphObject::array("Object[]", vec![Value::Object(obj.clone())]);
    obj.set("cycle", arr);
    obj
}

fn assert_cycle_closes(obj: &ObjectRef) {
    let arr = obj.get("cycle").unwrap();
    let inner = arr.as_object().unwrap().element(0).unwrap();
    assert!(GraphObject::same(inner.as_object().unwrap(), obj));
}

#[test]
fn cycle_round_trips_through_map() {
    let dir = tempfile::tempdir().unwrap();
    let map: SharedHashMap<String, ObjectRef> =
        SharedHashMap::open_default(config(&dir, "cycle.dat")).unwrap();

    let original = stupid_cycle("StupidCycle", false);
    map.put(&"Test".to_string(), &original).unwrap();

    let loaded = map.get(&"Test".to_string()).unwrap().unwrap();
    assert!(!GraphObject::same(&loaded, &original));
    assert_eq!(loaded.class(), "StupidCycle");
    assert_cycle_closes(&loaded);

    let mut container = GraphObject::record("placeholder");
    map.get_using(Some(&"Test".to_string()), &mut container)
        .unwrap()
        .unwrap();
    assert_cycle_closes(&container);

    original.clear();
    loaded.clear();
    container.clear();
}

struct StupidCycle2;

impl Externalizable for StupidCycle2 {
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
        let cycle = input.read_value()?;
        object.set("cycle", cycle);
        Ok(())
    }
}

#[test]
fn externalized_cycle_round_trips_through_map() {
    let dir = tempfile::tempdir().unwrap();
    let values: Arc<dyn Marshaller<ObjectRef>> =
        Arc::new(GraphMarshaller::new().with_external("StupidCycle2", Arc::new(StupidCycle2)));
    let map = SharedHashMap::open(config(&dir, "external.dat"), String::marshaller(), values)
        .unwrap();

    let original = stupid_cycle("StupidCycle2", true);
    map.put(&"Test".to_string(), &original).unwrap();

    let loaded = map.get(&"Test".to_string()).unwrap().unwrap();
    assert_cycle_closes(&loaded);

    original.clear();
    loaded.clear();
}

#[test]
fn graph_larger_than_entry_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let map: SharedHashMap<String, Value> =
        SharedHashMap::open_default(config(&dir, "big.dat")).unwrap();
    let big = GraphObject::array("Object[]", (0..64).map(Value::Int).collect());
    let result = map.put(&"big".to_string(), &Value::Object(big));
    assert!(matches!(
        result,
        Err(shmap_store::MapError::CapacityExceeded(_))
    ));
}
