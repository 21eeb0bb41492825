//! Identity-preserving object graph encoding.
//!
//! A graph stream starts with a three byte header (`u16` magic `0x5347`,
//! `u8` version) followed by one tagged value. Objects are written once;
//! every later occurrence is a back-reference to the handle assigned on
//! first encounter. Decoding therefore reproduces shared sub-objects and
//! cycles, including an object that contains itself.
//!
//! ```text
//! 0x00 null          0x03 int  i64     0x10 object  str class, u8 kind, contents
//! 0x01 false         0x04 float f64    0x11 backref u32 handle
//! 0x02 true          0x05 str  u32+utf8
//!                    0x06 bytes u32+raw
//! ```
//!
//! Record contents are `u32` field count then `(name, value)` pairs. Array
//! contents are `u32` element count then values. External contents are
//! whatever the registered [`Externalizable`] writes.

use std::sync::Arc;

use crate::marshaller::{Marshallable, Marshaller, MarshallerKind};
use crate::{CodecError, Result};

mod external;
mod object;
mod reader;
mod writer;

pub use external::{ExternalRegistry, Externalizable};
pub use object::{GraphObject, ObjectKind, ObjectRef, Value};
pub use reader::ObjectInput;
pub use writer::ObjectOutput;

/// Stream magic, `"SG"` little-endian.
pub const STREAM_MAGIC: u16 = 0x5347;

/// Stream format version.
pub const STREAM_VERSION: u8 = 1;

/// Maximum object nesting accepted by the encoder and decoder.
pub const MAX_DEPTH: usize = 512;

pub(crate) const TAG_NULL: u8 = 0x00;
pub(crate) const TAG_FALSE: u8 = 0x01;
pub(crate) const TAG_TRUE: u8 = 0x02;
pub(crate) const TAG_INT: u8 = 0x03;
pub(crate) const TAG_FLOAT: u8 = 0x04;
pub(crate) const TAG_STR: u8 = 0x05;
pub(crate) const TAG_BYTES: u8 = 0x06;
pub(crate) const TAG_OBJECT: u8 = 0x10;
pub(crate) const TAG_REFERENCE: u8 = 0x11;

/// Default marshaller for object graphs.
#[derive(Debug, Clone, Default)]
pub struct GraphMarshaller {
    externals: ExternalRegistry,
}

impl GraphMarshaller {
    /// Marshaller with no externalizers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an externalizer for `class`.
    #[must_use]
    pub fn with_external(
        mut self,
        class: impl Into<String>,
        externalizer: Arc<dyn Externalizable>,
    ) -> Self {
        self.externals.register(class, externalizer);
        self
    }

    /// Registered externalizers.
    pub const fn externals(&self) -> &ExternalRegistry {
        &self.externals
    }

    /// Encode `value` as a complete stream.
    pub fn encode(&self, value: &Value, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&STREAM_MAGIC.to_le_bytes());
        out.push(STREAM_VERSION);
        ObjectOutput::new(out, &self.externals).write_value(value)
    }

    /// Decode a complete stream.
    pub fn decode(&self, bytes: &[u8]) -> Result<Value> {
        let mut input = ObjectInput::new(bytes, &self.externals);
        let magic = u16::from(input.read_u8()?) | (u16::from(input.read_u8()?) << 8);
        if magic != STREAM_MAGIC {
            return Err(CodecError::BadMagic(magic));
        }
        let version = input.read_u8()?;
        if version != STREAM_VERSION {
            return Err(CodecError::Custom(format!(
                "unsupported graph stream version {version}"
            )));
        }

        let value = input.read_value()?;
        if input.remaining() != 0 {
            return Err(CodecError::Custom(format!(
                "{} trailing bytes after graph at offset {}",
                input.remaining(),
                input.position()
            )));
        }
        Ok(value)
    }
}

impl Marshaller<Value> for GraphMarshaller {
    fn descriptor(&self) -> &str {
        "graph"
    }

    fn kind(&self) -> MarshallerKind {
        MarshallerKind::Default
    }

    fn write(&self, value: &Value, out: &mut Vec<u8>) -> Result<()> {
        self.encode(value, out)
    }

    fn read(&self, bytes: &[u8]) -> Result<Value> {
        self.decode(bytes)
    }
}

impl Marshaller<ObjectRef> for GraphMarshaller {
    fn descriptor(&self) -> &str {
        "graph"
    }

    fn kind(&self) -> MarshallerKind {
        MarshallerKind::Default
    }

    fn write(&self, value: &ObjectRef, out: &mut Vec<u8>) -> Result<()> {
        self.encode(&Value::Object(value.clone()), out)
    }

    fn read(&self, bytes: &[u8]) -> Result<ObjectRef> {
        match self.decode(bytes)? {
            Value::Object(obj) => Ok(obj),
            other => Err(CodecError::Custom(format!(
                "expected an object at the graph root, found {other:?}"
            ))),
        }
    }
}

impl Marshallable for Value {
    fn marshaller() -> Arc<dyn Marshaller<Self>> {
        Arc::new(GraphMarshaller::new())
    }
}

impl Marshallable for ObjectRef {
    fn marshaller() -> Arc<dyn Marshaller<Self>> {
        Arc::new(GraphMarshaller::new())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn round_trip(value: &Value) -> Value {
        let m = GraphMarshaller::new();
        let mut buf = Vec::new();
        m.encode(value, &mut buf).unwrap();
        m.decode(&buf).unwrap()
    }

    #[test]
    fn test_stream_header() {
        let mut buf = Vec::new();
        GraphMarshaller::new().encode(&Value::Null, &mut buf).unwrap();
        assert_eq!(buf, vec![0x47, 0x53, 0x01, TAG_NULL]);
    }

    #[test]
    fn test_scalars() {
        assert_eq!(round_trip(&Value::Int(-7)).as_int(), Some(-7));
        assert_eq!(round_trip(&Value::from("hi")).as_str(), Some("hi"));
        assert!(round_trip(&Value::Null).is_null());
        assert!(matches!(round_trip(&Value::Bool(true)), Value::Bool(true)));
        assert!(matches!(round_trip(&Value::Float(1.5)), Value::Float(f) if f == 1.5));
        assert!(matches!(round_trip(&Value::Bytes(vec![1, 2])), Value::Bytes(b) if b == [1, 2]));
    }

    #[test]
    fn test_self_reference_encodes_as_backref() {
        let obj = GraphObject::record("Cycle");
        obj.set("me", obj.clone());

        let mut buf = Vec::new();
        GraphMarshaller::new()
            .encode(&Value::Object(obj.clone()), &mut buf)
            .unwrap();
        // header, object tag, class, kind, field count, field name, backref
        let tail = &buf[buf.len() - 5..];
        assert_eq!(tail, &[TAG_REFERENCE, 0, 0, 0, 0]);
        obj.clear();
    }

    #[test]
    fn test_bad_magic() {
        let err = GraphMarshaller::new().decode(&[0, 0, 1, 0]).unwrap_err();
        assert!(matches!(err, CodecError::BadMagic(0)));
    }

    #[test]
    fn test_unknown_tag() {
        let err = GraphMarshaller::new()
            .decode(&[0x47, 0x53, 0x01, 0x7f])
            .unwrap_err();
        assert!(matches!(err, CodecError::UnknownTag { tag: 0x7f, offset: 3 }));
    }

    #[test]
    fn test_dangling_reference() {
        let err = GraphMarshaller::new()
            .decode(&[0x47, 0x53, 0x01, TAG_REFERENCE, 3, 0, 0, 0])
            .unwrap_err();
        assert!(matches!(
            err,
            CodecError::DanglingReference {
                handle: 3,
                registered: 0
            }
        ));
    }

    #[test]
    fn test_truncated() {
        let err = GraphMarshaller::new()
            .decode(&[0x47, 0x53, 0x01, TAG_INT, 1, 2])
            .unwrap_err();
        assert!(matches!(err, CodecError::Truncated { needed: 8, .. }));
    }

    #[test]
    fn test_unregistered_external_class() {
        let obj = GraphObject::external("Opaque");
        let mut buf = Vec::new();
        let err = GraphMarshaller::new()
            .encode(&Value::Object(obj), &mut buf)
            .unwrap_err();
        assert!(matches!(err, CodecError::UnknownClass(c) if c == "Opaque"));
    }

    #[test]
    fn test_depth_limit() {
        let root = GraphObject::record("Node");
        let mut cursor = root.clone();
        for _ in 0..MAX_DEPTH {
            let next = GraphObject::record("Node");
            cursor.set("next", next.clone());
            cursor = next;
        }
        let mut buf = Vec::new();
        let err = GraphMarshaller::new()
            .encode(&Value::Object(root), &mut buf)
            .unwrap_err();
        assert!(matches!(err, CodecError::TooDeep(MAX_DEPTH)));
    }

    #[test]
    fn test_root_must_be_object_for_object_marshaller() {
        let m = GraphMarshaller::new();
        let mut buf = Vec::new();
        Marshaller::<Value>::write(&m, &Value::Int(1), &mut buf).unwrap();
        assert!(Marshaller::<ObjectRef>::read(&m, &buf).is_err());
        assert_eq!(
            Marshaller::<ObjectRef>::qualified_descriptor(&m),
            "d:graph"
        );
    }
}
