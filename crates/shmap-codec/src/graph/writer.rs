//! Graph stream encoder.

use std::collections::HashMap;
use std::rc::Rc;

use super::external::ExternalRegistry;
use super::object::{GraphObject, ObjectKind, ObjectRef, Value};
use super::{
    MAX_DEPTH, TAG_BYTES, TAG_FALSE, TAG_FLOAT, TAG_INT, TAG_NULL, TAG_OBJECT, TAG_REFERENCE,
    TAG_STR, TAG_TRUE,
};
use crate::{CodecError, Result};

/// Encoder for one graph stream.
///
/// Each object is assigned a handle the first time it is written, before
/// its contents are written. Later occurrences, including occurrences
/// nested inside the object itself, are written as back-references.
pub struct ObjectOutput<'a> {
    buf: &'a mut Vec<u8>,
    handles: HashMap<*const GraphObject, u32>,
    externals: &'a ExternalRegistry,
    depth: usize,
}

impl<'a> ObjectOutput<'a> {
    pub(crate) fn new(buf: &'a mut Vec<u8>, externals: &'a ExternalRegistry) -> Self {
        Self {
            buf,
            handles: HashMap::new(),
            externals,
            depth: 0,
        }
    }

    /// Append a raw byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Append a little-endian `u32`.
    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a little-endian `i64`.
    pub fn write_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a length-prefixed byte string.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        let len = u32::try_from(value.len())
            .map_err(|_| CodecError::Custom(format!("span of {} bytes too long", value.len())))?;
        self.write_u32(len);
        self.buf.extend_from_slice(value);
        Ok(())
    }

    /// Append a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    /// Append a tagged value.
    pub fn write_value(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Null => self.write_u8(TAG_NULL),
            Value::Bool(false) => self.write_u8(TAG_FALSE),
            Value::Bool(true) => self.write_u8(TAG_TRUE),
            Value::Int(v) => {
                self.write_u8(TAG_INT);
                self.write_i64(*v);
            }
            Value::Float(v) => {
                self.write_u8(TAG_FLOAT);
                self.buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::Str(s) => {
                self.write_u8(TAG_STR);
                self.write_str(s)?;
            }
            Value::Bytes(b) => {
                self.write_u8(TAG_BYTES);
                self.write_bytes(b)?;
            }
            Value::Object(obj) => self.write_object(obj)?,
        }
        Ok(())
    }

    /// Append an object, or a back-reference if it was already written.
    pub fn write_object(&mut self, obj: &ObjectRef) -> Result<()> {
        let key = Rc::as_ptr(obj);
        if let Some(&handle) = self.handles.get(&key) {
            self.write_u8(TAG_REFERENCE);
            self.write_u32(handle);
            return Ok(());
        }

        if self.depth >= MAX_DEPTH {
            return Err(CodecError::TooDeep(MAX_DEPTH));
        }

        let handle = u32::try_from(self.handles.len())
            .map_err(|_| CodecError::Custom("too many objects in one graph".to_string()))?;
        self.handles.insert(key, handle);

        self.write_u8(TAG_OBJECT);
        self.write_str(obj.class())?;
        self.write_u8(obj.kind().to_byte());

        self.depth += 1;
        let result = self.write_contents(obj);
        self.depth -= 1;
        result
    }

    fn write_contents(&mut self, obj: &ObjectRef) -> Result<()> {
        match obj.kind() {
            ObjectKind::Record => {
                let fields = obj.fields();
                self.write_count(fields.len())?;
                for (name, value) in &fields {
                    self.write_str(name)?;
                    self.write_value(value)?;
                }
            }
            ObjectKind::Array => {
                let elements = obj.elements();
                self.write_count(elements.len())?;
                for value in &elements {
                    self.write_value(value)?;
                }
            }
            ObjectKind::External => {
                let externalizer = self
                    .externals
                    .get(obj.class())
                    .cloned()
                    .ok_or_else(|| CodecError::UnknownClass(obj.class().to_string()))?;
                externalizer.write_external(obj, self)?;
            }
        }
        Ok(())
    }

    fn write_count(&mut self, count: usize) -> Result<()> {
        let count = u32::try_from(count)
            .map_err(|_| CodecError::Custom(format!("{count} slots exceed u32")))?;
        self.write_u32(count);
        Ok(())
    }
}
