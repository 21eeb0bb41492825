//! Graph stream decoder.

use super::external::ExternalRegistry;
use super::object::{GraphObject, ObjectKind, ObjectRef, Value};
use super::{
    MAX_DEPTH, TAG_BYTES, TAG_FALSE, TAG_FLOAT, TAG_INT, TAG_NULL, TAG_OBJECT, TAG_REFERENCE,
    TAG_STR, TAG_TRUE,
};
use crate::{CodecError, Result};

/// Decoder for one graph stream.
///
/// A new object is registered under the next handle before any of its
/// contents are read, so a back-reference from inside the object resolves
/// to the instance still being populated.
pub struct ObjectInput<'a> {
    data: &'a [u8],
    pos: usize,
    handles: Vec<ObjectRef>,
    externals: &'a ExternalRegistry,
    depth: usize,
}

impl<'a> ObjectInput<'a> {
    pub(crate) const fn new(data: &'a [u8], externals: &'a ExternalRegistry) -> Self {
        Self {
            data,
            pos: 0,
            handles: Vec::new(),
            externals,
            depth: 0,
        }
    }

    /// Current offset in the input.
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed.
    pub const fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let data = self.data;
        let slice = &data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read a raw byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    /// Read a little-endian `i64`.
    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    /// Read a length-prefixed byte string.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> Result<String> {
        Ok(String::from_utf8(self.read_bytes()?)?)
    }

    /// Read a tagged value.
    pub fn read_value(&mut self) -> Result<Value> {
        let offset = self.pos;
        let tag = self.read_u8()?;
        let value = match tag {
            TAG_NULL => Value::Null,
            TAG_FALSE => Value::Bool(false),
            TAG_TRUE => Value::Bool(true),
            TAG_INT => Value::Int(self.read_i64()?),
            TAG_FLOAT => Value::Float(f64::from_le_bytes(self.take_array()?)),
            TAG_STR => Value::Str(self.read_str()?),
            TAG_BYTES => Value::Bytes(self.read_bytes()?),
            TAG_OBJECT => Value::Object(self.read_new_object()?),
            TAG_REFERENCE => Value::Object(self.read_reference()?),
            other => return Err(CodecError::UnknownTag { tag: other, offset }),
        };
        Ok(value)
    }

    fn read_reference(&mut self) -> Result<ObjectRef> {
        let handle = self.read_u32()?;
        self.handles
            .get(handle as usize)
            .cloned()
            .ok_or(CodecError::DanglingReference {
                handle,
                registered: self.handles.len(),
            })
    }

    fn read_new_object(&mut self) -> Result<ObjectRef> {
        if self.depth >= MAX_DEPTH {
            return Err(CodecError::TooDeep(MAX_DEPTH));
        }

        let class = self.read_str()?;
        let offset = self.pos;
        let kind_byte = self.read_u8()?;
        let kind = ObjectKind::from_byte(kind_byte).ok_or(CodecError::UnknownTag {
            tag: kind_byte,
            offset,
        })?;

        let obj = GraphObject::new(class, kind);
        self.handles.push(obj.clone());

        self.depth += 1;
        let result = self.read_contents(&obj);
        self.depth -= 1;
        result.map(|()| obj)
    }

    fn read_contents(&mut self, obj: &ObjectRef) -> Result<()> {
        match obj.kind() {
            ObjectKind::Record => {
                let count = self.read_u32()?;
                for _ in 0..count {
                    let name = self.read_str()?;
                    let value = self.read_value()?;
                    obj.set(&name, value);
                }
            }
            ObjectKind::Array => {
                let count = self.read_u32()?;
                for _ in 0..count {
                    let value = self.read_value()?;
                    obj.push(value);
                }
            }
            ObjectKind::External => {
                let externalizer = self
                    .externals
                    .get(obj.class())
                    .cloned()
                    .ok_or_else(|| CodecError::UnknownClass(obj.class().to_string()))?;
                externalizer.read_external(obj, self)?;
            }
        }
        Ok(())
    }
}
