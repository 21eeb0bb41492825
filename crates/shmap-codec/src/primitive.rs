//! Primitive-specialised marshallers.
//!
//! These encodings carry no framing: the map records each span's length
//! in the entry header, so a string is stored as its bare UTF-8 bytes and
//! integers as 8 little-endian bytes.

use std::sync::Arc;

use crate::marshaller::{Marshallable, Marshaller, MarshallerKind};
use crate::{CodecError, Result};

/// Width of the fixed integer encodings.
pub const INT_WIDTH: usize = 8;

fn fixed_width(bytes: &[u8]) -> Result<[u8; INT_WIDTH]> {
    bytes.try_into().map_err(|_| CodecError::Truncated {
        offset: 0,
        needed: INT_WIDTH,
        available: bytes.len(),
    })
}

/// UTF-8 string marshaller.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringMarshaller;

impl Marshaller<String> for StringMarshaller {
    fn descriptor(&self) -> &str {
        "string"
    }

    fn kind(&self) -> MarshallerKind {
        MarshallerKind::Primitive
    }

    fn write(&self, value: &String, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(value.as_bytes());
        Ok(())
    }

    fn read(&self, bytes: &[u8]) -> Result<String> {
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    fn read_into(&self, bytes: &[u8], target: &mut String) -> Result<()> {
        let text = std::str::from_utf8(bytes)?;
        target.clear();
        target.push_str(text);
        Ok(())
    }
}

/// Raw byte vector marshaller.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesMarshaller;

impl Marshaller<Vec<u8>> for BytesMarshaller {
    fn descriptor(&self) -> &str {
        "bytes"
    }

    fn kind(&self) -> MarshallerKind {
        MarshallerKind::Primitive
    }

    fn write(&self, value: &Vec<u8>, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(value);
        Ok(())
    }

    fn read(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    fn read_into(&self, bytes: &[u8], target: &mut Vec<u8>) -> Result<()> {
        target.clear();
        target.extend_from_slice(bytes);
        Ok(())
    }
}

/// Little-endian `u64` marshaller.
#[derive(Debug, Clone, Copy, Default)]
pub struct U64Marshaller;

impl Marshaller<u64> for U64Marshaller {
    fn descriptor(&self) -> &str {
        "u64"
    }

    fn kind(&self) -> MarshallerKind {
        MarshallerKind::Primitive
    }

    fn write(&self, value: &u64, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn read(&self, bytes: &[u8]) -> Result<u64> {
        Ok(u64::from_le_bytes(fixed_width(bytes)?))
    }
}

/// Little-endian `i64` marshaller.
#[derive(Debug, Clone, Copy, Default)]
pub struct I64Marshaller;

impl Marshaller<i64> for I64Marshaller {
    fn descriptor(&self) -> &str {
        "i64"
    }

    fn kind(&self) -> MarshallerKind {
        MarshallerKind::Primitive
    }

    fn write(&self, value: &i64, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn read(&self, bytes: &[u8]) -> Result<i64> {
        Ok(i64::from_le_bytes(fixed_width(bytes)?))
    }
}

impl Marshallable for String {
    fn marshaller() -> Arc<dyn Marshaller<Self>> {
        Arc::new(StringMarshaller)
    }
}

impl Marshallable for Vec<u8> {
    fn marshaller() -> Arc<dyn Marshaller<Self>> {
        Arc::new(BytesMarshaller)
    }
}

impl Marshallable for u64 {
    fn marshaller() -> Arc<dyn Marshaller<Self>> {
        Arc::new(U64Marshaller)
    }
}

impl Marshallable for i64 {
    fn marshaller() -> Arc<dyn Marshaller<Self>> {
        Arc::new(I64Marshaller)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_string_is_bare_utf8() {
        let mut out = Vec::new();
        StringMarshaller.write(&"héllo".to_string(), &mut out).unwrap();
        assert_eq!(out, "héllo".as_bytes());
    }

    #[test]
    fn test_string_read_into_reuses_buffer() {
        let mut target = String::with_capacity(64);
        let cap = target.capacity();
        StringMarshaller.read_into(b"value:1", &mut target).unwrap();
        assert_eq!(target, "value:1");
        assert_eq!(target.capacity(), cap);
    }

    #[test]
    fn test_string_rejects_invalid_utf8() {
        assert!(matches!(
            StringMarshaller.read(&[0xff, 0xfe]),
            Err(CodecError::Utf8(_))
        ));
        let mut target = "keep".to_string();
        assert!(matches!(
            StringMarshaller.read_into(&[0xc3], &mut target),
            Err(CodecError::Utf8(_))
        ));
        assert_eq!(target, "keep");
    }

    #[test]
    fn test_u64_requires_exact_width() {
        assert_eq!(U64Marshaller.read(&7u64.to_le_bytes()).unwrap(), 7);
        match U64Marshaller.read(&[1, 2, 3]) {
            Err(CodecError::Truncated { needed, available, .. }) => {
                assert_eq!(needed, 8);
                assert_eq!(available, 3);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_i64_negative() {
        let mut out = Vec::new();
        I64Marshaller.write(&-42, &mut out).unwrap();
        assert_eq!(I64Marshaller.read(&out).unwrap(), -42);
    }

    #[test]
    fn test_default_marshallers() {
        assert_eq!(String::marshaller().qualified_descriptor(), "p:string");
        assert_eq!(<Vec<u8>>::marshaller().qualified_descriptor(), "p:bytes");
        assert_eq!(u64::marshaller().qualified_descriptor(), "p:u64");
        assert_eq!(i64::marshaller().qualified_descriptor(), "p:i64");
    }
}
