//! The marshaller capability.
//!
//! A [`Marshaller`] converts one type to and from the raw bytes stored in a
//! map entry. Keys are compared by these bytes, so a key marshaller must be
//! canonical: equal keys must always encode to identical bytes.

use std::sync::Arc;

use crate::Result;

/// Which family of encoding a marshaller belongs to.
///
/// The kind is folded into the stored type descriptor so that a file
/// written with one encoding family is never reopened with another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarshallerKind {
    /// Derive-based default encoding.
    Default,
    /// User-supplied encoding.
    Custom,
    /// Fixed encoding for a primitive type.
    Primitive,
}

impl MarshallerKind {
    /// Short prefix used in type descriptors.
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Default => "d",
            Self::Custom => "c",
            Self::Primitive => "p",
        }
    }
}

/// Converts values of `T` to and from byte spans.
pub trait Marshaller<T>: Send + Sync {
    /// Stable name of the encoded type, recorded in the map header.
    fn descriptor(&self) -> &str;

    /// Encoding family.
    fn kind(&self) -> MarshallerKind {
        MarshallerKind::Custom
    }

    /// Append the encoding of `value` to `out`.
    fn write(&self, value: &T, out: &mut Vec<u8>) -> Result<()>;

    /// Decode a fresh value.
    fn read(&self, bytes: &[u8]) -> Result<T>;

    /// Decode into an existing value, reusing its allocations where the
    /// marshaller can.
    fn read_into(&self, bytes: &[u8], target: &mut T) -> Result<()> {
        *target = self.read(bytes)?;
        Ok(())
    }

    /// Full descriptor including the kind prefix, e.g. `p:string`.
    fn qualified_descriptor(&self) -> String {
        format!("{}:{}", self.kind().prefix(), self.descriptor())
    }
}

/// Types with a marshaller the map can pick without configuration.
pub trait Marshallable: Sized + 'static {
    /// The default marshaller for this type.
    fn marshaller() -> Arc<dyn Marshaller<Self>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{StringMarshaller, U64Marshaller};

    #[test]
    fn test_qualified_descriptor() {
        assert_eq!(StringMarshaller.qualified_descriptor(), "p:string");
        assert_eq!(U64Marshaller.qualified_descriptor(), "p:u64");
    }

    #[test]
    fn test_default_read_into_replaces_target() {
        struct Upper;
        impl Marshaller<String> for Upper {
            fn descriptor(&self) -> &str {
                "upper"
            }
            fn write(&self, value: &String, out: &mut Vec<u8>) -> Result<()> {
                out.extend_from_slice(value.to_uppercase().as_bytes());
                Ok(())
            }
            fn read(&self, bytes: &[u8]) -> Result<String> {
                Ok(String::from_utf8(bytes.to_vec())?)
            }
        }

        let mut target = "old".to_string();
        Upper.read_into(b"NEW", &mut target).unwrap();
        assert_eq!(target, "NEW");
        assert_eq!(Upper.qualified_descriptor(), "c:upper");
    }
}
