//! Key and value marshallers for the shared off-heap hash map.
//!
//! The map stores keys and values as raw byte spans inside a memory-mapped
//! file. This crate supplies the capability that turns typed values into
//! those spans and back:
//!
//! - **Primitive marshallers**: fixed encodings for `String`, `Vec<u8>`,
//!   `u64` and `i64`
//! - **Default marshaller**: derive-based encoding through `binrw` for
//!   user structs annotated with `#[derive(BinRead, BinWrite)]`
//! - **Custom marshallers**: any user implementation of [`Marshaller`]
//! - **Object graphs**: an identity-preserving encoding for graphs of
//!   shared, possibly cyclic, objects (see [`graph`])
//!
//! A marshaller is chosen once when a map is opened and is never
//! re-dispatched per call.
//!
//! # Example
//!
//! ```
//! use shmap_codec::{Marshaller, StringMarshaller};
//!
//! let m = StringMarshaller;
//! let mut buf = Vec::new();
//! m.write(&"user:42".to_string(), &mut buf).expect("encode");
//! assert_eq!(m.read(&buf).expect("decode"), "user:42");
//! ```

#![warn(missing_docs)]

use thiserror::Error;

// Derive-based default marshaller
pub mod binary;

// Identity-preserving object graphs
pub mod graph;

// Marshaller capability
pub mod marshaller;

// Primitive-specialised marshallers
pub mod primitive;

pub use binary::BinrwMarshaller;
pub use marshaller::{Marshallable, Marshaller, MarshallerKind};
pub use primitive::{BytesMarshaller, I64Marshaller, StringMarshaller, U64Marshaller};

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors raised while encoding or decoding stored bytes.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Input ended before a complete value was read.
    #[error("truncated input: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        /// Offset at which the read started.
        offset: usize,
        /// Bytes required by the read.
        needed: usize,
        /// Bytes remaining in the input.
        available: usize,
    },

    /// Stream header did not match the expected magic.
    #[error("bad stream magic: {0:#06x}")]
    BadMagic(u16),

    /// Unknown type tag in the stream.
    #[error("unknown tag {tag:#04x} at offset {offset}")]
    UnknownTag {
        /// The offending tag byte.
        tag: u8,
        /// Offset of the tag byte.
        offset: usize,
    },

    /// Back-reference to an object handle that was never registered.
    #[error("dangling back-reference to handle {handle} ({registered} registered)")]
    DanglingReference {
        /// Handle named by the back-reference.
        handle: u32,
        /// Number of handles registered so far.
        registered: usize,
    },

    /// Externalized object of a class with no registered externalizer.
    #[error("no externalizer registered for class {0:?}")]
    UnknownClass(String),

    /// Nesting exceeded the decoder's depth limit.
    #[error("object graph nested deeper than {0} levels")]
    TooDeep(usize),

    /// Stored string bytes were not valid UTF-8.
    #[error("invalid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Error from a derive-based `binrw` codec.
    #[error("binrw error: {0}")]
    Binrw(#[from] binrw::Error),

    /// Error reported by a user-supplied marshaller or externalizer.
    #[error("{0}")]
    Custom(String),
}

impl From<std::string::FromUtf8Error> for CodecError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Self::Utf8(e.utf8_error())
    }
}
