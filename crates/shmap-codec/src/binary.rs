//! Derive-based default marshaller.
//!
//! Any type deriving `binrw::BinRead` and `binrw::BinWrite` with unit
//! arguments can be stored without writing a marshaller by hand. Fields
//! are encoded little-endian in declaration order.

use std::any::type_name;
use std::io::Cursor;
use std::marker::PhantomData;

use binrw::{BinRead, BinWrite, Endian};

use crate::marshaller::{Marshaller, MarshallerKind};
use crate::{CodecError, Result};

/// Marshaller for `binrw` derived types.
pub struct BinrwMarshaller<T> {
    descriptor: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> BinrwMarshaller<T> {
    /// Marshaller whose descriptor is the Rust type name of `T`.
    pub fn new() -> Self {
        Self::with_descriptor(type_name::<T>())
    }

    /// Marshaller with an explicit descriptor.
    ///
    /// Use this when the type may be renamed or moved between modules
    /// while existing files must stay readable.
    pub fn with_descriptor(descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for BinrwMarshaller<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for BinrwMarshaller<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinrwMarshaller")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl<T> Marshaller<T> for BinrwMarshaller<T>
where
    T: BinRead + BinWrite,
    for<'a> <T as BinRead>::Args<'a>: Default,
    for<'a> <T as BinWrite>::Args<'a>: Default,
{
    fn descriptor(&self) -> &str {
        &self.descriptor
    }

    fn kind(&self) -> MarshallerKind {
        MarshallerKind::Default
    }

    fn write(&self, value: &T, out: &mut Vec<u8>) -> Result<()> {
        let start = out.len();
        let mut cursor = Cursor::new(out);
        cursor.set_position(start as u64);
        value.write_options(&mut cursor, Endian::Little, Default::default())?;
        Ok(())
    }

    fn read(&self, bytes: &[u8]) -> Result<T> {
        let mut cursor = Cursor::new(bytes);
        let value = T::read_options(&mut cursor, Endian::Little, Default::default())?;
        let consumed = cursor.position() as usize;
        if consumed != bytes.len() {
            return Err(CodecError::Custom(format!(
                "{} trailing bytes after {}",
                bytes.len() - consumed,
                self.descriptor
            )));
        }
        Ok(value)
    }
}
