//! Fallback for platforms without `flock` and `kill`.
//!
//! Creation is not serialized between processes and lock holders are
//! always assumed alive, so a crashed holder is never taken over.

use std::fs::File;
use std::marker::PhantomData;

use crate::Result;

/// No-op file lock.
pub struct FileLock<'a> {
    _file: PhantomData<&'a File>,
}

impl<'a> FileLock<'a> {
    /// Always succeeds.
    pub fn acquire(_file: &'a File) -> Result<Self> {
        Ok(Self { _file: PhantomData })
    }
}

/// Liveness cannot be checked here.
pub fn process_alive(_pid: u32) -> bool {
    true
}
