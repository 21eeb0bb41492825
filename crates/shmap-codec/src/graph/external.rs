//! User-defined object encodings.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::object::{GraphObject, ObjectRef};
use super::reader::ObjectInput;
use super::writer::ObjectOutput;
use crate::Result;

/// Encodes and decodes the contents of one class of external objects.
///
/// Nested objects written through [`ObjectOutput::write_value`] share the
/// identity table of the enclosing stream, so back-references from inside
/// an externalized object resolve to the same instances as the rest of the
/// graph.
pub trait Externalizable: Send + Sync {
    /// Write the contents of `object`.
    fn write_external(&self, object: &GraphObject, out: &mut ObjectOutput<'_>) -> Result<()>;

    /// Populate `object`, which is already registered in the identity table.
    fn read_external(&self, object: &ObjectRef, input: &mut ObjectInput<'_>) -> Result<()>;
}

/// Externalizers keyed by class name.
#[derive(Clone, Default)]
pub struct ExternalRegistry {
    entries: HashMap<String, Arc<dyn Externalizable>>,
}

impl ExternalRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `externalizer` for `class`, replacing any previous entry.
    pub fn register(&mut self, class: impl Into<String>, externalizer: Arc<dyn Externalizable>) {
        self.entries.insert(class.into(), externalizer);
    }

    /// Externalizer for `class`.
    pub fn get(&self, class: &str) -> Option<&Arc<dyn Externalizable>> {
        self.entries.get(class)
    }

    /// Registered class names, sorted.
    pub fn classes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ExternalRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalRegistry")
            .field("classes", &self.classes())
            .finish()
    }
}
