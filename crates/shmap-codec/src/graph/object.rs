//! Object graph model.
//!
//! Objects are reference counted and carry interior mutability so that a
//! graph can contain cycles and so that the decoder can register an empty
//! object before its fields exist. Identity is pointer identity of the
//! [`ObjectRef`].
//!
//! Reference cycles are never collected by `Rc`. Call
//! [`GraphObject::clear`] on a member of a cycle to release it.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Shared handle to a graph object.
pub type ObjectRef = Rc<GraphObject>;

/// Shape of a graph object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Named fields, encoded field by field.
    Record,
    /// Ordered elements.
    Array,
    /// Named fields, encoded by a registered externalizer.
    External,
}

impl ObjectKind {
    pub(crate) const fn to_byte(self) -> u8 {
        match self {
            Self::Record => 0,
            Self::Array => 1,
            Self::External => 2,
        }
    }

    pub(crate) const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Record),
            1 => Some(Self::Array),
            2 => Some(Self::External),
            _ => None,
        }
    }
}

/// A value held in a field or array element.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// No value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Reference to a shared object.
    Object(ObjectRef),
}

impl Value {
    /// The referenced object, if this is an object reference.
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// The integer, if this is an integer.
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The string, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this is [`Value::Null`].
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Self::Object(obj)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

#[derive(Clone)]
enum Body {
    Fields(Vec<(String, Value)>),
    Elements(Vec<Value>),
}

/// One node of an object graph.
pub struct GraphObject {
    class: String,
    kind: ObjectKind,
    body: RefCell<Body>,
}

impl GraphObject {
    /// Create an empty object of the given kind.
    pub fn new(class: impl Into<String>, kind: ObjectKind) -> ObjectRef {
        let body = match kind {
            ObjectKind::Array => Body::Elements(Vec::new()),
            ObjectKind::Record | ObjectKind::External => Body::Fields(Vec::new()),
        };
        Rc::new(Self {
            class: class.into(),
            kind,
            body: RefCell::new(body),
        })
    }

    /// Create an empty record.
    pub fn record(class: impl Into<String>) -> ObjectRef {
        Self::new(class, ObjectKind::Record)
    }

    /// Create an object whose encoding is delegated to the externalizer
    /// registered for `class`.
    pub fn external(class: impl Into<String>) -> ObjectRef {
        Self::new(class, ObjectKind::External)
    }

    /// Create an array holding `elements`.
    pub fn array(class: impl Into<String>, elements: Vec<Value>) -> ObjectRef {
        Rc::new(Self {
            class: class.into(),
            kind: ObjectKind::Array,
            body: RefCell::new(Body::Elements(elements)),
        })
    }

    /// Class name.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Object kind.
    pub const fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Whether two handles name the same object.
    pub fn same(a: &ObjectRef, b: &ObjectRef) -> bool {
        Rc::ptr_eq(a, b)
    }

    /// Number of fields or elements.
    pub fn len(&self) -> usize {
        match &*self.body.borrow() {
            Body::Fields(fields) => fields.len(),
            Body::Elements(elements) => elements.len(),
        }
    }

    /// Whether the object has no fields or elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value of a named field. Arrays have no named fields.
    pub fn get(&self, name: &str) -> Option<Value> {
        match &*self.body.borrow() {
            Body::Fields(fields) => fields
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone()),
            Body::Elements(_) => None,
        }
    }

    /// Set a named field, replacing any previous value.
    ///
    /// Returns `false` for arrays.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> bool {
        let value = value.into();
        match &mut *self.body.borrow_mut() {
            Body::Fields(fields) => {
                if let Some(slot) = fields.iter_mut().find(|(n, _)| n == name) {
                    slot.1 = value;
                } else {
                    fields.push((name.to_string(), value));
                }
                true
            }
            Body::Elements(_) => false,
        }
    }

    /// Element at `index`. Records have no elements.
    pub fn element(&self, index: usize) -> Option<Value> {
        match &*self.body.borrow() {
            Body::Elements(elements) => elements.get(index).cloned(),
            Body::Fields(_) => None,
        }
    }

    /// Append an element. Returns `false` for records.
    pub fn push(&self, value: impl Into<Value>) -> bool {
        match &mut *self.body.borrow_mut() {
            Body::Elements(elements) => {
                elements.push(value.into());
                true
            }
            Body::Fields(_) => false,
        }
    }

    /// Snapshot of the named fields in insertion order.
    pub fn fields(&self) -> Vec<(String, Value)> {
        match &*self.body.borrow() {
            Body::Fields(fields) => fields.clone(),
            Body::Elements(_) => Vec::new(),
        }
    }

    /// Snapshot of the elements.
    pub fn elements(&self) -> Vec<Value> {
        match &*self.body.borrow() {
            Body::Elements(elements) => elements.clone(),
            Body::Fields(_) => Vec::new(),
        }
    }

    /// Drop every field or element, breaking any cycle through this object.
    pub fn clear(&self) {
        match &mut *self.body.borrow_mut() {
            Body::Fields(fields) => fields.clear(),
            Body::Elements(elements) => elements.clear(),
        }
    }
}

// Cycles make a derived Debug recurse forever.
impl fmt::Debug for GraphObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphObject")
            .field("class", &self.class)
            .field("kind", &self.kind)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
