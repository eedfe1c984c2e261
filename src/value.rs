//! Dynamic values for the spy subsystem.
//!
//! Spied calls cross the dispatcher as untyped argument lists; behaviours
//! return untyped results. [`Value`] is that common currency. Objects carry
//! identity by allocation, which is what makes them usable as instance keys
//! in the spy registry.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A dynamically-typed value crossing the interception boundary.
#[derive(Debug, Clone)]
pub enum Value {
    /// The absence of a result (a method with no return value).
    Unit,
    /// A null reference.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Object(Arc<Object>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of this value's kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Object(_) => "object",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Arc<Object>> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Unit, Value::Unit) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            // Objects compare by identity, not structure.
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Unit
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Arc<Object>> for Value {
    fn from(obj: Arc<Object>) -> Self {
        Value::Object(obj)
    }
}

/// A heap object with identity and a mutable field map.
///
/// Identity is the allocation itself: two `Arc<Object>` handles name the
/// same object iff they point at the same allocation.
pub struct Object {
    class: String,
    fields: Mutex<HashMap<String, Value>>,
}

impl Object {
    pub fn new(class: impl Into<String>) -> Arc<Object> {
        Arc::new(Object {
            class: class.into(),
            fields: Mutex::new(HashMap::new()),
        })
    }

    /// The object's class name.
    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        self.fields.lock().get(field).cloned()
    }

    pub fn set(&self, field: impl Into<String>, value: Value) {
        self.fields.lock().insert(field.into(), value);
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({})", self.class)
    }
}

/// The declared result type of a spiable method.
///
/// Drives the `Default` behaviour's value and the configuration-time
/// coercion check on `returns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Unit,
    Bool,
    Int,
    Float,
    Str,
    List,
    Object,
}

impl ReturnKind {
    /// The zero/empty value of this result type: numeric zero, `false`,
    /// the empty string, the empty list, `Null` for object returns.
    pub fn default_value(self) -> Value {
        match self {
            ReturnKind::Unit => Value::Unit,
            ReturnKind::Bool => Value::Bool(false),
            ReturnKind::Int => Value::Int(0),
            ReturnKind::Float => Value::Float(0.0),
            ReturnKind::Str => Value::Str(String::new()),
            ReturnKind::List => Value::List(Vec::new()),
            ReturnKind::Object => Value::Null,
        }
    }

    /// Whether `value` is assignable to a result of this type.
    ///
    /// Ints are assignable to float results; `Null` only to object results.
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ReturnKind::Unit, Value::Unit)
                | (ReturnKind::Bool, Value::Bool(_))
                | (ReturnKind::Int, Value::Int(_))
                | (ReturnKind::Float, Value::Float(_))
                | (ReturnKind::Float, Value::Int(_))
                | (ReturnKind::Str, Value::Str(_))
                | (ReturnKind::List, Value::List(_))
                | (ReturnKind::Object, Value::Object(_))
                | (ReturnKind::Object, Value::Null)
        )
    }
}
