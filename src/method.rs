//! Method identity and canonicalisation.
//!
//! The spy registry is keyed on the *root definition* of a method: the
//! declaring type's original, non-generic, base declaration. Generic
//! instantiations and virtual overrides are derived [`Method`]s that link
//! back to their root; every registry operation canonicalises through that
//! link first, so a spy installed on the base declaration observes calls
//! made through any specialisation.

use crate::error::TestError;
use crate::value::{ReturnKind, Value};
use std::fmt;
use std::sync::Arc;

/// Signature of a callable the dispatcher can invoke: the original
/// implementation behind a spied method, or a configured fake.
///
/// For instance methods the receiver is the first element of the argument
/// list, mirroring the interception contract.
pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value, TestError> + Send + Sync>;

/// Whether a method is bound to an instance or free-standing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// A static method or free function; calls carry no receiver.
    Free,
    /// An instance method; the receiver is the first argument.
    Instance,
}

/// The canonical name of a root definition: the registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodId {
    owner: String,
    name: String,
}

impl MethodId {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.owner, self.name)
    }
}

/// A reference to a spiable callable.
///
/// Cheap to clone; all clones share one descriptor.
#[derive(Clone)]
pub struct Method {
    inner: Arc<MethodInner>,
}

struct MethodInner {
    owner: String,
    name: String,
    kind: MethodKind,
    result: ReturnKind,
    original: Option<NativeFn>,
    /// Present on derived methods (instantiations, overrides); absent on
    /// the root definition itself.
    root: Option<Method>,
}

impl Method {
    /// A static method or free function.
    pub fn free(
        owner: impl Into<String>,
        name: impl Into<String>,
        result: ReturnKind,
        original: Option<NativeFn>,
    ) -> Method {
        Method::root_definition(owner, name, MethodKind::Free, result, original)
    }

    /// An instance method; intercepted calls pass the receiver first.
    pub fn instance(
        owner: impl Into<String>,
        name: impl Into<String>,
        result: ReturnKind,
        original: Option<NativeFn>,
    ) -> Method {
        Method::root_definition(owner, name, MethodKind::Instance, result, original)
    }

    fn root_definition(
        owner: impl Into<String>,
        name: impl Into<String>,
        kind: MethodKind,
        result: ReturnKind,
        original: Option<NativeFn>,
    ) -> Method {
        Method {
            inner: Arc::new(MethodInner {
                owner: owner.into(),
                name: name.into(),
                kind,
                result,
                original,
                root: None,
            }),
        }
    }

    /// A generic instantiation of this method (e.g. `parse<u32>` derived
    /// from `parse<T>`). Canonicalises back to this method's root.
    pub fn instantiation(&self, type_args: impl Into<String>) -> Method {
        let root = self.root().clone();
        Method {
            inner: Arc::new(MethodInner {
                owner: root.inner.owner.clone(),
                name: format!("{}<{}>", root.inner.name, type_args.into()),
                kind: root.inner.kind,
                result: root.inner.result,
                original: root.inner.original.clone(),
                root: Some(root),
            }),
        }
    }

    /// A virtual override of this method declared on `subtype`.
    /// Canonicalises back to this method's root.
    pub fn override_in(&self, subtype: impl Into<String>) -> Method {
        let root = self.root().clone();
        Method {
            inner: Arc::new(MethodInner {
                owner: subtype.into(),
                name: root.inner.name.clone(),
                kind: root.inner.kind,
                result: root.inner.result,
                original: root.inner.original.clone(),
                root: Some(root),
            }),
        }
    }

    /// The root definition this method canonicalises to (itself, if it is
    /// the root).
    pub fn root(&self) -> &Method {
        let mut current = self;
        while let Some(root) = &current.inner.root {
            current = root;
        }
        current
    }

    /// The canonical registry key: owner and name of the root definition.
    pub fn id(&self) -> MethodId {
        let root = self.root();
        MethodId {
            owner: root.inner.owner.clone(),
            name: root.inner.name.clone(),
        }
    }

    pub fn kind(&self) -> MethodKind {
        self.inner.kind
    }

    /// Declared result type (taken from the root definition).
    pub fn result(&self) -> ReturnKind {
        self.root().inner.result
    }

    /// The original implementation, if one was supplied.
    pub fn original(&self) -> Option<NativeFn> {
        self.root().inner.original.clone()
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Method({}::{})", self.inner.owner, self.inner.name)
    }
}

/// Stable identity of a spy's receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceKey {
    /// Sentinel for static methods and free functions.
    Static,
    /// An object receiver, identified by its allocation.
    Object(usize),
}

impl InstanceKey {
    /// The key for a receiver value. Only objects have a stable identity;
    /// anything else cannot anchor an instance-bound spy.
    pub fn for_receiver(receiver: &Value) -> Result<InstanceKey, TestError> {
        match receiver {
            Value::Object(obj) => Ok(InstanceKey::Object(Arc::as_ptr(obj) as usize)),
            other => Err(TestError::SpyInternal(format!(
                "receiver must be an object, got {}",
                other.kind_name()
            ))),
        }
    }
}
