//! Spy registry and behaviour queue.
//!
//! A spy is an observable stand-in installed over a named method: it records
//! every invocation and decides each call's result from a FIFO of
//! behaviours. The registry holds at most one spy per
//! `(root method, instance)` pair; the executor clears it between tests.

use crate::error::TestError;
use crate::method::{InstanceKey, Method, MethodId, MethodKind, NativeFn};
use crate::value::Value;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// What a queued behaviour does when a call reaches it.
#[derive(Clone)]
pub(crate) enum Action {
    /// Invoke the original implementation.
    CallThrough,
    /// Return a fixed value without invoking the original.
    Returns(Value),
    /// Raise an error carrying this message.
    Throws(String),
    /// Invoke a substitute function in place of the original.
    Fake(NativeFn),
    /// Return the zero/empty value of the declared result type.
    Default,
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::CallThrough => write!(f, "CallThrough"),
            Action::Returns(v) => write!(f, "Returns({v:?})"),
            Action::Throws(msg) => write!(f, "Throws({msg:?})"),
            Action::Fake(_) => write!(f, "Fake"),
            Action::Default => write!(f, "Default"),
        }
    }
}

/// How many calls a behaviour serves before it is dequeued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifetime {
    Finite(u32),
    Infinite,
}

#[derive(Debug, Clone)]
struct Behaviour {
    action: Action,
    life: Lifetime,
}

struct SpyState {
    calls: Vec<Vec<Value>>,
    queue: VecDeque<Behaviour>,
    /// True while the queue still holds only the construction-time default.
    seeded: bool,
}

/// An observable stand-in for one `(method, instance)` pair.
///
/// Clones share state: configuring or reading any clone sees the same call
/// log and behaviour queue.
#[derive(Clone)]
pub struct Spy {
    inner: Arc<SpyInner>,
}

struct SpyInner {
    method: Method,
    instance: InstanceKey,
    state: Mutex<SpyState>,
}

impl Spy {
    fn new(method: Method, instance: InstanceKey) -> Spy {
        // The queue is never empty at construction: a default behaviour of
        // infinite lifetime answers every call until configured otherwise.
        let mut queue = VecDeque::new();
        queue.push_back(Behaviour {
            action: Action::Default,
            life: Lifetime::Infinite,
        });
        Spy {
            inner: Arc::new(SpyInner {
                method,
                instance,
                state: Mutex::new(SpyState {
                    calls: Vec::new(),
                    queue,
                    seeded: true,
                }),
            }),
        }
    }

    /// The canonical identity of the spied method.
    pub fn method_id(&self) -> MethodId {
        self.inner.method.id()
    }

    pub(crate) fn method(&self) -> &Method {
        &self.inner.method
    }

    pub(crate) fn instance_key(&self) -> InstanceKey {
        self.inner.instance
    }

    /// Immutable snapshot of the call log: one parameter tuple per call,
    /// in call order.
    pub fn calls(&self) -> Vec<Vec<Value>> {
        self.inner.state.lock().calls.clone()
    }

    /// Number of calls routed to this spy so far.
    pub fn call_count(&self) -> usize {
        self.inner.state.lock().calls.len()
    }

    /// Begin configuring the next behaviour, e.g.
    /// `spy.and().times(2).returns(Value::Int(42))`.
    pub fn and(&self) -> SpyConfigurator<'_> {
        SpyConfigurator {
            spy: self,
            life: Lifetime::Finite(1),
        }
    }

    /// Record a call and consume the front behaviour.
    ///
    /// Consumption happens here, before the behaviour body executes, so a
    /// fake that re-enters the dispatcher (even on this same spy) observes
    /// the queue already advanced.
    pub(crate) fn log_and_advance(&self, params: &[Value]) -> Result<Action, TestError> {
        let mut state = self.inner.state.lock();
        state.calls.push(params.to_vec());
        let Some(front) = state.queue.front_mut() else {
            return Err(TestError::UnexpectedSpyCall(self.method_id()));
        };
        let action = front.action.clone();
        match front.life {
            Lifetime::Infinite => {}
            Lifetime::Finite(n) if n > 1 => front.life = Lifetime::Finite(n - 1),
            Lifetime::Finite(_) => {
                state.queue.pop_front();
            }
        }
        Ok(action)
    }

    fn enqueue(&self, action: Action, life: Lifetime) {
        let mut state = self.inner.state.lock();
        // The construction-time default would shadow anything queued behind
        // it (it never expires), so the first explicit configuration
        // displaces it.
        if state.seeded {
            state.queue.clear();
            state.seeded = false;
        }
        state.queue.push_back(Behaviour { action, life });
    }
}

impl fmt::Debug for Spy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Spy({}, {:?})",
            self.inner.method.id(),
            self.inner.instance
        )
    }
}

/// Builder for one queued behaviour.
///
/// Obtained from [`Spy::and`]; `times` sets the lifetime (default 1), the
/// terminal methods append the behaviour.
pub struct SpyConfigurator<'a> {
    spy: &'a Spy,
    life: Lifetime,
}

impl SpyConfigurator<'_> {
    /// Serve the next `n` calls with this behaviour. `n` is clamped to at
    /// least 1.
    pub fn times(mut self, n: u32) -> Self {
        self.life = Lifetime::Finite(n.max(1));
        self
    }

    /// Return `value` without invoking the original.
    ///
    /// The value is checked against the method's declared result type at
    /// configuration time.
    pub fn returns(self, value: Value) -> Result<(), TestError> {
        let declared = self.spy.method().result();
        if !declared.accepts(&value) {
            return Err(TestError::SpyConfig(format!(
                "cannot return a {} from `{}`: declared result is {declared:?}",
                value.kind_name(),
                self.spy.method_id(),
            )));
        }
        self.spy.enqueue(Action::Returns(value), self.life);
        Ok(())
    }

    /// Raise an error with `message` instead of returning.
    pub fn throws(self, message: impl Into<String>) {
        self.spy.enqueue(Action::Throws(message.into()), self.life);
    }

    /// Invoke `fake` in place of the original; its result becomes the
    /// call's result. Fakes receive the full argument list, receiver first
    /// for instance methods.
    pub fn calls_fake(self, fake: NativeFn) {
        self.spy.enqueue(Action::Fake(fake), self.life);
    }

    /// Invoke the original implementation.
    pub fn calls_through(self) -> Result<(), TestError> {
        if self.spy.method().original().is_none() {
            return Err(TestError::SpyConfig(format!(
                "`{}` has no original implementation to call through to",
                self.spy.method_id(),
            )));
        }
        self.spy.enqueue(Action::CallThrough, self.life);
        Ok(())
    }

    /// Return the declared result type's zero/empty value, indefinitely.
    /// Ignores `times`: the default behaviour has infinite lifetime.
    pub fn returns_default(self) {
        self.spy.enqueue(Action::Default, Lifetime::Infinite);
    }
}

type SpyKey = (MethodId, InstanceKey);

/// Process-wide table of active spies.
///
/// At most one spy exists per `(root method, instance)`; creating a second
/// disposes the first. The executor clears the global instance between
/// tests.
#[derive(Default)]
pub struct SpyRegistry {
    spies: Mutex<HashMap<SpyKey, Spy>>,
}

impl SpyRegistry {
    pub fn new() -> SpyRegistry {
        SpyRegistry::default()
    }

    /// The registry intercepted calls consult, shared by the whole process.
    pub fn global() -> &'static SpyRegistry {
        static GLOBAL: OnceLock<SpyRegistry> = OnceLock::new();
        GLOBAL.get_or_init(SpyRegistry::new)
    }

    /// Install a spy over `method`, bound to `receiver` for instance
    /// methods. An existing spy on the same `(method, instance)` is
    /// disposed first.
    pub fn create(&self, method: &Method, receiver: Option<&Value>) -> Result<Spy, TestError> {
        let key = self.key_for(method, receiver)?;
        let spy = Spy::new(method.root().clone(), key.1);
        // Inserting disposes any predecessor: its handles stay readable but
        // no longer receive calls.
        self.spies.lock().insert(key, spy.clone());
        Ok(spy)
    }

    /// The active spy for `(method, receiver)`, if one is installed.
    pub fn get(&self, method: &Method, receiver: Option<&Value>) -> Option<Spy> {
        let key = self.key_for(method, receiver).ok()?;
        self.spies.lock().get(&key).cloned()
    }

    pub(crate) fn get_by_key(&self, id: &MethodId, instance: InstanceKey) -> Option<Spy> {
        self.spies.lock().get(&(id.clone(), instance)).cloned()
    }

    /// Remove `spy`; the underlying method reverts to call-through.
    pub fn dispose(&self, spy: &Spy) {
        let key = (spy.method_id(), spy.instance_key());
        let mut spies = self.spies.lock();
        // Only remove if this exact spy is still the active one; a
        // replacement installed since stays.
        let is_active = spies
            .get(&key)
            .is_some_and(|active| Arc::ptr_eq(&active.inner, &spy.inner));
        if is_active {
            spies.remove(&key);
        }
    }

    /// Remove every spy. Idempotent.
    pub fn clear_all(&self) {
        let mut spies = self.spies.lock();
        if !spies.is_empty() {
            debug!(count = spies.len(), "clearing spy registry");
        }
        spies.clear();
    }

    pub fn len(&self) -> usize {
        self.spies.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.spies.lock().is_empty()
    }

    fn key_for(&self, method: &Method, receiver: Option<&Value>) -> Result<SpyKey, TestError> {
        let id = method.id();
        let instance = match (method.kind(), receiver) {
            (MethodKind::Free, None) => InstanceKey::Static,
            (MethodKind::Free, Some(_)) => {
                return Err(TestError::SpyConfig(format!(
                    "`{id}` is not an instance method and takes no receiver"
                )));
            }
            (MethodKind::Instance, Some(receiver)) => InstanceKey::for_receiver(receiver)?,
            (MethodKind::Instance, None) => {
                return Err(TestError::SpyConfig(format!(
                    "`{id}` is an instance method and needs a receiver"
                )));
            }
        };
        Ok((id, instance))
    }
}
