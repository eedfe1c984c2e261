//! Invocation dispatcher.
//!
//! Every intercepted call funnels through [`Dispatcher::handle`]: it is the
//! single place that decides call-through versus spy, records parameters,
//! and advances the behaviour queue. The platform mechanism that redirects
//! calls here (bytecode rewriting, a link-time shim, a proxy) is outside
//! the crate; [`trampoline`] produces the closure such an installer would
//! generate.

use crate::error::TestError;
use crate::method::{InstanceKey, Method, MethodKind, NativeFn};
use crate::spy::{Action, SpyRegistry};
use crate::value::Value;
use std::sync::Arc;
use tracing::trace;

/// Routes intercepted calls against one spy registry.
pub struct Dispatcher<'r> {
    registry: &'r SpyRegistry,
}

impl<'r> Dispatcher<'r> {
    pub fn new(registry: &'r SpyRegistry) -> Dispatcher<'r> {
        Dispatcher { registry }
    }

    /// Handle one intercepted call.
    ///
    /// `args` is the full argument list; for instance methods the receiver
    /// comes first. With no spy installed the original implementation runs
    /// and its error, if any, surfaces unwrapped. With a spy installed the
    /// logical parameters are logged and the front behaviour decides the
    /// result.
    pub fn handle(&self, method: &Method, args: &[Value]) -> Result<Value, TestError> {
        let root = method.root();
        let id = root.id();

        let (instance, params) = match root.kind() {
            MethodKind::Instance => {
                let Some(receiver) = args.first() else {
                    return Err(TestError::SpyInternal(format!(
                        "`{id}` expects a receiver but was called with no arguments"
                    )));
                };
                if receiver.is_null() {
                    return Err(TestError::NullReceiver(id));
                }
                (InstanceKey::for_receiver(receiver)?, &args[1..])
            }
            MethodKind::Free => (InstanceKey::Static, args),
        };

        let Some(spy) = self.registry.get_by_key(&id, instance) else {
            trace!(method = %id, "no spy installed, calling through");
            let original = root.original().ok_or_else(|| {
                TestError::SpyInternal(format!("`{id}` has no resolvable original implementation"))
            })?;
            // The inner error propagates as-is: no wrapping layer.
            return original(args);
        };

        // The behaviour is consumed before it runs, and the registry lock is
        // already released here, so fakes may re-enter the dispatcher.
        let action = spy.log_and_advance(params)?;
        trace!(method = %id, action = ?action, "dispatching spied call");
        match action {
            Action::CallThrough => {
                let original = root.original().ok_or_else(|| {
                    TestError::SpyInternal(format!(
                        "`{id}` has no resolvable original implementation"
                    ))
                })?;
                original(args)
            }
            Action::Returns(value) => Ok(value),
            Action::Throws(message) => Err(TestError::Thrown(message)),
            Action::Fake(fake) => fake(args),
            Action::Default => Ok(root.result().default_value()),
        }
    }
}

/// Handle an intercepted call against the process-wide registry.
///
/// This is the entry point an interception installer targets.
pub fn handle(method: &Method, args: &[Value]) -> Result<Value, TestError> {
    Dispatcher::new(SpyRegistry::global()).handle(method, args)
}

/// The redirected form of `method`: a callable that funnels every
/// invocation through the process-wide dispatcher.
pub fn trampoline(method: Method) -> NativeFn {
    Arc::new(move |args| handle(&method, args))
}
