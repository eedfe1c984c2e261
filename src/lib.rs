//! Behaviour-driven spec engine with first-class function spies.
//!
//! Specs are registered as nested describes with before/after hooks, then
//! compiled into an ordered test list and executed sequentially, each test
//! wrapped in its exact setup/teardown cascade. Tests can install *spies*
//! over named methods: observable stand-ins that record every call and
//! answer from a programmable behaviour queue (return a value, throw, call
//! through, invoke a fake).
//!
//! ```
//! use spekt::{TestRun, describe, expect};
//!
//! let spec = describe("arithmetic", |s| {
//!     s.it("adds", || expect(2 + 2).to_equal(4));
//! });
//!
//! let run = TestRun::from_spec(&spec);
//! let results = tokio::runtime::Builder::new_current_thread()
//!     .enable_time()
//!     .build()
//!     .unwrap()
//!     .block_on(run.execute())
//!     .unwrap();
//! assert_eq!(results.len(), 1);
//! ```
//!
//! The interception mechanism that redirects real calls into the
//! dispatcher is platform-provided and out of scope; [`dispatch::handle`]
//! is the entry point such a mechanism targets, and
//! [`dispatch::trampoline`] produces the redirected form of a method for
//! hosts that intercept through function pointers.

pub mod compile;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod expect;
pub mod method;
pub mod report;
pub mod runner;
pub mod spec;
pub mod spy;
pub mod value;

pub use compile::{CompiledTest, compile};
pub use context::{CurrentTest, current};
pub use dispatch::{Dispatcher, handle, trampoline};
pub use error::{AssertionError, RunError, TestError};
pub use expect::{ExpectResult, Expectation, expect};
pub use method::{InstanceKey, Method, MethodId, MethodKind, NativeFn};
pub use report::{ConsoleReporter, FailureInfo, RunSummary};
pub use runner::{CancelHandle, Outcome, TestCompletion, TestRun};
pub use spec::{Modifier, NodeKind, SpecBuilder, SpecNode, describe, f_describe, x_describe};
pub use spy::{Spy, SpyConfigurator, SpyRegistry};
pub use value::{Object, ReturnKind, Value};
