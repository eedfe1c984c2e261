//! Per-test ambient context.
//!
//! While a test executes, a process-wide slot names it and buffers its
//! output. Test bodies and hooks reach it through [`current`] instead of
//! threading a handle through every call; the executor uses it to record
//! each test's terminal status line. The single-test semaphore guarantees
//! at most one context is active at a time.

use crate::spy::SpyRegistry;
use parking_lot::Mutex;
use std::sync::Arc;

static CURRENT: Mutex<Option<CurrentTest>> = Mutex::new(None);

/// Handle to the currently-executing test.
///
/// Clones share the same output buffer.
#[derive(Clone)]
pub struct CurrentTest {
    inner: Arc<CurrentInner>,
}

struct CurrentInner {
    full_name: String,
    output: Mutex<String>,
}

impl CurrentTest {
    /// The test's full name: its describe path plus its own name.
    pub fn full_name(&self) -> &str {
        &self.inner.full_name
    }

    /// Append one line to the test's output buffer.
    pub fn append_output(&self, line: &str) {
        let mut output = self.inner.output.lock();
        output.push_str(line);
        output.push('\n');
    }

    /// Snapshot of the output buffer.
    pub fn output(&self) -> String {
        self.inner.output.lock().clone()
    }

    /// The spy registry intercepted calls consult.
    pub fn spies(&self) -> &'static SpyRegistry {
        SpyRegistry::global()
    }
}

/// The ambient context of the currently-executing test, if any.
pub fn current() -> Option<CurrentTest> {
    CURRENT.lock().clone()
}

/// Append a line to the current test's output; a no-op outside a test.
pub fn append_output(line: &str) {
    if let Some(test) = current() {
        test.append_output(line);
    }
}

/// Install a fresh context for a test. Called by the executor under the
/// single-test semaphore.
pub(crate) fn enter(full_name: String) -> CurrentTest {
    let test = CurrentTest {
        inner: Arc::new(CurrentInner {
            full_name,
            output: Mutex::new(String::new()),
        }),
    };
    *CURRENT.lock() = Some(test.clone());
    test
}

/// Clear the context at test end.
pub(crate) fn exit() {
    *CURRENT.lock() = None;
}
