//! Test execution engine.
//!
//! Runs a compiled test list sequentially, establishing the per-test
//! ambient context around each test, playing its hook cascades, timing it,
//! and emitting per-test and end-of-run events.
//!
//! Teardown semantics: the first failure in the before cascade or the body
//! skips the remaining befores and the body, but the *entire* after
//! cascade still runs; the first error becomes the test's error and later
//! teardown failures are noted in the output buffer only.

use crate::compile::{CompiledTest, compile};
use crate::context;
use crate::error::{RunError, TestError};
use crate::spec::{Body, SpecNode};
use crate::spy::SpyRegistry;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Guards the process-wide ambient context and spy registry: at most one
/// test owns them at a time, across every run in the process.
static TEST_GUARD: Semaphore = Semaphore::const_new(1);

pub(crate) fn test_guard() -> &'static Semaphore {
    &TEST_GUARD
}

/// How a single test ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
}

/// Result record for one executed (or skipped) test.
#[derive(Debug, Serialize)]
pub struct TestCompletion {
    pub full_name: String,
    pub outcome: Outcome,
    /// Why the test was skipped ("excluded" or "not focused").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// The test's output buffer: user-appended lines followed by the
    /// completion or failure line.
    pub output: String,
    /// The failure, with its full source chain intact.
    #[serde(serialize_with = "serialize_error", skip_serializing_if = "Option::is_none")]
    pub error: Option<TestError>,
    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,
}

pub(crate) fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

fn serialize_error<S>(error: &Option<TestError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match error {
        Some(err) => serializer.serialize_str(&err.innermost_message()),
        None => serializer.serialize_none(),
    }
}

/// Requests cancellation of a run from anywhere.
///
/// Cancellation is checked between tests; the in-flight test always runs
/// to completion.
#[derive(Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type TestListener = Box<dyn Fn(&TestCompletion) + Send + Sync>;
type RunListener = Box<dyn Fn() + Send + Sync>;

/// An ordered, immutable set of compiled tests ready to execute.
pub struct TestRun {
    tests: Vec<CompiledTest>,
    cancel: Arc<AtomicBool>,
    executing: AtomicBool,
    test_listeners: Vec<TestListener>,
    run_listeners: Vec<RunListener>,
}

impl TestRun {
    pub fn new(tests: Vec<CompiledTest>) -> TestRun {
        TestRun {
            tests,
            cancel: Arc::new(AtomicBool::new(false)),
            executing: AtomicBool::new(false),
            test_listeners: Vec::new(),
            run_listeners: Vec::new(),
        }
    }

    /// Compile `root` and wrap the result in a run.
    pub fn from_spec(root: &SpecNode) -> TestRun {
        TestRun::new(compile(root))
    }

    /// Keep only tests whose full name contains `filter`.
    pub fn filtered(mut self, filter: &str) -> TestRun {
        self.tests.retain(|t| t.full_name.contains(filter));
        self
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// A handle that can request cancellation from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }

    /// Observe each test's result as it completes. Listener panics are
    /// swallowed.
    pub fn on_test_completed<F>(&mut self, listener: F)
    where
        F: Fn(&TestCompletion) + Send + Sync + 'static,
    {
        self.test_listeners.push(Box::new(listener));
    }

    /// Observe the end of the run, after every per-test event.
    pub fn on_run_completed<F>(&mut self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.run_listeners.push(Box::new(listener));
    }

    /// Execute the run and return one completion per test reached.
    ///
    /// Fails with [`RunError::AlreadyRunning`] if a previous `execute` on
    /// this run has not finished. Errors in hooks and bodies never escape:
    /// they become failed results.
    pub async fn execute(&self) -> Result<Vec<TestCompletion>, RunError> {
        if self
            .executing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RunError::AlreadyRunning);
        }
        let _reset = ExecutingReset(&self.executing);

        let any_focused = self.tests.iter().any(|t| t.is_focused);
        let mut results = Vec::with_capacity(self.tests.len());

        for test in &self.tests {
            if self.cancel.load(Ordering::SeqCst) {
                debug!(remaining = self.tests.len() - results.len(), "run cancelled");
                break;
            }

            let permit = TEST_GUARD
                .acquire()
                .await
                .expect("single-test semaphore is never closed");
            let ctx = context::enter(test.full_name.clone());
            debug!(test = %test.full_name, "test starting");

            let (outcome, skip_reason, error, duration) = run_one(test, any_focused).await;

            if outcome != Outcome::Skipped {
                match &error {
                    None => ctx.append_output("Test completed successfully."),
                    Some(err) => ctx.append_output(&err.innermost_message()),
                }
            }

            SpyRegistry::global().clear_all();
            context::exit();
            drop(permit);

            let completion = TestCompletion {
                full_name: test.full_name.clone(),
                outcome,
                skip_reason,
                output: ctx.output(),
                error,
                duration,
            };
            debug!(test = %completion.full_name, outcome = ?completion.outcome, "test completed");
            self.emit_test_completed(&completion);
            results.push(completion);
        }

        self.emit_run_completed();
        Ok(results)
    }

    fn emit_test_completed(&self, completion: &TestCompletion) {
        for listener in &self.test_listeners {
            let call = AssertUnwindSafe(|| listener(completion));
            if std::panic::catch_unwind(call).is_err() {
                warn!(test = %completion.full_name, "test-completed listener panicked");
            }
        }
    }

    fn emit_run_completed(&self) {
        for listener in &self.run_listeners {
            let call = AssertUnwindSafe(|| listener());
            if std::panic::catch_unwind(call).is_err() {
                warn!("run-completed listener panicked");
            }
        }
    }
}

struct ExecutingReset<'a>(&'a AtomicBool);

impl Drop for ExecutingReset<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Run one test, including its block hooks, and classify the result.
async fn run_one(
    test: &CompiledTest,
    any_focused: bool,
) -> (Outcome, Option<String>, Option<TestError>, Duration) {
    // Block hooks run at their boundary even when the adjacent test is
    // skipped; their failure is attributed to this test.
    let mut block_error = None;
    for hook in &test.enter_block {
        if let Err(err) = run_body(hook).await {
            block_error = Some(err);
            break;
        }
    }

    let (mut outcome, mut skip_reason, mut error, duration) = if let Some(err) = block_error {
        (Outcome::Failed, None, Some(err), Duration::ZERO)
    } else if test.is_excluded {
        (
            Outcome::Skipped,
            Some("excluded".to_string()),
            None,
            Duration::ZERO,
        )
    } else if any_focused && !test.is_focused {
        (
            Outcome::Skipped,
            Some("not focused".to_string()),
            None,
            Duration::ZERO,
        )
    } else {
        let started = Instant::now();
        let error = run_cascades(test).await;
        let duration = started.elapsed();
        match error {
            None => (Outcome::Passed, None, None, duration),
            Some(err) => (Outcome::Failed, None, Some(err), duration),
        }
    };

    for hook in &test.exit_block {
        if let Err(err) = run_body(hook).await {
            if error.is_none() {
                outcome = Outcome::Failed;
                skip_reason = None;
                error = Some(err);
            } else {
                context::append_output(&format!("after-all hook also failed: {err}"));
            }
        }
    }

    (outcome, skip_reason, error, duration)
}

/// Play the before cascade, the body, and the after cascade; return the
/// first error.
async fn run_cascades(test: &CompiledTest) -> Option<TestError> {
    let mut first_error = None;

    for hook in &test.before_each {
        if let Err(err) = run_body(hook).await {
            first_error = Some(err);
            break;
        }
    }

    if first_error.is_none()
        && let Err(err) = run_body(&test.body).await
    {
        first_error = Some(err);
    }

    // The whole after cascade runs regardless of earlier failures.
    for hook in &test.after_each {
        if let Err(err) = run_body(hook).await {
            if first_error.is_none() {
                first_error = Some(err);
            } else {
                context::append_output(&format!("teardown also failed: {err}"));
            }
        }
    }

    first_error
}

/// Invoke a body, containing panics and awaiting the async arm.
async fn run_body(body: &Body) -> Result<(), TestError> {
    match body {
        Body::Sync(f) => match std::panic::catch_unwind(AssertUnwindSafe(|| f())) {
            Ok(result) => result,
            Err(payload) => Err(TestError::Panicked(panic_message(payload))),
        },
        Body::Async(f) => {
            let future = match std::panic::catch_unwind(AssertUnwindSafe(|| f())) {
                Ok(future) => future,
                Err(payload) => return Err(TestError::Panicked(panic_message(payload))),
            };
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(TestError::Panicked(panic_message(payload))),
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TestError;
    use crate::expect::expect;
    use crate::spec::describe;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// Two handles to one shared trace buffer; closures append step markers.
    fn trace_buffer() -> (Arc<Mutex<String>>, Arc<Mutex<String>>) {
        let trace = Arc::new(Mutex::new(String::new()));
        (trace.clone(), trace)
    }

    fn append(trace: &Arc<Mutex<String>>, s: &str) {
        trace.lock().push_str(s);
    }

    async fn run(spec: &crate::spec::SpecNode) -> Vec<TestCompletion> {
        TestRun::from_spec(spec).execute().await.unwrap()
    }

    // ==================== Outcome Tests ====================

    #[tokio::test]
    async fn passing_and_failing_tests() {
        let spec = describe("math", |s| {
            s.it("adds", || expect(2 + 2).to_equal(4));
            s.it("is wrong", || expect(2 + 2).to_equal(5));
        });

        let results = run(&spec).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].outcome, Outcome::Passed);
        assert_eq!(results[1].outcome, Outcome::Failed);
        assert!(results[1].error.is_some());
    }

    #[tokio::test]
    async fn output_ends_with_the_status_line() {
        let spec = describe("output", |s| {
            s.it("writes", || {
                context::append_output("user line");
                Ok(())
            });
            s.it("fails", || Err(TestError::message("it broke")));
        });

        let results = run(&spec).await;
        assert_eq!(
            results[0].output,
            "user line\nTest completed successfully.\n"
        );
        assert!(results[1].output.ends_with("it broke\n"));
    }

    #[tokio::test]
    async fn sync_and_async_failures_are_equivalent() {
        let spec = describe("failures", |s| {
            s.it("sync", || Err(TestError::message("boom")));
            s.it_async("async", || async { Err(TestError::message("boom")) });
        });

        let results = run(&spec).await;
        assert_eq!(results[0].outcome, Outcome::Failed);
        assert_eq!(results[1].outcome, Outcome::Failed);
        assert_eq!(
            results[0].error.as_ref().unwrap().innermost_message(),
            results[1].error.as_ref().unwrap().innermost_message()
        );
    }

    #[tokio::test]
    async fn panics_become_failures() {
        let spec = describe("panics", |s| {
            s.it("panics", || panic!("kaboom"));
        });

        let results = run(&spec).await;
        assert_eq!(results[0].outcome, Outcome::Failed);
        assert!(
            results[0]
                .error
                .as_ref()
                .unwrap()
                .to_string()
                .contains("kaboom")
        );
    }

    #[tokio::test]
    async fn durations_are_measured_for_executed_tests() {
        let spec = describe("timing", |s| {
            s.it_async("sleeps", || async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(())
            });
        });

        let results = run(&spec).await;
        assert!(results[0].duration >= Duration::from_millis(20));
    }

    // ==================== Hook Cascade Tests ====================

    #[tokio::test]
    async fn hooks_nest_around_the_body() {
        let (trace, t) = trace_buffer();
        let (t1, t2) = (t.clone(), t.clone());
        let (t3, t4) = (t.clone(), t.clone());

        let spec = describe("outer", |s| {
            s.before_each(move || {
                append(&t1, "B");
                Ok(())
            });
            s.after_each(move || {
                append(&t2, "A");
                Ok(())
            });
            s.describe("inner", |s| {
                s.before_each(move || {
                    append(&t3, "b");
                    Ok(())
                });
                s.it("leaf", move || {
                    append(&t4, "X");
                    Ok(())
                });
            });
        });

        run(&spec).await;
        assert_eq!(*trace.lock(), "BbXA");
    }

    #[tokio::test]
    async fn failed_before_skips_body_but_afters_still_run() {
        let (trace, t) = trace_buffer();
        let (t1, t2) = (t.clone(), t.clone());
        let (t3, t4) = (t.clone(), t.clone());

        let spec = describe("root", |s| {
            s.before_each(move || {
                append(&t1, "1");
                Err(TestError::message("setup broke"))
            });
            s.before_each(move || {
                append(&t2, "2");
                Ok(())
            });
            s.after_each(move || {
                append(&t3, "3");
                Ok(())
            });
            s.it("never runs", move || {
                append(&t4, "X");
                Ok(())
            });
        });

        let results = run(&spec).await;
        // The second before and the body are skipped; the after still runs.
        assert_eq!(*trace.lock(), "13");
        assert_eq!(results[0].outcome, Outcome::Failed);
        assert_eq!(
            results[0].error.as_ref().unwrap().innermost_message(),
            "setup broke"
        );
    }

    #[tokio::test]
    async fn first_error_wins_over_teardown_errors() {
        let spec = describe("root", |s| {
            s.after_each(|| Err(TestError::message("teardown broke")));
            s.it("fails first", || Err(TestError::message("body broke")));
        });

        let results = run(&spec).await;
        assert_eq!(
            results[0].error.as_ref().unwrap().innermost_message(),
            "body broke"
        );
        assert!(results[0].output.contains("teardown also failed"));
    }

    #[tokio::test]
    async fn teardown_error_fails_an_otherwise_passing_test() {
        let spec = describe("root", |s| {
            s.after_each(|| Err(TestError::message("teardown broke")));
            s.it("passes", || Ok(()));
        });

        let results = run(&spec).await;
        assert_eq!(results[0].outcome, Outcome::Failed);
    }

    #[tokio::test]
    async fn block_hooks_run_once_around_the_block() {
        let (trace, t) = trace_buffer();
        let (t1, t2) = (t.clone(), t.clone());
        let (t3, t4) = (t.clone(), t.clone());

        let spec = describe("root", |s| {
            s.before_all(move || {
                append(&t1, "[");
                Ok(())
            });
            s.after_all(move || {
                append(&t2, "]");
                Ok(())
            });
            s.it("one", move || {
                append(&t3, "1");
                Ok(())
            });
            s.it("two", move || {
                append(&t4, "2");
                Ok(())
            });
        });

        run(&spec).await;
        assert_eq!(*trace.lock(), "[12]");
    }

    #[tokio::test]
    async fn before_all_failure_fails_the_first_test() {
        let spec = describe("root", |s| {
            s.before_all(|| Err(TestError::message("block setup broke")));
            s.it("first", || Ok(()));
            s.it("second", || Ok(()));
        });

        let results = run(&spec).await;
        assert_eq!(results[0].outcome, Outcome::Failed);
        // Later tests are unaffected by the block failure.
        assert_eq!(results[1].outcome, Outcome::Passed);
    }

    // ==================== Focus / Exclusion Tests ====================

    #[tokio::test]
    async fn focused_tests_skip_the_rest() {
        let spec = describe("root", |s| {
            s.f_it("t1", || Ok(()));
            s.it("t2", || Ok(()));
            s.f_it("t3", || Ok(()));
        });

        let results = run(&spec).await;
        assert_eq!(results[0].outcome, Outcome::Passed);
        assert_eq!(results[1].outcome, Outcome::Skipped);
        assert_eq!(results[1].skip_reason.as_deref(), Some("not focused"));
        assert_eq!(results[2].outcome, Outcome::Passed);
    }

    #[tokio::test]
    async fn excluded_tests_are_skipped_and_never_run() {
        let ran = Arc::new(AtomicUsize::new(0));
        let flag = ran.clone();
        let spec = describe("root", |s| {
            s.x_it("skipped", move || {
                flag.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            s.it("runs", || Ok(()));
        });

        let results = run(&spec).await;
        assert_eq!(results[0].outcome, Outcome::Skipped);
        assert_eq!(results[0].skip_reason.as_deref(), Some("excluded"));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(results[1].outcome, Outcome::Passed);
    }

    #[tokio::test]
    async fn exclusion_dominates_focus() {
        let spec = describe("root", |s| {
            s.x_describe("excluded block", |s| {
                s.f_it("focused but excluded", || Ok(()));
            });
            s.it("plain", || Ok(()));
        });

        let results = run(&spec).await;
        assert_eq!(results[0].outcome, Outcome::Skipped);
        assert_eq!(results[0].skip_reason.as_deref(), Some("excluded"));
        // The focused-but-excluded test still counts toward any_focused,
        // so the plain test is skipped as not focused.
        assert_eq!(results[1].outcome, Outcome::Skipped);
        assert_eq!(results[1].skip_reason.as_deref(), Some("not focused"));
    }

    // ==================== Run Lifecycle Tests ====================

    #[tokio::test]
    async fn cancellation_stops_between_tests() {
        let mut run = TestRun::from_spec(&describe("root", |s| {
            for i in 0..10 {
                s.it(&format!("t{i}"), || Ok(()));
            }
        }));
        let handle = run.cancel_handle();
        let completed = Arc::new(AtomicUsize::new(0));
        let counter = completed.clone();
        run.on_test_completed(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                handle.cancel();
            }
        });
        let finished = Arc::new(AtomicBool::new(false));
        let finished_flag = finished.clone();
        run.on_run_completed(move || finished_flag.store(true, Ordering::SeqCst));

        let results = run.execute().await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reentrant_execute_fails() {
        let run = Arc::new(TestRun::from_spec(&describe("slow", |s| {
            s.it_async("sleeps", || async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            });
        })));

        let background = {
            let run = run.clone();
            tokio::spawn(async move { run.execute().await.map(|r| r.len()) })
        };
        // Give the background execution time to claim the run.
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(run.execute().await.unwrap_err(), RunError::AlreadyRunning);
        assert_eq!(background.await.unwrap().unwrap(), 1);

        // Once finished the run is executable again.
        assert_eq!(run.execute().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn listener_panics_are_swallowed() {
        let mut run = TestRun::from_spec(&describe("root", |s| {
            s.it("fine", || Ok(()));
        }));
        run.on_test_completed(|_| panic!("bad listener"));
        run.on_run_completed(|| panic!("bad finisher"));

        let results = run.execute().await.unwrap();
        assert_eq!(results[0].outcome, Outcome::Passed);
    }

    #[tokio::test]
    async fn filtered_keeps_matching_tests_only() {
        let run = TestRun::from_spec(&describe("root", |s| {
            s.it("alpha one", || Ok(()));
            s.it("beta two", || Ok(()));
            s.it("alpha three", || Ok(()));
        }))
        .filtered("alpha");

        assert_eq!(run.len(), 2);
        let results = run.execute().await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.full_name.contains("alpha")));
    }

    #[tokio::test]
    async fn spies_are_cleared_between_tests() {
        use crate::method::Method;
        use crate::value::ReturnKind;

        let spec = describe("spies", |s| {
            s.it("installs a spy", || {
                let method = Method::free("Cleanup", "target", ReturnKind::Unit, None);
                SpyRegistry::global().create(&method, None)?;
                Ok(())
            });
            s.it("sees a clean registry", || {
                let method = Method::free("Cleanup", "target", ReturnKind::Unit, None);
                let registry = context::current()
                    .ok_or_else(|| TestError::message("no ambient context"))?
                    .spies();
                expect(registry.get(&method, None).is_none()).to_be_true()
            });
        });

        let results = run(&spec).await;
        assert!(results.iter().all(|r| r.outcome == Outcome::Passed));
    }

    #[tokio::test]
    async fn context_names_the_running_test() {
        let spec = describe("ctx", |s| {
            s.it("knows its name", || {
                let current =
                    context::current().ok_or_else(|| TestError::message("no ambient context"))?;
                expect(current.full_name()).to_equal("ctx knows its name")
            });
        });

        let results = run(&spec).await;
        assert_eq!(results[0].outcome, Outcome::Passed);
    }

    #[tokio::test]
    async fn results_serialize_with_float_durations() {
        let spec = describe("serde", |s| {
            s.it("passes", || Ok(()));
        });

        let results = run(&spec).await;
        let json = serde_json::to_value(&results[0]).unwrap();
        assert_eq!(json["outcome"], "passed");
        assert!(json["duration"].is_f64());
        assert!(json.get("error").is_none());
    }
}
