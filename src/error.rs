//! Error types for spec execution and the spy subsystem.
//!
//! Every failure a hook, test body, or spied call can raise is a
//! [`TestError`]; the executor folds them into test results and never lets
//! them escape `execute`. [`RunError`] covers misuse of the run itself.

use crate::method::MethodId;
use thiserror::Error;

/// An expectation that was not satisfied.
///
/// Raised by the matchers in [`crate::expect`]; always terminates the
/// current test body and always translates to a failed result.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AssertionError {
    /// Human-readable description of the mismatch.
    pub message: String,
}

impl AssertionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Any failure raised inside a hook, a test body, or a spied call.
#[derive(Debug, Error)]
pub enum TestError {
    /// A matcher expectation was not satisfied.
    #[error(transparent)]
    Assertion(#[from] AssertionError),

    /// A spied method was invoked while its behaviour queue was empty.
    #[error("unexpected call to `{0}`: no behaviour is queued")]
    UnexpectedSpyCall(MethodId),

    /// An instance method was invoked with a null receiver.
    #[error("`{0}` invoked on a null receiver")]
    NullReceiver(MethodId),

    /// A spy was configured in a way that can never dispatch.
    #[error("invalid spy configuration: {0}")]
    SpyConfig(String),

    /// The dispatcher could not recover the original method or another
    /// interception invariant was violated.
    #[error("spy dispatch failed: {0}")]
    SpyInternal(String),

    /// An error raised deliberately by a `Throws` behaviour.
    #[error("{0}")]
    Thrown(String),

    /// Any other error raised by user code.
    #[error("{message}")]
    User {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A body or hook panicked instead of returning an error.
    #[error("panicked: {0}")]
    Panicked(String),
}

impl TestError {
    /// Wrap an arbitrary error raised by user code, preserving it as the
    /// source so the full chain stays available for reporting.
    pub fn user(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        TestError::User {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// A user failure carrying only a message.
    pub fn message(msg: impl Into<String>) -> Self {
        TestError::User {
            message: msg.into(),
            source: None,
        }
    }

    /// The innermost cause's message.
    ///
    /// Walks the source chain to its end so that wrapped errors surface
    /// with the original message as their primary text. The full chain is
    /// still reachable through [`std::error::Error::source`].
    pub fn innermost_message(&self) -> String {
        let mut err: &dyn std::error::Error = self;
        while let Some(source) = err.source() {
            err = source;
        }
        err.to_string()
    }
}

/// Misuse of a [`crate::runner::TestRun`], as opposed to a failure inside it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunError {
    /// `execute` was called while a previous execution had not completed.
    #[error("this run is already executing")]
    AlreadyRunning,
}
