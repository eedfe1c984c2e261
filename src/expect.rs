//! Value-level expectations.
//!
//! `expect(actual).to_equal(expected)?` inside a test body; a failed
//! matcher raises an [`AssertionError`], which terminates the body and
//! marks the test failed. The executor appends the failure message as the
//! test's terminal output line, so matchers never write to the output
//! buffer themselves.

use crate::error::{AssertionError, TestError};
use std::fmt::Debug;

/// Result type the matchers produce; `?`-compatible with test bodies.
pub type ExpectResult = Result<(), TestError>;

/// Start an expectation about `actual`.
pub fn expect<T>(actual: T) -> Expectation<T> {
    Expectation { actual }
}

/// A pending assertion about one value.
pub struct Expectation<T> {
    actual: T,
}

fn fail(message: String) -> ExpectResult {
    Err(AssertionError::new(message).into())
}

impl<T: Debug + PartialEq> Expectation<T> {
    pub fn to_equal(self, expected: T) -> ExpectResult {
        if self.actual == expected {
            Ok(())
        } else {
            fail(format!(
                "expected {:?} to equal {:?}",
                self.actual, expected
            ))
        }
    }

    pub fn not_to_equal(self, expected: T) -> ExpectResult {
        if self.actual != expected {
            Ok(())
        } else {
            fail(format!("expected {:?} not to equal it", self.actual))
        }
    }
}

impl<T: Debug + PartialOrd> Expectation<T> {
    pub fn to_be_greater_than(self, threshold: T) -> ExpectResult {
        if self.actual > threshold {
            Ok(())
        } else {
            fail(format!(
                "expected {:?} to be greater than {:?}",
                self.actual, threshold
            ))
        }
    }

    pub fn to_be_less_than(self, threshold: T) -> ExpectResult {
        if self.actual < threshold {
            Ok(())
        } else {
            fail(format!(
                "expected {:?} to be less than {:?}",
                self.actual, threshold
            ))
        }
    }
}

impl Expectation<bool> {
    pub fn to_be_true(self) -> ExpectResult {
        if self.actual {
            Ok(())
        } else {
            fail("expected false to be true".to_string())
        }
    }

    pub fn to_be_false(self) -> ExpectResult {
        if !self.actual {
            Ok(())
        } else {
            fail("expected true to be false".to_string())
        }
    }
}

impl Expectation<f64> {
    /// Absolute-difference closeness check.
    pub fn to_be_close_to(self, expected: f64, tolerance: f64) -> ExpectResult {
        if (self.actual - expected).abs() <= tolerance {
            Ok(())
        } else {
            fail(format!(
                "expected {} to be within {tolerance} of {expected}",
                self.actual
            ))
        }
    }
}

impl<T: Debug> Expectation<Option<T>> {
    pub fn to_be_some(self) -> ExpectResult {
        if self.actual.is_some() {
            Ok(())
        } else {
            fail("expected None to be Some".to_string())
        }
    }

    pub fn to_be_none(self) -> ExpectResult {
        match self.actual {
            None => Ok(()),
            Some(v) => fail(format!("expected Some({v:?}) to be None")),
        }
    }
}

fn str_to_contain(actual: &str, needle: &str) -> ExpectResult {
    if actual.contains(needle) {
        Ok(())
    } else {
        fail(format!("expected {actual:?} to contain {needle:?}"))
    }
}

fn str_to_match(actual: &str, pattern: &str) -> ExpectResult {
    let re = match regex::Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => return fail(format!("invalid regex {pattern:?}: {e}")),
    };
    if re.is_match(actual) {
        Ok(())
    } else {
        fail(format!("expected {actual:?} to match {pattern:?}"))
    }
}

impl<'a> Expectation<&'a str> {
    pub fn to_contain(self, needle: &str) -> ExpectResult {
        str_to_contain(self.actual, needle)
    }

    pub fn to_match(self, pattern: &str) -> ExpectResult {
        str_to_match(self.actual, pattern)
    }

    pub fn to_have_length(self, expected: usize) -> ExpectResult {
        let len = self.actual.len();
        if len == expected {
            Ok(())
        } else {
            fail(format!(
                "expected {:?} (length {len}) to have length {expected}",
                self.actual
            ))
        }
    }
}

impl Expectation<String> {
    pub fn to_contain(self, needle: &str) -> ExpectResult {
        str_to_contain(&self.actual, needle)
    }

    pub fn to_match(self, pattern: &str) -> ExpectResult {
        str_to_match(&self.actual, pattern)
    }

    pub fn to_have_length(self, expected: usize) -> ExpectResult {
        expect(self.actual.as_str()).to_have_length(expected)
    }
}

impl<T: Debug + PartialEq> Expectation<Vec<T>> {
    pub fn to_contain(self, item: T) -> ExpectResult {
        if self.actual.contains(&item) {
            Ok(())
        } else {
            fail(format!(
                "expected {:?} to contain {item:?}",
                self.actual
            ))
        }
    }

    pub fn to_have_length(self, expected: usize) -> ExpectResult {
        let len = self.actual.len();
        if len == expected {
            Ok(())
        } else {
            fail(format!(
                "expected {:?} (length {len}) to have length {expected}",
                self.actual
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_of(result: ExpectResult) -> String {
        result.unwrap_err().innermost_message()
    }

    #[test]
    fn equality() {
        assert!(expect(4).to_equal(4).is_ok());
        assert!(expect("a").not_to_equal("b").is_ok());
        assert_eq!(message_of(expect(4).to_equal(5)), "expected 4 to equal 5");
    }

    #[test]
    fn ordering() {
        assert!(expect(3).to_be_greater_than(2).is_ok());
        assert!(expect(2).to_be_less_than(3).is_ok());
        assert_eq!(
            message_of(expect(1).to_be_greater_than(2)),
            "expected 1 to be greater than 2"
        );
    }

    #[test]
    fn booleans_and_options() {
        assert!(expect(true).to_be_true().is_ok());
        assert!(expect(false).to_be_false().is_ok());
        assert!(expect(Some(1)).to_be_some().is_ok());
        assert!(expect(None::<i32>).to_be_none().is_ok());
        assert_eq!(
            message_of(expect(Some(1)).to_be_none()),
            "expected Some(1) to be None"
        );
    }

    #[test]
    fn closeness() {
        assert!(expect(0.1 + 0.2).to_be_close_to(0.3, 1e-9).is_ok());
        assert!(expect(0.5).to_be_close_to(0.3, 0.1).is_err());
    }

    #[test]
    fn strings() {
        assert!(expect("hello world").to_contain("world").is_ok());
        assert!(expect("abc123").to_match(r"[a-c]+\d+").is_ok());
        assert!(expect("abc").to_have_length(3).is_ok());
        assert!(expect("abc".to_string()).to_contain("b").is_ok());
        // An invalid pattern fails the expectation rather than panicking.
        assert!(message_of(expect("abc").to_match("(")).contains("invalid regex"));
    }

    #[test]
    fn vectors() {
        assert!(expect(vec![1, 2, 3]).to_contain(2).is_ok());
        assert!(expect(vec![1, 2, 3]).to_have_length(3).is_ok());
        assert_eq!(
            message_of(expect(vec![1]).to_contain(9)),
            "expected [1] to contain 9"
        );
    }

    #[test]
    fn failures_raise_assertion_errors() {
        let err = expect(1).to_equal(2).unwrap_err();
        assert!(matches!(err, TestError::Assertion(_)));
    }
}
