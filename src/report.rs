//! Run summaries and console reporting.

use crate::runner::{Outcome, TestCompletion, TestRun, serialize_duration};
use colored::Colorize;
use serde::Serialize;
use std::time::Duration;

/// Aggregate view of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Pass rate as a percentage of executed (non-skipped) tests.
    pub pass_rate: f64,
    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,
    pub failures: Vec<FailureInfo>,
}

/// Details of one failed test.
#[derive(Debug, Clone, Serialize)]
pub struct FailureInfo {
    pub full_name: String,
    pub message: String,
}

impl RunSummary {
    /// Aggregate a run's completions.
    pub fn from_results(results: &[TestCompletion]) -> Self {
        let mut summary = RunSummary {
            total: results.len(),
            passed: 0,
            failed: 0,
            skipped: 0,
            pass_rate: 0.0,
            duration: Duration::ZERO,
            failures: Vec::new(),
        };

        for result in results {
            summary.duration += result.duration;
            match result.outcome {
                Outcome::Passed => summary.passed += 1,
                Outcome::Failed => {
                    summary.failed += 1;
                    summary.failures.push(FailureInfo {
                        full_name: result.full_name.clone(),
                        message: result
                            .error
                            .as_ref()
                            .map(|e| e.innermost_message())
                            .unwrap_or_default(),
                    });
                }
                Outcome::Skipped => summary.skipped += 1,
            }
        }

        let executed = summary.total - summary.skipped;
        if executed > 0 {
            summary.pass_rate = summary.passed as f64 / executed as f64 * 100.0;
        }
        summary
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Prints one coloured line per completed test and a closing banner.
///
/// Attach before executing:
///
/// ```
/// use spekt::{ConsoleReporter, TestRun, describe};
///
/// let mut run = TestRun::from_spec(&describe("demo", |s| {
///     s.it("works", || Ok(()));
/// }));
/// ConsoleReporter::attach(&mut run);
/// ```
pub struct ConsoleReporter;

impl ConsoleReporter {
    /// Register reporting listeners on `run`.
    pub fn attach(run: &mut TestRun) {
        run.on_test_completed(Self::print_test);
        run.on_run_completed(|| println!("{}", "run complete".bold()));
    }

    fn print_test(completion: &TestCompletion) {
        let seconds = completion.duration.as_secs_f64();
        match completion.outcome {
            Outcome::Passed => {
                println!(
                    "{} {} {}",
                    "PASS".green().bold(),
                    completion.full_name,
                    format!("({seconds:.3}s)").dimmed()
                );
            }
            Outcome::Failed => {
                println!("{} {}", "FAIL".red().bold(), completion.full_name);
                if let Some(err) = &completion.error {
                    println!("     {}", err.innermost_message().red());
                }
            }
            Outcome::Skipped => {
                let reason = completion.skip_reason.as_deref().unwrap_or("skipped");
                println!(
                    "{} {} {}",
                    "SKIP".yellow().bold(),
                    completion.full_name,
                    format!("({reason})").dimmed()
                );
            }
        }
    }

    /// Print the closing summary block.
    pub fn print_summary(summary: &RunSummary) {
        let counts = format!(
            "{} passed, {} failed, {} skipped of {}",
            summary.passed, summary.failed, summary.skipped, summary.total
        );
        let line = if summary.all_passed() {
            counts.green()
        } else {
            counts.red()
        };
        println!("{line} in {:.3}s", summary.duration.as_secs_f64());
        for failure in &summary.failures {
            println!("  {} {}", "✗".red(), failure.full_name);
            println!("    {}", failure.message);
        }
    }
}
