//! Step recording and the end-of-run summary
//!
//! The scenario is a chain of dependent steps, so the first failure ends the
//! run. Every step that ran is recorded with its duration and shows up in the
//! summary as PASS or FAIL.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::{error, info};

use crate::{Error, Result};

/// Longest error text shown per step in the summary
const MAX_SUMMARY_ERROR_LEN: usize = 200;

/// Outcome of one step
#[derive(Clone, Debug)]
pub struct StepResult {
    /// Step description as logged
    pub name: String,
    /// Whether the step succeeded
    pub passed: bool,
    /// Wall time spent in the step
    pub duration: Duration,
    /// Failure text, when it failed
    pub error: Option<String>,
}

/// Ordered record of the steps of one run
pub struct StepReport {
    suite: String,
    results: Mutex<Vec<StepResult>>,
}

impl StepReport {
    /// Start an empty report for `suite`
    pub fn new(suite: &str) -> Self {
        Self {
            suite: suite.to_string(),
            results: Mutex::new(Vec::new()),
        }
    }

    /// Run one step, record its outcome, and hand its result back.
    ///
    /// A panic inside the step is recorded as a failure and surfaces as an
    /// error rather than unwinding through the rest of the run.
    pub async fn step<T, Fut>(&self, name: &str, step: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        info!("STEP: {}", name);
        let start = Instant::now();
        let result = match AssertUnwindSafe(step).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                Err(Error::internal_with_context(
                    "step",
                    format!("PANIC: {}", msg),
                ))
            }
        };

        if let Err(e) = &result {
            error!(step = %name, error = %e, "Step failed");
        }
        self.record(name, start.elapsed(), result.as_ref().err());
        result
    }

    /// Record a step whose work happened outside [`StepReport::step`]
    pub fn record(&self, name: &str, duration: Duration, error: Option<&Error>) {
        self.lock().push(StepResult {
            name: name.to_string(),
            passed: error.is_none(),
            duration,
            error: error.map(ToString::to_string),
        });
    }

    /// Snapshot of the recorded steps, in order
    pub fn results(&self) -> Vec<StepResult> {
        self.lock().clone()
    }

    /// Log the summary table and fail if any step failed
    pub fn finish(&self) -> Result<()> {
        let results = self.lock();
        let total_duration: Duration = results.iter().map(|r| r.duration).sum();
        let passed = results.iter().filter(|r| r.passed).count();
        let failed = results.len() - passed;

        info!("========================================");
        info!("  {}", self.suite.to_uppercase());
        info!("========================================");
        for r in results.iter() {
            let tag = if r.passed { "PASS" } else { "FAIL" };
            info!("  {tag}  {:60} {:.1}s", r.name, r.duration.as_secs_f64());
            if let Some(e) = &r.error {
                info!("        -> {}", truncate(e, MAX_SUMMARY_ERROR_LEN));
            }
        }
        info!("----------------------------------------");
        info!(
            "  {} passed, {} failed ({:.1}s total)",
            passed,
            failed,
            total_duration.as_secs_f64()
        );
        info!("========================================");

        if failed > 0 {
            let failures: Vec<_> = results
                .iter()
                .filter(|r| !r.passed)
                .map(|r| r.name.as_str())
                .collect();
            return Err(Error::assertion(format!(
                "{} step(s) failed in {}: {}",
                failed,
                self.suite,
                failures.join(", ")
            )));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<StepResult>> {
        // A poisoned lock only means a panic happened mid-push; the data is still usable
        self.results
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cut `text` to at most `max` bytes without splitting a character
fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_panics() -> bool {
        true
    }

    #[tokio::test]
    async fn test_passing_step_returns_value() {
        let report = StepReport::new("limit range");
        let value = report.step("compute", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);

        let results = report.results();
        assert_eq!(results.len(), 1);
        assert!(results[0].passed);
        assert!(results[0].error.is_none());
        assert!(report.finish().is_ok());
    }

    /// Story: A failing step is recorded and fails the summary
    #[tokio::test]
    async fn story_failed_step_fails_finish() {
        let report = StepReport::new("limit range");
        report.step("ok", async { Ok(()) }).await.unwrap();
        let err = report
            .step::<(), _>("create pod", async {
                Err(Error::unexpected_admission("create pod pod-above-max"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedAdmission { .. }));

        let results = report.results();
        assert!(!results[1].passed);
        assert!(results[1]
            .error
            .as_deref()
            .unwrap()
            .contains("pod-above-max"));

        let summary = report.finish().unwrap_err().to_string();
        assert!(summary.contains("1 step(s) failed"));
        assert!(summary.contains("create pod"));
    }

    /// Story: A panicking step is contained and reported
    #[tokio::test]
    async fn story_panic_becomes_failure() {
        let report = StepReport::new("limit range");
        let err = report
            .step("explode", async {
                if report_panics() {
                    panic!("boom");
                }
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("PANIC: boom"));
        assert!(!report.results()[0].passed);
    }

    #[test]
    fn test_record_external_step() {
        let report = StepReport::new("limit range");
        report.record("setup", Duration::from_millis(5), None);
        report.record(
            "cleanup",
            Duration::from_millis(5),
            Some(&Error::config("x")),
        );
        let results = report.results();
        assert!(results[0].passed);
        assert!(!results[1].passed);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc");
        // 'é' is two bytes; cutting at 2 would split it
        assert_eq!(truncate("aé", 2), "a");
    }
}
