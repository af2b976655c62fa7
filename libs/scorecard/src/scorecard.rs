//! Stage scheduler.
//!
//! Stages run in configuration order. Within a stage the selected tests run
//! either all at once or one after another; every selected test yields
//! exactly one [`Test`] in the resulting [`TestList`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::api::{
    Configuration, StageConfiguration, State, Test, TestConfiguration, TestList, TestResult,
    TestStatus,
};
use crate::context::{ContextError, RunContext};
use crate::runner::{RunnerError, TestRunner};
use crate::selector::Selector;

/// Budget for runner cleanup, independent of the run's own deadline.
pub const CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from a scorecard run.
///
/// Every variant except `Initialize` carries the results collected before
/// the error.
#[derive(Debug, Error)]
pub enum ScorecardError {
    #[error("failed to initialize test runner: {0}")]
    Initialize(#[source] RunnerError),

    #[error("error running tests: {source}")]
    Run {
        #[source]
        source: ContextError,
        tests: TestList,
    },

    #[error("error cleaning up tests: {source}")]
    Cleanup {
        #[source]
        source: RunnerError,
        tests: TestList,
    },
}

impl ScorecardError {
    /// Results gathered before the error, if any.
    pub fn partial_results(&self) -> Option<&TestList> {
        match self {
            ScorecardError::Initialize(_) => None,
            ScorecardError::Run { tests, .. } | ScorecardError::Cleanup { tests, .. } => {
                Some(tests)
            }
        }
    }

    pub fn into_partial_results(self) -> Option<TestList> {
        match self {
            ScorecardError::Initialize(_) => None,
            ScorecardError::Run { tests, .. } | ScorecardError::Cleanup { tests, .. } => {
                Some(tests)
            }
        }
    }

    /// The context error behind this failure, if the run was cut short.
    pub fn context_error(&self) -> Option<ContextError> {
        match self {
            ScorecardError::Run { source, .. } => Some(*source),
            ScorecardError::Initialize(source) | ScorecardError::Cleanup { source, .. } => {
                source.context_error()
            }
        }
    }
}

/// Runs a configuration's tests through a runner.
pub struct Scorecard {
    pub config: Configuration,
    pub selector: Selector,
    pub runner: Arc<dyn TestRunner>,
    pub skip_cleanup: bool,
}

impl Scorecard {
    /// Create a new scorecard.
    pub fn new(config: Configuration, selector: Selector, runner: Arc<dyn TestRunner>) -> Self {
        Self {
            config,
            selector,
            runner,
            skip_cleanup: false,
        }
    }

    /// Leave runner resources in place after the run.
    pub fn with_skip_cleanup(mut self, skip_cleanup: bool) -> Self {
        self.skip_cleanup = skip_cleanup;
        self
    }

    /// Tests of `stage` matched by the selector, in declared order.
    pub fn select_tests(&self, stage: &StageConfiguration) -> Vec<TestConfiguration> {
        stage
            .tests
            .iter()
            .filter(|test| self.selector.is_empty() || self.selector.matches(&test.labels))
            .cloned()
            .collect()
    }

    /// Selected tests with empty statuses, without running anything.
    pub fn list(&self) -> TestList {
        let mut list = TestList::new();
        for stage in &self.config.stages {
            list.items.extend(
                self.select_tests(stage)
                    .into_iter()
                    .map(|test| Test::new(test, TestStatus::default())),
            );
        }
        list
    }

    /// Run every selected test.
    ///
    /// Test failures are recorded as results. The run itself fails only if
    /// initialization fails, `ctx` ends before all stages finish, or cleanup
    /// fails.
    pub async fn run(&self, ctx: &RunContext) -> Result<TestList, ScorecardError> {
        self.runner
            .initialize(ctx)
            .await
            .map_err(ScorecardError::Initialize)?;

        let mut list = TestList::new();
        for (idx, stage) in self.config.stages.iter().enumerate() {
            let tests = self.select_tests(stage);
            if tests.is_empty() {
                debug!(stage = idx, "No tests selected, skipping stage");
                continue;
            }

            info!(
                stage = idx,
                tests = tests.len(),
                parallel = stage.parallel,
                "Running stage"
            );

            let results = if stage.parallel {
                self.run_parallel(ctx, tests).await
            } else {
                self.run_sequential(ctx, tests).await
            };
            list.items.extend(results);
        }

        // Checked before cleanup, which runs under its own deadline.
        let ctx_err = ctx.err();

        if self.skip_cleanup {
            info!("Skipping cleanup of test resources");
        } else {
            let cleanup_ctx = RunContext::with_timeout(CLEANUP_TIMEOUT);
            if let Err(source) = self.runner.cleanup(&cleanup_ctx).await {
                error!(error = %source, "Cleanup failed");
                return Err(ScorecardError::Cleanup {
                    source,
                    tests: list,
                });
            }
        }

        match ctx_err {
            Some(source) => Err(ScorecardError::Run {
                source,
                tests: list,
            }),
            None => Ok(list),
        }
    }

    async fn run_sequential(&self, ctx: &RunContext, tests: Vec<TestConfiguration>) -> Vec<Test> {
        let mut results = Vec::with_capacity(tests.len());
        for test in tests {
            results.push(run_test(self.runner.as_ref(), ctx, test).await);
        }
        results
    }

    async fn run_parallel(&self, ctx: &RunContext, tests: Vec<TestConfiguration>) -> Vec<Test> {
        // One slot per test so no task ever blocks on send.
        let (tx, mut rx) = mpsc::channel(tests.len());
        let mut handles = Vec::with_capacity(tests.len());

        for test in tests {
            let tx = tx.clone();
            let runner = Arc::clone(&self.runner);
            let ctx = ctx.clone();
            let spec = test.clone();
            let handle = tokio::spawn(async move {
                let result = run_test(runner.as_ref(), &ctx, test).await;
                let _ = tx.send(result).await;
            });
            handles.push((spec, handle));
        }
        drop(tx);

        let mut lost = Vec::new();
        for (spec, handle) in handles {
            if let Err(e) = handle.await {
                error!(image = %spec.image, error = %e, "Test task did not complete");
                let mut result = TestResult::new("", State::Error);
                result.errors.push(format!("test task did not complete: {e}"));
                lost.push(Test::new(spec, stamp(TestStatus::new(vec![result]))));
            }
        }

        let mut results = Vec::with_capacity(rx.max_capacity());
        while let Some(test) = rx.recv().await {
            results.push(test);
        }
        results.extend(lost);
        results
    }
}

async fn run_test(runner: &dyn TestRunner, ctx: &RunContext, test: TestConfiguration) -> Test {
    debug!(image = %test.image, labels = ?test.labels, "Running test");

    let status = match runner.run_test(ctx, &test).await {
        Ok(status) => status,
        Err(e) => {
            warn!(image = %test.image, error = %e, "Test did not run to completion");
            TestStatus::from_run_error(&e)
        }
    };

    Test::new(test, stamp(status))
}

fn stamp(mut status: TestStatus) -> TestStatus {
    let now = Utc::now();
    for result in &mut status.results {
        result.creation_timestamp.get_or_insert(now);
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::FakeTestRunner;

    fn config() -> Configuration {
        Configuration {
            stages: vec![
                StageConfiguration {
                    parallel: true,
                    tests: vec![
                        TestConfiguration::new("img", &["a"]).with_label("suite", "basic"),
                        TestConfiguration::new("img", &["b"]).with_label("suite", "olm"),
                    ],
                },
                StageConfiguration {
                    parallel: false,
                    tests: vec![TestConfiguration::new("img", &["c"]).with_label("suite", "olm")],
                },
            ],
            ..Default::default()
        }
    }

    fn scorecard(selector: &str) -> Scorecard {
        Scorecard::new(
            config(),
            Selector::parse(selector).unwrap(),
            Arc::new(FakeTestRunner::default()),
        )
    }

    #[test]
    fn test_select_tests_keeps_order() {
        let sc = scorecard("suite=olm");
        assert!(sc
            .select_tests(&sc.config.stages[0])
            .iter()
            .all(|t| t.suite() == Some("olm")));

        let all = scorecard("");
        let selected = all.select_tests(&all.config.stages[0]);
        assert_eq!(selected, all.config.stages[0].tests);
    }

    #[test]
    fn test_list_does_not_run() {
        let list = scorecard("suite=olm").list();
        assert_eq!(list.len(), 2);
        assert!(list.items.iter().all(|t| t.status.results.is_empty()));
        assert_eq!(list.items[0].spec.entrypoint, vec!["b"]);
        assert_eq!(list.items[1].spec.entrypoint, vec!["c"]);
    }

    #[test]
    fn test_stamp_preserves_existing_timestamps() {
        let earlier = Utc::now() - chrono::Duration::hours(1);
        let mut stamped = TestResult::new("a", State::Pass);
        stamped.creation_timestamp = Some(earlier);

        let status = stamp(TestStatus::new(vec![stamped, TestResult::new("b", State::Pass)]));
        assert_eq!(status.results[0].creation_timestamp, Some(earlier));
        assert!(status.results[1].creation_timestamp.unwrap() > earlier);
    }

    #[tokio::test]
    async fn test_run_stamps_results() {
        let runner = FakeTestRunner::new(
            Duration::ZERO,
            TestStatus::new(vec![TestResult::new("t", State::Pass)]),
        );
        let sc = Scorecard::new(config(), Selector::everything(), Arc::new(runner));
        let list = sc.run(&RunContext::background()).await.unwrap();

        assert_eq!(list.len(), 3);
        assert!(list
            .items
            .iter()
            .flat_map(|t| &t.status.results)
            .all(|r| r.creation_timestamp.is_some()));
    }

    #[test]
    fn test_error_accessors() {
        let err = ScorecardError::Run {
            source: ContextError::DeadlineExceeded,
            tests: TestList::new(),
        };
        assert_eq!(err.context_error(), Some(ContextError::DeadlineExceeded));
        assert!(err.partial_results().is_some());
        assert_eq!(err.to_string(), "error running tests: context deadline exceeded");

        let init = ScorecardError::Initialize(RunnerError::NotInitialized);
        assert!(init.partial_results().is_none());
        assert!(init.into_partial_results().is_none());
    }
}
