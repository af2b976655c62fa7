//! Test runner interface and fake implementation.
//!
//! The runner interface abstracts the test lifecycle:
//! - one-time setup before any test runs
//! - running a single test to completion
//! - releasing everything setup and test runs created
//!
//! [`PodTestRunner`](crate::pod_runner::PodTestRunner) runs tests on a
//! cluster; [`FakeTestRunner`] is provided for testing and dry runs.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::api::{TestConfiguration, TestStatus};
use crate::bundle::BundleError;
use crate::context::{ContextError, RunContext};
use crate::storage::StorageError;

/// Errors from test runners.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("failed to package bundle: {0}")]
    Bundle(#[from] BundleError),

    #[error("failed to {action}: {source}")]
    Kube {
        action: String,
        #[source]
        source: kube::Error,
    },

    #[error("failed to gather test output: {0}")]
    Storage(#[from] StorageError),

    #[error("runner has not been initialized")]
    NotInitialized,

    #[error("{0}")]
    Failed(String),
}

impl RunnerError {
    pub(crate) fn kube(action: impl Into<String>, source: kube::Error) -> Self {
        Self::Kube {
            action: action.into(),
            source,
        }
    }

    /// The context error, if the runner stopped because its context ended.
    pub fn context_error(&self) -> Option<ContextError> {
        match self {
            RunnerError::Context(err) => Some(*err),
            _ => None,
        }
    }
}

/// Test runner interface.
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Prepare state shared by every test in the run.
    async fn initialize(&self, ctx: &RunContext) -> Result<(), RunnerError>;

    /// Run one test to completion and return its results.
    async fn run_test(
        &self,
        ctx: &RunContext,
        test: &TestConfiguration,
    ) -> Result<TestStatus, RunnerError>;

    /// Release everything `initialize` and `run_test` created.
    async fn cleanup(&self, ctx: &RunContext) -> Result<(), RunnerError>;
}

/// Fake runner for testing and dry runs.
///
/// Every test sleeps for `sleep` and then returns `status`, or fails with
/// `error` when set.
#[derive(Debug, Clone, Default)]
pub struct FakeTestRunner {
    pub sleep: Duration,
    pub status: Option<TestStatus>,
    pub error: Option<String>,
}

impl FakeTestRunner {
    /// Create a fake runner returning `status` after `sleep`.
    pub fn new(sleep: Duration, status: TestStatus) -> Self {
        Self {
            sleep,
            status: Some(status),
            error: None,
        }
    }

    /// Create a fake runner whose tests fail with `error` after `sleep`.
    pub fn failing(sleep: Duration, error: impl Into<String>) -> Self {
        Self {
            sleep,
            status: None,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
impl TestRunner for FakeTestRunner {
    async fn initialize(&self, ctx: &RunContext) -> Result<(), RunnerError> {
        match ctx.err() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    async fn run_test(
        &self,
        ctx: &RunContext,
        test: &TestConfiguration,
    ) -> Result<TestStatus, RunnerError> {
        debug!(image = %test.image, sleep_ms = self.sleep.as_millis() as u64, "Fake test started");
        ctx.sleep(self.sleep).await?;

        if let Some(error) = &self.error {
            return Err(RunnerError::Failed(error.clone()));
        }
        Ok(self.status.clone().unwrap_or_default())
    }

    async fn cleanup(&self, ctx: &RunContext) -> Result<(), RunnerError> {
        match ctx.err() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}
