//! Scorecard data model.
//!
//! These types mirror the `scorecard.operatorframework.io/v1alpha3` API:
//! a [`Configuration`] of ordered stages feeds the scheduler, and every
//! executed [`TestConfiguration`] comes back as a [`Test`] inside a
//! [`TestList`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// API version stamped on every scorecard document.
pub const API_VERSION: &str = "scorecard.operatorframework.io/v1alpha3";

/// Kind of a configuration document.
pub const CONFIGURATION_KIND: &str = "Configuration";

/// Kind of a single test result document.
pub const TEST_KIND: &str = "Test";

/// Kind of a list of test results.
pub const TEST_LIST_KIND: &str = "TestList";

/// Declarative description of the tests to run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default)]
    pub metadata: ConfigurationMetadata,

    /// Service account for test pods; overrides the CLI default when set.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account: String,

    /// Stages, executed in order.
    #[serde(default)]
    pub stages: Vec<StageConfiguration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

/// A group of tests that run either concurrently or one after another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfiguration {
    #[serde(default)]
    pub parallel: bool,

    pub tests: Vec<TestConfiguration>,
}

/// One test container to run against the bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestConfiguration {
    /// Container image holding the test.
    #[serde(default)]
    pub image: String,

    /// Command run inside the container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,

    /// Free-form labels matched by selectors (`suite`, `test`, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Artifact capture settings.
    #[serde(default, skip_serializing_if = "StorageSpec::is_empty")]
    pub storage: StorageSpec,
}

impl TestConfiguration {
    /// Create a test configuration for an image and entrypoint.
    pub fn new(image: impl Into<String>, entrypoint: &[&str]) -> Self {
        Self {
            image: image.into(),
            entrypoint: entrypoint.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Add a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Value of the `suite` label, if any.
    pub fn suite(&self) -> Option<&str> {
        self.labels.get("suite").map(String::as_str)
    }

    /// Value of the `test` label, if any.
    pub fn test_name(&self) -> Option<&str> {
        self.labels.get("test").map(String::as_str)
    }

    /// Path inside the test container whose contents are gathered after
    /// the test finishes, if artifact capture was requested.
    pub fn storage_mount_path(&self) -> Option<&str> {
        let path = self.storage.spec.mount_path.path.as_str();
        (!path.is_empty()).then_some(path)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSpec {
    #[serde(default)]
    pub spec: StorageSpecDetail,
}

impl StorageSpec {
    pub fn is_empty(&self) -> bool {
        self.spec.mount_path.path.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpecDetail {
    #[serde(default)]
    pub mount_path: MountPath,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPath {
    #[serde(default)]
    pub path: String,
}

/// Terminal outcome of a single test result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Pass,
    Fail,
    Error,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Pass => "pass",
            State::Fail => "fail",
            State::Error => "error",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical result emitted by a test image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log: String,

    pub state: State,

    #[serde(default)]
    pub errors: Vec<String>,

    #[serde(default)]
    pub suggestions: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl TestResult {
    /// A result in the given state with no errors or suggestions.
    pub fn new(name: impl Into<String>, state: State) -> Self {
        Self {
            name: name.into(),
            log: String::new(),
            state,
            errors: Vec::new(),
            suggestions: Vec::new(),
            creation_timestamp: None,
        }
    }
}

/// The results produced by one test execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<TestResult>,
}

/// Exactly what a test container must print on stdout.
#[derive(Deserialize)]
struct WireStatus {
    results: Vec<WireResult>,
}

#[derive(Deserialize)]
struct WireResult {
    name: String,
    #[serde(default)]
    log: String,
    state: State,
    #[serde(default)]
    errors: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
}

impl From<WireResult> for TestResult {
    fn from(wire: WireResult) -> Self {
        Self {
            name: wire.name,
            log: wire.log,
            state: wire.state,
            errors: wire.errors,
            suggestions: wire.suggestions,
            creation_timestamp: None,
        }
    }
}

/// Why a test container's stdout was rejected.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("invalid test output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid test output: results must not be empty")]
    NoResults,
}

impl TestStatus {
    pub fn new(results: Vec<TestResult>) -> Self {
        Self { results }
    }

    /// Status for a test whose execution failed before producing output.
    pub fn from_run_error(err: &dyn std::error::Error) -> Self {
        let mut result = TestResult::new("", State::Fail);
        result.errors.push(err.to_string());
        Self::new(vec![result])
    }

    /// Status for output that could not be understood. The raw text is kept
    /// in the result log.
    pub fn from_invalid_output(err: &dyn std::error::Error, log: impl Into<String>) -> Self {
        let mut result = TestResult::new("", State::Error);
        result.errors.push(err.to_string());
        result.log = log.into();
        Self::new(vec![result])
    }

    /// Parse a test container's stdout.
    ///
    /// Never fails: anything other than a single JSON document with a
    /// non-empty `results` array of named results becomes an `error`
    /// result carrying the raw output.
    pub fn from_output(output: &[u8]) -> Self {
        match Self::parse_output(output) {
            Ok(status) => status,
            Err(e) => Self::from_invalid_output(&e, String::from_utf8_lossy(output)),
        }
    }

    fn parse_output(output: &[u8]) -> Result<Self, OutputError> {
        let wire: WireStatus = serde_json::from_slice(output)?;
        if wire.results.is_empty() {
            return Err(OutputError::NoResults);
        }
        Ok(Self::new(wire.results.into_iter().map(TestResult::from).collect()))
    }

    /// Whether every result passed.
    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.state == State::Pass)
    }
}

/// A test configuration paired with its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Test {
    pub api_version: String,
    pub kind: String,
    pub spec: TestConfiguration,
    #[serde(default)]
    pub status: TestStatus,
}

impl Test {
    pub fn new(spec: TestConfiguration, status: TestStatus) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: TEST_KIND.to_string(),
            spec,
            status,
        }
    }
}

/// Every test produced by a run, in collection order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestList {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub items: Vec<Test>,
}

impl Default for TestList {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: TEST_LIST_KIND.to_string(),
            items: Vec::new(),
        }
    }
}

impl TestList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any result in the list is not `pass`.
    pub fn has_failing_test(&self) -> bool {
        self.items.iter().any(|t| !t.status.passed())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
