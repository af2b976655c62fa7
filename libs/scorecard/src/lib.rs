//! Scorecard test orchestration.
//!
//! A [`Scorecard`] takes a [`Configuration`] of ordered stages, filters each
//! stage's tests through a label [`Selector`], and hands them to a
//! [`TestRunner`]. [`PodTestRunner`] runs every test as a pod against an
//! operator bundle; [`FakeTestRunner`] stands in for it in tests.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use osdk_scorecard::{FakeTestRunner, RunContext, Scorecard, Selector, TestStatus};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = osdk_scorecard::load_config("bundle/tests/scorecard/config.yaml".as_ref())?;
//! let runner = FakeTestRunner::new(Duration::from_millis(10), TestStatus::default());
//! let scorecard = Scorecard::new(config, Selector::parse("suite=basic")?, Arc::new(runner));
//!
//! let results = scorecard.run(&RunContext::with_timeout(Duration::from_secs(30))).await?;
//! println!("{}", osdk_scorecard::render_text(&results));
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod bundle;
pub mod cluster;
pub mod config;
pub mod context;
pub mod format;
pub mod pod;
pub mod pod_runner;
pub mod runner;
pub mod scorecard;
pub mod selector;
pub mod storage;

pub use api::{
    Configuration, OutputError, StageConfiguration, State, Test, TestConfiguration, TestList,
    TestResult, TestStatus,
};
pub use config::{config_path_for_bundle, load_config, ConfigError};
pub use context::{ContextError, RunContext};
pub use format::render_text;
pub use pod_runner::{PodRunnerOptions, PodSecurity, PodTestRunner};
pub use runner::{FakeTestRunner, RunnerError, TestRunner};
pub use scorecard::{Scorecard, ScorecardError};
pub use selector::{Selector, SelectorError};
