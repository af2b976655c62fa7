//! Scorecard command.
//!
//! Runs a bundle's scorecard tests as pods and prints the results. The
//! process exits non-zero when any result is not `pass`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use osdk_scorecard::pod_runner::{DEFAULT_STORAGE_IMAGE, DEFAULT_TEST_OUTPUT, DEFAULT_UNTAR_IMAGE};
use osdk_scorecard::{
    cluster, config_path_for_bundle, load_config, ContextError, FakeTestRunner, PodRunnerOptions,
    PodSecurity, PodTestRunner, RunContext, RunnerError, Scorecard, ScorecardError, Selector,
    TestList,
};
use tracing::{debug, info};

use crate::error::CliError;
use crate::output::{print_listing, print_output, OutputFormat};

/// Pod security context applied to test pods.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum PodSecurityArg {
    #[default]
    Legacy,
    Restricted,
}

impl From<PodSecurityArg> for PodSecurity {
    fn from(arg: PodSecurityArg) -> Self {
        match arg {
            PodSecurityArg::Legacy => PodSecurity::Legacy,
            PodSecurityArg::Restricted => PodSecurity::Restricted,
        }
    }
}

/// Run scorecard tests against an operator bundle directory.
#[derive(Debug, Args)]
pub struct ScorecardCommand {
    /// Bundle directory containing manifests and metadata.
    #[arg(value_name = "BUNDLE")]
    bundle: PathBuf,

    /// kubeconfig path.
    #[arg(long, value_name = "PATH")]
    kubeconfig: Option<PathBuf>,

    /// Label selector to determine which tests are run.
    #[arg(short = 'l', long, default_value = "")]
    selector: String,

    /// Path to scorecard config file.
    #[arg(short = 'c', long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Namespace to run the test images in.
    #[arg(short = 'n', long)]
    namespace: Option<String>,

    /// Output format for results.
    #[arg(short = 'o', long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// Pod security context for test pods.
    #[arg(long, value_enum, default_value_t = PodSecurityArg::Legacy)]
    pod_security: PodSecurityArg,

    /// Service account to use for tests.
    #[arg(short = 's', long, default_value = "default")]
    service_account: String,

    /// List which tests would run without running them.
    #[arg(short = 'L', long)]
    list: bool,

    /// Disable resource cleanup after tests are run.
    #[arg(short = 'x', long)]
    skip_cleanup: bool,

    /// Time to wait for tests to complete, e.g. 35s or 2m.
    #[arg(short = 'w', long, default_value = "30s", value_parser = parse_duration)]
    wait_time: Duration,

    /// Storage image used by the artifact sidecar.
    #[arg(short = 'b', long, default_value = DEFAULT_STORAGE_IMAGE)]
    storage_image: String,

    /// Untar image used by the bundle init container.
    #[arg(short = 'u', long, default_value = DEFAULT_UNTAR_IMAGE)]
    untar_image: String,

    /// Test output directory.
    #[arg(short = 't', long, default_value = DEFAULT_TEST_OUTPUT)]
    test_output: PathBuf,
}

impl ScorecardCommand {
    pub async fn run(self) -> Result<()> {
        if !self.bundle.is_dir() {
            return Err(CliError::BundleNotFound(self.bundle).into());
        }

        let config_path = match &self.config {
            Some(path) => path.clone(),
            None => config_path_for_bundle(&self.bundle)?,
        };
        debug!(path = %config_path.display(), "Using scorecard config");

        let config = load_config(&config_path).context("could not find config file")?;
        let selector = Selector::parse(&self.selector).context("could not parse selector")?;

        if self.list {
            let scorecard = Scorecard::new(config, selector, Arc::new(FakeTestRunner::default()));
            return print_listing(&scorecard.list(), self.output);
        }

        let service_account = if config.service_account.is_empty() {
            self.service_account.clone()
        } else {
            config.service_account.clone()
        };

        let connection = cluster::connect(self.kubeconfig.as_deref(), self.namespace.as_deref())
            .await
            .context("error getting kubernetes client")?;

        let options = PodRunnerOptions {
            namespace: connection.namespace.clone(),
            service_account,
            bundle_path: self.bundle.clone(),
            untar_image: self.untar_image.clone(),
            storage_image: self.storage_image.clone(),
            test_output: self.test_output.clone(),
            pod_security: self.pod_security.into(),
            ..Default::default()
        };
        info!(
            namespace = %options.namespace,
            service_account = %options.service_account,
            wait_time = ?self.wait_time,
            "Running scorecard"
        );

        let runner = PodTestRunner::new(connection.client, options);
        let scorecard =
            Scorecard::new(config, selector, Arc::new(runner)).with_skip_cleanup(self.skip_cleanup);

        let ctx = RunContext::with_timeout(self.wait_time);
        let results = match scorecard.run(&ctx).await {
            Ok(results) => results,
            Err(err) => {
                if let Some(collected) = results_to_report(&err) {
                    print_output(collected, self.output)?;
                }
                return Err(err.into());
            }
        };

        print_output(&results, self.output)?;

        if results.has_failing_test() {
            return Err(CliError::FailingTests.into());
        }
        Ok(())
    }
}

/// Results worth printing before a run error is reported.
///
/// A timed-out run shows what finished in time. A cleanup failure shows
/// everything collected before cleanup started.
fn results_to_report(err: &ScorecardError) -> Option<&TestList> {
    match err {
        ScorecardError::Run { source, tests } if *source == ContextError::DeadlineExceeded => {
            Some(tests)
        }
        ScorecardError::Cleanup { tests, .. } => Some(tests),
        _ => None,
    }
}

/// Parse a duration such as `30s`, `1m30s`, `1.5h` or `250ms`.
fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(format!("invalid duration {input:?}"));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid duration {input:?}"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let seconds_per_unit = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => return Err(format!("missing unit in duration {input:?}")),
            unit => return Err(format!("unknown unit {unit:?} in duration {input:?}")),
        };
        rest = &rest[unit_len..];

        total += value * seconds_per_unit;
    }

    Duration::try_from_secs_f64(total).map_err(|e| format!("invalid duration {input:?}: {e}"))
}
