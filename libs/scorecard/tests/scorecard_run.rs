use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use osdk_scorecard::{
    config_path_for_bundle, load_config, Configuration, ContextError, FakeTestRunner,
    RunContext, RunnerError, Scorecard, ScorecardError, Selector, StageConfiguration, State,
    TestConfiguration, TestResult, TestRunner, TestStatus,
};

/// Runner driven by each test's entrypoint:
/// - `["echo", payload]` parses `payload` as the container's stdout
/// - `["sleep", millis]` waits and then passes
/// - `["fail", message]` returns a runner error
#[derive(Default)]
struct ScriptedRunner {
    initialize_calls: AtomicUsize,
    cleanup_calls: AtomicUsize,
    cleanup_ctx_was_live: AtomicBool,
    fail_initialize: bool,
    fail_cleanup: bool,
    started: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl TestRunner for ScriptedRunner {
    async fn initialize(&self, _ctx: &RunContext) -> Result<(), RunnerError> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_initialize {
            return Err(RunnerError::Failed("config map quota exceeded".to_string()));
        }
        Ok(())
    }

    async fn run_test(
        &self,
        ctx: &RunContext,
        test: &TestConfiguration,
    ) -> Result<TestStatus, RunnerError> {
        let command = test.entrypoint.first().map(String::as_str).unwrap_or("");
        let arg = test.entrypoint.get(1).cloned().unwrap_or_default();
        self.started
            .lock()
            .unwrap()
            .push(test.test_name().unwrap_or("").to_string());

        match command {
            "echo" => Ok(TestStatus::from_output(arg.as_bytes())),
            "sleep" => {
                let millis: u64 = arg.parse().unwrap();
                ctx.sleep(Duration::from_millis(millis)).await?;
                Ok(TestStatus::new(vec![TestResult::new(
                    test.test_name().unwrap_or(""),
                    State::Pass,
                )]))
            }
            "fail" => Err(RunnerError::Failed(arg)),
            other => panic!("unknown command {other}"),
        }
    }

    async fn cleanup(&self, ctx: &RunContext) -> Result<(), RunnerError> {
        self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
        self.cleanup_ctx_was_live
            .store(ctx.err().is_none(), Ordering::SeqCst);
        if self.fail_cleanup {
            return Err(RunnerError::Failed("pods could not be deleted".to_string()));
        }
        Ok(())
    }
}

fn sleeper(name: &str, millis: u64) -> TestConfiguration {
    TestConfiguration::new("busybox", &["sleep", &millis.to_string()]).with_label("test", name)
}

fn single_stage(parallel: bool, tests: Vec<TestConfiguration>) -> Configuration {
    Configuration {
        stages: vec![StageConfiguration { parallel, tests }],
        ..Default::default()
    }
}

fn scorecard(config: Configuration, runner: Arc<ScriptedRunner>) -> Scorecard {
    Scorecard::new(config, Selector::everything(), runner)
}

fn fixture_bundle() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("testdata/bundle")
}

#[tokio::test]
async fn parallel_stage_takes_about_one_test_duration() {
    let runner = Arc::new(ScriptedRunner::default());
    let config = single_stage(true, vec![sleeper("a", 300), sleeper("b", 300)]);

    let start = Instant::now();
    let list = scorecard(config, runner.clone())
        .run(&RunContext::background())
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(list.len(), 2);
    assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(550), "{elapsed:?}");
    assert!(!list.has_failing_test());
}

#[tokio::test]
async fn sequential_stage_keeps_declared_order() {
    let runner = Arc::new(ScriptedRunner::default());
    let config = single_stage(false, vec![sleeper("a", 150), sleeper("b", 100)]);

    let start = Instant::now();
    let list = scorecard(config, runner.clone())
        .run(&RunContext::background())
        .await
        .unwrap();
    let elapsed = start.elapsed();

    let names: Vec<_> = list
        .items
        .iter()
        .map(|t| t.spec.test_name().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(runner.started(), vec!["a", "b"]);
    assert!(elapsed >= Duration::from_millis(250), "{elapsed:?}");
}

#[tokio::test]
async fn stages_run_in_configuration_order() {
    let runner = Arc::new(ScriptedRunner::default());
    let config = Configuration {
        stages: vec![
            StageConfiguration {
                parallel: true,
                tests: vec![sleeper("setup", 10)],
            },
            StageConfiguration {
                parallel: false,
                tests: vec![sleeper("validate", 0)],
            },
        ],
        ..Default::default()
    };

    let list = scorecard(config, runner.clone())
        .run(&RunContext::background())
        .await
        .unwrap();

    assert_eq!(runner.started(), vec!["setup", "validate"]);
    assert_eq!(list.items[0].spec.test_name(), Some("setup"));
    assert_eq!(list.items[1].spec.test_name(), Some("validate"));
}

#[tokio::test]
async fn selector_filters_tests() {
    let tests = vec![
        sleeper("basic", 0).with_label("suite", "basic"),
        sleeper("olm", 0).with_label("suite", "olm"),
    ];

    let runner = Arc::new(ScriptedRunner::default());
    let sc = Scorecard::new(
        single_stage(true, tests.clone()),
        Selector::parse("suite=basic").unwrap(),
        runner.clone(),
    );
    let list = sc.run(&RunContext::background()).await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list.items[0].spec, tests[0]);

    let runner = Arc::new(ScriptedRunner::default());
    let sc = Scorecard::new(
        single_stage(true, tests),
        Selector::parse("").unwrap(),
        runner.clone(),
    );
    let list = sc.run(&RunContext::background()).await.unwrap();
    assert_eq!(list.len(), 2);
}

#[test]
fn invalid_selector_is_rejected_up_front() {
    assert!(Selector::parse("suite in (basic").is_err());
    assert!(Selector::parse("suite==").is_ok());
    assert!(Selector::parse("suite===basic").is_err());
}

#[tokio::test]
async fn stage_with_no_selected_tests_is_skipped() {
    let runner = Arc::new(ScriptedRunner::default());
    let sc = Scorecard::new(
        single_stage(true, vec![sleeper("a", 0).with_label("suite", "olm")]),
        Selector::parse("suite=basic").unwrap(),
        runner.clone(),
    );

    let list = sc.run(&RunContext::background()).await.unwrap();
    assert!(list.is_empty());
    assert!(runner.started().is_empty());
    assert_eq!(runner.cleanup_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn deadline_exceeded_is_returned_with_partial_results() {
    let runner = Arc::new(ScriptedRunner::default());
    let config = single_stage(false, vec![sleeper("quick", 0), sleeper("slow", 5_000)]);

    let ctx = RunContext::with_timeout(Duration::from_millis(100));
    let err = scorecard(config, runner.clone())
        .run(&ctx)
        .await
        .unwrap_err();

    assert_eq!(err.context_error(), Some(ContextError::DeadlineExceeded));
    assert!(matches!(err, ScorecardError::Run { .. }));

    let partial = err.into_partial_results().unwrap();
    assert_eq!(partial.len(), 2);
    assert_eq!(partial.items[0].status.results[0].state, State::Pass);
    let slow = &partial.items[1].status.results[0];
    assert_eq!(slow.state, State::Fail);
    assert_eq!(slow.errors, vec!["context deadline exceeded".to_string()]);
}

#[tokio::test]
async fn fake_runner_deadline_propagates() {
    let runner = FakeTestRunner::new(Duration::from_secs(5), TestStatus::default());
    let sc = Scorecard::new(
        single_stage(true, vec![TestConfiguration::new("busybox", &[])]),
        Selector::everything(),
        Arc::new(runner),
    );

    let err = sc
        .run(&RunContext::with_timeout(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert_eq!(err.context_error(), Some(ContextError::DeadlineExceeded));
}

#[tokio::test]
async fn cleanup_runs_after_deadline_with_fresh_context() {
    let runner = Arc::new(ScriptedRunner::default());
    let config = single_stage(true, vec![sleeper("slow", 5_000)]);

    let ctx = RunContext::with_timeout(Duration::from_millis(50));
    let err = scorecard(config, runner.clone()).run(&ctx).await.unwrap_err();

    assert_eq!(err.context_error(), Some(ContextError::DeadlineExceeded));
    assert_eq!(runner.cleanup_calls.load(Ordering::SeqCst), 1);
    assert!(runner.cleanup_ctx_was_live.load(Ordering::SeqCst));
}

#[tokio::test]
async fn skip_cleanup_leaves_resources() {
    let runner = Arc::new(ScriptedRunner::default());
    let sc = scorecard(single_stage(true, vec![sleeper("a", 0)]), runner.clone())
        .with_skip_cleanup(true);

    sc.run(&RunContext::background()).await.unwrap();
    assert_eq!(runner.cleanup_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cleanup_error_supersedes_and_keeps_results() {
    let runner = Arc::new(ScriptedRunner {
        fail_cleanup: true,
        ..Default::default()
    });
    let config = single_stage(true, vec![sleeper("slow", 5_000)]);

    let ctx = RunContext::with_timeout(Duration::from_millis(50));
    let err = scorecard(config, runner).run(&ctx).await.unwrap_err();

    match err {
        ScorecardError::Cleanup { source, tests } => {
            assert_eq!(source.to_string(), "pods could not be deleted");
            assert_eq!(tests.len(), 1);
        }
        other => panic!("expected cleanup error, got {other:?}"),
    }
}

#[tokio::test]
async fn initialize_failure_aborts_without_cleanup() {
    let runner = Arc::new(ScriptedRunner {
        fail_initialize: true,
        ..Default::default()
    });

    let err = scorecard(single_stage(true, vec![sleeper("a", 0)]), runner.clone())
        .run(&RunContext::background())
        .await
        .unwrap_err();

    assert!(matches!(err, ScorecardError::Initialize(_)));
    assert!(err.partial_results().is_none());
    assert!(runner.started().is_empty());
    assert_eq!(runner.cleanup_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failing_test_does_not_affect_siblings() {
    let runner = Arc::new(ScriptedRunner::default());
    let config = single_stage(
        true,
        vec![
            sleeper("a", 10),
            TestConfiguration::new("busybox", &["fail", "pod creation refused"])
                .with_label("test", "broken"),
            sleeper("c", 10),
        ],
    );

    let list = scorecard(config, runner)
        .run(&RunContext::background())
        .await
        .unwrap();

    assert_eq!(list.len(), 3);
    let broken = list
        .items
        .iter()
        .find(|t| t.spec.test_name() == Some("broken"))
        .unwrap();
    assert_eq!(broken.status.results.len(), 1);
    assert_eq!(broken.status.results[0].state, State::Fail);
    assert_eq!(
        broken.status.results[0].errors,
        vec!["pod creation refused".to_string()]
    );

    let passing = list
        .items
        .iter()
        .filter(|t| t.spec.test_name() != Some("broken"))
        .count();
    assert_eq!(passing, 2);
    assert!(list.has_failing_test());
}

#[tokio::test]
async fn malformed_output_becomes_error_result() {
    let runner = Arc::new(ScriptedRunner::default());
    let config = single_stage(
        false,
        vec![TestConfiguration::new("busybox", &["echo", "not json at all"])],
    );

    let list = scorecard(config, runner)
        .run(&RunContext::background())
        .await
        .unwrap();

    let result = &list.items[0].status.results[0];
    assert_eq!(result.state, State::Error);
    assert_eq!(result.log, "not json at all");
    assert!(!result.errors.is_empty());
}

#[tokio::test]
async fn echo_test_end_to_end() {
    let payload = r#"{"results":[{"name":"t1","state":"pass"}]}"#;
    let spec = TestConfiguration::new("busybox", &["echo", payload]);
    let runner = Arc::new(ScriptedRunner::default());

    let list = scorecard(single_stage(false, vec![spec.clone()]), runner)
        .run(&RunContext::background())
        .await
        .unwrap();

    assert_eq!(list.len(), 1);
    assert_eq!(list.items[0].spec, spec);
    let results = &list.items[0].status.results;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].name, "t1");
    assert_eq!(results[0].state, State::Pass);
    assert!(results[0].creation_timestamp.is_some());
    assert!(!list.has_failing_test());
}

#[test]
fn fixture_bundle_config_loads() {
    let bundle = fixture_bundle();
    let path = config_path_for_bundle(&bundle).unwrap();
    assert_eq!(path, bundle.join("tests/scorecard/").join("config.yaml"));

    let config = load_config(&path).unwrap();
    assert_eq!(config.stages.len(), 2);
    assert!(config.stages[0].parallel);
    assert_eq!(
        config.stages[1].tests[0].storage_mount_path(),
        Some("/test-output")
    );

    let sc = Scorecard::new(
        config,
        Selector::parse("suite=olm").unwrap(),
        Arc::new(FakeTestRunner::default()),
    );
    let listed = sc.list();
    let names: Vec<_> = listed
        .items
        .iter()
        .map(|t| t.spec.test_name().unwrap())
        .collect();
    assert_eq!(
        names,
        vec!["olm-bundle-validation-test", "olm-crds-have-validation-test"]
    );
}

#[test]
fn fixture_bundle_archives() {
    let data = osdk_scorecard::bundle::tar_directory(&fixture_bundle()).unwrap();
    assert!(data.len() < osdk_scorecard::bundle::CONFIG_MAP_SIZE_LIMIT);

    let dest = tempfile::TempDir::new().unwrap();
    osdk_scorecard::bundle::untar_gzip(&data, dest.path()).unwrap();
    assert!(dest.path().join("metadata/annotations.yaml").is_file());
    assert!(dest.path().join("tests/scorecard/config.yaml").is_file());
}
