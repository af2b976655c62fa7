//! Pod-based test runner.
//!
//! Initialization stores the bundle in a ConfigMap. Each test runs in its
//! own pod, which is polled until the test container finishes; the test
//! container's log is the test result. Cleanup deletes every pod of the run
//! and then the ConfigMap.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::{Client, ResourceExt};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::api::{TestConfiguration, TestStatus};
use crate::bundle;
use crate::context::RunContext;
use crate::pod::{self, TEST_CONTAINER};
use crate::runner::{RunnerError, TestRunner};
use crate::storage;

pub const DEFAULT_UNTAR_IMAGE: &str = "quay.io/operator-framework/scorecard-untar@sha256:2e728c5e67a7f4dec0df157a322dd5671212e8ae60f69137463bd4fdfbff8747";
pub const DEFAULT_STORAGE_IMAGE: &str = "quay.io/operator-framework/scorecard-storage@sha256:a3bfda71281393c7794cabdd39c563fb050d3020fd0b642ea164646bdd39a0e2";
pub const DEFAULT_TEST_OUTPUT: &str = "test-output";
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

/// Interval between pod status checks.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Pod Security Standard the test pods are built for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PodSecurity {
    #[default]
    Legacy,
    Restricted,
}

impl PodSecurity {
    pub fn as_str(&self) -> &'static str {
        match self {
            PodSecurity::Legacy => "legacy",
            PodSecurity::Restricted => "restricted",
        }
    }
}

impl fmt::Display for PodSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PodSecurity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "legacy" => Ok(PodSecurity::Legacy),
            "restricted" => Ok(PodSecurity::Restricted),
            other => Err(format!(
                "invalid pod security mode {other:?}; valid values: legacy, restricted"
            )),
        }
    }
}

/// Pod runner configuration.
#[derive(Debug, Clone)]
pub struct PodRunnerOptions {
    /// Namespace for the bundle ConfigMap and test pods.
    pub namespace: String,

    /// Service account test pods run as.
    pub service_account: String,

    /// Bundle directory shipped to every test pod.
    pub bundle_path: PathBuf,

    /// Image of the init container that untars the bundle.
    pub untar_image: String,

    /// Image of the storage sidecar.
    pub storage_image: String,

    /// Local root for gathered test artifacts.
    pub test_output: PathBuf,

    pub pod_security: PodSecurity,

    pub poll_interval: Duration,
}

impl Default for PodRunnerOptions {
    fn default() -> Self {
        Self {
            namespace: crate::cluster::DEFAULT_NAMESPACE.to_string(),
            service_account: DEFAULT_SERVICE_ACCOUNT.to_string(),
            bundle_path: PathBuf::new(),
            untar_image: DEFAULT_UNTAR_IMAGE.to_string(),
            storage_image: DEFAULT_STORAGE_IMAGE.to_string(),
            test_output: PathBuf::from(DEFAULT_TEST_OUTPUT),
            pod_security: PodSecurity::default(),
            poll_interval: POLL_INTERVAL,
        }
    }
}

/// Teardown step recorded while the run creates resources.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CleanupAction {
    DeletePods { selector: String },
    DeleteConfigMap { name: String },
}

/// Runs each test in its own pod.
pub struct PodTestRunner {
    client: Client,
    options: PodRunnerOptions,
    config_map: RwLock<Option<String>>,
    /// Executed last-in first-out by `cleanup`.
    cleanup_actions: Mutex<Vec<CleanupAction>>,
}

impl PodTestRunner {
    /// Create a new pod runner.
    pub fn new(client: Client, options: PodRunnerOptions) -> Self {
        Self {
            client,
            options,
            config_map: RwLock::new(None),
            cleanup_actions: Mutex::new(Vec::new()),
        }
    }

    pub fn options(&self) -> &PodRunnerOptions {
        &self.options
    }

    /// Name of the bundle ConfigMap once initialized.
    pub async fn config_map_name(&self) -> Option<String> {
        self.config_map.read().await.clone()
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.options.namespace)
    }

    fn config_maps(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.options.namespace)
    }

    async fn wait_for_completion(
        &self,
        ctx: &RunContext,
        pods: &Api<Pod>,
        name: &str,
    ) -> Result<(), RunnerError> {
        let mut ticker = tokio::time::interval(self.options.poll_interval);

        loop {
            tokio::select! {
                err = ctx.done() => {
                    warn!(pod = %name, error = %err, "Gave up waiting for test pod");
                    return Err(err.into());
                }
                _ = ticker.tick() => {
                    let pod = ctx
                        .run(pods.get(name))
                        .await?
                        .map_err(|e| RunnerError::kube(format!("get pod {name}"), e))?;

                    if pod::is_pod_complete(&pod) {
                        let phase = pod.status.as_ref().and_then(|s| s.phase.clone());
                        debug!(pod = %name, phase = ?phase, "Test pod finished");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn run_cleanup_action(
        &self,
        ctx: &RunContext,
        action: &CleanupAction,
    ) -> Result<(), RunnerError> {
        match action {
            CleanupAction::DeletePods { selector } => {
                let lp = ListParams::default().labels(selector);
                ctx.run(self.pods().delete_collection(&DeleteParams::default(), &lp))
                    .await?
                    .map_err(|e| {
                        RunnerError::kube(format!("delete pods (label selector {selector:?})"), e)
                    })?;
                info!(selector = %selector, "Deleted test pods");
            }
            CleanupAction::DeleteConfigMap { name } => {
                match ctx
                    .run(self.config_maps().delete(name, &DeleteParams::default()))
                    .await?
                {
                    Ok(_) => info!(config_map = %name, "Deleted bundle config map"),
                    Err(kube::Error::Api(ae)) if ae.code == 404 => {
                        debug!(config_map = %name, "Bundle config map already gone");
                    }
                    Err(e) => {
                        return Err(RunnerError::kube(format!("delete config map {name}"), e))
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TestRunner for PodTestRunner {
    async fn initialize(&self, ctx: &RunContext) -> Result<(), RunnerError> {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }

        let archive = bundle::tar_directory(&self.options.bundle_path)?;
        let config_map = pod::bundle_config_map(&self.options.namespace, archive);
        let name = config_map.name_any();

        ctx.run(
            self.config_maps()
                .create(&PostParams::default(), &config_map),
        )
        .await?
        .map_err(|e| RunnerError::kube("create bundle config map", e))?;

        info!(
            config_map = %name,
            namespace = %self.options.namespace,
            bundle = %self.options.bundle_path.display(),
            "Created bundle config map"
        );

        *self.config_map.write().await = Some(name.clone());

        let mut actions = self.cleanup_actions.lock().await;
        actions.push(CleanupAction::DeleteConfigMap { name: name.clone() });
        actions.push(CleanupAction::DeletePods {
            selector: pod::test_run_selector(&name),
        });

        Ok(())
    }

    async fn run_test(
        &self,
        ctx: &RunContext,
        test: &TestConfiguration,
    ) -> Result<TestStatus, RunnerError> {
        let config_map = self
            .config_map_name()
            .await
            .ok_or(RunnerError::NotInitialized)?;

        let pods = self.pods();
        let definition = pod::pod_definition(&config_map, test, &self.options);
        let created = ctx
            .run(pods.create(&PostParams::default(), &definition))
            .await?
            .map_err(|e| RunnerError::kube("create test pod", e))?;
        let name = created.name_any();

        info!(pod = %name, image = %test.image, "Created test pod");

        self.wait_for_completion(ctx, &pods, &name).await?;

        if let Some(mount_path) = test.storage_mount_path() {
            let dest = storage::dest_path(
                &self.options.test_output,
                test.suite(),
                test.test_name().unwrap_or(&name),
            );
            ctx.run(storage::gather_test_output(&pods, &name, mount_path, &dest))
                .await??;
        }

        let params = LogParams {
            container: Some(TEST_CONTAINER.to_string()),
            ..Default::default()
        };
        let log = ctx
            .run(pods.logs(&name, &params))
            .await?
            .map_err(|e| RunnerError::kube(format!("fetch log of pod {name}"), e))?;

        Ok(TestStatus::from_output(log.as_bytes()))
    }

    async fn cleanup(&self, ctx: &RunContext) -> Result<(), RunnerError> {
        let actions = std::mem::take(&mut *self.cleanup_actions.lock().await);

        let mut first_error = None;
        for action in actions.iter().rev() {
            if let Err(e) = self.run_cleanup_action(ctx, action).await {
                warn!(error = %e, "Cleanup step failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
