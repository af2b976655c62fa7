//! Kubernetes client setup.

use std::path::{Path, PathBuf};

use kube::config::{InferConfigError, KubeConfigOptions, Kubeconfig, KubeconfigError};
use kube::{Client, Config};
use thiserror::Error;
use tracing::debug;

/// Namespace used when neither the flag nor the kubeconfig names one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Errors from cluster client setup.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("could not load kubeconfig {path}: {source}")]
    Kubeconfig {
        path: PathBuf,
        #[source]
        source: KubeconfigError,
    },

    #[error("could not infer cluster configuration: {0}")]
    Infer(#[from] InferConfigError),

    #[error("could not create kubernetes client: {0}")]
    Client(#[from] kube::Error),
}

/// A client and the namespace tests run in.
#[derive(Clone)]
pub struct ClusterConnection {
    pub client: Client,
    pub namespace: String,
}

/// Connect to the cluster named by `kubeconfig`, or the inferred one.
///
/// `namespace` wins over the kubeconfig context's namespace.
pub async fn connect(
    kubeconfig: Option<&Path>,
    namespace: Option<&str>,
) -> Result<ClusterConnection, ClusterError> {
    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig_err = |source| ClusterError::Kubeconfig {
                path: path.to_path_buf(),
                source,
            };
            let raw = Kubeconfig::read_from(path).map_err(kubeconfig_err)?;
            Config::from_custom_kubeconfig(raw, &KubeConfigOptions::default())
                .await
                .map_err(kubeconfig_err)?
        }
        None => Config::infer().await?,
    };

    let namespace = resolve_namespace(namespace, Some(&config.default_namespace));
    debug!(cluster = %config.cluster_url, namespace = %namespace, "Resolved cluster");

    let client = Client::try_from(config)?;
    Ok(ClusterConnection { client, namespace })
}

/// Pick the namespace: explicit flag, then kubeconfig, then `default`.
pub fn resolve_namespace(flag: Option<&str>, from_config: Option<&str>) -> String {
    flag.filter(|ns| !ns.is_empty())
        .or(from_config.filter(|ns| !ns.is_empty()))
        .unwrap_or(DEFAULT_NAMESPACE)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_namespace() {
        assert_eq!(resolve_namespace(Some("flag"), Some("ctx")), "flag");
        assert_eq!(resolve_namespace(Some(""), Some("ctx")), "ctx");
        assert_eq!(resolve_namespace(None, Some("ctx")), "ctx");
        assert_eq!(resolve_namespace(None, None), "default");
        assert_eq!(resolve_namespace(None, Some("")), "default");
    }

    #[tokio::test]
    async fn test_connect_missing_kubeconfig() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("kubeconfig");
        let err = connect(Some(&path), None).await.err().unwrap();
        assert!(matches!(err, ClusterError::Kubeconfig { .. }));
    }
}
