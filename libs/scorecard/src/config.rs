//! Configuration loading.
//!
//! The scorecard configuration is a YAML document shipped inside the
//! operator bundle. Its location is advertised by the bundle's
//! `metadata/annotations.yaml`; when the annotation is absent the
//! conventional `tests/scorecard/` directory is used.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::api::Configuration;

/// File name of the scorecard configuration.
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Configuration directory used when the bundle does not name one.
pub const DEFAULT_CONFIG_DIR: &str = "tests/scorecard/";

/// Bundle annotation naming the configuration directory.
pub const CONFIG_DIR_ANNOTATION: &str = "operators.operatorframework.io.test.config.v1";

/// Location of bundle annotations relative to the bundle root.
pub const ANNOTATIONS_FILE: &str = "metadata/annotations.yaml";

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("could not parse bundle annotations {path}: {source}")]
    Annotations {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("stage {stage} test {test}: image is required")]
    MissingImage { stage: usize, test: usize },
}

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Configuration, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let config = parse_config(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    validate(&config)?;

    info!(
        path = %path.display(),
        stages = config.stages.len(),
        "Loaded scorecard configuration"
    );

    Ok(config)
}

/// Parse a configuration document without validating it.
pub fn parse_config(contents: &str) -> Result<Configuration, serde_yaml::Error> {
    serde_yaml::from_str(contents)
}

/// Check that every configured test is runnable.
pub fn validate(config: &Configuration) -> Result<(), ConfigError> {
    for (stage_idx, stage) in config.stages.iter().enumerate() {
        for (test_idx, test) in stage.tests.iter().enumerate() {
            if test.image.trim().is_empty() {
                return Err(ConfigError::MissingImage {
                    stage: stage_idx,
                    test: test_idx,
                });
            }
        }
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
struct BundleAnnotations {
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

/// Resolve the configuration file path for a bundle directory.
pub fn config_path_for_bundle(bundle: &Path) -> Result<PathBuf, ConfigError> {
    let annotations_path = bundle.join(ANNOTATIONS_FILE);

    let config_dir = match fs::read_to_string(&annotations_path) {
        Ok(contents) => {
            let parsed: BundleAnnotations =
                serde_yaml::from_str(&contents).map_err(|source| ConfigError::Annotations {
                    path: annotations_path.clone(),
                    source,
                })?;
            parsed
                .annotations
                .get(CONFIG_DIR_ANNOTATION)
                .filter(|dir| !dir.is_empty())
                .cloned()
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %annotations_path.display(), "No bundle annotations found");
            None
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: annotations_path,
                source,
            })
        }
    };

    let config_dir = config_dir.unwrap_or_else(|| DEFAULT_CONFIG_DIR.to_string());
    Ok(bundle.join(config_dir).join(CONFIG_FILE_NAME))
}
