//! Artifact gathering from the storage sidecar.
//!
//! Tests that request storage write into a shared emptyDir. After the test
//! container exits, `tar cf -` is exec'd in the sidecar and the stream is
//! unpacked locally under `<test-output>/<suite>/<test>`.

use std::io;
use std::path::{Component, Path, PathBuf};

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::bundle::{self, BundleError};
use crate::pod::STORAGE_SIDECAR_CONTAINER;

/// Errors from artifact gathering.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to exec into pod {pod}: {source}")]
    Exec {
        pod: String,
        #[source]
        source: kube::Error,
    },

    #[error("exec into pod {0} returned no output stream")]
    NoOutput(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Archive(#[from] BundleError),
}

/// Archive prefix produced by `tar cf - <mount_path>`.
///
/// tar strips the leading `/`, so `/test-output/` archives as `test-output/...`.
pub fn storage_prefix(mount_path: &str) -> PathBuf {
    Path::new(mount_path)
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

/// Local directory receiving one test's artifacts.
pub fn dest_path(base: &Path, suite: Option<&str>, test: &str) -> PathBuf {
    let mut dest = base.to_path_buf();
    if let Some(suite) = suite.filter(|s| !s.is_empty()) {
        dest.push(suite);
    }
    dest.push(test);
    dest
}

/// Unpack a plain tar stream of `mount_path` into `dest`.
pub fn unpack_test_output(
    archive: &[u8],
    dest: &Path,
    mount_path: &str,
) -> Result<usize, StorageError> {
    let prefix = storage_prefix(mount_path);
    let mut archive = tar::Archive::new(archive);
    Ok(bundle::extract_archive(&mut archive, dest, Some(&prefix))?)
}

/// Pull the contents of `mount_path` out of a pod's storage sidecar.
pub async fn gather_test_output(
    pods: &Api<Pod>,
    pod_name: &str,
    mount_path: &str,
    dest: &Path,
) -> Result<usize, StorageError> {
    debug!(pod = %pod_name, mount_path, "Gathering test output");

    let params = AttachParams::default()
        .container(STORAGE_SIDECAR_CONTAINER)
        .stdin(false)
        .stdout(true)
        .stderr(false);

    let mut process = pods
        .exec(pod_name, vec!["tar", "cf", "-", mount_path], &params)
        .await
        .map_err(|source| StorageError::Exec {
            pod: pod_name.to_string(),
            source,
        })?;

    let mut stdout = process
        .stdout()
        .ok_or_else(|| StorageError::NoOutput(pod_name.to_string()))?;
    let mut archive = Vec::new();
    stdout.read_to_end(&mut archive).await?;
    drop(stdout);

    if let Err(e) = process.join().await {
        warn!(pod = %pod_name, error = %e, "Exec session did not close cleanly");
    }

    let written = unpack_test_output(&archive, dest, mount_path)?;
    info!(
        pod = %pod_name,
        dest = %dest.display(),
        entries = written,
        "Gathered test output"
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_storage_prefix() {
        assert_eq!(storage_prefix("/test-output"), PathBuf::from("test-output"));
        assert_eq!(storage_prefix("/test-output/"), PathBuf::from("test-output"));
        assert_eq!(storage_prefix("/var//run/out"), PathBuf::from("var/run/out"));
    }

    #[test]
    fn test_dest_path() {
        let base = Path::new("test-output");
        assert_eq!(
            dest_path(base, Some("basic"), "basic-check-spec-test"),
            PathBuf::from("test-output/basic/basic-check-spec-test")
        );
        assert_eq!(
            dest_path(base, None, "kuttl"),
            PathBuf::from("test-output/kuttl")
        );
        assert_eq!(dest_path(base, Some(""), "kuttl"), PathBuf::from("test-output/kuttl"));
    }

    #[test]
    fn test_unpack_test_output() {
        // Shaped like `tar cf - /test-output` run inside the sidecar.
        let mut builder = tar::Builder::new(Vec::new());
        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        dir.set_cksum();
        builder
            .append_data(&mut dir, "test-output/", io::empty())
            .unwrap();

        let contents = b"kuttl report";
        let mut file = tar::Header::new_gnu();
        file.set_size(contents.len() as u64);
        file.set_mode(0o644);
        file.set_cksum();
        builder
            .append_data(&mut file, "test-output/kuttl-report.xml", &contents[..])
            .unwrap();
        let archive = builder.into_inner().unwrap();

        let out = TempDir::new().unwrap();
        let dest = dest_path(out.path(), Some("kuttl"), "kuttl-test");
        let written = unpack_test_output(&archive, &dest, "/test-output").unwrap();

        assert_eq!(written, 2);
        assert_eq!(
            fs::read_to_string(dest.join("kuttl-report.xml")).unwrap(),
            "kuttl report"
        );
    }

    #[test]
    fn test_unpack_does_not_follow_symlink_out_of_dest() {
        let outside = TempDir::new().unwrap();

        let mut builder = tar::Builder::new(Vec::new());
        let mut link = tar::Header::new_gnu();
        link.set_entry_type(tar::EntryType::Symlink);
        link.set_size(0);
        link.set_mode(0o777);
        link.set_link_name(outside.path()).unwrap();
        link.set_cksum();
        builder
            .append_data(&mut link, "test-output/escape", io::empty())
            .unwrap();

        let contents = b"escaped";
        let mut file = tar::Header::new_gnu();
        file.set_size(contents.len() as u64);
        file.set_mode(0o644);
        file.set_cksum();
        builder
            .append_data(&mut file, "test-output/escape/owned.txt", &contents[..])
            .unwrap();
        let archive = builder.into_inner().unwrap();

        let out = TempDir::new().unwrap();
        let dest = dest_path(out.path(), Some("basic"), "escape-test");
        unpack_test_output(&archive, &dest, "/test-output").unwrap();

        assert!(!outside.path().join("owned.txt").exists());
        assert_eq!(
            fs::read_to_string(dest.join("escape/owned.txt")).unwrap(),
            "escaped"
        );
    }
}
