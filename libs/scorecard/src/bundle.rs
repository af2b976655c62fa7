//! Bundle packaging.
//!
//! Operator bundles are shipped to test pods as a gzip-compressed tar
//! archive stored in a ConfigMap. Entry names are relative to the bundle
//! root.

use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Largest object the API server accepts in a ConfigMap.
pub const CONFIG_MAP_SIZE_LIMIT: usize = 1024 * 1024;

/// Errors from bundle packaging.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("bundle directory {0} does not exist")]
    NotFound(PathBuf),

    #[error("bundle path {0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("failed to walk bundle directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("tar contents corrupted: entry {entry} is outside {prefix}")]
    Corrupted { entry: String, prefix: String },

    #[error("tar contents corrupted: entry {entry} resolves outside the destination")]
    Escapes { entry: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Archive a directory tree into an in-memory gzip tar stream.
pub fn tar_directory(root: &Path) -> Result<Vec<u8>, BundleError> {
    let metadata = fs::metadata(root).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => BundleError::NotFound(root.to_path_buf()),
        _ => BundleError::Io(e),
    })?;
    if !metadata.is_dir() {
        return Err(BundleError::NotADirectory(root.to_path_buf()));
    }

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut entries = 0usize;
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };

        if entry.file_type().is_dir() {
            builder.append_dir(relative, entry.path())?;
        } else {
            builder.append_path_with_name(entry.path(), relative)?;
        }
        entries += 1;
    }

    let data = builder.into_inner()?.finish()?;

    if data.len() > CONFIG_MAP_SIZE_LIMIT {
        warn!(
            path = %root.display(),
            size = data.len(),
            limit = CONFIG_MAP_SIZE_LIMIT,
            "Bundle archive exceeds the ConfigMap size limit"
        );
    }
    debug!(path = %root.display(), entries, size = data.len(), "Archived bundle");

    Ok(data)
}

/// Unpack a gzip tar stream into `dest`.
pub fn untar_gzip(data: &[u8], dest: &Path) -> Result<usize, BundleError> {
    let mut archive = Archive::new(GzDecoder::new(data));
    extract_archive(&mut archive, dest, None)
}

/// Unpack an archive into `dest`, returning the number of entries written.
///
/// Absolute entry names are treated as relative. When `prefix` is given
/// every entry must live under it and the prefix is removed from the
/// destination path. Entries that escape through `..` are skipped, as are
/// hard links and symlinks pointing at absolute or `..` targets. An entry
/// whose parent resolves outside `dest` fails the extraction.
pub fn extract_archive<R: Read>(
    archive: &mut Archive<R>,
    dest: &Path,
    prefix: Option<&Path>,
) -> Result<usize, BundleError> {
    fs::create_dir_all(dest)?;
    let root = fs::canonicalize(dest)?;

    let mut written = 0usize;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();

        if path.components().any(|c| c == Component::ParentDir) {
            warn!(path = %path.display(), "Skipping path with parent directory");
            continue;
        }

        let entry_type = entry.header().entry_type();
        if entry_type.is_hard_link() {
            warn!(path = %path.display(), "Skipping hard link");
            continue;
        }
        if entry_type.is_symlink() {
            let target = entry.link_name()?.map(|t| t.into_owned());
            let unsafe_target = target.as_deref().map_or(true, |t| {
                t.is_absolute() || t.components().any(|c| c == Component::ParentDir)
            });
            if unsafe_target {
                warn!(
                    path = %path.display(),
                    target = ?target,
                    "Skipping symlink that points outside the archive"
                );
                continue;
            }
        }

        let relative: PathBuf = path
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();

        let relative = match prefix {
            Some(prefix) => match relative.strip_prefix(prefix) {
                Ok(stripped) => stripped.to_path_buf(),
                Err(_) => {
                    return Err(BundleError::Corrupted {
                        entry: path.display().to_string(),
                        prefix: prefix.display().to_string(),
                    })
                }
            },
            None => relative,
        };

        if !resolves_inside(&root, &relative)? {
            return Err(BundleError::Escapes {
                entry: path.display().to_string(),
            });
        }

        let full_path = root.join(&relative);
        if entry_type.is_dir() {
            fs::create_dir_all(&full_path)?;
        } else {
            if let Some(parent) = full_path.parent() {
                fs::create_dir_all(parent)?;
            }
            entry.unpack(&full_path)?;
        }
        written += 1;
    }

    Ok(written)
}

/// Whether every existing ancestor of `relative` under `root` stays inside
/// `root` once symlinks are resolved. `root` must be canonical.
fn resolves_inside(root: &Path, relative: &Path) -> io::Result<bool> {
    let mut current = root.to_path_buf();
    let mut ancestors: Vec<_> = relative.components().collect();
    ancestors.pop();

    for component in ancestors {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                if !fs::canonicalize(&current)?.starts_with(root) {
                    return Ok(false);
                }
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}
