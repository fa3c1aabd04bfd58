//! Intermediate label-map naming and best-effort removal.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::path::{Path, PathBuf};

use crate::error::RastvecError;
use crate::utils::config::{LABELMAP_MERGED_SUFFIX, LABELMAP_SUFFIX};

/// Paths of the two label maps materialized when small-region merging runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntermediatePaths {
    /// `<outputBase>_labelmap.tif`, written by segmentation.
    pub labelmap: PathBuf,
    /// `<outputBase>_labelmap_merged.tif`, written by small-region merging.
    pub merged: PathBuf,
}

/// Output path without its extension.
pub fn output_base(output: &Path) -> PathBuf {
    output.with_extension("")
}

/// Intermediate paths for `output`. With `tmp_dir` the files go there, named after the
/// output's file stem.
pub fn intermediate_paths(output: &Path, tmp_dir: Option<&Path>) -> IntermediatePaths {
    let base = match tmp_dir {
        Some(dir) => dir.join(output.file_stem().unwrap_or(output.as_os_str())),
        None => output_base(output),
    };
    let with_suffix = |suffix: &str| {
        let mut s = base.clone().into_os_string();
        s.push(suffix);
        PathBuf::from(s)
    };
    IntermediatePaths {
        labelmap: with_suffix(LABELMAP_SUFFIX),
        merged: with_suffix(LABELMAP_MERGED_SUFFIX),
    }
}

/// Create `dir` if missing. Returns whether it was created by this call.
pub fn prepare_tmp_dir(dir: &Path) -> Result<bool> {
    if dir.is_dir() {
        return Ok(false);
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create temporary directory {}", dir.display()))?;
    Ok(true)
}

/// Check-exists then remove. A missing file is not an error (`Ok(false)`).
pub fn remove_file_best_effort(path: &Path) -> Result<bool, RastvecError> {
    if !path.exists() {
        debug!("Intermediate {} already absent", path.display());
        return Ok(false);
    }
    std::fs::remove_file(path).map_err(|source| RastvecError::Cleanup {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Removed intermediate {}", path.display());
    Ok(true)
}

/// Remove every path in `paths`; failures are logged and skipped. Returns how many were removed.
pub fn cleanup_intermediates(paths: &[PathBuf]) -> usize {
    paths
        .iter()
        .filter(|p| match remove_file_best_effort(p) {
            Ok(removed) => removed,
            Err(e) => {
                warn!("{e}");
                false
            }
        })
        .count()
}

/// Remove `dir` if it is empty. Used for a temporary directory this run created.
pub fn remove_dir_if_empty(dir: &Path) {
    if std::fs::remove_dir(dir).is_ok() {
        debug!("Removed temporary directory {}", dir.display());
    }
}
