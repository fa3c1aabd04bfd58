//! Process-wide registry of open file handles per data source.
//!
//! A resource may be held by any number of read-only handles, or by exactly one update
//! handle, never both. Opening a handle that breaks this rule fails with
//! [`RastvecError::ResourceLifetime`] before the file is touched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use crate::error::RastvecError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct HandleCounts {
    readers: usize,
    writers: usize,
}

static OPEN_HANDLES: OnceLock<Mutex<HashMap<PathBuf, HandleCounts>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<PathBuf, HandleCounts>> {
    OPEN_HANDLES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Registry key: canonical parent directory joined with the file name, so the key is stable
/// before and after the file is created.
fn registry_key(path: &Path) -> PathBuf {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let parent = parent.canonicalize().unwrap_or_else(|_| parent.to_path_buf());
    match path.file_name() {
        Some(name) => parent.join(name),
        None => parent,
    }
}

/// Registration held by an open [`DataSource`](super::DataSource); released on drop.
#[derive(Debug)]
pub(crate) struct HandleGuard {
    key: PathBuf,
    writer: bool,
}

impl HandleGuard {
    pub(crate) fn acquire(path: &Path, writer: bool) -> Result<Self, RastvecError> {
        let key = registry_key(path);
        let mut map = registry().lock().unwrap_or_else(|e| e.into_inner());
        let counts = map.entry(key.clone()).or_default();
        if writer && (counts.readers > 0 || counts.writers > 0) {
            return Err(RastvecError::ResourceLifetime(format!(
                "{} is still open ({} read-only, {} update handle(s)); close it before reopening for update",
                key.display(),
                counts.readers,
                counts.writers
            )));
        }
        if !writer && counts.writers > 0 {
            return Err(RastvecError::ResourceLifetime(format!(
                "{} is open for update; close it before opening read-only",
                key.display()
            )));
        }
        if writer {
            counts.writers += 1;
        } else {
            counts.readers += 1;
        }
        Ok(Self { key, writer })
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        let mut map = registry().lock().unwrap_or_else(|e| e.into_inner());
        if let Some(counts) = map.get_mut(&self.key) {
            if self.writer {
                counts.writers = counts.writers.saturating_sub(1);
            } else {
                counts.readers = counts.readers.saturating_sub(1);
            }
            if *counts == HandleCounts::default() {
                map.remove(&self.key);
            }
        }
    }
}

/// `(read_only, update)` handle counts currently registered for `path`.
pub fn open_handle_counts(path: &Path) -> (usize, usize) {
    let map = registry().lock().unwrap_or_else(|e| e.into_inner());
    map.get(&registry_key(path))
        .map(|c| (c.readers, c.writers))
        .unwrap_or((0, 0))
}
