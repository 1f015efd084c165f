use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};

use log::debug;
use tempfile::TempDir;

use crate::errors::{Result, StarError};

const SCRATCH_PREFIX: &str = "tmpADAM";

/// Directories still on disk that must go when the process exits.
static PENDING: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());
static EXIT_HOOK: Once = Once::new();

/// Per-session scratch directory the applications write their parameter
/// files into. Created on first use, removed when dropped, and removed at
/// process exit if the owner is never dropped (e.g. held in a `static`).
///
/// Two concurrent invocations of the same command must not share one of
/// these; `Session` serializes same-name invocations for that reason.
#[derive(Debug)]
pub struct ExecutionContext {
    parent: Option<PathBuf>,
    dir: Mutex<Option<TempDir>>,
}

impl ExecutionContext {
    /// Scratch directory created under the current working directory.
    pub fn new() -> Self {
        Self {
            parent: None,
            dir: Mutex::new(None),
        }
    }

    /// Scratch directory created under `parent`.
    pub fn in_dir(parent: impl Into<PathBuf>) -> Self {
        Self {
            parent: Some(parent.into()),
            dir: Mutex::new(None),
        }
    }

    /// Create the directory if needed and return its path. Idempotent.
    pub fn ensure(&self) -> Result<PathBuf> {
        let mut slot = self.lock()?;
        if let Some(dir) = slot.as_ref() {
            return Ok(dir.path().to_path_buf());
        }

        let parent = match &self.parent {
            Some(parent) => parent.clone(),
            None => std::env::current_dir()?,
        };
        std::fs::create_dir_all(&parent)?;
        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&parent)?;
        let path = dir.path().to_path_buf();
        register_exit_cleanup(&path);
        debug!("Created scratch directory {}", path.display());
        *slot = Some(dir);
        Ok(path)
    }

    /// Current directory, if it has been created.
    pub fn path(&self) -> Option<PathBuf> {
        self.lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|d| d.path().to_path_buf()))
    }

    /// Remove the directory and its contents now; the next `ensure` makes a
    /// fresh one.
    pub fn teardown(&self) -> Result<()> {
        let taken = self.lock()?.take();
        if let Some(dir) = taken {
            let path = dir.path().to_path_buf();
            unregister_exit_cleanup(&path);
            dir.close()?;
            debug!("Removed scratch directory {}", path.display());
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<TempDir>>> {
        self.dir
            .lock()
            .map_err(|_| StarError::Configuration("scratch directory lock poisoned".into()))
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        let taken = match self.dir.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(dir) = taken {
            unregister_exit_cleanup(dir.path());
        }
    }
}

fn register_exit_cleanup(path: &Path) {
    if let Ok(mut pending) = PENDING.lock() {
        pending.push(path.to_path_buf());
    }

    #[cfg(unix)]
    EXIT_HOOK.call_once(|| {
        // SAFETY: `remove_pending_dirs` is a plain extern "C" fn with no
        // captured state; registering it cannot violate memory safety.
        unsafe {
            libc::atexit(remove_pending_dirs);
        }
    });
}

fn unregister_exit_cleanup(path: &Path) {
    if let Ok(mut pending) = PENDING.lock() {
        pending.retain(|p| p != path);
    }
}

#[cfg(unix)]
extern "C" fn remove_pending_dirs() {
    let Ok(mut pending) = PENDING.try_lock() else {
        return;
    };
    for dir in pending.drain(..) {
        let _ = std::fs::remove_dir_all(dir);
    }
}

#[cfg(test)]
pub(crate) fn pending_contains(path: &Path) -> bool {
    PENDING
        .lock()
        .map(|pending| pending.iter().any(|p| p == path))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_lazily_and_idempotent() {
        let parent = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::in_dir(parent.path());
        assert!(ctx.path().is_none());

        let first = ctx.ensure().unwrap();
        let second = ctx.ensure().unwrap();
        assert_eq!(first, second);
        assert!(first.is_dir());
        assert!(first.starts_with(parent.path()));
        assert!(
            first
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(SCRATCH_PREFIX)
        );
    }

    #[test]
    fn removed_with_contents_on_drop() {
        let parent = tempfile::tempdir().unwrap();
        let path = {
            let ctx = ExecutionContext::in_dir(parent.path());
            let path = ctx.ensure().unwrap();
            std::fs::write(path.join("stats.sdf"), b"data").unwrap();
            assert!(pending_contains(&path));
            path
        };
        assert!(!path.exists());
        assert!(!pending_contains(&path));
    }

    #[test]
    fn teardown_then_recreate() {
        let parent = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::in_dir(parent.path());
        let first = ctx.ensure().unwrap();
        ctx.teardown().unwrap();
        assert!(!first.exists());
        assert!(ctx.path().is_none());

        let second = ctx.ensure().unwrap();
        assert!(second.is_dir());
        assert_ne!(first, second);
    }
}
