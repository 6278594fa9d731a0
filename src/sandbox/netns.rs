/*!
 * Scoped Namespace Entry
 *
 * setns(2) switches the namespace of the calling OS thread only. Work that
 * must observe a sandbox's network stack runs on a dedicated short-lived
 * thread; the guard restores the original namespace when it drops.
 */

use crate::core::errors::{SandboxError, SandboxResult};
use crate::core::limits::THREAD_NETNS_PATH;
use log::{debug, error};
use nix::sched::{setns, unshare, CloneFlags};
use std::fs::File;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// RAII guard holding the calling thread inside another network namespace
///
/// Not `Send`: the namespace switch belongs to the thread that made it.
pub struct NetnsGuard {
    original: File,
    target: PathBuf,
    _thread_bound: PhantomData<*const ()>,
}

impl NetnsGuard {
    /// Move the calling thread into the namespace bound at `path`
    pub fn enter(path: &Path) -> SandboxResult<Self> {
        let original = open_current()?;
        let target = File::open(path).map_err(|e| SandboxError::io(path, e))?;

        setns(&target, CloneFlags::CLONE_NEWNET)
            .map_err(|e| SandboxError::io(path, io::Error::from(e)))?;

        debug!("Thread entered network namespace {}", path.display());
        Ok(Self {
            original,
            target: path.to_path_buf(),
            _thread_bound: PhantomData,
        })
    }

    /// Move the calling thread into a brand-new, empty network namespace
    pub fn unshare() -> SandboxResult<Self> {
        let original = open_current()?;

        unshare(CloneFlags::CLONE_NEWNET)
            .map_err(|e| SandboxError::io(THREAD_NETNS_PATH, io::Error::from(e)))?;

        Ok(Self {
            original,
            target: PathBuf::from(THREAD_NETNS_PATH),
            _thread_bound: PhantomData,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }
}

impl Drop for NetnsGuard {
    fn drop(&mut self) {
        if let Err(e) = setns(&self.original, CloneFlags::CLONE_NEWNET) {
            // Only dedicated threads take guards, and they exit right after
            error!(
                "Failed to restore network namespace after {}: {}",
                self.target.display(),
                e
            );
        }
    }
}

fn open_current() -> SandboxResult<File> {
    File::open(THREAD_NETNS_PATH).map_err(|e| SandboxError::io(THREAD_NETNS_PATH, e))
}

/// Run `f` on a fresh OS thread and wait for its result
pub fn on_dedicated_thread<F, T>(name: &str, f: F) -> SandboxResult<T>
where
    F: FnOnce() -> SandboxResult<T> + Send,
    T: Send,
{
    std::thread::scope(|scope| {
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn_scoped(scope, f)
            .map_err(|e| SandboxError::io(THREAD_NETNS_PATH, e))?;

        handle
            .join()
            .map_err(|_| SandboxError::Netlink(format!("{} thread panicked", name)))?
    })
}

/// Run `f` inside the namespace bound at `path`
pub fn run_in_namespace<F, T>(path: &Path, f: F) -> SandboxResult<T>
where
    F: FnOnce() -> SandboxResult<T> + Send,
    T: Send,
{
    on_dedicated_thread("netns-worker", || {
        let _guard = NetnsGuard::enter(path)?;
        f()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedicated_thread_returns_value() {
        let value = on_dedicated_thread("test", || Ok(21 * 2)).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_dedicated_thread_propagates_error() {
        let result: SandboxResult<()> =
            on_dedicated_thread("test", || Err(SandboxError::LinkNotFound("x".into())));
        assert!(matches!(result, Err(SandboxError::LinkNotFound(_))));
    }

    #[test]
    fn test_enter_missing_path_is_not_found() {
        let result = run_in_namespace(Path::new("/nonexistent/netns-key"), || Ok(()));
        assert!(result.unwrap_err().is_not_found());
    }
}
