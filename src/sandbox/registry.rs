/*!
 * Sandbox Registry
 * Shared, reference-counted namespaces keyed by path, with background reclamation
 *
 * # Locking
 *
 * One registry mutex guards the table and the cleanup period. It is never
 * held across filesystem or netlink work. Each table entry also carries a
 * slot lock that serialises creation and reclamation of that one key. The
 * order is always slot before registry.
 */

use super::gc::{GcStrategy, GcTask, SweepStats};
use super::namespace::NetworkNamespace;
use super::simulation::SimulationBackend;
use super::traits::NamespaceBackend;
use super::types::{BackendKind, PlatformType};
use crate::core::config::RegistryConfig;
use crate::core::errors::{SandboxError, SandboxResult};
use crate::core::limits::KEY_ID_LEN;
use crate::monitoring::span_operation;
use ahash::RandomState;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Default)]
struct SlotState {
    ns: Option<Arc<NetworkNamespace>>,
    /// Set once the entry owning this slot left the table
    retired: bool,
}

type Slot = Mutex<SlotState>;

struct Entry {
    slot: Arc<Slot>,
    refs: usize,
    unreferenced_since: Option<Instant>,
}

impl Entry {
    fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(SlotState::default())),
            refs: 0,
            unreferenced_since: None,
        }
    }

    fn is_due(&self, now: Instant, period: Duration, strategy: GcStrategy) -> bool {
        if self.refs > 0 {
            return false;
        }
        match (self.unreferenced_since, strategy) {
            (None, _) => false,
            (Some(_), GcStrategy::Unreferenced) => true,
            (Some(since), GcStrategy::Expired) => now.saturating_duration_since(since) >= period,
        }
    }
}

struct RegistryState {
    entries: HashMap<PathBuf, Entry, RandomState>,
    /// References still held on destroyed generations, per key
    retired_refs: HashMap<PathBuf, usize, RandomState>,
    cleanup_period: Duration,
}

impl RegistryState {
    /// Consume one reference of a destroyed generation of `key`
    fn take_retired_ref(&mut self, key: &Path) -> bool {
        let Some(outstanding) = self.retired_refs.get_mut(key) else {
            return false;
        };
        *outstanding -= 1;
        if *outstanding == 0 {
            self.retired_refs.remove(key);
        }
        true
    }
}

enum Reclaim {
    Done,
    Cancelled,
    Failed,
}

/// State shared between the registry handle, leases and the GC task
pub(crate) struct RegistryInner {
    state: Mutex<RegistryState>,
    backend: Arc<dyn NamespaceBackend>,
    netns_dir: PathBuf,
}

impl RegistryInner {
    pub(crate) fn cleanup_period(&self) -> Duration {
        self.state.lock().cleanup_period
    }

    fn reserve(&self, key: &Path) -> Arc<Slot> {
        let mut state = self.state.lock();
        let entry = state.entries.entry(key.to_path_buf()).or_insert_with(Entry::new);
        entry.refs += 1;
        entry.unreferenced_since = None;
        Arc::clone(&entry.slot)
    }

    /// Drop a reservation whose creation failed
    fn unreserve(&self, key: &Path, slot: &Arc<Slot>) {
        let mut state = self.state.lock();
        let remove = match state.entries.get_mut(key) {
            Some(entry) if Arc::ptr_eq(&entry.slot, slot) => {
                entry.refs = entry.refs.saturating_sub(1);
                entry.refs == 0
            }
            _ => false,
        };
        if remove {
            state.entries.remove(key);
        }
    }

    fn get(&self, key: &Path) -> SandboxResult<(Arc<NetworkNamespace>, Arc<Slot>)> {
        if !key.is_absolute() {
            return Err(SandboxError::InvalidConfig(format!(
                "sandbox key must be an absolute path: {}",
                key.display()
            )));
        }

        loop {
            let slot = self.reserve(key);
            let mut guard = slot.lock();

            if guard.retired {
                // Destroyed while we waited; hand back that reservation and start over
                self.release(key, Some(&slot));
                continue;
            }
            if let Some(ns) = guard.ns.as_ref() {
                let ns = Arc::clone(ns);
                drop(guard);
                return Ok((ns, slot));
            }

            match NetworkNamespace::create(key, Arc::clone(&self.backend)) {
                Ok(ns) => {
                    let ns = Arc::new(ns);
                    guard.ns = Some(Arc::clone(&ns));
                    drop(guard);
                    info!(key = %key.display(), "Sandbox created");
                    return Ok((ns, slot));
                }
                Err(e) => {
                    drop(guard);
                    self.unreserve(key, &slot);
                    warn!(key = %key.display(), error = %e, "Sandbox creation failed");
                    return Err(e);
                }
            }
        }
    }

    /// Drop one reference on `key`
    ///
    /// With a `slot` the reference belongs to that exact generation. Without
    /// one, references of destroyed generations are paid back first.
    fn release(&self, key: &Path, slot: Option<&Arc<Slot>>) {
        let mut state = self.state.lock();
        let current = state
            .entries
            .get(key)
            .map_or(false, |e| slot.map_or(true, |s| Arc::ptr_eq(&e.slot, s)));

        if (slot.is_none() || !current) && state.take_retired_ref(key) {
            debug!(key = %key.display(), "Reference to a destroyed sandbox released");
            return;
        }
        if !current {
            warn!(key = %key.display(), "Release of an unknown sandbox ignored");
            return;
        }

        match state.entries.get_mut(key) {
            Some(entry) if entry.refs > 0 => {
                entry.refs -= 1;
                if entry.refs == 0 {
                    entry.unreferenced_since = Some(Instant::now());
                    debug!(key = %key.display(), "Sandbox unreferenced");
                }
            }
            Some(_) => warn!(key = %key.display(), "Release of an unreferenced sandbox ignored"),
            None => warn!(key = %key.display(), "Release of an unknown sandbox ignored"),
        }
    }

    /// Remove the entry if it still owns `slot`, retiring the slot
    fn forget(&self, key: &Path, slot: &Arc<Slot>, guard: &mut SlotState, only_unreferenced: bool) {
        let mut state = self.state.lock();
        let owned = state
            .entries
            .get(key)
            .map_or(false, |e| Arc::ptr_eq(&e.slot, slot) && (!only_unreferenced || e.refs == 0));
        if owned {
            if let Some(entry) = state.entries.remove(key) {
                if entry.refs > 0 {
                    *state.retired_refs.entry(key.to_path_buf()).or_insert(0) += entry.refs;
                }
            }
            guard.retired = true;
        }
    }

    fn reclaim(&self, key: &Path, slot: &Arc<Slot>, strategy: GcStrategy) -> Reclaim {
        let mut guard = slot.lock();

        // A GetSandbox that reserved after victim selection wins
        {
            let state = self.state.lock();
            let still_due = state.entries.get(key).map_or(false, |e| {
                Arc::ptr_eq(&e.slot, slot) && e.is_due(Instant::now(), state.cleanup_period, strategy)
            });
            if !still_due {
                return Reclaim::Cancelled;
            }
        }

        // Callers arriving from here on block on the slot until it settles
        let result = match guard.ns.as_ref() {
            Some(ns) => ns.destroy(),
            None => self.backend.delete_namespace(key),
        };

        match result {
            Ok(()) => {
                guard.ns = None;
                self.forget(key, slot, &mut guard, true);
                info!(key = %key.display(), "Sandbox reclaimed");
                Reclaim::Done
            }
            Err(e) => {
                warn!(key = %key.display(), error = %e, "Sandbox deletion failed, will retry");
                Reclaim::Failed
            }
        }
    }

    pub(crate) fn sweep(&self, strategy: GcStrategy) -> SweepStats {
        let start = Instant::now();
        let victims: Vec<(PathBuf, Arc<Slot>)> = {
            let state = self.state.lock();
            state
                .entries
                .iter()
                .filter(|(_, e)| e.is_due(start, state.cleanup_period, strategy))
                .map(|(k, e)| (k.clone(), Arc::clone(&e.slot)))
                .collect()
        };

        let mut stats = SweepStats::default();
        for (key, slot) in victims {
            match self.reclaim(&key, &slot, strategy) {
                Reclaim::Done => stats.reclaimed += 1,
                Reclaim::Cancelled => stats.cancelled += 1,
                Reclaim::Failed => stats.failed += 1,
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        stats
    }

    fn destroy(&self, key: &Path) -> SandboxResult<()> {
        let slot = self.state.lock().entries.get(key).map(|e| Arc::clone(&e.slot));

        let Some(slot) = slot else {
            return self.backend.delete_namespace(key);
        };

        let mut guard = slot.lock();
        match guard.ns.as_ref() {
            Some(ns) => ns.destroy()?,
            None => self.backend.delete_namespace(key)?,
        }
        guard.ns = None;
        self.forget(key, &slot, &mut guard, false);
        info!(key = %key.display(), "Sandbox destroyed");
        Ok(())
    }
}

/// Pick the backend named by `kind`
pub fn select_backend(kind: BackendKind) -> SandboxResult<Arc<dyn NamespaceBackend>> {
    match kind {
        BackendKind::Simulation => Ok(Arc::new(SimulationBackend::new())),
        BackendKind::Linux => linux_backend().ok_or_else(|| {
            SandboxError::PlatformNotSupported(
                "Linux network namespaces need root and /proc/self/ns/net".to_string(),
            )
        }),
        BackendKind::Auto => Ok(linux_backend().unwrap_or_else(|| {
            warn!("Linux network namespaces unavailable, using simulation backend");
            Arc::new(SimulationBackend::new())
        })),
    }
}

#[cfg(target_os = "linux")]
fn linux_backend() -> Option<Arc<dyn NamespaceBackend>> {
    let backend = super::linux::LinuxBackend::new();
    if backend.is_supported() {
        Some(Arc::new(backend))
    } else {
        None
    }
}

#[cfg(not(target_os = "linux"))]
fn linux_backend() -> Option<Arc<dyn NamespaceBackend>> {
    None
}

/// Registry of shared sandboxes
///
/// Must be constructed inside a Tokio runtime; the GC task runs on it until
/// [`shutdown`](Self::shutdown) is awaited or the registry is dropped.
pub struct SandboxRegistry {
    inner: Arc<RegistryInner>,
    gc: GcTask,
}

impl SandboxRegistry {
    /// Build a registry with the backend selected by `config`
    pub fn new(config: RegistryConfig) -> SandboxResult<Self> {
        let backend = select_backend(config.backend)?;
        Self::with_backend(config, backend)
    }

    /// Build a registry on an explicit backend
    pub fn with_backend(
        config: RegistryConfig,
        backend: Arc<dyn NamespaceBackend>,
    ) -> SandboxResult<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SandboxError::NoRuntime(e.to_string()))?;

        let inner = Arc::new(RegistryInner {
            state: Mutex::new(RegistryState {
                entries: HashMap::with_hasher(RandomState::new()),
                retired_refs: HashMap::with_hasher(RandomState::new()),
                cleanup_period: config.cleanup_period,
            }),
            backend,
            netns_dir: config.netns_dir,
        });
        let gc = GcTask::spawn(&runtime, Arc::clone(&inner));

        info!(
            netns_dir = %inner.netns_dir.display(),
            platform = ?inner.backend.platform(),
            cleanup_period_ms = config.cleanup_period.as_millis() as u64,
            "Sandbox registry ready"
        );
        Ok(Self { inner, gc })
    }

    /// Key for a container: the netns directory joined with the id prefix
    pub fn generate_key(&self, container_id: &str) -> SandboxResult<PathBuf> {
        if container_id.is_empty() || container_id.contains('/') || container_id.starts_with('.') {
            return Err(SandboxError::InvalidConfig(format!(
                "invalid container id: {:?}",
                container_id
            )));
        }
        let short: String = container_id.chars().take(KEY_ID_LEN).collect();
        Ok(self.inner.netns_dir.join(short))
    }

    /// Return the namespace for `key`, creating it on first use
    ///
    /// Every successful call takes one reference that must be returned with
    /// [`release_sandbox`](Self::release_sandbox).
    pub fn get_sandbox(&self, key: impl AsRef<Path>) -> SandboxResult<Arc<NetworkNamespace>> {
        self.traced_get(key.as_ref()).map(|(ns, _)| ns)
    }

    fn traced_get(&self, key: &Path) -> SandboxResult<(Arc<NetworkNamespace>, Arc<Slot>)> {
        let span = span_operation("get_sandbox");
        let _entered = span.enter();
        let result = self.inner.get(key);
        if let Err(e) = &result {
            span.record_error(&e.to_string());
        } else {
            span.record_result(true);
        }
        result
    }

    /// Drop one reference; at zero the entry starts ageing toward reclamation
    ///
    /// References taken before a [`destroy_sandbox`](Self::destroy_sandbox)
    /// are settled against the destroyed namespace, never the one recreated
    /// at the same key.
    pub fn release_sandbox(&self, key: impl AsRef<Path>) {
        self.inner.release(key.as_ref(), None);
    }

    /// Like [`get_sandbox`](Self::get_sandbox) with the release tied to a guard
    pub fn acquire(&self, key: impl AsRef<Path>) -> SandboxResult<SandboxLease> {
        let (ns, slot) = self.traced_get(key.as_ref())?;
        Ok(SandboxLease {
            ns,
            slot,
            registry: Arc::clone(&self.inner),
        })
    }

    /// Delete the namespace now, regardless of outstanding references
    ///
    /// Handles already given out report not-found errors afterwards.
    pub fn destroy_sandbox(&self, key: impl AsRef<Path>) -> SandboxResult<()> {
        let span = span_operation("destroy_sandbox");
        let _entered = span.enter();
        let result = self.inner.destroy(key.as_ref());
        span.record_result(result.is_ok());
        result
    }

    /// Run one sweep on the calling thread
    pub fn collect(&self, strategy: GcStrategy) -> SweepStats {
        self.inner.sweep(strategy)
    }

    /// Ask the GC task for an immediate sweep of expired entries
    pub fn trigger_gc(&self) {
        self.gc.trigger();
    }

    pub fn cleanup_period(&self) -> Duration {
        self.inner.cleanup_period()
    }

    /// Change the cleanup period; applies from the next sweep on
    pub fn set_cleanup_period(&self, period: Duration) -> SandboxResult<()> {
        if period.is_zero() {
            return Err(SandboxError::InvalidConfig(
                "cleanup period must be non-zero".to_string(),
            ));
        }
        self.inner.state.lock().cleanup_period = period;
        self.gc.update_period(period);
        Ok(())
    }

    pub fn contains(&self, key: impl AsRef<Path>) -> bool {
        self.inner.state.lock().entries.contains_key(key.as_ref())
    }

    /// Outstanding references for `key`, if tracked
    pub fn ref_count(&self, key: impl AsRef<Path>) -> Option<usize> {
        self.inner.state.lock().entries.get(key.as_ref()).map(|e| e.refs)
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<PathBuf> {
        let mut keys: Vec<PathBuf> = self.inner.state.lock().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn netns_dir(&self) -> &Path {
        &self.inner.netns_dir
    }

    pub fn backend(&self) -> &Arc<dyn NamespaceBackend> {
        &self.inner.backend
    }

    pub fn platform(&self) -> PlatformType {
        self.inner.backend.platform()
    }

    /// Stop the GC task; namespaces still tracked are left in place
    pub async fn shutdown(self) {
        self.gc.shutdown().await;
        info!(remaining = self.inner.state.lock().entries.len(), "Sandbox registry shut down");
    }
}

impl fmt::Debug for SandboxRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SandboxRegistry")
            .field("netns_dir", &self.inner.netns_dir)
            .field("platform", &self.inner.backend.platform())
            .field("entries", &state.entries.len())
            .field("cleanup_period", &state.cleanup_period)
            .finish()
    }
}

/// One reference to a sandbox, returned to the registry on drop
pub struct SandboxLease {
    ns: Arc<NetworkNamespace>,
    slot: Arc<Slot>,
    registry: Arc<RegistryInner>,
}

impl SandboxLease {
    /// Shared handle that outlives the lease
    pub fn handle(&self) -> Arc<NetworkNamespace> {
        Arc::clone(&self.ns)
    }
}

impl Deref for SandboxLease {
    type Target = NetworkNamespace;

    fn deref(&self) -> &NetworkNamespace {
        &self.ns
    }
}

impl Drop for SandboxLease {
    fn drop(&mut self) {
        self.registry.release(self.ns.key(), Some(&self.slot));
    }
}

impl fmt::Debug for SandboxLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxLease").field("key", &self.ns.key()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn registry(dir: &TempDir, period: Duration) -> (SandboxRegistry, SimulationBackend) {
        let backend = SimulationBackend::new();
        let config = RegistryConfig::default()
            .with_netns_dir(dir.path())
            .with_cleanup_period(period);
        let registry = SandboxRegistry::with_backend(config, Arc::new(backend.clone())).unwrap();
        (registry, backend)
    }

    #[tokio::test]
    async fn test_get_returns_same_handle() {
        let dir = TempDir::new().unwrap();
        let (registry, _) = registry(&dir, Duration::from_secs(60));
        let key = dir.path().join("a");

        let first = registry.get_sandbox(&key).unwrap();
        let second = registry.get_sandbox(&key).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.ref_count(&key), Some(2));

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_relative_key_rejected() {
        let dir = TempDir::new().unwrap();
        let (registry, _) = registry(&dir, Duration::from_secs(60));

        let result = registry.get_sandbox("relative/key");
        assert!(matches!(result, Err(SandboxError::InvalidConfig(_))));
        assert!(registry.is_empty());

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_expired_strategy_respects_period() {
        let dir = TempDir::new().unwrap();
        let (registry, backend) = registry(&dir, Duration::from_secs(60));
        let key = dir.path().join("b");

        registry.get_sandbox(&key).unwrap();
        registry.release_sandbox(&key);

        assert_eq!(registry.collect(GcStrategy::Expired).reclaimed, 0);
        assert!(backend.has_namespace(&key));

        let stats = registry.collect(GcStrategy::Unreferenced);
        assert_eq!(stats.reclaimed, 1);
        assert!(!registry.contains(&key));
        assert!(!key.exists());

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_referenced_entry_is_not_a_victim() {
        let dir = TempDir::new().unwrap();
        let (registry, _) = registry(&dir, Duration::from_secs(60));
        let key = dir.path().join("c");

        let ns = registry.get_sandbox(&key).unwrap();
        let stats = registry.collect(GcStrategy::Unreferenced);
        assert_eq!((stats.reclaimed, stats.cancelled, stats.failed), (0, 0, 0));
        assert!(!ns.is_reclaimed());

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_create_leaves_no_entry() {
        let dir = TempDir::new().unwrap();
        let (registry, _) = registry(&dir, Duration::from_secs(60));
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        // Parent of the key is a regular file
        let result = registry.get_sandbox(blocker.join("d"));
        assert!(matches!(result, Err(SandboxError::Io { .. })), "{:?}", result);
        assert!(registry.is_empty());

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_destroy_ignores_references() {
        let dir = TempDir::new().unwrap();
        let (registry, _) = registry(&dir, Duration::from_secs(60));
        let key = dir.path().join("e");

        let ns = registry.get_sandbox(&key).unwrap();
        registry.destroy_sandbox(&key).unwrap();

        assert!(ns.is_reclaimed());
        assert!(!registry.contains(&key));

        let fresh = registry.get_sandbox(&key).unwrap();
        assert!(!Arc::ptr_eq(&ns, &fresh));
        assert_eq!(registry.ref_count(&key), Some(1));

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_stale_release_after_destroy_spares_new_generation() {
        let dir = TempDir::new().unwrap();
        let (registry, backend) = registry(&dir, Duration::from_secs(60));
        let key = dir.path().join("generations");

        let old = registry.get_sandbox(&key).unwrap();
        registry.destroy_sandbox(&key).unwrap();
        let fresh = registry.get_sandbox(&key).unwrap();

        // Settles the reference taken on the destroyed generation
        registry.release_sandbox(&key);
        assert_eq!(registry.ref_count(&key), Some(1));

        let stats = registry.collect(GcStrategy::Unreferenced);
        assert_eq!(stats.reclaimed, 0);
        assert!(old.is_reclaimed());
        assert!(!fresh.is_reclaimed());
        assert!(key.exists());
        assert!(backend.has_namespace(&key));

        registry.release_sandbox(&key);
        assert_eq!(registry.ref_count(&key), Some(0));
        assert_eq!(registry.collect(GcStrategy::Unreferenced).reclaimed, 1);
        assert!(fresh.is_reclaimed());

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_stale_lease_after_destroy_spares_new_generation() {
        let dir = TempDir::new().unwrap();
        let (registry, _) = registry(&dir, Duration::from_secs(60));
        let key = dir.path().join("lease-generations");

        let old_lease = registry.acquire(&key).unwrap();
        registry.destroy_sandbox(&key).unwrap();
        let fresh = registry.get_sandbox(&key).unwrap();

        drop(old_lease);
        assert_eq!(registry.ref_count(&key), Some(1));
        assert_eq!(registry.collect(GcStrategy::Unreferenced).reclaimed, 0);
        assert!(!fresh.is_reclaimed());

        // A lease on the live generation still releases it
        let lease = registry.acquire(&key).unwrap();
        drop(lease);
        assert_eq!(registry.ref_count(&key), Some(1));

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_release_unknown_is_ignored() {
        let dir = TempDir::new().unwrap();
        let (registry, _) = registry(&dir, Duration::from_secs(60));
        registry.release_sandbox(dir.path().join("never"));
        assert!(registry.is_empty());
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_generate_key_truncates_id() {
        let dir = TempDir::new().unwrap();
        let (registry, _) = registry(&dir, Duration::from_secs(60));

        let key = registry.generate_key("0123456789abcdef").unwrap();
        assert_eq!(key, dir.path().join("0123456789ab"));
        assert_eq!(registry.generate_key("short").unwrap(), dir.path().join("short"));
        assert!(registry.generate_key("").is_err());
        assert!(registry.generate_key("../x").is_err());

        registry.shutdown().await;
    }

    #[test]
    fn test_new_requires_runtime() {
        let dir = TempDir::new().unwrap();
        let config = RegistryConfig::default().with_netns_dir(dir.path());
        let result = SandboxRegistry::with_backend(config, Arc::new(SimulationBackend::new()));
        assert!(matches!(result, Err(SandboxError::NoRuntime(_))));
    }
}
