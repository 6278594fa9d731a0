/*!
 * Network Namespace Handle
 * One isolated network stack bound to a filesystem key
 */

use super::stats::scan_interface_stats;
use super::traits::NamespaceBackend;
use super::types::*;
use crate::core::errors::{SandboxError, SandboxResult};
use log::{debug, info};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

#[derive(Debug, Default)]
struct AppliedConfig {
    interfaces: Vec<AttachedInterface>,
    gateway: Option<Ipv4Addr>,
    gateway_ipv6: Option<Ipv6Addr>,
}

/// Live handle for one network namespace
///
/// The handle records the last successfully applied configuration. It does
/// not serialise concurrent mutation of the same interface set; callers own
/// a handle one at a time.
pub struct NetworkNamespace {
    key: PathBuf,
    backend: Arc<dyn NamespaceBackend>,
    applied: RwLock<AppliedConfig>,
    reclaimed: AtomicBool,
    created_at: SystemTime,
}

impl NetworkNamespace {
    /// Create the namespace at `key` through `backend`
    pub fn create(key: impl Into<PathBuf>, backend: Arc<dyn NamespaceBackend>) -> SandboxResult<Self> {
        let key = key.into();
        backend.create_namespace(&key)?;

        Ok(Self {
            key,
            backend,
            applied: RwLock::new(AppliedConfig::default()),
            reclaimed: AtomicBool::new(false),
            created_at: SystemTime::now(),
        })
    }

    pub fn key(&self) -> &Path {
        &self.key
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn platform(&self) -> PlatformType {
        self.backend.platform()
    }

    /// True once the backing namespace has been deleted
    pub fn is_reclaimed(&self) -> bool {
        self.reclaimed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_reclaimed(&self) {
        self.reclaimed.store(true, Ordering::Release);
    }

    /// Delete the backing namespace; the handle is unusable afterwards
    pub(crate) fn destroy(&self) -> SandboxResult<()> {
        self.backend.delete_namespace(&self.key)?;
        self.mark_reclaimed();
        Ok(())
    }

    fn ensure_live(&self) -> SandboxResult<()> {
        if self.is_reclaimed() {
            return Err(SandboxError::reclaimed(&self.key));
        }
        Ok(())
    }

    /// Attach interfaces in order, suffixing each base name with its ordinal
    ///
    /// Stops at the first failure; interfaces attached before it stay in
    /// place and remain visible through [`interfaces`](Self::interfaces).
    pub fn attach(&self, interfaces: &[Interface]) -> SandboxResult<()> {
        self.ensure_live()?;

        for iface in interfaces {
            let name = next_name(&self.applied.read().interfaces, &iface.dst_name);
            self.backend.attach_interface(&self.key, iface, &name)?;

            debug!(
                "Attached {} to {} as {}",
                iface.src_name,
                self.key.display(),
                name
            );
            self.applied.write().interfaces.push(AttachedInterface {
                name,
                config: iface.clone(),
            });
        }
        Ok(())
    }

    /// Move an attached interface back to the host under its source name
    pub fn remove_interface(&self, name: &str) -> SandboxResult<()> {
        self.ensure_live()?;

        let attached = self
            .applied
            .read()
            .interfaces
            .iter()
            .find(|i| i.name == name)
            .cloned()
            .ok_or_else(|| SandboxError::LinkNotFound(name.to_string()))?;

        self.backend
            .detach_interface(&self.key, &attached.config, &attached.name)?;
        self.applied.write().interfaces.retain(|i| i.name != name);
        Ok(())
    }

    /// Install default routes through the given gateways
    pub fn configure_gateway(
        &self,
        gateway: Option<Ipv4Addr>,
        gateway_ipv6: Option<Ipv6Addr>,
    ) -> SandboxResult<()> {
        self.ensure_live()?;

        if let Some(gw) = gateway {
            let current = self.applied.read().gateway;
            self.replace_route(current.map(IpAddr::V4), IpAddr::V4(gw), |applied| {
                applied.gateway = None
            })?;
            self.applied.write().gateway = Some(gw);
        }

        if let Some(gw) = gateway_ipv6 {
            let current = self.applied.read().gateway_ipv6;
            self.replace_route(current.map(IpAddr::V6), IpAddr::V6(gw), |applied| {
                applied.gateway_ipv6 = None
            })?;
            self.applied.write().gateway_ipv6 = Some(gw);
        }

        Ok(())
    }

    /// Swap the default route; `removed` runs once the old route is gone
    fn replace_route<F>(&self, current: Option<IpAddr>, next: IpAddr, removed: F) -> SandboxResult<()>
    where
        F: FnOnce(&mut AppliedConfig),
    {
        match current {
            Some(cur) if cur == next => return Ok(()),
            Some(cur) => {
                self.backend.remove_default_route(&self.key, cur)?;
                removed(&mut *self.applied.write());
            }
            None => {}
        }
        self.backend.add_default_route(&self.key, next)?;
        info!("Default route via {} installed in {}", next, self.key.display());
        Ok(())
    }

    /// Remove any installed default routes
    pub fn unset_gateway(&self) -> SandboxResult<()> {
        self.ensure_live()?;

        let (gateway, gateway_ipv6) = {
            let applied = self.applied.read();
            (applied.gateway, applied.gateway_ipv6)
        };

        if let Some(gw) = gateway {
            self.backend.remove_default_route(&self.key, IpAddr::V4(gw))?;
            self.applied.write().gateway = None;
        }
        if let Some(gw) = gateway_ipv6 {
            self.backend.remove_default_route(&self.key, IpAddr::V6(gw))?;
            self.applied.write().gateway_ipv6 = None;
        }

        Ok(())
    }

    /// Attach every interface, then install both gateways
    pub fn apply(&self, info: &SandboxInfo) -> SandboxResult<()> {
        self.attach(&info.interfaces)?;
        self.configure_gateway(info.gateway, info.gateway_ipv6)
    }

    pub fn interfaces(&self) -> Vec<AttachedInterface> {
        self.applied.read().interfaces.clone()
    }

    pub fn gateway(&self) -> Option<Ipv4Addr> {
        self.applied.read().gateway
    }

    pub fn gateway_ipv6(&self) -> Option<Ipv6Addr> {
        self.applied.read().gateway_ipv6
    }

    /// Snapshot of the applied configuration
    pub fn info(&self) -> SandboxInfo {
        let applied = self.applied.read();
        SandboxInfo {
            interfaces: applied.interfaces.iter().map(|i| i.config.clone()).collect(),
            gateway: applied.gateway,
            gateway_ipv6: applied.gateway_ipv6,
        }
    }

    /// Enter the namespace and list the links it contains
    pub fn link_names(&self) -> SandboxResult<Vec<String>> {
        self.ensure_live()?;
        self.backend.link_names(&self.key)
    }

    /// Current counters of one link inside the namespace
    pub fn interface_statistics(&self, name: &str) -> SandboxResult<InterfaceStatistics> {
        self.ensure_live()?;
        let report = self.backend.read_counters(&self.key)?;
        let mut stats = InterfaceStatistics::default();
        scan_interface_stats(&report, name, &mut stats)?;
        Ok(stats)
    }

    /// Current counters of every attached interface, keyed by final name
    pub fn statistics(&self) -> SandboxResult<BTreeMap<String, InterfaceStatistics>> {
        self.ensure_live()?;
        let report = self.backend.read_counters(&self.key)?;

        let mut all = BTreeMap::new();
        for attached in self.applied.read().interfaces.iter() {
            let mut stats = InterfaceStatistics::default();
            scan_interface_stats(&report, &attached.name, &mut stats)?;
            all.insert(attached.name.clone(), stats);
        }
        Ok(all)
    }
}

impl fmt::Debug for NetworkNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkNamespace")
            .field("key", &self.key)
            .field("platform", &self.platform())
            .field("reclaimed", &self.is_reclaimed())
            .field("interfaces", &self.applied.read().interfaces.len())
            .finish()
    }
}

/// Lowest free ordinal for `base` among the attached interfaces
fn next_name(attached: &[AttachedInterface], base: &str) -> String {
    let mut ordinal = 0usize;
    loop {
        let candidate = format!("{}{}", base, ordinal);
        if attached.iter().all(|i| i.name != candidate) {
            return candidate;
        }
        ordinal += 1;
    }
}
