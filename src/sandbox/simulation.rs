/*!
 * Simulation Namespace Backend
 * In-memory links, addresses, routes and counters backed by real key files
 */

use super::traits::*;
use super::types::*;
use crate::core::errors::{SandboxError, SandboxResult};
use crate::core::limits::LOOPBACK;
use dashmap::DashMap;
use ipnetwork::IpNetwork;
use log::{debug, info};
use nix::errno::Errno;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const REPORT_HEADER: &str = "Inter-|   Receive                                                |  Transmit\n face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n";

#[derive(Debug, Clone, Default)]
struct SimLink {
    addresses: Vec<IpNetwork>,
    counters: InterfaceStatistics,
}

#[derive(Debug, Default)]
struct SimNamespace {
    /// Ordered as created, loopback first
    links: Vec<(String, SimLink)>,
    routes: Vec<IpAddr>,
    delete_busy: bool,
}

impl SimNamespace {
    fn fresh() -> Self {
        Self {
            links: vec![(LOOPBACK.to_string(), SimLink::default())],
            ..Default::default()
        }
    }

    fn link(&self, name: &str) -> Option<&SimLink> {
        self.links.iter().find(|(n, _)| n == name).map(|(_, l)| l)
    }

    fn link_mut(&mut self, name: &str) -> Option<&mut SimLink> {
        self.links.iter_mut().find(|(n, _)| n == name).map(|(_, l)| l)
    }

    fn reaches(&self, gateway: IpAddr) -> bool {
        self.links
            .iter()
            .flat_map(|(_, l)| l.addresses.iter())
            .any(|net| net.contains(gateway))
    }
}

/// Simulation-based namespace backend
/// Provides API compatibility without CAP_SYS_ADMIN or CAP_NET_ADMIN
pub struct SimulationBackend {
    host_links: Arc<DashMap<String, SimLink>>,
    namespaces: Arc<DashMap<PathBuf, SimNamespace>>,
}

impl SimulationBackend {
    pub fn new() -> Self {
        info!("Namespace backend initialized (simulation mode)");
        Self {
            host_links: Arc::new(DashMap::new()),
            namespaces: Arc::new(DashMap::new()),
        }
    }

    /// Register a host-side link that can later be attached
    pub fn add_host_link(&self, name: &str) {
        self.host_links.insert(name.to_string(), SimLink::default());
    }

    pub fn has_host_link(&self, name: &str) -> bool {
        self.host_links.contains_key(name)
    }

    /// Whether the backend still tracks a namespace for `key`
    pub fn has_namespace(&self, key: &Path) -> bool {
        self.namespaces.contains_key(key)
    }

    /// Default routes currently installed in the namespace
    pub fn routes(&self, key: &Path) -> SandboxResult<Vec<IpAddr>> {
        let ns = self.namespaces.get(key).ok_or_else(|| missing(key))?;
        Ok(ns.routes.clone())
    }

    /// Addresses assigned to a link inside the namespace
    pub fn addresses(&self, key: &Path, link: &str) -> SandboxResult<Vec<IpNetwork>> {
        let ns = self.namespaces.get(key).ok_or_else(|| missing(key))?;
        ns.link(link)
            .map(|l| l.addresses.clone())
            .ok_or_else(|| SandboxError::LinkNotFound(link.to_string()))
    }

    /// Overwrite the counters the kernel would report for a link
    pub fn set_counters(
        &self,
        key: &Path,
        link: &str,
        counters: InterfaceStatistics,
    ) -> SandboxResult<()> {
        let mut ns = self.namespaces.get_mut(key).ok_or_else(|| missing(key))?;
        let sim_link = ns
            .link_mut(link)
            .ok_or_else(|| SandboxError::LinkNotFound(link.to_string()))?;
        sim_link.counters = counters;
        Ok(())
    }

    /// Make deletes of `key` fail with EBUSY until cleared
    pub fn set_delete_busy(&self, key: &Path, busy: bool) -> SandboxResult<()> {
        let mut ns = self.namespaces.get_mut(key).ok_or_else(|| missing(key))?;
        ns.delete_busy = busy;
        Ok(())
    }
}

impl Default for SimulationBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SimulationBackend {
    fn clone(&self) -> Self {
        Self {
            host_links: Arc::clone(&self.host_links),
            namespaces: Arc::clone(&self.namespaces),
        }
    }
}

fn missing(key: &Path) -> SandboxError {
    SandboxError::io(
        key,
        io::Error::new(io::ErrorKind::NotFound, "no such network namespace"),
    )
}

impl NamespaceBackend for SimulationBackend {
    fn create_namespace(&self, key: &Path) -> SandboxResult<()> {
        if let Some(parent) = key.parent() {
            fs::create_dir_all(parent).map_err(|e| SandboxError::io(parent, e))?;
        }
        fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(key)
            .map_err(|e| SandboxError::io(key, e))?;

        self.namespaces.insert(key.to_path_buf(), SimNamespace::fresh());
        info!("Created simulated network namespace: {}", key.display());
        Ok(())
    }

    fn delete_namespace(&self, key: &Path) -> SandboxResult<()> {
        if let Some(ns) = self.namespaces.get(key) {
            if ns.delete_busy {
                return Err(SandboxError::io(key, io::Error::from(Errno::EBUSY)));
            }
        }

        match fs::remove_file(key) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(SandboxError::io(key, e)),
        }

        // Links inside a destroyed namespace are destroyed with it
        self.namespaces.remove(key);
        info!("Destroyed simulated network namespace: {}", key.display());
        Ok(())
    }

    fn attach_interface(&self, key: &Path, iface: &Interface, name: &str) -> SandboxResult<()> {
        {
            let ns = self.namespaces.get(key).ok_or_else(|| missing(key))?;
            if ns.link(name).is_some() {
                return Err(SandboxError::LinkExists(name.to_string()));
            }
        }

        let (_, mut link) = self
            .host_links
            .remove(&iface.src_name)
            .ok_or_else(|| SandboxError::LinkNotFound(iface.src_name.clone()))?;

        link.addresses.extend(iface.address.map(IpNetwork::V4));
        link.addresses.extend(iface.address_ipv6.map(IpNetwork::V6));

        match self.namespaces.get_mut(key) {
            Some(mut ns) => {
                ns.links.push((name.to_string(), link));
                debug!("Moved {} into {} as {}", iface.src_name, key.display(), name);
                Ok(())
            }
            None => {
                // Namespace vanished between the checks; the link stays on the host
                self.host_links.insert(iface.src_name.clone(), link);
                Err(missing(key))
            }
        }
    }

    fn detach_interface(&self, key: &Path, iface: &Interface, name: &str) -> SandboxResult<()> {
        if self.host_links.contains_key(&iface.src_name) {
            return Err(SandboxError::LinkExists(iface.src_name.clone()));
        }

        let mut link = {
            let mut ns = self.namespaces.get_mut(key).ok_or_else(|| missing(key))?;
            let pos = ns
                .links
                .iter()
                .position(|(n, _)| n == name)
                .ok_or_else(|| SandboxError::LinkNotFound(name.to_string()))?;
            ns.links.remove(pos).1
        };

        link.addresses.clear();
        self.host_links.insert(iface.src_name.clone(), link);
        debug!("Moved {} out of {} as {}", name, key.display(), iface.src_name);
        Ok(())
    }

    fn add_default_route(&self, key: &Path, gateway: IpAddr) -> SandboxResult<()> {
        let mut ns = self.namespaces.get_mut(key).ok_or_else(|| missing(key))?;

        if !ns.reaches(gateway) {
            return Err(SandboxError::Route {
                gateway,
                reason: "network is unreachable".to_string(),
            });
        }
        if ns.routes.contains(&gateway) {
            return Err(SandboxError::Route {
                gateway,
                reason: "route already exists".to_string(),
            });
        }

        ns.routes.push(gateway);
        Ok(())
    }

    fn remove_default_route(&self, key: &Path, gateway: IpAddr) -> SandboxResult<()> {
        let mut ns = self.namespaces.get_mut(key).ok_or_else(|| missing(key))?;
        let before = ns.routes.len();
        ns.routes.retain(|r| *r != gateway);

        if ns.routes.len() == before {
            return Err(SandboxError::Route {
                gateway,
                reason: "no such route".to_string(),
            });
        }
        Ok(())
    }

    fn link_names(&self, key: &Path) -> SandboxResult<Vec<String>> {
        let ns = self.namespaces.get(key).ok_or_else(|| missing(key))?;
        Ok(ns.links.iter().map(|(n, _)| n.clone()).collect())
    }

    fn read_counters(&self, key: &Path) -> SandboxResult<String> {
        let ns = self.namespaces.get(key).ok_or_else(|| missing(key))?;

        let mut report = String::from(REPORT_HEADER);
        for (name, link) in &ns.links {
            let c = link.counters;
            let _ = writeln!(
                report,
                "{:>6}: {:>7} {:>7}    0    0    0     0          0         0 {:>8} {:>7}    0    0    0     0       0          0",
                name, c.rx_bytes, c.rx_packets, c.tx_bytes, c.tx_packets
            );
        }
        Ok(report)
    }

    fn is_supported(&self) -> bool {
        true // Always available as fallback
    }

    fn platform(&self) -> PlatformType {
        PlatformType::Simulation
    }
}
