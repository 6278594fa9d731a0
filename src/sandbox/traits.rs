/*!
 * Namespace Backend Traits
 * The seam between sandbox handles and the kernel
 */

use super::types::*;
use crate::core::errors::SandboxResult;
use std::net::IpAddr;
use std::path::Path;

/// Kernel operations a namespace handle relies on
///
/// Every method is blocking. Callers must not hold the registry lock while
/// invoking one.
pub trait NamespaceBackend: Send + Sync {
    /// Create a namespace bound to a (possibly new) file at `key`
    fn create_namespace(&self, key: &Path) -> SandboxResult<()>;

    /// Release the namespace and remove the file at `key`
    ///
    /// A missing file counts as success.
    fn delete_namespace(&self, key: &Path) -> SandboxResult<()>;

    /// Move the host link `iface.src_name` into the namespace as `name`
    /// and assign its addresses
    fn attach_interface(&self, key: &Path, iface: &Interface, name: &str) -> SandboxResult<()>;

    /// Move the namespace link `name` back to the host as `iface.src_name`
    fn detach_interface(&self, key: &Path, iface: &Interface, name: &str) -> SandboxResult<()>;

    /// Install a default route through `gateway`
    fn add_default_route(&self, key: &Path, gateway: IpAddr) -> SandboxResult<()>;

    /// Remove the default route through `gateway`
    fn remove_default_route(&self, key: &Path, gateway: IpAddr) -> SandboxResult<()>;

    /// Names of every link visible inside the namespace
    fn link_names(&self, key: &Path) -> SandboxResult<Vec<String>>;

    /// Raw per-interface counters report as seen inside the namespace
    fn read_counters(&self, key: &Path) -> SandboxResult<String>;

    /// Check if this implementation is supported on current platform
    fn is_supported(&self) -> bool;

    /// Get the platform type
    fn platform(&self) -> PlatformType;
}
