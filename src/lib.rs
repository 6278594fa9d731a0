/*!
 * Network Sandbox Library
 * Isolated network namespaces for containers, shared by key and reclaimed
 * in the background once unreferenced
 */

pub mod core;
pub mod monitoring;
pub mod sandbox;

// Re-exports
pub use crate::core::{RegistryConfig, SandboxError, SandboxResult};
pub use monitoring::init_tracing;
pub use sandbox::{
    scan_interface_stats, AttachedInterface, BackendKind, GcStrategy, Interface,
    InterfaceStatistics, NamespaceBackend, NetworkNamespace, PlatformType, SandboxInfo,
    SandboxLease, SandboxRegistry, SimulationBackend, SweepStats,
};
#[cfg(target_os = "linux")]
pub use sandbox::LinuxBackend;
