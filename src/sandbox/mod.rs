/*!
 * Network Sandbox Module
 * Per-container network namespaces, their counters and the shared registry
 */

mod gc;
#[cfg(target_os = "linux")]
mod linux;
mod namespace;
#[cfg(target_os = "linux")]
pub mod netns;
mod registry;
mod simulation;
mod stats;
mod traits;
mod types;

pub use gc::{sweep_interval, GcStrategy, SweepStats};
#[cfg(target_os = "linux")]
pub use linux::LinuxBackend;
pub use namespace::NetworkNamespace;
pub use registry::{select_backend, SandboxLease, SandboxRegistry};
pub use simulation::SimulationBackend;
pub use stats::scan_interface_stats;
pub use traits::*;
pub use types::*;
