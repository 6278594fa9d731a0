/*!
 * Sandbox Types
 * Interface configuration, sandbox info and counters
 */

use crate::core::errors::SandboxError;
use ipnetwork::{Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// One virtual interface to be installed inside a namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    /// Host-side link name before the move
    pub src_name: String,
    /// Base name inside the namespace; an ordinal is appended on attach
    pub dst_name: String,
    /// Primary IPv4 address and prefix
    pub address: Option<Ipv4Network>,
    /// Secondary IPv6 address and prefix
    pub address_ipv6: Option<Ipv6Network>,
}

impl Interface {
    pub fn new(src_name: impl Into<String>, dst_name: impl Into<String>) -> Self {
        Self {
            src_name: src_name.into(),
            dst_name: dst_name.into(),
            address: None,
            address_ipv6: None,
        }
    }

    pub fn with_address(mut self, address: Ipv4Network) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_address_ipv6(mut self, address: Ipv6Network) -> Self {
        self.address_ipv6 = Some(address);
        self
    }
}

/// An interface as it exists inside the namespace after a successful attach
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedInterface {
    /// Final, ordinal-suffixed name
    pub name: String,
    pub config: Interface,
}

/// Desired end-state of one namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxInfo {
    /// Order determines ordinal suffixing
    pub interfaces: Vec<Interface>,
    pub gateway: Option<Ipv4Addr>,
    pub gateway_ipv6: Option<Ipv6Addr>,
}

/// Point-in-time counters for one interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceStatistics {
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
}

impl fmt::Display for InterfaceStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RxBytes: {}, RxPackets: {}, TxBytes: {}, TxPackets: {}",
            self.rx_bytes, self.rx_packets, self.tx_bytes, self.tx_packets
        )
    }
}

/// Platform implementation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformType {
    /// Linux network namespaces via unshare/setns and rtnetlink
    LinuxNetns,
    /// In-memory links and routes, real key files
    Simulation,
}

/// Backend selection requested by configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Linux when supported and privileged, otherwise simulation
    #[default]
    Auto,
    Linux,
    Simulation,
}

impl FromStr for BackendKind {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(BackendKind::Auto),
            "linux" => Ok(BackendKind::Linux),
            "simulation" | "sim" => Ok(BackendKind::Simulation),
            other => Err(SandboxError::InvalidConfig(format!(
                "unknown backend {:?} (expected auto, linux or simulation)",
                other
            ))),
        }
    }
}
