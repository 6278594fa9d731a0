/*!
 * Error Types
 * Centralized error handling with thiserror and miette diagnostics
 */

use miette::Diagnostic;
use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for sandbox operations
pub type SandboxResult<T> = Result<T, SandboxError>;

/// Errors raised by namespace handles, the registry and the stats scanner
#[derive(Error, Debug, Diagnostic)]
pub enum SandboxError {
    #[error("I/O error on {}: {source}", path.display())]
    #[diagnostic(
        code(sandbox::io),
        help("Check that the key path is writable and has not been reclaimed.")
    )]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Link {0} not found")]
    #[diagnostic(
        code(sandbox::link_not_found),
        help("The host-side link must exist before it can be attached.")
    )]
    LinkNotFound(String),

    #[error("Link {0} already exists in the namespace")]
    #[diagnostic(code(sandbox::link_exists))]
    LinkExists(String),

    #[error("Failed to install route via {gateway}: {reason}")]
    #[diagnostic(
        code(sandbox::route),
        help("The gateway must be reachable through an attached interface.")
    )]
    Route { gateway: IpAddr, reason: String },

    #[error("Interface {0} not present in the statistics report")]
    #[diagnostic(code(sandbox::stats_not_found))]
    InterfaceNotFound(String),

    #[error("Malformed statistics for {interface}: {reason}")]
    #[diagnostic(code(sandbox::stats_parse))]
    StatsParse { interface: String, reason: String },

    #[error("Netlink operation failed: {0}")]
    #[diagnostic(code(sandbox::netlink))]
    Netlink(String),

    #[error("Platform not supported: {0}")]
    #[diagnostic(code(sandbox::platform))]
    PlatformNotSupported(String),

    #[error("Invalid configuration: {0}")]
    #[diagnostic(code(sandbox::config))]
    InvalidConfig(String),

    #[error("No tokio runtime available: {0}")]
    #[diagnostic(
        code(sandbox::no_runtime),
        help("Construct the registry from within a tokio runtime.")
    )]
    NoRuntime(String),
}

impl SandboxError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SandboxError::Io {
            path: path.into(),
            source,
        }
    }

    /// Build the error returned when a key no longer backs a live namespace
    pub fn reclaimed(path: impl Into<PathBuf>) -> Self {
        Self::io(
            path,
            io::Error::new(io::ErrorKind::NotFound, "network namespace has been reclaimed"),
        )
    }

    /// Whether this error means the backing file is gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, SandboxError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}
