/*!
 * Core Module
 * Errors, limits and configuration shared across the crate
 */

pub mod config;
pub mod errors;
pub mod limits;

pub use config::RegistryConfig;
pub use errors::{SandboxError, SandboxResult};
