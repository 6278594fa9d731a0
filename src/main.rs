/*!
 * Network Sandbox Daemon - Main Entry Point
 *
 * Owns one sandbox registry for the lifetime of the process:
 * - `netsandboxd` runs the registry and its GC until Ctrl-C
 * - `netsandboxd stats <key> [interface...]` prints counters as JSON
 */

use netns_sandbox::{init_tracing, RegistryConfig, SandboxRegistry};
use std::collections::BTreeMap;
use std::error::Error;
use std::path::Path;
use tracing::{error, info};

fn print_stats(
    registry: &SandboxRegistry,
    key: &Path,
    names: &[String],
) -> Result<(), Box<dyn Error>> {
    // Held until the counters are printed so the sweep cannot reclaim it
    let sandbox = registry.acquire(key)?;
    let names = if names.is_empty() {
        sandbox.link_names()?
    } else {
        names.to_vec()
    };

    let mut all = BTreeMap::new();
    for name in names {
        let stats = sandbox.interface_statistics(&name)?;
        all.insert(name, stats);
    }

    println!("{}", serde_json::to_string_pretty(&all)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    let config = RegistryConfig::from_env()?;
    info!(
        netns_dir = %config.netns_dir.display(),
        cleanup_period_ms = config.cleanup_period.as_millis() as u64,
        backend = ?config.backend,
        "Network sandbox daemon starting"
    );

    let registry = SandboxRegistry::new(config)?;
    info!(platform = ?registry.platform(), "Backend selected");

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Some((command, rest)) = args.split_first() {
        let outcome = match (command.as_str(), rest.split_first()) {
            ("stats", Some((key, names))) => print_stats(&registry, Path::new(key), names),
            _ => Err("usage: netsandboxd [stats <key> [interface...]]".into()),
        };
        registry.shutdown().await;
        return outcome;
    }

    info!("Registry running, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
    }

    info!(tracked = registry.len(), "Shutting down");
    registry.shutdown().await;
    Ok(())
}
