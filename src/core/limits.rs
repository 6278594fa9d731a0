/*!
 * System Limits and Constants
 *
 * Centralized location for defaults, thresholds and kernel paths used by the
 * sandbox manager.
 */

use std::time::Duration;

// =============================================================================
// GARBAGE COLLECTION
// =============================================================================

/// Default grace period before an unreferenced namespace is reclaimed
pub const DEFAULT_CLEANUP_PERIOD: Duration = Duration::from_secs(60);

/// Lower bound for the sweep tick
/// [PERF] Keeps very short test periods from spinning the GC task
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Sweeps run this many times per cleanup period
pub const SWEEPS_PER_PERIOD: u32 = 2;

// =============================================================================
// KEYS
// =============================================================================

/// Default directory holding namespace key files
pub const DEFAULT_NETNS_DIR: &str = "/var/run/netns-sandbox";

/// Number of container id characters used when generating a key
pub const KEY_ID_LEN: usize = 12;

// =============================================================================
// KERNEL INTERFACES [LINUX-COMPAT]
// =============================================================================

/// Network namespace of the calling thread
pub const THREAD_NETNS_PATH: &str = "/proc/thread-self/ns/net";

/// Per-interface counters as seen from the calling thread's namespace
pub const THREAD_NET_DEV_PATH: &str = "/proc/thread-self/net/dev";

/// Presence of this file indicates network namespace support
pub const SELF_NETNS_PATH: &str = "/proc/self/ns/net";

/// Header lines preceding the per-interface rows of the counters report
pub const NET_DEV_HEADER_LINES: usize = 2;

/// Numeric columns on each interface row (8 receive + 8 transmit)
pub const NET_DEV_FIELDS: usize = 16;

/// Loopback name, always present in a fresh namespace
pub const LOOPBACK: &str = "lo";
