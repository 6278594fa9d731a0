/*!
 * Interface Statistics Scanner
 * Parses the kernel per-interface counters report (/proc/net/dev format)
 */

use super::types::InterfaceStatistics;
use crate::core::errors::{SandboxError, SandboxResult};
use crate::core::limits::{NET_DEV_FIELDS, NET_DEV_HEADER_LINES};

// Column positions among the numeric fields of one row
const RX_BYTES: usize = 0;
const RX_PACKETS: usize = 1;
const TX_BYTES: usize = 8;
const TX_PACKETS: usize = 9;

/// Locate `interface` in `data` and overwrite `stats` with its counters
///
/// `stats` is left untouched on error so callers never see zeroed or
/// half-updated counters.
pub fn scan_interface_stats(
    data: &str,
    interface: &str,
    stats: &mut InterfaceStatistics,
) -> SandboxResult<()> {
    for line in data.lines().skip(NET_DEV_HEADER_LINES) {
        let Some((name, counters)) = line.split_once(':') else {
            continue;
        };
        if name.trim() != interface {
            continue;
        }

        let fields = parse_counters(interface, counters)?;
        *stats = InterfaceStatistics {
            rx_bytes: fields[RX_BYTES],
            rx_packets: fields[RX_PACKETS],
            tx_bytes: fields[TX_BYTES],
            tx_packets: fields[TX_PACKETS],
        };
        return Ok(());
    }

    Err(SandboxError::InterfaceNotFound(interface.to_string()))
}

impl InterfaceStatistics {
    /// Scan a fresh record out of a counters report
    pub fn from_report(data: &str, interface: &str) -> SandboxResult<Self> {
        let mut stats = Self::default();
        scan_interface_stats(data, interface, &mut stats)?;
        Ok(stats)
    }
}

fn parse_counters(interface: &str, counters: &str) -> SandboxResult<[u64; NET_DEV_FIELDS]> {
    let mut fields = [0u64; NET_DEV_FIELDS];
    let mut tokens = counters.split_whitespace();

    for (idx, slot) in fields.iter_mut().enumerate() {
        let token = tokens.next().ok_or_else(|| SandboxError::StatsParse {
            interface: interface.to_string(),
            reason: format!("expected {} counters, found {}", NET_DEV_FIELDS, idx),
        })?;
        *slot = token.parse().map_err(|e| SandboxError::StatsParse {
            interface: interface.to_string(),
            reason: format!("counter {} ({:?}): {}", idx + 1, token, e),
        })?;
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const HEADER: &str = "Inter-|   Receive                                                |  Transmit\n face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n";

    #[test]
    fn test_name_adjacent_to_colon() {
        let data = format!(
            "{}eth0:1 2 0 0 0 0 0 0 3 4 0 0 0 0 0 0\n",
            HEADER
        );
        let stats = InterfaceStatistics::from_report(&data, "eth0").unwrap();
        assert_eq!(
            stats,
            InterfaceStatistics {
                rx_bytes: 1,
                rx_packets: 2,
                tx_bytes: 3,
                tx_packets: 4
            }
        );
    }

    #[test]
    fn test_prefix_name_does_not_match() {
        let data = format!("{}  eth01: 1 2 0 0 0 0 0 0 3 4 0 0 0 0 0 0\n", HEADER);
        let result = InterfaceStatistics::from_report(&data, "eth0");
        assert!(matches!(result, Err(SandboxError::InterfaceNotFound(ref n)) if n == "eth0"));
    }

    #[test]
    fn test_header_lines_are_ignored() {
        // A header that happens to contain the target followed by a colon
        let data = "eth0: header\nface |bytes\n";
        let result = InterfaceStatistics::from_report(data, "eth0");
        assert!(matches!(result, Err(SandboxError::InterfaceNotFound(_))));
    }

    #[test]
    fn test_short_row_is_parse_error() {
        let data = format!("{}  eth0: 1 2 0 0 0 0 0 0 3\n", HEADER);
        let result = InterfaceStatistics::from_report(&data, "eth0");
        assert!(matches!(result, Err(SandboxError::StatsParse { .. })));
    }

    #[test]
    fn test_negative_counter_is_parse_error() {
        let data = format!("{}  eth0: 1 -2 0 0 0 0 0 0 3 4 0 0 0 0 0 0\n", HEADER);
        let result = InterfaceStatistics::from_report(&data, "eth0");
        assert!(matches!(result, Err(SandboxError::StatsParse { .. })));
    }

    #[test]
    fn test_error_leaves_previous_values() {
        let mut stats = InterfaceStatistics {
            rx_bytes: 9,
            rx_packets: 9,
            tx_bytes: 9,
            tx_packets: 9,
        };
        let before = stats;
        let data = format!("{}  eth0: 1 x 0 0 0 0 0 0 3 4 0 0 0 0 0 0\n", HEADER);

        assert!(scan_interface_stats(&data, "eth0", &mut stats).is_err());
        assert!(scan_interface_stats(&data, "wlan0", &mut stats).is_err());
        assert_eq!(stats, before);
    }

    #[test]
    fn test_max_counter_value() {
        let data = format!(
            "{}  eth0: {} 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0\n",
            HEADER,
            u64::MAX
        );
        let stats = InterfaceStatistics::from_report(&data, "eth0").unwrap();
        assert_eq!(stats.rx_bytes, u64::MAX);
    }
}
