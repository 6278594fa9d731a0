/*!
 * Network Namespace Tests
 * Interface attachment, gateways and counters through the simulation backend
 */

use netns_sandbox::*;
use pretty_assertions::assert_eq;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tempfile::TempDir;

const SBOX_IFACE: &str = "containername";

fn setup() -> (TempDir, SimulationBackend, NetworkNamespace) {
    let dir = TempDir::new().unwrap();
    let backend = SimulationBackend::new();
    for name in ["wierdlongname2", "wierdlongname4"] {
        backend.add_host_link(name);
    }
    let ns = NetworkNamespace::create(dir.path().join("netns-sbox"), Arc::new(backend.clone()))
        .unwrap();
    (dir, backend, ns)
}

fn sandbox_info() -> SandboxInfo {
    SandboxInfo {
        interfaces: vec![
            Interface::new("wierdlongname2", SBOX_IFACE)
                .with_address("192.168.1.100/24".parse().unwrap())
                .with_address_ipv6("fe80::2/64".parse().unwrap()),
            Interface::new("wierdlongname4", SBOX_IFACE)
                .with_address("192.168.2.100/24".parse().unwrap())
                .with_address_ipv6("fe80::3/64".parse().unwrap()),
        ],
        gateway: Some(Ipv4Addr::new(192, 168, 1, 1)),
        gateway_ipv6: Some("fe80::1".parse().unwrap()),
    }
}

#[test]
fn test_attach_assigns_ordinals() {
    let (_dir, backend, ns) = setup();
    let info = sandbox_info();

    ns.attach(&info.interfaces).unwrap();

    let names = ns.link_names().unwrap();
    assert!(names.contains(&"containername0".to_string()));
    assert!(names.contains(&"containername1".to_string()));
    assert!(!backend.has_host_link("wierdlongname2"));
    assert!(!backend.has_host_link("wierdlongname4"));

    let attached = ns.interfaces();
    assert_eq!(attached[0].name, "containername0");
    assert_eq!(attached[0].config.src_name, "wierdlongname2");
    assert_eq!(attached[1].name, "containername1");
}

#[test]
fn test_addresses_follow_interface() {
    let (_dir, backend, ns) = setup();
    ns.attach(&sandbox_info().interfaces).unwrap();

    let addrs: Vec<String> = backend
        .addresses(ns.key(), "containername1")
        .unwrap()
        .iter()
        .map(|a| a.to_string())
        .collect();
    assert_eq!(addrs, vec!["192.168.2.100/24", "fe80::3/64"]);
}

#[test]
fn test_attach_stops_at_missing_source() {
    let (_dir, _backend, ns) = setup();
    let interfaces = vec![
        Interface::new("wierdlongname2", SBOX_IFACE),
        Interface::new("does-not-exist", SBOX_IFACE),
        Interface::new("wierdlongname4", SBOX_IFACE),
    ];

    let err = ns.attach(&interfaces).unwrap_err();
    assert!(matches!(err, SandboxError::LinkNotFound(ref name) if name == "does-not-exist"));

    // The first interface stays attached, the third was never tried
    let names: Vec<String> = ns.interfaces().into_iter().map(|i| i.name).collect();
    assert_eq!(names, vec!["containername0"]);
}

#[test]
fn test_apply_installs_gateways() {
    let (_dir, backend, ns) = setup();
    let info = sandbox_info();

    ns.apply(&info).unwrap();

    assert_eq!(ns.gateway(), Some(Ipv4Addr::new(192, 168, 1, 1)));
    assert_eq!(ns.gateway_ipv6(), Some("fe80::1".parse::<Ipv6Addr>().unwrap()));
    assert_eq!(
        backend.routes(ns.key()).unwrap(),
        vec![
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
            IpAddr::V6("fe80::1".parse().unwrap()),
        ]
    );
    assert_eq!(ns.info(), info);
}

#[test]
fn test_gateway_absent_is_noop() {
    let (_dir, backend, ns) = setup();
    ns.configure_gateway(None, None).unwrap();
    assert!(backend.routes(ns.key()).unwrap().is_empty());
}

#[test]
fn test_unreachable_gateway_is_route_error() {
    let (_dir, _backend, ns) = setup();
    ns.attach(&sandbox_info().interfaces).unwrap();

    let err = ns
        .configure_gateway(Some(Ipv4Addr::new(10, 9, 9, 1)), None)
        .unwrap_err();
    assert!(matches!(err, SandboxError::Route { .. }));
    assert_eq!(ns.gateway(), None);
}

#[test]
fn test_statistics_for_attached_interfaces() {
    let (_dir, backend, ns) = setup();
    ns.attach(&sandbox_info().interfaces).unwrap();

    let counters = InterfaceStatistics {
        rx_bytes: 9006,
        rx_packets: 61,
        tx_bytes: 1024,
        tx_packets: 8,
    };
    backend.set_counters(ns.key(), "containername1", counters).unwrap();

    assert_eq!(ns.interface_statistics("containername1").unwrap(), counters);

    let all = ns.statistics().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all["containername0"], InterfaceStatistics::default());
    assert_eq!(all["containername1"], counters);

    let missing = ns.interface_statistics("eth7");
    assert!(matches!(missing, Err(SandboxError::InterfaceNotFound(_))));
}

#[test]
fn test_key_file_exists() {
    let (_dir, _backend, ns) = setup();
    assert!(ns.key().exists());
    assert_eq!(ns.platform(), PlatformType::Simulation);
    assert_eq!(ns.link_names().unwrap(), vec!["lo"]);
}
