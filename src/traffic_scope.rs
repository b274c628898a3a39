//! Remote address scope (internet vs local network)
//!
//! Used to tag rows so the table can dim traffic that never leaves the host or LAN.

use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrafficScope {
    /// Public address
    Internet,
    /// Private, loopback, link-local or unspecified address
    Local,
}

/// Scope of a remote endpoint
pub fn scope_of(remote: &IpAddr) -> TrafficScope {
    let local = match remote {
        IpAddr::V4(ip) => is_local_ipv4(ip),
        IpAddr::V6(ip) => match ip.to_ipv4_mapped() {
            Some(mapped) => is_local_ipv4(&mapped),
            None => is_local_ipv6(ip),
        },
    };

    if local {
        TrafficScope::Local
    } else {
        TrafficScope::Internet
    }
}

fn is_local_ipv4(ip: &Ipv4Addr) -> bool {
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_unspecified()
}

fn is_local_ipv6(ip: &Ipv6Addr) -> bool {
    ip.is_loopback()
        || ip.is_unicast_link_local()
        || ip.is_unspecified()
        // fc00::/7
        || (ip.segments()[0] & 0xfe00) == 0xfc00
}
