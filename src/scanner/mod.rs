// Kernel table scanners
//
// This module reads the /proc pseudo-files that describe live TCP sockets and
// aggregate interface counters:
// - tcp: /proc/net/tcp and /proc/net/tcp6
// - bandwidth: /proc/net/dev

use anyhow::Result;
use serde::Serialize;
use std::net::IpAddr;

mod bandwidth;
mod tcp;

pub use bandwidth::BandwidthScanner;
pub use tcp::ConnectionScanner;

/// Address family of a kernel TCP table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Ipv4,
    Ipv6,
}

impl Family {
    /// File name of the table under `<proc_root>/net`
    pub fn table_name(&self) -> &'static str {
        match self {
            Family::Ipv4 => "tcp",
            Family::Ipv6 => "tcp6",
        }
    }
}

/// One row of a kernel TCP table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub local_addr: IpAddr,
    pub local_port: u16,
    pub remote_addr: IpAddr,
    pub remote_port: u16,
    /// Raw hex state code ("01", "0A", ...), never decoded
    pub state: String,
    /// Socket inode, the key shared with /proc/<pid>/fd
    pub inode: String,
    pub uid: u32,
}

/// Aggregate traffic since the previous sample
///
/// Both fields are raw byte deltas over one refresh cycle, not per-second rates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GlobalStats {
    pub download_rate: u64,
    pub upload_rate: u64,
}

/// Source of TCP connection records
pub trait ConnectionSource: Send + Sync {
    /// Scan one address family, preserving table order
    fn scan(&self, family: Family) -> Result<Vec<Connection>>;
}

/// Source of aggregate bandwidth samples
///
/// Implementations are stateful: each sample is a delta against the previous one.
pub trait BandwidthSource: Send {
    fn sample(&mut self) -> Result<GlobalStats>;
}
