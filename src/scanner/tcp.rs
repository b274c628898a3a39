// /proc/net/tcp and /proc/net/tcp6 decoder

use super::{Connection, ConnectionSource, Family};
use anyhow::{Context, Result};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;

// Token offsets for the table format exported since Linux 2.6:
//   sl local_address rem_address st tx_queue:rx_queue tr:tm->when retrnsmt uid timeout inode
const FIELD_LOCAL_ADDRESS: usize = 1;
const FIELD_REMOTE_ADDRESS: usize = 2;
const FIELD_STATE: usize = 3;
const FIELD_UID: usize = 7;
const FIELD_INODE: usize = 9;
/// Rows shorter than this are skipped
const MIN_FIELDS: usize = 10;

/// Reads the kernel TCP tables under a proc root
pub struct ConnectionScanner {
    proc_root: PathBuf,
}

impl ConnectionScanner {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    fn table_path(&self, family: Family) -> PathBuf {
        self.proc_root.join("net").join(family.table_name())
    }
}

impl ConnectionSource for ConnectionScanner {
    fn scan(&self, family: Family) -> Result<Vec<Connection>> {
        let path = self.table_path(family);
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read TCP table: {:?}", path))?;

        Ok(parse_table(&contents))
    }
}

/// Parse a whole table, header included
pub(crate) fn parse_table(contents: &str) -> Vec<Connection> {
    contents.lines().skip(1).filter_map(parse_row).collect()
}

fn parse_row(line: &str) -> Option<Connection> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < MIN_FIELDS {
        return None;
    }

    let Some((local_addr, local_port)) = decode_endpoint(fields[FIELD_LOCAL_ADDRESS]) else {
        log::trace!("Skipping row with bad local address: {}", line.trim());
        return None;
    };
    let Some((remote_addr, remote_port)) = decode_endpoint(fields[FIELD_REMOTE_ADDRESS]) else {
        log::trace!("Skipping row with bad remote address: {}", line.trim());
        return None;
    };

    Some(Connection {
        local_addr,
        local_port,
        remote_addr,
        remote_port,
        state: fields[FIELD_STATE].to_string(),
        inode: fields[FIELD_INODE].to_string(),
        uid: fields[FIELD_UID].parse().unwrap_or(0),
    })
}

/// Decode a `HEXADDR:HEXPORT` endpoint token
///
/// The address is in the kernel's in-memory byte order: IPv4 is one
/// little-endian u32, IPv6 is four little-endian u32 words kept in order.
pub fn decode_endpoint(token: &str) -> Option<(IpAddr, u16)> {
    let (addr_hex, port_hex) = token.split_once(':')?;
    if port_hex.is_empty() || !port_hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let port = u16::from_str_radix(port_hex, 16).ok()?;

    let bytes = decode_hex(addr_hex)?;
    let addr = match bytes.len() {
        4 => IpAddr::V4(Ipv4Addr::new(bytes[3], bytes[2], bytes[1], bytes[0])),
        16 => {
            let mut octets = [0u8; 16];
            for (word, out) in bytes.chunks_exact(4).zip(octets.chunks_exact_mut(4)) {
                let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                out.copy_from_slice(&value.to_be_bytes());
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return None,
    };

    Some((addr, port))
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}
