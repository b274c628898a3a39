// Reverse name lookup

use anyhow::Result;
use std::net::IpAddr;

/// Blocking reverse-name resolver
pub trait ReverseResolver: Send + Sync {
    /// Candidate names for an address, best first
    fn reverse(&self, ip: IpAddr) -> Result<Vec<String>>;
}

/// Resolver backed by the platform's getnameinfo
pub struct SystemResolver;

impl ReverseResolver for SystemResolver {
    fn reverse(&self, ip: IpAddr) -> Result<Vec<String>> {
        let name = dns_lookup::lookup_addr(&ip)?;
        Ok(vec![name])
    }
}
