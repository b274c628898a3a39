// Remote address enrichment: country and hostname
//
// Both caches are keyed by the address's canonical string form and are never
// evicted: they grow with the number of distinct remote addresses seen.
// - country: memoized synchronously, the first call pays for the lookup
// - hostname: warmed in the background, the first call gets the numeric form

mod dns;
mod geo;

pub use dns::{ReverseResolver, SystemResolver};
pub use geo::{CountryDatabase, GeoDatabase};

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;

/// Answer for any country lookup that can't produce a name
pub const UNKNOWN_COUNTRY: &str = "Unknown";

/// Default cap on concurrent reverse lookups
pub const DEFAULT_MAX_CONCURRENT_LOOKUPS: usize = 16;

/// Shared state touched by background resolutions
struct HostnameCache {
    resolved: DashMap<String, String>,
    /// Addresses with a resolution scheduled or running
    pending: DashSet<String>,
    /// Addresses whose resolution failed; never retried
    failed: DashSet<String>,
    /// Signalled whenever `pending` becomes empty
    idle: Notify,
}

/// Pending marker for one scheduled resolution
///
/// Dropped when the task finishes or is aborted, including before its first poll.
struct PendingLookup {
    cache: Arc<HostnameCache>,
    address: String,
}

impl Drop for PendingLookup {
    fn drop(&mut self) {
        self.cache.pending.remove(&self.address);
        if self.cache.pending.is_empty() {
            self.cache.idle.notify_waiters();
        }
    }
}

pub struct EnrichmentService {
    geo: GeoDatabase,
    countries: DashMap<String, String>,
    hostnames: Arc<HostnameCache>,
    resolver: Option<Arc<dyn ReverseResolver>>,
    runtime: Handle,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

impl EnrichmentService {
    /// Create a service whose background lookups run on `runtime`
    ///
    /// Passing `None` for the resolver disables hostname resolution: every
    /// lookup returns the numeric form.
    pub fn new(
        geo: GeoDatabase,
        resolver: Option<Arc<dyn ReverseResolver>>,
        runtime: Handle,
        max_concurrent_lookups: usize,
    ) -> Self {
        Self {
            geo,
            countries: DashMap::new(),
            hostnames: Arc::new(HostnameCache {
                resolved: DashMap::new(),
                pending: DashSet::new(),
                failed: DashSet::new(),
                idle: Notify::new(),
            }),
            resolver,
            runtime,
            permits: Arc::new(Semaphore::new(max_concurrent_lookups.max(1))),
            tasks: Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn geo_status(&self) -> String {
        self.geo.status()
    }

    /// Country name for an address, or "Unknown"
    pub fn lookup_country(&self, ip: IpAddr) -> String {
        let GeoDatabase::Loaded(db) = &self.geo else {
            return UNKNOWN_COUNTRY.to_string();
        };

        let key = ip.to_string();
        if let Some(country) = self.countries.get(&key) {
            return country.clone();
        }

        let country = match db.country(ip) {
            Ok(Some(name)) if !name.is_empty() => name,
            Ok(_) => UNKNOWN_COUNTRY.to_string(),
            Err(e) => {
                log::trace!("Country lookup failed for {}: {:#}", key, e);
                UNKNOWN_COUNTRY.to_string()
            }
        };

        self.countries.insert(key, country.clone());
        country
    }

    /// Cached hostname for an address, or its numeric form
    ///
    /// Never blocks. A miss schedules a background reverse lookup whose result
    /// shows up on later calls.
    pub fn lookup_dns(&self, ip: IpAddr) -> String {
        let key = ip.to_string();
        if let Some(name) = self.hostnames.resolved.get(&key) {
            return name.clone();
        }

        let Some(resolver) = &self.resolver else {
            return key;
        };
        if self.closed.load(Ordering::Acquire) || self.hostnames.failed.contains(&key) {
            return key;
        }
        // Already scheduled
        if !self.hostnames.pending.insert(key.clone()) {
            return key;
        }

        let resolver = Arc::clone(resolver);
        let permits = Arc::clone(&self.permits);
        let marker = PendingLookup {
            cache: Arc::clone(&self.hostnames),
            address: key.clone(),
        };

        let mut tasks = self.tasks.lock();
        // Reap finished resolutions so the set only holds live work
        while tasks.try_join_next().is_some() {}
        tasks.spawn_on(
            async move {
                let PendingLookup { cache, address } = &marker;
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };

                let lookup = tokio::task::spawn_blocking(move || resolver.reverse(ip)).await;
                match lookup {
                    Ok(Ok(names)) => match names.into_iter().next() {
                        // getnameinfo echoes the numeric form when nothing resolves
                        Some(name) if !name.is_empty() && name != *address => {
                            log::trace!("Resolved {} -> {}", address, name);
                            cache.resolved.insert(address.clone(), name);
                        }
                        _ => {
                            cache.failed.insert(address.clone());
                        }
                    },
                    Ok(Err(e)) => {
                        log::trace!("Reverse lookup failed for {}: {:#}", address, e);
                        cache.failed.insert(address.clone());
                    }
                    Err(e) => {
                        log::trace!("Reverse lookup task for {} died: {}", address, e);
                        cache.failed.insert(address.clone());
                    }
                }
            },
            &self.runtime,
        );

        key
    }

    /// Number of resolutions scheduled or running
    pub fn pending_lookups(&self) -> usize {
        self.hostnames.pending.len()
    }

    /// Wait until no resolution is scheduled or running
    ///
    /// Cancel-safe: dropping the returned future leaves the outstanding
    /// resolutions running.
    pub async fn drain(&self) {
        loop {
            let idle = self.hostnames.idle.notified();
            tokio::pin!(idle);
            // Register before checking so a wakeup in between isn't lost
            idle.as_mut().enable();
            if self.hostnames.pending.is_empty() {
                return;
            }
            idle.await;
        }
    }

    /// Stop scheduling resolutions and abort the outstanding ones
    ///
    /// Blocking lookups already handed to the resolver run to completion in
    /// the background but their results are discarded.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.permits.close();
        self.tasks.lock().abort_all();
        log::debug!(
            "Enrichment shut down with {} cached hostnames, {} cached countries",
            self.hostnames.resolved.len(),
            self.countries.len()
        );
    }
}
