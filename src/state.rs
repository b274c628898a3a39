// Latest snapshot of connections, socket owners and bandwidth

use crate::enrichment::EnrichmentService;
use crate::mapper::{ProcessIndex, ProcessSource, UNKNOWN_PROCESS};
use crate::scanner::{BandwidthSource, Connection, ConnectionSource, Family, GlobalStats};
use crate::traffic_scope::{TrafficScope, scope_of};
use chrono::{DateTime, Local};
use parking_lot::RwLock;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;

/// PID shown for sockets with no known owner
pub const UNKNOWN_PID: i32 = -1;

/// One table row: a connection joined with its owner and enrichment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowData {
    pub pid: i32,
    pub process_name: String,
    pub local_addr: String,
    pub remote_addr: String,
    pub remote_host: String,
    pub country: String,
    /// Raw kernel state code
    pub state: String,
    pub uid: u32,
    pub inode: String,
    pub scope: TrafficScope,
}

#[derive(Default)]
struct Snapshot {
    ipv4: Vec<Connection>,
    ipv6: Vec<Connection>,
    processes: ProcessIndex,
    stats: GlobalStats,
    last_refresh: Option<DateTime<Local>>,
}

/// Owns the latest scan results behind one reader/writer lock
///
/// `refresh` holds the write lock for its whole duration, so readers see either
/// the previous or the new snapshot. A failed sub-scan keeps its previous
/// result while the others still update.
pub struct CorrelationStore {
    snapshot: RwLock<Snapshot>,
    connections: Box<dyn ConnectionSource>,
    processes: Box<dyn ProcessSource>,
    enrichment: Arc<EnrichmentService>,
}

impl CorrelationStore {
    pub fn new(
        connections: Box<dyn ConnectionSource>,
        processes: Box<dyn ProcessSource>,
        enrichment: Arc<EnrichmentService>,
    ) -> Self {
        Self {
            snapshot: RwLock::new(Snapshot::default()),
            connections,
            processes,
            enrichment,
        }
    }

    pub fn enrichment(&self) -> &Arc<EnrichmentService> {
        &self.enrichment
    }

    /// Rescan everything and replace the held snapshot
    pub fn refresh<B: BandwidthSource + ?Sized>(&self, bandwidth: &mut B) {
        let mut snapshot = self.snapshot.write();

        match self.connections.scan(Family::Ipv4) {
            Ok(conns) => snapshot.ipv4 = conns,
            Err(e) => log::debug!("Keeping previous IPv4 connections: {:#}", e),
        }
        match self.connections.scan(Family::Ipv6) {
            Ok(conns) => snapshot.ipv6 = conns,
            Err(e) => log::debug!("Keeping previous IPv6 connections: {:#}", e),
        }
        match self.processes.socket_index() {
            Ok(index) => snapshot.processes = index,
            Err(e) => log::debug!("Keeping previous process index: {:#}", e),
        }
        match bandwidth.sample() {
            Ok(stats) => snapshot.stats = stats,
            Err(e) => log::debug!("Keeping previous bandwidth stats: {:#}", e),
        }

        snapshot.last_refresh = Some(Local::now());
        log::trace!(
            "Refreshed: {} IPv4 + {} IPv6 connections, {} socket owners",
            snapshot.ipv4.len(),
            snapshot.ipv6.len(),
            snapshot.processes.len()
        );
    }

    /// Project every stored connection into a row, in table order
    ///
    /// Enrichment runs under the read lock.
    pub fn table_rows(&self) -> Vec<RowData> {
        let snapshot = self.snapshot.read();

        snapshot
            .ipv4
            .iter()
            .chain(snapshot.ipv6.iter())
            .map(|conn| {
                let (pid, process_name) = match snapshot.processes.get(&conn.inode) {
                    Some(info) => (info.pid, info.name.clone()),
                    None => (UNKNOWN_PID, UNKNOWN_PROCESS.to_string()),
                };

                RowData {
                    pid,
                    process_name,
                    local_addr: SocketAddr::new(conn.local_addr, conn.local_port).to_string(),
                    remote_addr: SocketAddr::new(conn.remote_addr, conn.remote_port).to_string(),
                    remote_host: self.enrichment.lookup_dns(conn.remote_addr),
                    country: self.enrichment.lookup_country(conn.remote_addr),
                    state: conn.state.clone(),
                    uid: conn.uid,
                    inode: conn.inode.clone(),
                    scope: scope_of(&conn.remote_addr),
                }
            })
            .collect()
    }

    /// Bandwidth from the latest successful sample
    pub fn global_stats(&self) -> GlobalStats {
        self.snapshot.read().stats
    }

    pub fn last_refresh(&self) -> Option<DateTime<Local>> {
        self.snapshot.read().last_refresh
    }

    pub fn connection_count(&self) -> usize {
        let snapshot = self.snapshot.read();
        snapshot.ipv4.len() + snapshot.ipv6.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::{GeoDatabase, UNKNOWN_COUNTRY};
    use crate::mapper::ProcessInfo;
    use anyhow::Result;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
    use std::sync::Barrier;
    use std::thread;
    use std::time::{Duration, Instant};
    use tokio::runtime::Handle;

    fn conn(remote: IpAddr, inode: &str) -> Connection {
        Connection {
            local_addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            local_port: 51000,
            remote_addr: remote,
            remote_port: 443,
            state: "01".to_string(),
            inode: inode.to_string(),
            uid: 1000,
        }
    }

    /// Table contents that tests can swap out or break between refreshes
    #[derive(Default)]
    struct StubTables {
        ipv4: Mutex<Option<Vec<Connection>>>,
        ipv6: Mutex<Option<Vec<Connection>>>,
        delay: Duration,
    }

    impl ConnectionSource for Arc<StubTables> {
        fn scan(&self, family: Family) -> Result<Vec<Connection>> {
            thread::sleep(self.delay);
            let table = match family {
                Family::Ipv4 => self.ipv4.lock().clone(),
                Family::Ipv6 => self.ipv6.lock().clone(),
            };
            table.ok_or_else(|| anyhow::anyhow!("table unreadable"))
        }
    }

    struct StubProcesses(Mutex<Option<ProcessIndex>>);

    impl ProcessSource for Arc<StubProcesses> {
        fn socket_index(&self) -> Result<ProcessIndex> {
            self.0
                .lock()
                .clone()
                .ok_or_else(|| anyhow::anyhow!("permission denied"))
        }
    }

    struct StubBandwidth(Option<GlobalStats>);

    impl BandwidthSource for StubBandwidth {
        fn sample(&mut self) -> Result<GlobalStats> {
            self.0.ok_or_else(|| anyhow::anyhow!("no /proc/net/dev"))
        }
    }

    struct SlowCountry;

    impl crate::enrichment::CountryDatabase for SlowCountry {
        fn country(&self, _ip: IpAddr) -> Result<Option<String>> {
            thread::sleep(Duration::from_millis(200));
            Ok(Some("Atlantis".to_string()))
        }
    }

    fn index(entries: &[(&str, i32, &str)]) -> ProcessIndex {
        entries
            .iter()
            .map(|(inode, pid, name)| {
                (
                    inode.to_string(),
                    ProcessInfo {
                        pid: *pid,
                        name: name.to_string(),
                    },
                )
            })
            .collect::<HashMap<_, _>>()
    }

    fn store(
        tables: &Arc<StubTables>,
        processes: &Arc<StubProcesses>,
        geo: GeoDatabase,
    ) -> CorrelationStore {
        let enrichment = EnrichmentService::new(geo, None, Handle::current(), 4);
        CorrelationStore::new(
            Box::new(Arc::clone(tables)),
            Box::new(Arc::clone(processes)),
            Arc::new(enrichment),
        )
    }

    #[tokio::test]
    async fn test_rows_join_process_index() {
        let tables = Arc::new(StubTables::default());
        *tables.ipv4.lock() = Some(vec![
            conn("93.184.216.34".parse().unwrap(), "42"),
            conn("140.82.112.4".parse().unwrap(), "99"),
        ]);
        *tables.ipv6.lock() = Some(vec![conn(IpAddr::V6(Ipv6Addr::LOCALHOST), "7")]);
        let processes = Arc::new(StubProcesses(Mutex::new(Some(index(&[
            ("42", 321, "curl"),
            ("7", 55, "sshd"),
        ])))));

        let store = store(&tables, &processes, GeoDatabase::NotLoaded);
        store.refresh(&mut StubBandwidth(Some(GlobalStats::default())));

        let rows = store.table_rows();
        assert_eq!(rows.len(), 3);

        assert_eq!(rows[0].pid, 321);
        assert_eq!(rows[0].process_name, "curl");
        assert_eq!(rows[0].local_addr, "10.0.0.2:51000");
        assert_eq!(rows[0].remote_addr, "93.184.216.34:443");
        assert_eq!(rows[0].remote_host, "93.184.216.34");
        assert_eq!(rows[0].country, UNKNOWN_COUNTRY);
        assert_eq!(rows[0].scope, TrafficScope::Internet);

        assert_eq!(rows[1].pid, UNKNOWN_PID);
        assert_eq!(rows[1].process_name, "unknown");

        assert_eq!(rows[2].pid, 55);
        assert_eq!(rows[2].remote_addr, "[::1]:443");
        assert_eq!(rows[2].scope, TrafficScope::Local);
    }

    #[tokio::test]
    async fn test_failed_scans_keep_previous_values() {
        let tables = Arc::new(StubTables::default());
        *tables.ipv4.lock() = Some(vec![conn("1.1.1.1".parse().unwrap(), "1")]);
        *tables.ipv6.lock() = Some(vec![]);
        let processes = Arc::new(StubProcesses(Mutex::new(Some(index(&[("1", 10, "dig")])))));
        let store = store(&tables, &processes, GeoDatabase::NotLoaded);

        let stats = GlobalStats {
            download_rate: 100,
            upload_rate: 50,
        };
        store.refresh(&mut StubBandwidth(Some(stats)));
        let first_refresh = store.last_refresh().unwrap();

        // IPv4 table and process index break, IPv6 still updates
        *tables.ipv4.lock() = None;
        *tables.ipv6.lock() = Some(vec![conn("2606:4700::1111".parse().unwrap(), "2")]);
        *processes.0.lock() = None;
        store.refresh(&mut StubBandwidth(None));

        let rows = store.table_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].inode, "1");
        assert_eq!(rows[0].process_name, "dig");
        assert_eq!(rows[1].inode, "2");
        assert_eq!(rows[1].pid, UNKNOWN_PID);
        assert_eq!(store.global_stats(), stats);
        assert!(store.last_refresh().unwrap() >= first_refresh);
    }

    #[tokio::test]
    async fn test_refresh_replaces_wholesale() {
        let tables = Arc::new(StubTables::default());
        *tables.ipv4.lock() = Some(vec![
            conn("1.1.1.1".parse().unwrap(), "1"),
            conn("8.8.8.8".parse().unwrap(), "2"),
        ]);
        *tables.ipv6.lock() = Some(vec![]);
        let processes = Arc::new(StubProcesses(Mutex::new(Some(HashMap::new()))));
        let store = store(&tables, &processes, GeoDatabase::NotLoaded);

        store.refresh(&mut StubBandwidth(None));
        assert_eq!(store.connection_count(), 2);

        *tables.ipv4.lock() = Some(vec![conn("9.9.9.9".parse().unwrap(), "3")]);
        store.refresh(&mut StubBandwidth(None));

        let rows = store.table_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].remote_addr, "9.9.9.9:443");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_readers_do_not_block_each_other() {
        let tables = Arc::new(StubTables::default());
        *tables.ipv4.lock() = Some(vec![conn("203.0.113.9".parse().unwrap(), "1")]);
        *tables.ipv6.lock() = Some(vec![]);
        let processes = Arc::new(StubProcesses(Mutex::new(Some(HashMap::new()))));
        let store = Arc::new(store(
            &tables,
            &processes,
            GeoDatabase::from_backend(SlowCountry),
        ));
        store.refresh(&mut StubBandwidth(None));

        // Both readers miss the country cache and sit in the slow lookup together
        let barrier = Arc::new(Barrier::new(2));
        let start = Instant::now();
        let readers: Vec<_> = (0..2)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    store.table_rows()
                })
            })
            .collect();
        for reader in readers {
            let rows = reader.join().unwrap();
            assert_eq!(rows[0].country, "Atlantis");
        }

        assert!(start.elapsed() < Duration::from_millis(390));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_refresh_blocks_readers() {
        let tables = Arc::new(StubTables {
            delay: Duration::from_millis(150),
            ..Default::default()
        });
        *tables.ipv4.lock() = Some(vec![conn("1.1.1.1".parse().unwrap(), "1")]);
        *tables.ipv6.lock() = Some(vec![]);
        let processes = Arc::new(StubProcesses(Mutex::new(Some(HashMap::new()))));
        let store = Arc::new(store(&tables, &processes, GeoDatabase::NotLoaded));

        // Two delayed scans: the write lock is held for at least 300ms
        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.refresh(&mut StubBandwidth(None)))
        };
        thread::sleep(Duration::from_millis(50));

        let start = Instant::now();
        let rows = store.table_rows();
        let waited = start.elapsed();
        writer.join().unwrap();

        assert_eq!(rows.len(), 1);
        assert!(waited >= Duration::from_millis(200), "waited {:?}", waited);
    }
}
