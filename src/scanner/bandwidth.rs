// /proc/net/dev aggregate counters

use super::{BandwidthSource, GlobalStats};
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

// Per-interface line layout after the two header lines:
//   iface: rx_bytes rx_packets rx_errs rx_drop rx_fifo rx_frame rx_compressed rx_multicast tx_bytes ...
const FIELD_RX_BYTES: usize = 1;
const FIELD_TX_BYTES: usize = 9;
const MIN_FIELDS: usize = 10;
const HEADER_LINES: usize = 2;

/// Raw byte totals summed over every interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Totals {
    rx: u64,
    tx: u64,
}

/// Samples /proc/net/dev and reports the change since the previous sample
///
/// Loopback is included in the totals.
pub struct BandwidthScanner {
    dev_path: PathBuf,
    previous: Option<Totals>,
}

impl BandwidthScanner {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            dev_path: proc_root.into().join("net").join("dev"),
            previous: None,
        }
    }

    fn read_totals(&self) -> Result<Totals> {
        let contents = fs::read_to_string(&self.dev_path)
            .with_context(|| format!("Failed to read device counters: {:?}", self.dev_path))?;

        Ok(sum_counters(&contents))
    }
}

impl BandwidthSource for BandwidthScanner {
    fn sample(&mut self) -> Result<GlobalStats> {
        let current = self.read_totals()?;

        let stats = match self.previous {
            Some(previous) => GlobalStats {
                download_rate: current.rx.saturating_sub(previous.rx),
                upload_rate: current.tx.saturating_sub(previous.tx),
            },
            // No baseline yet
            None => GlobalStats::default(),
        };

        self.previous = Some(current);
        Ok(stats)
    }
}

fn sum_counters(contents: &str) -> Totals {
    let mut totals = Totals::default();

    for line in contents.lines().skip(HEADER_LINES) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < MIN_FIELDS {
            continue;
        }

        // Counters are modular, like the kernel's own
        totals.rx = totals
            .rx
            .wrapping_add(fields[FIELD_RX_BYTES].parse::<u64>().unwrap_or(0));
        totals.tx = totals
            .tx
            .wrapping_add(fields[FIELD_TX_BYTES].parse::<u64>().unwrap_or(0));
    }

    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write_dev(root: &Path, lo: (u64, u64), eth: (u64, u64)) {
        let net = root.join("net");
        fs::create_dir_all(&net).unwrap();
        let contents = format!(
            "Inter-|   Receive                                                |  Transmit\n \
             face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n    \
             lo: {} 100 0 0 0 0 0 0 {} 100 0 0 0 0 0 0\n  \
             eth0: {} 200 0 0 0 0 0 0 {} 150 0 0 0 0 0 0\n",
            lo.0, lo.1, eth.0, eth.1
        );
        fs::write(net.join("dev"), contents).unwrap();
    }

    #[test]
    fn test_first_sample_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        write_dev(dir.path(), (5_000, 5_000), (1_000_000, 250_000));

        let mut scanner = BandwidthScanner::new(dir.path());
        assert_eq!(scanner.sample().unwrap(), GlobalStats::default());
    }

    #[test]
    fn test_second_sample_is_delta_including_loopback() {
        let dir = tempfile::tempdir().unwrap();
        write_dev(dir.path(), (5_000, 5_000), (1_000_000, 250_000));

        let mut scanner = BandwidthScanner::new(dir.path());
        scanner.sample().unwrap();

        write_dev(dir.path(), (5_300, 5_300), (1_004_000, 251_000));
        assert_eq!(
            scanner.sample().unwrap(),
            GlobalStats {
                download_rate: 4_300,
                upload_rate: 1_300,
            }
        );

        // Unchanged counters give zero
        assert_eq!(scanner.sample().unwrap(), GlobalStats::default());
    }

    #[test]
    fn test_counter_reset_saturates() {
        let dir = tempfile::tempdir().unwrap();
        write_dev(dir.path(), (0, 0), (9_000, 9_000));

        let mut scanner = BandwidthScanner::new(dir.path());
        scanner.sample().unwrap();

        write_dev(dir.path(), (0, 0), (10, 20));
        assert_eq!(scanner.sample().unwrap(), GlobalStats::default());
    }

    #[test]
    fn test_missing_file_keeps_baseline() {
        let dir = tempfile::tempdir().unwrap();
        write_dev(dir.path(), (0, 0), (100, 100));

        let mut scanner = BandwidthScanner::new(dir.path());
        scanner.sample().unwrap();

        let dev = dir.path().join("net").join("dev");
        fs::remove_file(&dev).unwrap();
        assert!(scanner.sample().is_err());

        write_dev(dir.path(), (0, 0), (150, 400));
        assert_eq!(
            scanner.sample().unwrap(),
            GlobalStats {
                download_rate: 50,
                upload_rate: 300,
            }
        );
    }

    #[test]
    fn test_short_lines_skipped() {
        let contents = "header\nheader\n  eth0: 10 1 0 0 0 0 0 0 20 1\n  bad: 1 2 3\n";
        assert_eq!(sum_counters(contents), Totals { rx: 10, tx: 20 });
    }

    #[test]
    fn test_huge_counters_wrap_instead_of_panicking() {
        let contents = format!(
            "header\nheader\n  lo: {max} 1 0 0 0 0 0 0 {max} 1\n  eth0: 2 1 0 0 0 0 0 0 5 1\n",
            max = u64::MAX
        );
        assert_eq!(sum_counters(&contents), Totals { rx: 1, tx: 4 });
    }
}
