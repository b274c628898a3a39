// Socket inode -> owning process index, built from /proc/<pid>/fd

use anyhow::{Context, Result};
use procfs::process::{FDTarget, all_processes_with_root};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Name used when /proc/<pid>/comm can't be read
pub const UNKNOWN_PROCESS: &str = "unknown";

/// Process owning a socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub pid: i32,
    pub name: String,
}

/// Socket inode (as printed in the TCP tables) -> owning process
pub type ProcessIndex = HashMap<String, ProcessInfo>;

/// Source of the socket ownership index
pub trait ProcessSource: Send + Sync {
    fn socket_index(&self) -> Result<ProcessIndex>;
}

/// Walks every process under a proc root and records its socket fds
///
/// Processes whose fd directory can't be listed (usually permissions) are
/// silently left out. When two processes hold the same inode the one
/// enumerated last wins.
pub struct ProcessInodeMapper {
    proc_root: PathBuf,
}

impl ProcessInodeMapper {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    fn process_name(&self, pid: i32) -> String {
        fs::read_to_string(self.proc_root.join(pid.to_string()).join("comm"))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| UNKNOWN_PROCESS.to_string())
    }
}

impl ProcessSource for ProcessInodeMapper {
    fn socket_index(&self) -> Result<ProcessIndex> {
        let mut index = HashMap::new();

        let processes = all_processes_with_root(&self.proc_root)
            .with_context(|| format!("Failed to list processes in {:?}", self.proc_root))?;

        for process in processes {
            // Non-directories and vanished processes
            let Ok(process) = process else { continue };
            let pid = process.pid();
            if pid <= 0 {
                continue;
            }

            let name = self.process_name(pid);

            let fds = match process.fd() {
                Ok(fds) => fds,
                Err(e) => {
                    log::trace!("Skipping PID {} ({}): {}", pid, name, e);
                    continue;
                }
            };

            for fd in fds.flatten() {
                if let FDTarget::Socket(inode) = fd.target {
                    index.insert(
                        inode.to_string(),
                        ProcessInfo {
                            pid,
                            name: name.clone(),
                        },
                    );
                }
            }
        }

        Ok(index)
    }
}
