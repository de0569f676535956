use chrono::{DateTime, Utc};
use sysinfo::System;
use tracing::debug;

use crate::models::{ProcessRecord, ServiceRecord};
use crate::monitoring::{service_collector, Collected, SnapshotCollector};

/// Live host collector backed by `sysinfo`. The `System` handle is kept across
/// cycles so refreshes stay incremental.
pub struct SystemCollector {
    system: System,
}

impl SystemCollector {
    pub fn new() -> Self {
        let mut system = System::new_all();
        system.refresh_all();
        Self { system }
    }
}

impl Default for SystemCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCollector for SystemCollector {
    fn enumerate_processes(&mut self) -> Collected<ProcessRecord> {
        self.system.refresh_all();
        let captured_at = Utc::now();
        let mut collected = Collected::default();

        for (pid, process) in self.system.processes() {
            // Linux tasks are listed beside their process; they are not processes.
            if process.thread_kind().is_some() {
                continue;
            }
            let name = process.name().to_string_lossy();
            let exe = process.exe().map(|value| value.to_string_lossy());
            match to_record(
                pid.as_u32(),
                process.parent().map(|value| value.as_u32()),
                &name,
                exe.as_deref(),
                captured_at,
            ) {
                Some(record) => collected.items.push(record),
                None => {
                    debug!(component = "collector", pid = pid.as_u32(), "skipping process without a name");
                    collected.skipped += 1;
                }
            }
        }

        collected.items.sort_by_key(|record| record.pid);
        collected
    }

    fn enumerate_services(&mut self) -> Collected<ServiceRecord> {
        service_collector::collect_services()
    }
}

/// Normalizes one raw process entry. Nameless entries are dropped and a parent
/// of pid 0 is treated as no parent.
pub fn to_record(
    pid: u32,
    parent_pid: Option<u32>,
    name: &str,
    executable_path: Option<&str>,
    captured_at: DateTime<Utc>,
) -> Option<ProcessRecord> {
    if name.trim().is_empty() {
        return None;
    }
    let parent_pid = parent_pid.filter(|ppid| *ppid != 0);
    Some(ProcessRecord::new(pid, parent_pid, name, executable_path, captured_at))
}
