use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Resource usage of the host process at one instant. Never mutated once captured.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSnapshot {
    /// Wall clock, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    #[serde(skip)]
    pub instant: Instant,
    pub resident_bytes: u64,
    pub virtual_bytes: u64,
    pub disk_read_bytes: u64,
    pub disk_written_bytes: u64,
    pub uptime: Duration,
}

impl ResourceSnapshot {
    /// Time elapsed between `self` and a later snapshot. Never negative.
    pub fn duration_until(&self, later: &ResourceSnapshot) -> Duration {
        later.instant.saturating_duration_since(self.instant)
    }
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Captures [`ResourceSnapshot`]s of the current process.
pub struct ResourceRecorder {
    system: Mutex<System>,
    pid: Option<Pid>,
    started: Instant,
}

impl Default for ResourceRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceRecorder {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| log::debug!("Could not determine the current pid: {e}"))
            .ok();
        Self {
            system: Mutex::new(System::new()),
            pid,
            started: Instant::now(),
        }
    }

    /// Never fails: fields the OS refuses to report are left at zero.
    pub fn snapshot(&self) -> ResourceSnapshot {
        let mut snapshot = ResourceSnapshot {
            timestamp_ms: unix_millis(),
            instant: Instant::now(),
            resident_bytes: 0,
            virtual_bytes: 0,
            disk_read_bytes: 0,
            disk_written_bytes: 0,
            uptime: self.started.elapsed(),
        };

        let (Some(pid), Ok(mut system)) = (self.pid, self.system.lock()) else {
            return snapshot;
        };
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory().with_disk_usage(),
        );
        if let Some(process) = system.process(pid) {
            let disk_usage = process.disk_usage();
            snapshot.resident_bytes = process.memory();
            snapshot.virtual_bytes = process.virtual_memory();
            snapshot.disk_read_bytes = disk_usage.total_read_bytes;
            snapshot.disk_written_bytes = disk_usage.total_written_bytes;
        }
        snapshot
    }
}
