use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

pub type ProcessId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessState {
    Created,
    SpawnPending,
    Spawned,
    Completed,
    Killed,
    Errored,
}

/// Messages handled by the task supervising a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Control {
    Cancel,
    CompletionDetected,
}

/// What a worker was started with. `env` is merged over the host's environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

pub(super) struct ProcessHandle {
    pub id: ProcessId,
    pub pid: Option<u32>,
    pub state: ProcessState,
    pub completion_detected: Arc<AtomicBool>,
    pub command_line: String,
    pub started_at_ms: u64,
    pub control: mpsc::UnboundedSender<Control>,
}

impl ProcessHandle {
    pub fn spawned(&self) -> bool {
        !matches!(self.state, ProcessState::Created | ProcessState::SpawnPending)
    }

    pub fn summary(&self) -> ProcessSummary {
        ProcessSummary {
            id: self.id.clone(),
            pid: self.pid,
            state: self.state,
            spawned: self.spawned(),
            completion_detected: self.completion_detected.load(Ordering::SeqCst),
            command_line: self.command_line.clone(),
            started_at_ms: self.started_at_ms,
        }
    }
}

/// Point-in-time view of a registered worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSummary {
    pub id: ProcessId,
    pub pid: Option<u32>,
    pub state: ProcessState,
    pub spawned: bool,
    pub completion_detected: bool,
    pub command_line: String,
    pub started_at_ms: u64,
}

#[derive(Clone, Default)]
pub(super) struct Registry(Arc<Mutex<HashMap<ProcessId, ProcessHandle>>>);

impl Registry {
    pub fn lock(&self) -> MutexGuard<'_, HashMap<ProcessId, ProcessHandle>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
