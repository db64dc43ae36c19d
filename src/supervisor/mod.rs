//! Supervision of the migration worker processes.
//!
//! Every worker gets a [`ProcessId`] immediately; spawning, output streaming, completion detection
//! and termination happen on background tasks that report through an [`OutputSender`].

mod command;
mod completion;
mod env;
mod handle;
mod output;
mod resolve;

#[cfg(test)]
mod tests;

pub use command::CommandBuilder;
pub use completion::{CompletionDetector, LiteralMarker, RegexMarker, build_detector};
pub use env::{HOST_VERSION_ENV, PROCESS_ID_ENV};
pub use handle::{ProcessId, ProcessState, ProcessSummary, WorkerSpec};
pub use output::OutputSender;
pub use resolve::{resolve_command, resolve_program};

use crate::config::WorkerConfig;
use crate::helpers::{compute_app_root, format_duration};
use crate::prelude::*;
use crate::telemetry::{
    ErrorReport, ErrorReporter, Metadata, OperationCategory, OperationId, OperationResult,
    OperationTracker, unix_millis,
};
use handle::{Control, ProcessHandle, Registry};
use host_shared::events::OutputEvent;
use output::{CompletionScan, StreamKind};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::ExitStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Sleep;

/// How long the output of an exited worker may take to be fully forwarded.
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const SPAWN_FAILURE_MESSAGE: &str = "Worker process failed to start";
/// Start of the diagnostic stdout line sent once the worker process is running.
pub const SPAWNED_LINE_PREFIX: &str = "[supervisor] Worker process spawned";

/// Collected at spawn time, reported if the worker never starts.
struct SpawnDiagnostics {
    resolved_path: PathBuf,
    cwd: Option<PathBuf>,
    path_variables: BTreeMap<String, String>,
}

struct Launch {
    id: ProcessId,
    command: Result<CommandBuilder>,
    control_tx: mpsc::UnboundedSender<Control>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    completion_detected: Arc<AtomicBool>,
    operation: OperationId,
}

enum WorkerExit {
    Exited(std::io::Result<ExitStatus>),
    Cancelled(Option<ExitStatus>),
    GraceKilled(Option<ExitStatus>),
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!("Failed to kill process group {pid}: {e}");
    }
}

/// Hard kill of the worker and everything it started, then reap it.
async fn kill_worker(child: &mut Child) -> Option<ExitStatus> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        kill_process_group(pid);
    }
    if let Err(e) = child.start_kill() {
        debug!("Failed to kill the worker: {e}");
    }
    child.wait().await.ok()
}

async fn grace_elapsed(grace: &mut Option<Pin<Box<Sleep>>>) {
    match grace {
        Some(sleep) => sleep.await,
        None => std::future::pending().await,
    }
}

#[derive(Clone)]
pub struct ProcessSupervisor {
    registry: Registry,
    settings: Arc<WorkerConfig>,
    app_root: Arc<PathBuf>,
    detector: Arc<dyn CompletionDetector>,
    tracker: Arc<OperationTracker>,
    reporter: Arc<dyn ErrorReporter>,
    output: OutputSender,
    counter: Arc<AtomicU64>,
}

impl ProcessSupervisor {
    pub fn new(
        settings: WorkerConfig,
        tracker: Arc<OperationTracker>,
        reporter: Arc<dyn ErrorReporter>,
        output: OutputSender,
    ) -> Result<Self> {
        let detector = build_detector(&settings)?;
        let app_root = compute_app_root(settings.app_root.as_deref());
        debug!("Worker application root: {}", app_root.display());

        Ok(Self {
            registry: Registry::default(),
            settings: Arc::new(settings),
            app_root: Arc::new(app_root),
            detector,
            tracker,
            reporter,
            output,
            counter: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn with_detector(mut self, detector: Arc<dyn CompletionDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn app_root(&self) -> &Path {
        &self.app_root
    }

    fn next_id(&self) -> ProcessId {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("worker-{counter}-{}", unix_millis())
    }

    /// Start a worker. Returns at once: the outcome of the spawn is reported on the output channel.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(&self, spec: WorkerSpec) -> ProcessId {
        let id = self.next_id();
        let app_root = self.app_root.as_path();
        let cwd = spec.cwd.as_ref().map(|cwd| app_root.join(cwd));
        let path_variables =
            env::resolve_path_like_vars(&spec.env, app_root, &self.settings.path_variables);

        let command = resolve::resolve_command(&spec.program, &spec.args, &self.settings, app_root)
            .map(|mut builder| {
                let injected = env::get_base_injected_env(&id);
                builder.envs(env::merge_env(
                    std::env::vars_os(),
                    &injected,
                    &spec.env,
                    &path_variables,
                ));
                if let Some(cwd) = &cwd {
                    builder.current_dir(cwd);
                }
                builder
            });
        let command_line = match &command {
            Ok(builder) => builder.as_command_line(),
            Err(_) => spec.program.clone(),
        };
        let diagnostics = SpawnDiagnostics {
            resolved_path: command
                .as_ref()
                .map(|builder| PathBuf::from(builder.get_program()))
                .unwrap_or_default(),
            cwd,
            path_variables,
        };

        let operation = self.tracker.start_operation(
            "worker-process",
            OperationCategory::Operation,
            Metadata::from([
                ("processId".to_owned(), id.clone().into()),
                ("command".to_owned(), command_line.clone().into()),
            ]),
        );
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let completion_detected = Arc::new(AtomicBool::new(false));
        self.register(ProcessHandle {
            id: id.clone(),
            pid: None,
            state: ProcessState::Created,
            completion_detected: completion_detected.clone(),
            command_line,
            started_at_ms: unix_millis(),
            control: control_tx.clone(),
        });

        self.set_state(&id, ProcessState::SpawnPending);
        let watchdog = tokio::spawn(self.clone().watchdog(id.clone(), diagnostics));
        tokio::spawn(self.clone().supervise(
            Launch {
                id: id.clone(),
                command,
                control_tx,
                control_rx,
                completion_detected,
                operation,
            },
            watchdog.abort_handle(),
        ));

        id
    }

    fn register(&self, handle: ProcessHandle) {
        info!("Starting worker {}: {}", handle.id, handle.command_line);
        self.registry.lock().insert(handle.id.clone(), handle);
    }

    fn set_state(&self, id: &str, state: ProcessState) {
        if let Some(handle) = self.registry.lock().get_mut(id) {
            handle.state = state;
        }
    }

    /// Hard kill a worker. Returns `false` when no such worker is registered.
    pub fn cancel(&self, id: &str) -> bool {
        let Some(handle) = self.registry.lock().remove(id) else {
            debug!("No worker {id} to cancel");
            return false;
        };
        info!("Cancelling worker {id}");
        #[cfg(unix)]
        if let Some(pid) = handle.pid {
            kill_process_group(pid);
        }
        let _ = handle.control.send(Control::Cancel);
        true
    }

    /// Kill every registered worker. Returns how many were killed.
    pub fn shutdown(&self) -> usize {
        let ids = self.registry.lock().keys().cloned().collect::<Vec<_>>();
        ids.iter().filter(|id| self.cancel(id)).count()
    }

    pub fn list(&self) -> Vec<ProcessSummary> {
        self.registry
            .lock()
            .values()
            .map(ProcessHandle::summary)
            .sorted_by(|a, b| (a.started_at_ms, &a.id).cmp(&(b.started_at_ms, &b.id)))
            .collect()
    }

    async fn watchdog(self, id: ProcessId, diagnostics: SpawnDiagnostics) {
        tokio::time::sleep(self.settings.spawn_timeout()).await;

        let pending = self
            .registry
            .lock()
            .get(&id)
            .is_some_and(|handle| !handle.spawned());
        if !pending {
            return;
        }

        warn!(
            "Worker {id} did not start within {}",
            format_duration(self.settings.spawn_timeout(), None)
        );
        self.reporter.report(
            ErrorReport::error(SPAWN_FAILURE_MESSAGE)
                .tag("component", "supervisor")
                .extra("processId", id.as_str())
                .extra(
                    "resolvedPath",
                    diagnostics.resolved_path.to_string_lossy().into_owned(),
                )
                .extra("exists", diagnostics.resolved_path.exists())
                .extra(
                    "cwd",
                    diagnostics
                        .cwd
                        .map(|cwd| cwd.to_string_lossy().into_owned()),
                )
                .extra(
                    "pathVariables",
                    serde_json::to_value(&diagnostics.path_variables).unwrap_or_default(),
                ),
        );
        let _ = self.output.send(OutputEvent::error(&id, SPAWN_FAILURE_MESSAGE));
    }

    fn fail_spawn(&self, id: &ProcessId, operation: &OperationId, error: &Error) {
        self.registry.lock().remove(id);
        let message = format!("{error:#}");
        error!("Worker {id} failed to start: {message}");
        let _ = self.output.send(OutputEvent::error(id, &message));
        self.tracker
            .end_operation(operation, OperationResult::failure(&message));
    }

    async fn supervise(self, launch: Launch, watchdog: AbortHandle) {
        let Launch {
            id,
            command,
            control_tx,
            mut control_rx,
            completion_detected,
            operation,
        } = launch;

        let spawned = command.and_then(|builder| {
            debug!("Spawning worker {id}: {}", builder.as_command_line());
            builder
                .build()
                .spawn()
                .context("Failed to spawn the worker process")
        });
        watchdog.abort();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => return self.fail_spawn(&id, &operation, &e),
        };

        let pid = child.id();
        if let Some(handle) = self.registry.lock().get_mut(&id) {
            handle.pid = pid;
            handle.state = ProcessState::Spawned;
        }
        let pid = pid.map(|pid| pid.to_string()).unwrap_or_else(|| "unknown".into());
        info!("Worker {id} spawned with PID {pid}");
        let _ = self.output.send(OutputEvent::stdout(
            &id,
            format!("{SPAWNED_LINE_PREFIX} with PID {pid}\n"),
        ));

        let mut pumps = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            let scan = CompletionScan::new(
                self.detector.clone(),
                completion_detected.clone(),
                control_tx.clone(),
            );
            pumps.push(tokio::spawn(output::pump(
                stdout,
                StreamKind::Stdout,
                id.clone(),
                self.output.clone(),
                Some(scan),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(output::pump(
                stderr,
                StreamKind::Stderr,
                id.clone(),
                self.output.clone(),
                None,
            )));
        }

        let mut grace: Option<Pin<Box<Sleep>>> = None;
        let exit = loop {
            tokio::select! {
                status = child.wait() => break WorkerExit::Exited(status),
                Some(control) = control_rx.recv() => match control {
                    Control::Cancel => break WorkerExit::Cancelled(kill_worker(&mut child).await),
                    Control::CompletionDetected => {
                        if grace.is_none() {
                            info!(
                                "Worker {id} reported completion, killing it in {} unless it exits",
                                format_duration(self.settings.grace_period(), None)
                            );
                            grace = Some(Box::pin(tokio::time::sleep(self.settings.grace_period())));
                        }
                    }
                },
                () = grace_elapsed(&mut grace) => {
                    warn!("Worker {id} did not exit after completion, killing it");
                    break WorkerExit::GraceKilled(kill_worker(&mut child).await);
                }
            }
        };

        // Once exited the worker can no longer be cancelled
        self.registry.lock().remove(&id);
        // A cancellation racing with a natural exit still counts as a kill
        let cancelled = std::iter::from_fn(|| control_rx.try_recv().ok())
            .any(|control| control == Control::Cancel);

        let aborts = pumps.iter().map(|pump| pump.abort_handle()).collect::<Vec<_>>();
        match tokio::time::timeout(PUMP_DRAIN_TIMEOUT, futures::future::join_all(pumps)).await {
            Ok(results) => {
                for result in results {
                    if let Ok(Err(e)) = result {
                        debug!("Failed to read the output of worker {id}: {e}");
                    }
                }
            }
            Err(_) => {
                debug!("Output of worker {id} was still open after it exited");
                aborts.iter().for_each(AbortHandle::abort);
            }
        }
        let (code, state) = match exit {
            WorkerExit::Exited(Ok(status)) if cancelled => (status.code(), ProcessState::Killed),
            WorkerExit::Exited(Ok(status)) => (status.code(), ProcessState::Completed),
            WorkerExit::Exited(Err(e)) => {
                warn!("Failed to wait for worker {id}: {e}");
                (None, ProcessState::Errored)
            }
            WorkerExit::Cancelled(status) | WorkerExit::GraceKilled(status) => {
                (status.and_then(|status| status.code()), ProcessState::Killed)
            }
        };
        let completion_detected = completion_detected.load(Ordering::SeqCst);
        if !completion_detected {
            warn!("Worker {id} exited without reporting completion");
        }
        info!("Worker {id} ended ({state:?}) with exit code {code:?}");
        let _ = self
            .output
            .send(OutputEvent::exit(&id, code, completion_detected));

        let success = completion_detected || code == Some(0);
        let mut result = OperationResult::from_success(success)
            .with("completionDetected", completion_detected)
            .with("exitCode", code);
        if !success {
            result.error = Some(match state {
                ProcessState::Killed => "Worker process was cancelled".to_owned(),
                _ => format!("Worker process exited with code {code:?}"),
            });
        }
        self.tracker.end_operation(&operation, result);
    }
}
