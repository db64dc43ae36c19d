//! Request handlers called by the UI bridge.
//!
//! Each handler runs inside an `ipc-handler` operation whose success mirrors the response, and
//! never fails: errors are turned into `{success: false, error}` responses.

use crate::config::HostConfig;
use crate::extraction::{ArchiveExtractor, ProgressSender};
use crate::prelude::*;
use crate::supervisor::{ProcessSupervisor, SPAWNED_LINE_PREFIX, WorkerSpec};
use crate::telemetry::{
    ErrorReporter, Metadata, OperationCategory, OperationId, OperationResult, OperationTracker,
};
use host_shared::bridge::{BridgeCommand, HandlerResponse, ResponsePayload};
use host_shared::events::{OutputEvent, OutputPayload, ProgressEvent, ProgressKind, ProgressStatus};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};

pub struct Handlers {
    extractor: ArchiveExtractor,
    supervisor: ProcessSupervisor,
    tracker: Arc<OperationTracker>,
    progress: ProgressSender,
}

/// Receiving ends of the channels the handlers publish events on.
pub struct HostEvents {
    pub progress: UnboundedReceiver<ProgressEvent>,
    pub output: UnboundedReceiver<OutputEvent>,
}

impl Handlers {
    /// Wire the extractor and the supervisor described by `config` to a fresh pair of event
    /// channels.
    pub fn build(
        config: &HostConfig,
        tracker: Arc<OperationTracker>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Result<(Self, HostEvents)> {
        let (progress_tx, progress) = mpsc::unbounded_channel();
        let (output_tx, output) = mpsc::unbounded_channel();
        let supervisor =
            ProcessSupervisor::new(config.worker.clone(), tracker.clone(), reporter, output_tx)
                .context("Failed to set up the worker supervisor")?;
        let extractor = ArchiveExtractor::new(config.extraction.clone(), tracker.clone());

        Ok((
            Self::new(extractor, supervisor, tracker, progress_tx),
            HostEvents { progress, output },
        ))
    }

    pub fn new(
        extractor: ArchiveExtractor,
        supervisor: ProcessSupervisor,
        tracker: Arc<OperationTracker>,
        progress: ProgressSender,
    ) -> Self {
        Self {
            extractor,
            supervisor,
            tracker,
            progress,
        }
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    fn start_span(&self, name: &str, metadata: Metadata) -> OperationId {
        self.tracker
            .start_operation(name, OperationCategory::IpcHandler, metadata)
    }

    fn end_span(&self, span: &OperationId, response: &HandlerResponse) {
        let result = match &response.error {
            Some(error) => OperationResult::failure(error),
            None => OperationResult::from_success(response.success),
        };
        self.tracker.end_operation(span, result);
    }

    pub async fn handle(&self, command: BridgeCommand) -> HandlerResponse {
        match command {
            BridgeCommand::ExtractArchive { path, output_path } => {
                self.extract_archive(&path, output_path.as_deref()).await
            }
            BridgeCommand::ExecuteWorker {
                command,
                args,
                env,
                cwd,
            } => self.execute_worker(command, args, env, cwd),
            BridgeCommand::CancelWorker { process_id } => self.cancel_worker(&process_id),
            BridgeCommand::TelemetrySummary { category } => {
                self.telemetry_summary(category.as_deref())
            }
            BridgeCommand::Shutdown => {
                let killed = self.supervisor.shutdown();
                debug!("Shutdown requested, {killed} workers killed");
                HandlerResponse::ok(ResponsePayload::Empty {})
            }
        }
    }

    pub async fn extract_archive(&self, path: &Path, output_path: Option<&Path>) -> HandlerResponse {
        let span = self.start_span(
            "extract-archive",
            Metadata::from([("archive".to_owned(), path.to_string_lossy().as_ref().into())]),
        );

        let response = match self
            .extractor
            .extract(path, output_path, &self.progress, Some(&span))
            .await
        {
            Ok(outcome) => {
                let warning = outcome.warning().map(str::to_owned);
                let structure = outcome.into_value();
                HandlerResponse::ok(ResponsePayload::Extraction {
                    output_folder: structure.working_folder,
                    anchor_found: structure.anchor_found,
                    warning,
                })
            }
            Err(e) => HandlerResponse::failure(e.to_string()),
        };

        self.end_span(&span, &response);
        response
    }

    pub fn execute_worker(
        &self,
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
        cwd: Option<PathBuf>,
    ) -> HandlerResponse {
        let span = self.start_span(
            "execute-worker",
            Metadata::from([("command".to_owned(), command.clone().into())]),
        );

        let process_id = self.supervisor.spawn(WorkerSpec {
            program: command,
            args,
            env,
            cwd,
        });
        let _ = self.progress.send(
            ProgressEvent::new(
                ProgressKind::Migration,
                ProgressStatus::Starting,
                "Starting the migration",
            )
            .with_process_id(&process_id),
        );

        let response = HandlerResponse::ok(ResponsePayload::Worker { process_id });
        self.end_span(&span, &response);
        response
    }

    pub fn cancel_worker(&self, process_id: &str) -> HandlerResponse {
        let span = self.start_span(
            "cancel-worker",
            Metadata::from([("processId".to_owned(), process_id.into())]),
        );

        let response = if self.supervisor.cancel(process_id) {
            HandlerResponse::ok(ResponsePayload::Cancel { cancelled: true })
        } else {
            HandlerResponse::failure(format!("No running worker with id {process_id}"))
        };

        self.end_span(&span, &response);
        response
    }

    pub fn telemetry_summary(&self, category: Option<&str>) -> HandlerResponse {
        let span = self.start_span("telemetry-summary", Metadata::new());

        let response = match category.map(str::parse::<OperationCategory>).transpose() {
            Ok(category) => HandlerResponse::ok(ResponsePayload::Summary {
                summary: self.tracker.get_summary(category),
            }),
            Err(e) => HandlerResponse::failure(e.to_string()),
        };

        self.end_span(&span, &response);
        response
    }
}

/// Mirror the start and end of a worker onto the migration progress channel.
pub fn migration_progress(event: &OutputEvent) -> Option<ProgressEvent> {
    let progress = match &event.payload {
        OutputPayload::Stdout { data } if data.starts_with(SPAWNED_LINE_PREFIX) => {
            ProgressEvent::new(
                ProgressKind::Migration,
                ProgressStatus::Progress,
                "Migration worker started",
            )
        }
        OutputPayload::Exit {
            code,
            completion_detected,
        } => {
            if *completion_detected || *code == Some(0) {
                ProgressEvent::new(
                    ProgressKind::Migration,
                    ProgressStatus::Complete,
                    "Migration complete",
                )
                .with_percentage(100.0)
            } else {
                let code = code.map_or_else(|| "none".to_owned(), |code| code.to_string());
                ProgressEvent::new(
                    ProgressKind::Migration,
                    ProgressStatus::Error,
                    format!("Migration worker exited with code {code}"),
                )
            }
        }
        OutputPayload::Error { data } => {
            ProgressEvent::new(ProgressKind::Migration, ProgressStatus::Error, data.clone())
        }
        OutputPayload::Stdout { .. } | OutputPayload::Stderr { .. } => return None,
    };
    Some(progress.with_process_id(&event.process_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::NoopErrorReporter;
    use std::io::Write;

    struct Harness {
        handlers: Handlers,
        progress: UnboundedReceiver<ProgressEvent>,
        _output: UnboundedReceiver<OutputEvent>,
        tracker: Arc<OperationTracker>,
    }

    fn harness() -> Harness {
        let tracker = Arc::new(OperationTracker::new(Arc::new(NoopErrorReporter)));
        let (handlers, events) = Handlers::build(
            &HostConfig::default(),
            tracker.clone(),
            Arc::new(NoopErrorReporter),
        )
        .unwrap();
        Harness {
            handlers,
            progress: events.progress,
            _output: events.output,
            tracker,
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_extract_archive_success() {
        let mut harness = harness();
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("valid.zip");
        let mut zip = zip::ZipWriter::new(std::fs::File::create(&archive).unwrap());
        zip.start_file(
            "root/a/your_instagram_activity/media/posts_1.json",
            zip::write::SimpleFileOptions::default(),
        )
        .unwrap();
        zip.write_all(b"[]").unwrap();
        zip.finish().unwrap();

        let output = dir.path().join("out");
        let response = harness
            .handlers
            .handle(BridgeCommand::ExtractArchive {
                path: archive,
                output_path: Some(output.clone()),
            })
            .await;

        assert_eq!(
            response,
            HandlerResponse::ok(ResponsePayload::Extraction {
                output_folder: output.join("root/a"),
                anchor_found: true,
                warning: None,
            })
        );
        let mut last = None;
        while let Ok(event) = harness.progress.try_recv() {
            assert_eq!(event.kind, ProgressKind::Extraction);
            last = Some(event.status);
        }
        assert_eq!(last, Some(ProgressStatus::Complete));

        let summary = harness
            .tracker
            .get_summary(Some(OperationCategory::IpcHandler));
        assert_eq!(summary.count, 3);
    }

    #[test_log::test(tokio::test)]
    async fn test_extract_archive_failure_shape() {
        let harness = harness();
        let response = harness
            .handlers
            .extract_archive(Path::new("/nonexistent/export.zip"), None)
            .await;

        assert_eq!(
            response,
            HandlerResponse::failure("Archive not found: /nonexistent/export.zip")
        );
    }

    #[cfg(unix)]
    #[test_log::test(tokio::test)]
    async fn test_execute_worker_emits_starting_event() {
        let mut harness = harness();
        let response = harness.handlers.execute_worker(
            "/bin/sh".into(),
            vec!["-c".into(), "exit 0".into()],
            BTreeMap::new(),
            None,
        );

        let ResponsePayload::Worker { process_id } = &response.payload else {
            panic!("unexpected response {response:?}");
        };
        assert!(response.success);
        let event = harness.progress.try_recv().unwrap();
        assert_eq!(event.kind, ProgressKind::Migration);
        assert_eq!(event.status, ProgressStatus::Starting);
        assert_eq!(event.process_id.as_ref(), Some(process_id));
    }

    #[test_log::test(tokio::test)]
    async fn test_cancel_unknown_worker_is_a_failure() {
        let harness = harness();
        let response = harness.handlers.cancel_worker("worker-9-0");
        assert!(!response.success);
        assert_eq!(
            response.error.as_deref(),
            Some("No running worker with id worker-9-0")
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_telemetry_summary() {
        let harness = harness();
        harness.handlers.cancel_worker("worker-9-0");

        let response = harness.handlers.telemetry_summary(Some("ipc-handler"));
        let ResponsePayload::Summary { summary } = response.payload else {
            panic!("unexpected response");
        };
        assert_eq!(summary.count, 1);

        let response = harness.handlers.telemetry_summary(Some("gpu"));
        assert_eq!(
            response.error.as_deref(),
            Some("Unknown operation category: gpu")
        );
    }

    #[test]
    fn test_migration_progress_mapping() {
        let spawned = OutputEvent::stdout(
            "worker-1",
            "[supervisor] Worker process spawned with PID 42\n",
        );
        let started = migration_progress(&spawned).unwrap();
        assert_eq!(started.status, ProgressStatus::Progress);
        assert_eq!(started.process_id.as_deref(), Some("worker-1"));

        assert_eq!(migration_progress(&OutputEvent::stdout("worker-1", "hello\n")), None);

        let done = migration_progress(&OutputEvent::exit("worker-1", None, true)).unwrap();
        assert_eq!(done.status, ProgressStatus::Complete);

        let failed = migration_progress(&OutputEvent::exit("worker-1", Some(2), false)).unwrap();
        assert_eq!(failed.status, ProgressStatus::Error);
        assert_eq!(failed.message, "Migration worker exited with code 2");
    }
}
