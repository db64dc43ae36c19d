#![cfg(unix)]

use super::*;
use crate::telemetry::error_reporter::test_utils::RecordingErrorReporter;
use crate::telemetry::NoopErrorReporter;
use host_shared::events::OutputPayload;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedReceiver;

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

struct Harness {
    supervisor: ProcessSupervisor,
    output: UnboundedReceiver<OutputEvent>,
    tracker: Arc<OperationTracker>,
}

fn harness(settings: WorkerConfig) -> Harness {
    let tracker = Arc::new(OperationTracker::new(Arc::new(NoopErrorReporter)));
    let (tx, output) = mpsc::unbounded_channel();
    let supervisor =
        ProcessSupervisor::new(settings, tracker.clone(), Arc::new(NoopErrorReporter), tx).unwrap();
    Harness {
        supervisor,
        output,
        tracker,
    }
}

fn test_settings() -> WorkerConfig {
    WorkerConfig {
        app_root: Some("/opt/app".into()),
        grace_period_ms: 200,
        ..Default::default()
    }
}

fn sh(script: &str) -> WorkerSpec {
    WorkerSpec {
        program: "/bin/sh".into(),
        args: vec!["-c".into(), script.into()],
        env: BTreeMap::from([("PATH".into(), "/usr/bin:/bin".into())]),
        cwd: None,
    }
}

/// Receive events until `stop` matches one of them, which is included.
async fn recv_until(
    output: &mut UnboundedReceiver<OutputEvent>,
    mut stop: impl FnMut(&OutputEvent) -> bool,
) -> Vec<OutputEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(EVENT_TIMEOUT, output.recv())
            .await
            .expect("timed out waiting for worker output")
            .expect("output channel closed");
        let done = stop(&event);
        events.push(event);
        if done {
            return events;
        }
    }
}

async fn run_to_end(harness: &mut Harness, id: &str) -> Vec<OutputEvent> {
    let id = id.to_owned();
    recv_until(&mut harness.output, |event| {
        event.process_id == id && event.is_terminal()
    })
    .await
}

fn stdout_of(events: &[OutputEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match &event.payload {
            OutputPayload::Stdout { data } if !data.starts_with("[supervisor]") => {
                Some(data.as_str())
            }
            _ => None,
        })
        .collect()
}

fn is_spawned_line(event: &OutputEvent) -> bool {
    matches!(&event.payload, OutputPayload::Stdout { data } if data.starts_with("[supervisor] Worker process spawned with PID"))
}

#[test_log::test(tokio::test)]
async fn test_output_and_exit_code() {
    let mut harness = harness(test_settings());
    let id = harness
        .supervisor
        .spawn(sh("echo hello; echo oops >&2; exit 3"));
    assert!(id.starts_with("worker-1-"));

    let events = run_to_end(&mut harness, &id).await;
    assert!(is_spawned_line(&events[0]));
    assert_eq!(stdout_of(&events), "hello\n");
    assert!(events.contains(&OutputEvent::stderr(&id, "oops\n")));
    assert_eq!(events.last(), Some(&OutputEvent::exit(&id, Some(3), false)));
    assert!(harness.supervisor.list().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_worker_operation_is_tracked() {
    let mut harness = harness(test_settings());
    let ok = harness.supervisor.spawn(sh("exit 0"));
    run_to_end(&mut harness, &ok).await;
    let ko = harness.supervisor.spawn(sh("exit 1"));
    run_to_end(&mut harness, &ko).await;

    let summary = harness
        .tracker
        .get_summary(Some(OperationCategory::Operation));
    assert_eq!(summary.count, 2);
}

#[test_log::test(tokio::test)]
async fn test_completion_marker_then_grace_kill() {
    let mut harness = harness(test_settings());
    let started = Instant::now();
    let id = harness
        .supervisor
        .spawn(sh("echo 'Migrated 12 posts'; echo MIGRATION_COMPLETE; sleep 30"));

    let events = run_to_end(&mut harness, &id).await;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(events.last(), Some(&OutputEvent::exit(&id, None, true)));
    assert!(stdout_of(&events).contains("MIGRATION_COMPLETE"));
}

#[test_log::test(tokio::test)]
async fn test_completion_marker_with_clean_exit() {
    let mut harness = harness(test_settings());
    let id = harness.supervisor.spawn(sh("echo MIGRATION_COMPLETE"));

    let events = run_to_end(&mut harness, &id).await;
    assert_eq!(events.last(), Some(&OutputEvent::exit(&id, Some(0), true)));
}

#[test_log::test(tokio::test)]
async fn test_regex_detector() {
    let mut harness = harness(test_settings());
    harness.supervisor = harness
        .supervisor
        .clone()
        .with_detector(Arc::new(RegexMarker::new(r"Migrated \d+ posts").unwrap()));
    let id = harness.supervisor.spawn(sh("echo 'Migrated 12 posts'; exit 1"));

    let events = run_to_end(&mut harness, &id).await;
    assert_eq!(events.last(), Some(&OutputEvent::exit(&id, Some(1), true)));
}

#[test_log::test(tokio::test)]
async fn test_cancel_unknown_worker() {
    let harness = harness(test_settings());
    assert!(!harness.supervisor.cancel("worker-42-0"));
}

#[test_log::test(tokio::test)]
async fn test_cancel_only_affects_target() {
    let mut harness = harness(test_settings());
    let first = harness.supervisor.spawn(sh("sleep 30"));
    let second = harness.supervisor.spawn(sh("sleep 30"));
    let mut spawned = 0;
    recv_until(&mut harness.output, |event| {
        if is_spawned_line(event) {
            spawned += 1;
        }
        spawned == 2
    })
    .await;

    assert!(harness.supervisor.cancel(&first));
    assert!(!harness.supervisor.cancel(&first));
    let events = run_to_end(&mut harness, &first).await;
    assert_eq!(events.last(), Some(&OutputEvent::exit(&first, None, false)));

    let remaining = harness.supervisor.list();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, second);
    assert_eq!(remaining[0].state, ProcessState::Spawned);
    assert!(remaining[0].spawned);
    assert!(remaining[0].pid.is_some());

    assert_eq!(harness.supervisor.shutdown(), 1);
    let events = run_to_end(&mut harness, &second).await;
    assert_eq!(events.last(), Some(&OutputEvent::exit(&second, None, false)));
    assert!(harness.supervisor.list().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_cancel_after_exit_is_a_noop() {
    let mut harness = harness(test_settings());
    // The background sleep keeps stdout open after the shell exits
    let id = harness.supervisor.spawn(sh("sleep 3 & echo started; exit 0"));
    recv_until(&mut harness.output, |event| {
        event.payload == OutputPayload::Stdout { data: "started\n".into() }
    })
    .await;

    let deadline = Instant::now() + EVENT_TIMEOUT;
    while !harness.supervisor.list().is_empty() {
        assert!(Instant::now() < deadline, "worker never left the registry");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!harness.supervisor.cancel(&id));

    let events = run_to_end(&mut harness, &id).await;
    assert_eq!(events.last(), Some(&OutputEvent::exit(&id, Some(0), false)));
}

#[test]
fn test_default_grace_period() {
    assert_eq!(
        WorkerConfig::default().grace_period(),
        Duration::from_secs(2)
    );
}

#[test_log::test(tokio::test)]
async fn test_nonexistent_executable() {
    let mut harness = harness(test_settings());
    let id = harness.supervisor.spawn(WorkerSpec {
        program: "/nonexistent/migration-worker".into(),
        ..Default::default()
    });

    let events = run_to_end(&mut harness, &id).await;
    assert_eq!(events.len(), 1);
    let OutputPayload::Error { data } = &events[0].payload else {
        panic!("expected an error event, got {:?}", events[0]);
    };
    assert!(data.starts_with("Failed to spawn the worker process"));
    assert!(harness.supervisor.list().is_empty());

    let summary = harness.tracker.get_summary(None);
    assert_eq!(summary.count, 1);
}

#[test_log::test(tokio::test)]
async fn test_missing_entry_is_a_spawn_failure() {
    let mut harness = harness(test_settings());
    let id = harness.supervisor.spawn(WorkerSpec::default());

    let events = run_to_end(&mut harness, &id).await;
    assert_eq!(
        events,
        vec![OutputEvent::error(
            &id,
            "No worker command given and no worker entry configured"
        )]
    );
}

#[test_log::test(tokio::test)]
async fn test_environment_is_merged() {
    let mut harness = harness(test_settings());
    let mut spec = sh(r#"echo "$MIGRATION_HOST_PROCESS_ID $ARCHIVE_FOLDER $MODE $MIGRATION_HOST_VERSION""#);
    spec.env.insert("ARCHIVE_FOLDER".into(), "data/out".into());
    spec.env.insert("MODE".into(), "fast".into());
    let id = harness.supervisor.spawn(spec);

    let events = run_to_end(&mut harness, &id).await;
    assert_eq!(
        stdout_of(&events),
        format!("{id} /opt/app/data/out fast {}\n", crate::VERSION)
    );
}

#[test_log::test(tokio::test)]
async fn test_working_directory() {
    let mut harness = harness(test_settings());
    let cwd = tempfile::tempdir().unwrap();
    let mut spec = sh("pwd -P");
    spec.cwd = Some(cwd.path().to_path_buf());
    let id = harness.supervisor.spawn(spec);

    let events = run_to_end(&mut harness, &id).await;
    assert_eq!(
        stdout_of(&events).trim_end(),
        cwd.path().canonicalize().unwrap().to_string_lossy()
    );
}

#[test_log::test(tokio::test)]
async fn test_watchdog_reports_pending_spawn() {
    let reporter = Arc::new(RecordingErrorReporter::default());
    let tracker = Arc::new(OperationTracker::new(Arc::new(NoopErrorReporter)));
    let (tx, mut output) = mpsc::unbounded_channel();
    let supervisor = ProcessSupervisor::new(
        WorkerConfig {
            spawn_timeout_ms: 10,
            ..test_settings()
        },
        tracker,
        reporter.clone(),
        tx,
    )
    .unwrap();

    let (control, _control_rx) = mpsc::unbounded_channel();
    supervisor.register(ProcessHandle {
        id: "worker-1-0".into(),
        pid: None,
        state: ProcessState::SpawnPending,
        completion_detected: Arc::new(AtomicBool::new(false)),
        command_line: "/opt/app/missing-worker".into(),
        started_at_ms: 0,
        control,
    });
    supervisor
        .clone()
        .watchdog(
            "worker-1-0".into(),
            SpawnDiagnostics {
                resolved_path: "/opt/app/missing-worker".into(),
                cwd: None,
                path_variables: BTreeMap::from([(
                    "ARCHIVE_FOLDER".into(),
                    "/opt/app/out".into(),
                )]),
            },
        )
        .await;

    assert_eq!(
        output.try_recv().unwrap(),
        OutputEvent::error("worker-1-0", SPAWN_FAILURE_MESSAGE)
    );
    let reports = reporter.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].message, SPAWN_FAILURE_MESSAGE);
    assert_eq!(reports[0].extra["exists"], false);
    assert_eq!(reports[0].extra["pathVariables"]["ARCHIVE_FOLDER"], "/opt/app/out");
    assert_eq!(supervisor.list().len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_watchdog_ignores_spawned_worker() {
    let reporter = Arc::new(RecordingErrorReporter::default());
    let tracker = Arc::new(OperationTracker::new(Arc::new(NoopErrorReporter)));
    let (tx, mut output) = mpsc::unbounded_channel();
    let supervisor = ProcessSupervisor::new(
        WorkerConfig {
            spawn_timeout_ms: 10,
            ..test_settings()
        },
        tracker.clone(),
        reporter.clone(),
        tx,
    )
    .unwrap();

    let id = supervisor.spawn(sh("sleep 30"));
    let event = tokio::time::timeout(EVENT_TIMEOUT, output.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(is_spawned_line(&event));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(reporter.reports().is_empty());
    assert!(supervisor.cancel(&id));
    let events = recv_until(&mut output, |event| event.is_terminal()).await;
    assert_eq!(events.last(), Some(&OutputEvent::exit(&id, None, false)));

    assert_eq!(tracker.get_summary(None).count, 1);
}
