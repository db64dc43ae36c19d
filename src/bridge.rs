//! Line-delimited JSON bridge between the handlers and the UI process driving the host.
//!
//! Requests are read from `input`, one per line. Responses and events are written to `output`
//! in the order they are produced. The session ends on end of input or on a `shutdown` request,
//! and every worker still registered is killed on the way out.

use crate::handlers::{Handlers, HostEvents, migration_progress};
use crate::prelude::*;
use crate::telemetry::{Metadata, OperationCategory, OperationResult, OperationTracker};
use host_shared::CURRENT_PROTOCOL_VERSION;
use host_shared::bridge::{
    BridgeCommand, BridgeMessage, BridgeRequest, BridgeResponse, HandlerResponse,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Id used to answer a line that could not be parsed as a request.
const UNKNOWN_REQUEST_ID: u64 = 0;

pub struct Bridge {
    handlers: Arc<Handlers>,
    tracker: Arc<OperationTracker>,
    retention: Duration,
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, message: &BridgeMessage) -> Result<()> {
    let line = message.to_line()?;
    writer
        .write_all(line.as_bytes())
        .await
        .context("Failed to write to the bridge output")?;
    writer.flush().await?;
    Ok(())
}

/// Best effort at finding the id of a malformed request, so the UI can still correlate it.
fn request_id_of(line: &str) -> u64 {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|value| value.get("id")?.as_u64())
        .unwrap_or(UNKNOWN_REQUEST_ID)
}

fn response(id: u64, response: HandlerResponse) -> BridgeMessage {
    BridgeMessage::Response(BridgeResponse { id, response })
}

#[derive(Debug, Default)]
struct SessionStats {
    requests: u64,
    malformed: u64,
}

impl Bridge {
    pub fn new(handlers: Arc<Handlers>, tracker: Arc<OperationTracker>, retention: Duration) -> Self {
        Self {
            handlers,
            tracker,
            retention,
        }
    }

    pub async fn serve<R, W>(self, input: R, mut output: W, events: HostEvents) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!("Bridge ready, protocol version {CURRENT_PROTOCOL_VERSION}");
        let session = self.tracker.start_operation(
            "bridge-session",
            OperationCategory::Window,
            Metadata::from([("protocolVersion".to_owned(), CURRENT_PROTOCOL_VERSION.into())]),
        );

        let mut stats = SessionStats::default();
        let result = self.serve_inner(input, &mut output, events, &mut stats).await;

        let killed = self.handlers.supervisor().shutdown();
        if killed > 0 {
            info!("Killed {killed} workers left running at the end of the session");
        }
        let session_result = match &result {
            Ok(()) => OperationResult::success(),
            Err(e) => OperationResult::failure(e),
        };
        self.tracker.end_operation(
            &session,
            session_result
                .with("requests", stats.requests)
                .with("malformed", stats.malformed)
                .with("killedWorkers", killed),
        );

        result
    }

    async fn serve_inner<R, W>(
        &self,
        input: R,
        output: &mut W,
        mut events: HostEvents,
        stats: &mut SessionStats,
    ) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        let (responses_tx, mut responses) = mpsc::unbounded_channel();
        let mut cleanup = interval(CLEANUP_INTERVAL);
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                // Events queued before a response are written before it
                biased;

                Some(event) = events.progress.recv() => {
                    send(output, &BridgeMessage::Progress(event)).await?;
                }
                Some(message) = responses.recv() => {
                    send(output, &message).await?;
                }
                Some(event) = events.output.recv() => {
                    let progress = migration_progress(&event);
                    send(output, &BridgeMessage::Output(event)).await?;
                    if let Some(progress) = progress {
                        send(output, &BridgeMessage::Progress(progress)).await?;
                    }
                }
                line = lines.next_line() => {
                    let Some(line) = line.context("Failed to read from the bridge input")? else {
                        debug!("Bridge input closed");
                        return Ok(());
                    };
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    stats.requests += 1;

                    let request = match serde_json::from_str::<BridgeRequest>(line) {
                        Ok(request) => request,
                        Err(e) => {
                            stats.malformed += 1;
                            warn!("Ignoring malformed bridge request: {e}");
                            let message = response(
                                request_id_of(line),
                                HandlerResponse::failure(format!("Invalid request: {e}")),
                            );
                            send(output, &message).await?;
                            continue;
                        }
                    };
                    let id = request.id;
                    trace!("Bridge request {id}: {:?}", request.command);

                    match request.command {
                        BridgeCommand::Shutdown => {
                            let reply = self.handlers.handle(BridgeCommand::Shutdown).await;
                            send(output, &response(id, reply)).await?;
                            return Ok(());
                        }
                        command @ BridgeCommand::ExtractArchive { .. } => {
                            let handlers = self.handlers.clone();
                            let responses_tx = responses_tx.clone();
                            tokio::spawn(async move {
                                let reply = handlers.handle(command).await;
                                let _ = responses_tx.send(response(id, reply));
                            });
                        }
                        command => {
                            let reply = self.handlers.handle(command).await;
                            send(output, &response(id, reply)).await?;
                        }
                    }
                }
                _ = cleanup.tick() => {
                    let purged = self.tracker.cleanup(self.retention);
                    if purged > 0 {
                        debug!("Purged {purged} old operations");
                    }
                }
            }
        }
    }
}
