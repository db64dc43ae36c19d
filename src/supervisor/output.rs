use super::completion::{CompletionDetector, last_chars};
use super::handle::{Control, ProcessId};
use crate::local_logger::suspend_progress_bar;
use crate::logger::WORKER_TARGET;
use crate::prelude::*;
use host_shared::events::OutputEvent;
use std::fmt::Display;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

/// Channel worker output is pushed to. A closed receiver is ignored.
pub type OutputSender = mpsc::UnboundedSender<OutputEvent>;

const READ_BUFFER_SIZE: usize = 8 * 1024;
/// A line longer than this is forwarded without waiting for its end.
const MAX_LINE_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum StreamKind {
    Stdout,
    Stderr,
}

impl Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}

/// Completion scanning state of the stdout pump.
pub(super) struct CompletionScan {
    pub detector: Arc<dyn CompletionDetector>,
    pub detected: Arc<AtomicBool>,
    pub control: mpsc::UnboundedSender<Control>,
    tail: String,
}

impl CompletionScan {
    pub fn new(
        detector: Arc<dyn CompletionDetector>,
        detected: Arc<AtomicBool>,
        control: mpsc::UnboundedSender<Control>,
    ) -> Self {
        Self {
            detector,
            detected,
            control,
            tail: String::new(),
        }
    }

    fn scan(&mut self, chunk: &[u8]) {
        if self.detected.load(Ordering::SeqCst) {
            return;
        }
        let text = format!("{}{}", self.tail, String::from_utf8_lossy(chunk));
        if self.detector.detect(&text) {
            self.detected.store(true, Ordering::SeqCst);
            let _ = self.control.send(Control::CompletionDetected);
            return;
        }
        self.tail = last_chars(&text, self.detector.lookbehind()).to_owned();
    }
}

fn forward(process_id: &ProcessId, stream: StreamKind, output: &OutputSender, data: &[u8]) {
    let data = String::from_utf8_lossy(data).into_owned();
    suspend_progress_bar(|| {
        trace!(target: WORKER_TARGET, "[{process_id}][{stream}] {}", data.trim_end());
    });
    let event = match stream {
        StreamKind::Stdout => OutputEvent::stdout(process_id, data),
        StreamKind::Stderr => OutputEvent::stderr(process_id, data),
    };
    let _ = output.send(event);
}

/// Forward a worker stream line by line until it closes, scanning it for completion if asked.
///
/// Chunks are flushed up to their last `\n` or `\r`, so the receiver never sees half a line
/// unless a line exceeds the buffer cap.
pub(super) async fn pump<R: AsyncRead + Unpin>(
    mut reader: R,
    stream: StreamKind,
    process_id: ProcessId,
    output: OutputSender,
    mut completion: Option<CompletionScan>,
) -> io::Result<()> {
    let mut buffer = vec![0; READ_BUFFER_SIZE];
    let mut line_buffer = Vec::new();

    loop {
        let bytes_read = reader.read(&mut buffer).await?;
        if bytes_read == 0 {
            if !line_buffer.is_empty() {
                forward(&process_id, stream, &output, &line_buffer);
            }
            break;
        }

        let chunk = &buffer[..bytes_read];
        if let Some(completion) = completion.as_mut() {
            completion.scan(chunk);
        }
        line_buffer.extend_from_slice(chunk);

        if let Some(last_newline_pos) = line_buffer.iter().rposition(|&b| b == b'\n' || b == b'\r')
        {
            let remainder = line_buffer.split_off(last_newline_pos + 1);
            forward(&process_id, stream, &output, &line_buffer);
            line_buffer = remainder;
        } else if line_buffer.len() >= MAX_LINE_BUFFER {
            forward(&process_id, stream, &output, &line_buffer);
            line_buffer.clear();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::LiteralMarker;
    use host_shared::events::OutputPayload;
    use tokio::io::AsyncWriteExt;

    fn data(event: &OutputEvent) -> &str {
        match &event.payload {
            OutputPayload::Stdout { data } | OutputPayload::Stderr { data } => data,
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pump_flushes_complete_lines() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(pump(reader, StreamKind::Stderr, "worker-1".into(), tx, None));

        writer.write_all(b"first line\nsecond ").await.unwrap();
        writer.flush().await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.process_id, "worker-1");
        assert!(matches!(event.payload, OutputPayload::Stderr { .. }));
        assert_eq!(data(&event), "first line\n");

        writer.write_all(b"half").await.unwrap();
        drop(writer);
        task.await.unwrap().unwrap();
        assert_eq!(data(&rx.recv().await.unwrap()), "second half");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_marker_split_across_chunks_is_detected() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let detected = Arc::new(AtomicBool::new(false));
        let scan = CompletionScan::new(
            Arc::new(LiteralMarker::new("MIGRATION_COMPLETE")),
            detected.clone(),
            control_tx,
        );
        let task = tokio::spawn(pump(reader, StreamKind::Stdout, "worker-1".into(), tx, Some(scan)));

        writer.write_all(b"status: MIGRATION_").await.unwrap();
        writer.flush().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!detected.load(Ordering::SeqCst));

        writer.write_all(b"COMPLETE\n").await.unwrap();
        drop(writer);
        task.await.unwrap().unwrap();

        assert!(detected.load(Ordering::SeqCst));
        assert!(matches!(control_rx.recv().await, Some(Control::CompletionDetected)));
        assert_eq!(data(&rx.recv().await.unwrap()), "status: MIGRATION_COMPLETE\n");
    }
}
