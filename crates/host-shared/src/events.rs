use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which long-running task a [`ProgressEvent`] belongs to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    Extraction,
    Migration,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Starting,
    Progress,
    Complete,
    Error,
}

impl ProgressStatus {
    /// `complete` and `error` are the last events emitted for a task.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressStatus::Complete | ProgressStatus::Error)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    pub status: ProgressStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_folder: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_found: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<String>,
}

impl ProgressEvent {
    pub fn new(kind: ProgressKind, status: ProgressStatus, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
            percentage: None,
            output_folder: None,
            anchor_found: None,
            process_id: None,
        }
    }

    pub fn with_percentage(mut self, percentage: f64) -> Self {
        self.percentage = Some(percentage.clamp(0.0, 100.0));
        self
    }

    pub fn with_output_folder(mut self, folder: impl Into<PathBuf>, anchor_found: bool) -> Self {
        self.output_folder = Some(folder.into());
        self.anchor_found = Some(anchor_found);
        self
    }

    pub fn with_process_id(mut self, process_id: impl Into<String>) -> Self {
        self.process_id = Some(process_id.into());
        self
    }
}

/// One event emitted by a supervised worker process.
///
/// For a given `process_id`, chunks of one stream arrive in the order the worker wrote them.
/// `Exit` is the last event of a worker that started. A failed spawn ends with `Error` instead.
/// A spawn that is merely slow also gets an `Error`, which may then be followed by output and
/// `Exit` if the process eventually starts.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutputEvent {
    pub process_id: String,
    #[serde(flatten)]
    pub payload: OutputPayload,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputPayload {
    Stdout {
        data: String,
    },
    Stderr {
        data: String,
    },
    Exit {
        code: Option<i32>,
        #[serde(rename = "completionDetected")]
        completion_detected: bool,
    },
    Error {
        data: String,
    },
}

impl OutputEvent {
    pub fn stdout(process_id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            payload: OutputPayload::Stdout { data: data.into() },
        }
    }

    pub fn stderr(process_id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            payload: OutputPayload::Stderr { data: data.into() },
        }
    }

    pub fn exit(process_id: impl Into<String>, code: Option<i32>, completion_detected: bool) -> Self {
        Self {
            process_id: process_id.into(),
            payload: OutputPayload::Exit {
                code,
                completion_detected,
            },
        }
    }

    pub fn error(process_id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            payload: OutputPayload::Error { data: data.into() },
        }
    }

    /// Whether this event ends the process, as far as its consumer is concerned. Only `Exit` is
    /// guaranteed to be the final event.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.payload,
            OutputPayload::Exit { .. } | OutputPayload::Error { .. }
        )
    }
}
