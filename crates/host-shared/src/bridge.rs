//! Line-delimited JSON protocol spoken over the host's stdin/stdout.
//!
//! Every line the UI writes is a [`BridgeRequest`]; every line the host writes is a
//! [`BridgeMessage`]. Responses carry the id of the request they answer, events are
//! unsolicited.

use crate::events::{OutputEvent, ProgressEvent};
use crate::summary::DurationSummary;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BridgeRequest {
    pub id: u64,
    #[serde(flatten)]
    pub command: BridgeCommand,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "method", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BridgeCommand {
    ExtractArchive {
        path: PathBuf,
        #[serde(default)]
        output_path: Option<PathBuf>,
    },
    ExecuteWorker {
        #[serde(default)]
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
    },
    CancelWorker {
        process_id: String,
    },
    TelemetrySummary {
        #[serde(default)]
        category: Option<String>,
    },
    Shutdown,
}

/// Uniform `{success, ...payload | error}` shape returned by every handler.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HandlerResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum ResponsePayload {
    Extraction {
        output_folder: PathBuf,
        anchor_found: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        warning: Option<String>,
    },
    Worker {
        process_id: String,
    },
    Cancel {
        cancelled: bool,
    },
    Summary {
        summary: DurationSummary,
    },
    Empty {},
}

impl HandlerResponse {
    pub fn ok(payload: ResponsePayload) -> Self {
        Self {
            success: true,
            error: None,
            payload,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            payload: ResponsePayload::Empty {},
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BridgeResponse {
    pub id: u64,
    #[serde(flatten)]
    pub response: HandlerResponse,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "channel", rename_all = "camelCase")]
pub enum BridgeMessage {
    Response(BridgeResponse),
    Progress(ProgressEvent),
    Output(OutputEvent),
}

impl BridgeMessage {
    pub fn to_line(&self) -> anyhow::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
