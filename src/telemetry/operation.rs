use super::snapshot::ResourceSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

pub type Metadata = BTreeMap<String, serde_json::Value>;

const NOOP_OPERATION_ID: &str = "noop";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(String);

impl OperationId {
    pub(crate) fn new(name: &str, counter: u64, unix_millis: u64) -> Self {
        Self(format!("{name}-{counter}-{unix_millis}"))
    }

    /// Returned when the tracker could not record anything; ending it is a no-op.
    pub fn noop() -> Self {
        Self(NOOP_OPERATION_ID.into())
    }

    pub fn is_noop(&self) -> bool {
        self.0 == NOOP_OPERATION_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationCategory {
    Startup,
    IpcHandler,
    Operation,
    Window,
}

impl Display for OperationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationCategory::Startup => write!(f, "startup"),
            OperationCategory::IpcHandler => write!(f, "ipc-handler"),
            OperationCategory::Operation => write!(f, "operation"),
            OperationCategory::Window => write!(f, "window"),
        }
    }
}

impl FromStr for OperationCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "startup" => Ok(OperationCategory::Startup),
            "ipc-handler" => Ok(OperationCategory::IpcHandler),
            "operation" => Ok(OperationCategory::Operation),
            "window" => Ok(OperationCategory::Window),
            _ => Err(anyhow::anyhow!("Unknown operation category: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Running,
    Completed,
    Failed,
}

/// What the caller reports when ending an operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub data: Metadata,
}

impl OperationResult {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
            data: Metadata::new(),
        }
    }

    pub fn failure(error: impl Display) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            data: Metadata::new(),
        }
    }

    pub fn from_success(success: bool) -> Self {
        Self {
            success,
            error: None,
            data: Metadata::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.to_owned(), value.into());
        self
    }
}

/// One measured unit of work.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: OperationId,
    pub name: String,
    pub category: OperationCategory,
    pub start: ResourceSnapshot,
    pub end: Option<ResourceSnapshot>,
    pub metadata: Metadata,
    pub result: Option<OperationResult>,
    pub status: OperationStatus,
    pub parent: Option<OperationId>,
    pub children: Vec<OperationId>,
}

impl Operation {
    pub(crate) fn new(
        id: OperationId,
        name: &str,
        category: OperationCategory,
        start: ResourceSnapshot,
        metadata: Metadata,
        parent: Option<OperationId>,
    ) -> Self {
        Self {
            id,
            name: name.to_owned(),
            category,
            start,
            end: None,
            metadata,
            result: None,
            status: OperationStatus::Running,
            parent,
            children: Vec::new(),
        }
    }

    /// `None` while the operation is still running.
    pub fn duration(&self) -> Option<Duration> {
        self.end.as_ref().map(|end| self.start.duration_until(end))
    }

    pub fn is_running(&self) -> bool {
        self.status == OperationStatus::Running
    }
}
