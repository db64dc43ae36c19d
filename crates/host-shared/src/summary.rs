use serde::{Deserialize, Serialize};

/// Aggregated durations of the ended operations of one category, in milliseconds.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DurationSummary {
    pub count: usize,
    pub total_ms: f64,
    pub average_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p95_ms: f64,
}
