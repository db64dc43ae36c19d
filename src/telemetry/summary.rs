use host_shared::summary::DurationSummary;
use std::time::Duration;

fn as_millis(duration: &Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Aggregate a set of durations. An empty set yields an all-zero summary.
///
/// The 95th percentile is the element at index `floor(n * 0.95)` of the ascending order,
/// clamped to the last element.
pub fn summarize_durations(durations: &[Duration]) -> DurationSummary {
    if durations.is_empty() {
        return DurationSummary::default();
    }

    let mut sorted = durations.to_vec();
    sorted.sort_unstable();

    let count = sorted.len();
    let total_ms: f64 = sorted.iter().map(as_millis).sum();
    let p95_index = ((count as f64 * 0.95).floor() as usize).min(count - 1);

    DurationSummary {
        count,
        total_ms,
        average_ms: total_ms / count as f64,
        min_ms: as_millis(&sorted[0]),
        max_ms: as_millis(&sorted[count - 1]),
        p95_ms: as_millis(&sorted[p95_index]),
    }
}
