use super::operation::{Operation, OperationStatus};
use super::snapshot::ResourceSnapshot;
use crate::helpers::{format_duration, format_memory_delta};
use itertools::Itertools;
use std::fmt::Write;

fn delta(start: u64, end: u64) -> i64 {
    end as i64 - start as i64
}

fn status_label(status: OperationStatus) -> &'static str {
    match status {
        OperationStatus::Running => "running",
        OperationStatus::Completed => "completed",
        OperationStatus::Failed => "failed",
    }
}

fn resource_lines(report: &mut String, start: &ResourceSnapshot, end: &ResourceSnapshot) {
    let _ = writeln!(
        report,
        "  Resident memory: {}",
        format_memory_delta(delta(start.resident_bytes, end.resident_bytes))
    );
    let _ = writeln!(
        report,
        "  Virtual memory: {}",
        format_memory_delta(delta(start.virtual_bytes, end.virtual_bytes))
    );
    let _ = writeln!(
        report,
        "  Disk read: {}, written: {}",
        format_memory_delta(delta(start.disk_read_bytes, end.disk_read_bytes)),
        format_memory_delta(delta(start.disk_written_bytes, end.disk_written_bytes)),
    );
}

/// Multi-line, human readable report of an ended operation and its ended direct children.
pub(crate) fn format_report(operation: &Operation, children: &[&Operation]) -> String {
    let mut report = format!(
        "[{}] {} {} in {}\n",
        operation.category,
        operation.name,
        status_label(operation.status),
        operation
            .duration()
            .map(|d| format_duration(d, None))
            .unwrap_or_else(|| "-".into()),
    );

    if let Some(end) = &operation.end {
        resource_lines(&mut report, &operation.start, end);
    }

    if let Some(error) = operation.result.as_ref().and_then(|r| r.error.as_ref()) {
        let _ = writeln!(report, "  Error: {error}");
    }

    if !operation.metadata.is_empty() {
        let metadata = operation
            .metadata
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .join(", ");
        let _ = writeln!(report, "  Metadata: {metadata}");
    }

    let ended = children
        .iter()
        .filter_map(|child| child.duration().map(|duration| (child, duration)))
        .collect::<Vec<_>>();
    if !ended.is_empty() {
        let _ = writeln!(report, "  Children:");
        for (child, duration) in ended {
            let _ = writeln!(
                report,
                "    - {} ({}): {}",
                child.name,
                status_label(child.status),
                format_duration(duration, None)
            );
        }
    }

    report.trim_end().to_owned()
}
