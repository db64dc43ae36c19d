use super::error_reporter::{ErrorReport, ErrorReporter};
use super::operation::{
    Metadata, Operation, OperationCategory, OperationId, OperationResult, OperationStatus,
};
use super::report::format_report;
use super::snapshot::{ResourceRecorder, unix_millis};
use super::summary::summarize_durations;
use crate::logger::TELEMETRY_TARGET;
use crate::outcome::Outcome;
use crate::prelude::*;
use host_shared::summary::DurationSummary;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const DEFAULT_FAILURE_MESSAGE: &str = "Operation failed without an error message";

/// Registry of the operations measured by the host.
///
/// Every method is infallible from the caller's point of view: telemetry problems are logged
/// and surfaced as [`Outcome::Degraded`], never propagated into the measured work.
pub struct OperationTracker {
    operations: Mutex<HashMap<OperationId, Operation>>,
    counter: AtomicU64,
    recorder: ResourceRecorder,
    reporter: Arc<dyn ErrorReporter>,
}

impl OperationTracker {
    pub fn new(reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            operations: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
            recorder: ResourceRecorder::new(),
            reporter,
        }
    }

    fn lock(&self) -> Option<MutexGuard<'_, HashMap<OperationId, Operation>>> {
        self.operations
            .lock()
            .map_err(|_| warn!(target: TELEMETRY_TARGET, "Operation registry is poisoned"))
            .ok()
    }

    fn next_id(&self, name: &str) -> OperationId {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        OperationId::new(name, counter, unix_millis())
    }

    fn insert(
        &self,
        name: &str,
        category: OperationCategory,
        metadata: Metadata,
        parent: Option<OperationId>,
    ) -> OperationId {
        let Some(mut operations) = self.lock() else {
            return OperationId::noop();
        };
        let id = self.next_id(name);
        let start = self.recorder.snapshot();

        if let Some(parent) = parent.as_ref().and_then(|p| operations.get_mut(p)) {
            parent.children.push(id.clone());
        }
        operations.insert(
            id.clone(),
            Operation::new(id.clone(), name, category, start, metadata, parent),
        );
        trace!(target: TELEMETRY_TARGET, "Started {category} operation {id}");
        id
    }

    pub fn start_operation(
        &self,
        name: &str,
        category: OperationCategory,
        metadata: Metadata,
    ) -> OperationId {
        self.insert(name, category, metadata, None)
    }

    /// Start an operation nested under `parent`, inheriting its category.
    ///
    /// An unknown parent yields a root operation of the `operation` category.
    pub fn start_child_operation(
        &self,
        parent: &OperationId,
        name: &str,
        metadata: Metadata,
    ) -> Outcome<OperationId> {
        let parent_category = self
            .lock()
            .and_then(|operations| operations.get(parent).map(|p| p.category));

        match parent_category {
            Some(category) => {
                Outcome::Complete(self.insert(name, category, metadata, Some(parent.clone())))
            }
            None => {
                let warning = format!("Parent operation {parent} not found, starting {name} as a root operation");
                warn!(target: TELEMETRY_TARGET, "{warning}");
                let id = self.insert(name, OperationCategory::Operation, metadata, None);
                Outcome::degraded(id, warning)
            }
        }
    }

    /// End an operation and log its report. A second call overwrites the first one.
    pub fn end_operation(&self, id: &OperationId, mut result: OperationResult) -> Outcome<()> {
        if id.is_noop() {
            return Outcome::Complete(());
        }
        let Some(mut operations) = self.lock() else {
            return Outcome::degraded((), "Operation registry is unavailable");
        };
        let end = self.recorder.snapshot();

        let Some(operation) = operations.get_mut(id) else {
            let warning = format!("Cannot end unknown operation {id}");
            warn!(target: TELEMETRY_TARGET, "{warning}");
            return Outcome::degraded((), warning);
        };

        let status = if result.success {
            OperationStatus::Completed
        } else {
            if result.error.as_deref().is_none_or(str::is_empty) {
                result.error = Some(DEFAULT_FAILURE_MESSAGE.into());
            }
            OperationStatus::Failed
        };
        operation.end = Some(end);
        operation.status = status;
        operation.result = Some(result);

        let operation = operation.clone();
        let children = operation
            .children
            .iter()
            .filter_map(|child| operations.get(child))
            .collect::<Vec<_>>();
        info!(target: TELEMETRY_TARGET, "{}", format_report(&operation, &children));
        drop(operations);

        if status == OperationStatus::Failed {
            self.report_failure(&operation);
        }
        Outcome::Complete(())
    }

    fn report_failure(&self, operation: &Operation) {
        let error = operation
            .result
            .as_ref()
            .and_then(|r| r.error.clone())
            .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.into());
        let mut report = ErrorReport::error(format!("{} failed: {error}", operation.name))
            .tag("component", &operation.name)
            .tag("category", operation.category)
            .tag("success", false)
            .extra("operationId", operation.id.as_str())
            .extra(
                "durationMs",
                operation.duration().unwrap_or_default().as_millis() as u64,
            );
        for (key, value) in &operation.metadata {
            report = report.extra(key, value.clone());
        }
        self.reporter.report(report);
    }

    pub fn get_operation(&self, id: &OperationId) -> Option<Operation> {
        self.lock()?.get(id).cloned()
    }

    /// Duration statistics of the ended operations, optionally restricted to one category.
    pub fn get_summary(&self, category: Option<OperationCategory>) -> DurationSummary {
        let Some(operations) = self.lock() else {
            return DurationSummary::default();
        };
        let durations = operations
            .values()
            .filter(|op| category.is_none_or(|category| op.category == category))
            .filter_map(Operation::duration)
            .collect::<Vec<_>>();
        summarize_durations(&durations)
    }

    /// Remove the ended operations older than `max_age`. Returns how many were removed.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let Some(mut operations) = self.lock() else {
            return 0;
        };
        let expired = operations
            .values()
            .filter(|op| {
                op.end
                    .as_ref()
                    .is_some_and(|end| end.instant.elapsed() >= max_age)
            })
            .map(|op| op.id.clone())
            .collect::<Vec<_>>();

        for id in &expired {
            operations.remove(id);
        }
        if !expired.is_empty() {
            for operation in operations.values_mut() {
                operation.children.retain(|child| !expired.contains(child));
            }
            debug!(target: TELEMETRY_TARGET, "Removed {} expired operations", expired.len());
        }
        expired.len()
    }
}
