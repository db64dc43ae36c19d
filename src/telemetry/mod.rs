//! Hierarchical operation tracking: every measured unit of work is an [`Operation`] with a start
//! and end [`ResourceSnapshot`], optionally nested under a parent.

pub mod error_reporter;
mod operation;
mod report;
mod snapshot;
mod summary;
mod tracker;

pub use error_reporter::{
    ErrorReport, ErrorReporter, HttpErrorReporter, LogErrorReporter, NoopErrorReporter,
    ReportLevel, build_error_reporter,
};
pub use operation::{
    Metadata, Operation, OperationCategory, OperationId, OperationResult, OperationStatus,
};
pub(crate) use snapshot::unix_millis;
pub use snapshot::{ResourceRecorder, ResourceSnapshot};
pub use summary::summarize_durations;
pub use tracker::OperationTracker;
