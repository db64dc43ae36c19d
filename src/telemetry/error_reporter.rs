use crate::config::TelemetryConfig;
use crate::prelude::*;
use crate::request_client::REPORT_CLIENT;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportLevel {
    Warning,
    Error,
}

/// A failure forwarded to error tracking, with indexed `tags` and free-form `extra` context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub message: String,
    pub level: ReportLevel,
    pub tags: BTreeMap<String, String>,
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ErrorReport {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: ReportLevel::Error,
            tags: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: ReportLevel::Warning,
            ..Self::error(message)
        }
    }

    pub fn tag(mut self, key: &str, value: impl ToString) -> Self {
        self.tags.insert(key.to_owned(), value.to_string());
        self
    }

    pub fn extra(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.to_owned(), value.into());
        self
    }
}

/// Sink for failures. Implementations must never fail the caller.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, report: ErrorReport);
}

pub struct NoopErrorReporter;

impl ErrorReporter for NoopErrorReporter {
    fn report(&self, _report: ErrorReport) {}
}

/// Writes reports to the local log only.
pub struct LogErrorReporter;

impl ErrorReporter for LogErrorReporter {
    fn report(&self, report: ErrorReport) {
        let tags = report
            .tags
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .join(" ");
        match report.level {
            ReportLevel::Error => error!("{} [{tags}]", report.message),
            ReportLevel::Warning => warn!("{} [{tags}]", report.message),
        }
        if !report.extra.is_empty() {
            debug!(
                "Report context: {}",
                serde_json::to_string(&report.extra).unwrap_or_default()
            );
        }
    }
}

/// Logs the report, then posts it as JSON to an error-tracking endpoint in the background.
pub struct HttpErrorReporter {
    endpoint: Url,
}

impl HttpErrorReporter {
    pub fn new(endpoint: Url) -> Self {
        Self { endpoint }
    }
}

impl ErrorReporter for HttpErrorReporter {
    fn report(&self, report: ErrorReport) {
        LogErrorReporter.report(report.clone());

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime available, error report not sent");
            return;
        };
        let endpoint = self.endpoint.clone();
        handle.spawn(async move {
            let response = REPORT_CLIENT.post(endpoint).json(&report).send().await;
            match response {
                Ok(response) if !response.status().is_success() => {
                    debug!("Error report rejected with status {}", response.status())
                }
                Ok(_) => {}
                Err(e) => debug!("Failed to send error report: {e}"),
            }
        });
    }
}

pub fn build_error_reporter(config: &TelemetryConfig) -> Arc<dyn ErrorReporter> {
    let Some(url) = config.error_report_url.as_deref() else {
        return Arc::new(LogErrorReporter);
    };
    match Url::parse(url) {
        Ok(endpoint) => Arc::new(HttpErrorReporter::new(endpoint)),
        Err(e) => {
            warn!("Ignoring invalid error report url {url}: {e}");
            Arc::new(LogErrorReporter)
        }
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use std::sync::Mutex;

    /// Keeps every report in memory so tests can assert on them.
    #[derive(Default)]
    pub struct RecordingErrorReporter {
        reports: Mutex<Vec<ErrorReport>>,
    }

    impl RecordingErrorReporter {
        pub fn reports(&self) -> Vec<ErrorReport> {
            self.reports.lock().unwrap().clone()
        }
    }

    impl ErrorReporter for RecordingErrorReporter {
        fn report(&self, report: ErrorReport) {
            self.reports.lock().unwrap().push(report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_builders() {
        let report = ErrorReport::warning("Worker failed to start")
            .tag("component", "supervisor")
            .extra("exists", false);

        assert_eq!(report.level, ReportLevel::Warning);
        insta::assert_json_snapshot!(report, @r#"
        {
          "message": "Worker failed to start",
          "level": "warning",
          "tags": {
            "component": "supervisor"
          },
          "extra": {
            "exists": false
          }
        }
        "#);
    }

    #[test]
    fn test_build_error_reporter_without_url_does_not_panic() {
        let reporter = build_error_reporter(&TelemetryConfig::default());
        reporter.report(ErrorReport::error("boom"));

        let reporter = build_error_reporter(&TelemetryConfig {
            error_report_url: Some("not a url".into()),
            ..Default::default()
        });
        reporter.report(ErrorReport::error("boom"));
    }

    #[test]
    fn test_http_reporter_outside_runtime_is_silent() {
        let reporter = HttpErrorReporter::new(Url::parse("http://127.0.0.1:9/report").unwrap());
        reporter.report(ErrorReport::error("boom"));
    }
}
