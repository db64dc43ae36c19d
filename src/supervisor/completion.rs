use crate::config::WorkerConfig;
use crate::prelude::*;
use regex::Regex;
use std::sync::Arc;

const DEFAULT_REGEX_LOOKBEHIND: usize = 256;

/// Decides, from the worker's stdout, that the migration is done.
pub trait CompletionDetector: Send + Sync {
    fn detect(&self, text: &str) -> bool;

    /// Number of trailing characters of a chunk rescanned with the next one, so that a match
    /// split across two chunks is still found.
    fn lookbehind(&self) -> usize;
}

pub struct LiteralMarker {
    marker: String,
}

impl LiteralMarker {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

impl CompletionDetector for LiteralMarker {
    fn detect(&self, text: &str) -> bool {
        !self.marker.is_empty() && text.contains(&self.marker)
    }

    fn lookbehind(&self) -> usize {
        self.marker.chars().count().saturating_sub(1)
    }
}

pub struct RegexMarker {
    regex: Regex,
    lookbehind: usize,
}

impl RegexMarker {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).context(format!("Invalid completion pattern {pattern}"))?;
        Ok(Self {
            regex,
            lookbehind: DEFAULT_REGEX_LOOKBEHIND,
        })
    }

    pub fn with_lookbehind(mut self, lookbehind: usize) -> Self {
        self.lookbehind = lookbehind;
        self
    }
}

impl CompletionDetector for RegexMarker {
    fn detect(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    fn lookbehind(&self) -> usize {
        self.lookbehind
    }
}

/// A regex detector when a pattern is configured, the literal marker otherwise.
pub fn build_detector(settings: &WorkerConfig) -> Result<Arc<dyn CompletionDetector>> {
    match settings.completion_pattern.as_deref() {
        Some(pattern) => Ok(Arc::new(RegexMarker::new(pattern)?)),
        None => Ok(Arc::new(LiteralMarker::new(&settings.completion_marker))),
    }
}

/// Last `count` characters of `text`.
pub(super) fn last_chars(text: &str, count: usize) -> &str {
    if count == 0 {
        return "";
    }
    let start = text
        .char_indices()
        .rev()
        .nth(count - 1)
        .map_or(0, |(index, _)| index);
    &text[start..]
}
