//! Error projection for an execution attempt: classification, a parsed
//! summary of the raw error string, and a cleaned backtrace.
//!
//! Backtrace cleaning is supplied by the host through [BacktraceCleaner].
//! [FilteringBacktraceCleaner] covers the usual case (strip an application
//! root, drop framework frames); anything else can be a closure.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::capabilities::{ColumnCatalog, SchemaCapabilities, SchemaCapabilityProbe};
use crate::models::{ErrorEvent, ExecutionRecord};

/// Host-supplied backtrace filter. Order of the returned frames is kept.
pub trait BacktraceCleaner: Send + Sync {
    fn clean(&self, frames: Vec<String>) -> Vec<String>;
}

impl<F> BacktraceCleaner for F
where
    F: Fn(Vec<String>) -> Vec<String> + Send + Sync,
{
    fn clean(&self, frames: Vec<String>) -> Vec<String> {
        self(frames)
    }
}

/// Passes frames through untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopBacktraceCleaner;

impl BacktraceCleaner for NoopBacktraceCleaner {
    fn clean(&self, frames: Vec<String>) -> Vec<String> {
        frames
    }
}

/// Drops frames matching any silencer substring, then strips an application
/// root prefix from the survivors. Silencers see the frame as recorded.
#[derive(Clone, Debug, Default)]
pub struct FilteringBacktraceCleaner {
    root: Option<String>,
    silencers: Vec<String>,
}

impl FilteringBacktraceCleaner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        let root = root.into();
        self.root = if root.is_empty() { None } else { Some(root) };
        self
    }

    pub fn with_silencer(mut self, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        if !pattern.is_empty() {
            self.silencers.push(pattern);
        }
        self
    }

    fn strip_root(&self, frame: String) -> String {
        match self.root.as_deref() {
            Some(root) => match frame.strip_prefix(root) {
                Some(rest) => rest.trim_start_matches('/').to_string(),
                None => frame,
            },
            None => frame,
        }
    }

    fn is_silenced(&self, frame: &str) -> bool {
        self.silencers
            .iter()
            .any(|pattern| frame.contains(pattern.as_str()))
    }
}

impl BacktraceCleaner for FilteringBacktraceCleaner {
    fn clean(&self, frames: Vec<String>) -> Vec<String> {
        frames
            .into_iter()
            .filter(|frame| !self.is_silenced(frame))
            .map(|frame| self.strip_root(frame))
            .collect()
    }
}

/// Raw backtrace (empty when absent) passed through `cleaner`.
pub fn filtered_backtrace(
    record: &ExecutionRecord,
    cleaner: &dyn BacktraceCleaner,
) -> Vec<String> {
    cleaner.clean(record.error_backtrace.clone().unwrap_or_default())
}

/// Whether the structured `error_event` column can be trusted.
pub fn error_event_migrated<C: ColumnCatalog>(probe: &SchemaCapabilityProbe<C>) -> bool {
    probe.error_event_supported()
}

/// Stored classification, only when the schema carries it.
pub fn error_event(
    record: &ExecutionRecord,
    capabilities: SchemaCapabilities,
) -> Option<ErrorEvent> {
    if capabilities.error_event {
        record.error_event
    } else {
        None
    }
}

/// Raw `"ErrorClass: message"` string split into its parts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorSummary {
    pub class: String,
    pub message: String,
}

impl ErrorSummary {
    /// `None` for blank input. Without a `": "` separator the whole string
    /// is taken as the class.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let (class, message) = raw.split_once(": ").unwrap_or((raw, ""));
        Some(Self {
            class: class.to_string(),
            message: message.to_string(),
        })
    }

    pub fn from_record(record: &ExecutionRecord) -> Option<Self> {
        record.error.as_deref().and_then(Self::parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record() -> ExecutionRecord {
        let created_at = Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid ts");
        ExecutionRecord::new(1, "job-1", created_at)
    }

    fn frames(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn missing_backtrace_is_empty() {
        let cleaned = filtered_backtrace(&record(), &NoopBacktraceCleaner);
        assert!(cleaned.is_empty());
    }

    #[test]
    fn cleaner_output_is_returned_in_order() {
        let record = record().with_error_backtrace(frames(&["a.rs:1", "b.rs:2", "c.rs:3"]));
        let reverse = |mut lines: Vec<String>| {
            lines.reverse();
            lines
        };
        assert_eq!(
            filtered_backtrace(&record, &reverse),
            frames(&["c.rs:3", "b.rs:2", "a.rs:1"])
        );
    }

    #[test]
    fn filtering_cleaner_strips_root_and_silences() {
        let cleaner = FilteringBacktraceCleaner::new()
            .with_root("/srv/app")
            .with_silencer("/vendor/");
        let record = record().with_error_backtrace(frames(&[
            "/srv/app/src/jobs/mailer.rs:12",
            "/srv/app/vendor/runtime/worker.rs:88",
            "/usr/lib/other.rs:3",
        ]));
        assert_eq!(
            filtered_backtrace(&record, &cleaner),
            frames(&["src/jobs/mailer.rs:12", "/usr/lib/other.rs:3"])
        );
    }

    #[test]
    fn silencer_matches_path_segment_under_root() {
        let cleaner = FilteringBacktraceCleaner::new()
            .with_root("/srv/app/")
            .with_silencer("/srv/app/lib/")
            .with_silencer("/gems/");
        let cleaned = cleaner.clean(frames(&[
            "/srv/app/lib/internal.rs:1",
            "/srv/app/src/report.rs:7",
            "/srv/app/gems/retry/lib.rs:40",
            "/srv/app/src/main.rs:2",
        ]));
        assert_eq!(cleaned, frames(&["src/report.rs:7", "src/main.rs:2"]));
    }

    #[test]
    fn error_event_requires_capability() {
        let record = record().with_error_event(ErrorEvent::RetryStopped);
        assert_eq!(
            error_event(&record, SchemaCapabilities::current()),
            Some(ErrorEvent::RetryStopped)
        );
        assert_eq!(error_event(&record, SchemaCapabilities::legacy()), None);
    }

    #[test]
    fn error_event_migrated_reads_probe() {
        let probe = SchemaCapabilityProbe::new(
            vec!["id".to_string(), "error_event".to_string()],
            "jobdeck_executions",
        );
        assert!(error_event_migrated(&probe));
    }

    #[test]
    fn error_summary_parsing() {
        assert_eq!(
            ErrorSummary::parse("Net::ReadTimeout: timed out: after 5s"),
            Some(ErrorSummary {
                class: "Net::ReadTimeout".to_string(),
                message: "timed out: after 5s".to_string(),
            })
        );
        assert_eq!(
            ErrorSummary::parse("Interrupted"),
            Some(ErrorSummary {
                class: "Interrupted".to_string(),
                message: String::new(),
            })
        );
        assert_eq!(ErrorSummary::parse("  "), None);
        assert_eq!(ErrorSummary::from_record(&record()), None);
    }
}
