//! Schema capability negotiation for rolling migrations.
//!
//! Optional columns on the executions table (`error_event`, `error_backtrace`,
//! `duration`) may be absent while a migration is pending. The probe inspects
//! the live column list once, memoizes it, and hands out a [SchemaCapabilities]
//! value that calculators take as an argument instead of re-inspecting storage.
//!
//! A missing capability is never an error: it is logged once per process and
//! callers fall back to the legacy computation.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use jobdeck_kernel::DeckError;

/// An optional column the executions table may or may not carry yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    ErrorEvent,
    ErrorBacktrace,
    MonotonicDuration,
}

impl Capability {
    pub const ALL: [Capability; 3] = [
        Capability::ErrorEvent,
        Capability::ErrorBacktrace,
        Capability::MonotonicDuration,
    ];

    /// Column whose presence grants this capability.
    pub fn column(&self) -> &'static str {
        match self {
            Capability::ErrorEvent => "error_event",
            Capability::ErrorBacktrace => "error_backtrace",
            Capability::MonotonicDuration => "duration",
        }
    }

    fn slot(&self) -> usize {
        match self {
            Capability::ErrorEvent => 0,
            Capability::ErrorBacktrace => 1,
            Capability::MonotonicDuration => 2,
        }
    }
}

// Starts all-false; entries only ever flip to true. No teardown.
static MIGRATION_WARNED: [AtomicBool; 3] = [
    AtomicBool::new(false),
    AtomicBool::new(false),
    AtomicBool::new(false),
];

/// Emit the pending-migration warning for `capability` unless this process
/// already has. Returns true when this call logged.
pub fn warn_migration_pending(capability: Capability, table: &str) -> bool {
    if MIGRATION_WARNED[capability.slot()].swap(true, Ordering::AcqRel) {
        return false;
    }
    log::warn!(
        "column {}.{} is missing; a jobdeck migration is pending. \
         Falling back to legacy behaviour until it is applied.",
        table,
        capability.column()
    );
    true
}

/// Which optional columns the backing store carries.
///
/// `Default` is the legacy schema: nothing optional is present.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SchemaCapabilities {
    pub error_event: bool,
    pub error_backtrace: bool,
    pub monotonic_duration: bool,
}

impl SchemaCapabilities {
    /// Fully migrated schema.
    pub fn current() -> Self {
        Self {
            error_event: true,
            error_backtrace: true,
            monotonic_duration: true,
        }
    }

    /// Schema predating every optional column.
    pub fn legacy() -> Self {
        Self::default()
    }

    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::ErrorEvent => self.error_event,
            Capability::ErrorBacktrace => self.error_backtrace,
            Capability::MonotonicDuration => self.monotonic_duration,
        }
    }
}

/// Source of the live column list for a table.
pub trait ColumnCatalog: Send + Sync {
    fn column_names(&self, table: &str) -> Result<Vec<String>, DeckError>;
}

impl ColumnCatalog for Vec<String> {
    fn column_names(&self, _table: &str) -> Result<Vec<String>, DeckError> {
        Ok(self.clone())
    }
}

/// Memoized column probe over a [ColumnCatalog].
///
/// The catalog is consulted at most once per probe; every later question is
/// answered from the cached column set.
pub struct SchemaCapabilityProbe<C: ColumnCatalog> {
    catalog: C,
    table: String,
    columns: OnceLock<BTreeSet<String>>,
}

impl<C: ColumnCatalog> SchemaCapabilityProbe<C> {
    pub fn new(catalog: C, table: impl Into<String>) -> Self {
        Self {
            catalog,
            table: table.into(),
            columns: OnceLock::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn columns(&self) -> &BTreeSet<String> {
        self.columns
            .get_or_init(|| match self.catalog.column_names(&self.table) {
                Ok(names) => names.into_iter().collect(),
                Err(err) => {
                    log::warn!(
                        "could not inspect columns of {}; assuming legacy schema: {}",
                        self.table,
                        err
                    );
                    BTreeSet::new()
                }
            })
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns().contains(name)
    }

    pub fn supports(&self, capability: Capability) -> bool {
        if self.has_column(capability.column()) {
            return true;
        }
        warn_migration_pending(capability, &self.table);
        false
    }

    pub fn error_event_supported(&self) -> bool {
        self.supports(Capability::ErrorEvent)
    }

    pub fn backtrace_supported(&self) -> bool {
        self.supports(Capability::ErrorBacktrace)
    }

    pub fn monotonic_duration_supported(&self) -> bool {
        self.supports(Capability::MonotonicDuration)
    }

    /// Snapshot of every capability, for injection into calculators.
    pub fn capabilities(&self) -> SchemaCapabilities {
        SchemaCapabilities {
            error_event: self.error_event_supported(),
            error_backtrace: self.backtrace_supported(),
            monotonic_duration: self.monotonic_duration_supported(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone)]
    struct CountingCatalog {
        columns: Result<Vec<String>, String>,
        calls: Arc<Mutex<usize>>,
    }

    impl CountingCatalog {
        fn with_columns(columns: &[&str]) -> Self {
            Self {
                columns: Ok(columns.iter().map(|c| c.to_string()).collect()),
                calls: Arc::new(Mutex::new(0)),
            }
        }

        fn failing() -> Self {
            Self {
                columns: Err("no such table".to_string()),
                calls: Arc::new(Mutex::new(0)),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().expect("calls lock")
        }
    }

    impl ColumnCatalog for CountingCatalog {
        fn column_names(&self, _table: &str) -> Result<Vec<String>, DeckError> {
            *self.calls.lock().expect("calls lock") += 1;
            self.columns.clone().map_err(DeckError::Store)
        }
    }

    #[test]
    fn probe_reports_present_columns() {
        let catalog = CountingCatalog::with_columns(&[
            "id",
            "created_at",
            "error_event",
            "error_backtrace",
            "duration",
        ]);
        let probe = SchemaCapabilityProbe::new(catalog, "jobdeck_executions");
        assert_eq!(probe.capabilities(), SchemaCapabilities::current());
    }

    #[test]
    fn probe_falls_back_when_columns_missing() {
        let catalog = CountingCatalog::with_columns(&["id", "created_at", "error_backtrace"]);
        let probe = SchemaCapabilityProbe::new(catalog, "jobdeck_executions");
        assert!(!probe.error_event_supported());
        assert!(probe.backtrace_supported());
        assert!(!probe.monotonic_duration_supported());
    }

    #[test]
    fn probe_inspects_catalog_once() {
        let catalog = CountingCatalog::with_columns(&["duration"]);
        let probe = SchemaCapabilityProbe::new(catalog.clone(), "jobdeck_executions");
        for _ in 0..5 {
            assert!(probe.monotonic_duration_supported());
            assert!(!probe.error_event_supported());
        }
        let _ = probe.capabilities();
        assert_eq!(catalog.calls(), 1);
    }

    #[test]
    fn failing_catalog_means_legacy_schema() {
        let catalog = CountingCatalog::failing();
        let probe = SchemaCapabilityProbe::new(catalog.clone(), "jobdeck_executions");
        assert_eq!(probe.capabilities(), SchemaCapabilities::legacy());
        assert_eq!(probe.capabilities(), SchemaCapabilities::legacy());
        assert_eq!(catalog.calls(), 1);
    }

    #[test]
    fn migration_warning_is_emitted_at_most_once() {
        let _ = warn_migration_pending(Capability::ErrorEvent, "jobdeck_executions");
        assert!(!warn_migration_pending(
            Capability::ErrorEvent,
            "jobdeck_executions"
        ));
        assert!(!warn_migration_pending(Capability::ErrorEvent, "other_table"));
    }

    #[test]
    fn capabilities_lookup_by_kind() {
        let caps = SchemaCapabilities {
            error_event: false,
            error_backtrace: true,
            monotonic_duration: false,
        };
        assert!(!caps.supports(Capability::ErrorEvent));
        assert!(caps.supports(Capability::ErrorBacktrace));
        assert!(!caps.supports(Capability::MonotonicDuration));
        assert_eq!(Capability::MonotonicDuration.column(), "duration");
    }
}
