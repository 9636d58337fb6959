//! Dashboard configuration from the environment.

use std::collections::HashMap;

use jobdeck_kernel::DeckError;

use crate::capabilities::SchemaCapabilities;
use crate::error_events::FilteringBacktraceCleaner;
#[cfg(feature = "sqlite-persistence")]
use crate::sqlite_execution_repository::SqliteExecutionRepository;

const ENV_SQLITE_DB: &str = "JOBDECK_SQLITE_DB";
const ENV_BACKTRACE_ROOT: &str = "JOBDECK_BACKTRACE_ROOT";
const ENV_BACKTRACE_SILENCE: &str = "JOBDECK_BACKTRACE_SILENCE";
const ENV_SCHEMA: &str = "JOBDECK_SCHEMA";

/// How schema capabilities are determined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaMode {
    /// Probe the live executions table.
    Auto,
    /// Assume every optional column exists.
    Current,
    /// Assume no optional column exists.
    Legacy,
}

impl SchemaMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaMode::Auto => "auto",
            SchemaMode::Current => "current",
            SchemaMode::Legacy => "legacy",
        }
    }

    /// Pinned capabilities, or `None` when they must be probed.
    pub fn pinned(&self) -> Option<SchemaCapabilities> {
        match self {
            SchemaMode::Auto => None,
            SchemaMode::Current => Some(SchemaCapabilities::current()),
            SchemaMode::Legacy => Some(SchemaCapabilities::legacy()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DashboardConfig {
    pub sqlite_db_path: String,
    pub backtrace_root: Option<String>,
    pub backtrace_silencers: Vec<String>,
    pub schema_mode: SchemaMode,
}

impl DashboardConfig {
    pub fn from_env(default_sqlite_db_path: &str) -> Result<Self, DeckError> {
        let mut envs = HashMap::new();
        for key in [
            ENV_SQLITE_DB,
            ENV_BACKTRACE_ROOT,
            ENV_BACKTRACE_SILENCE,
            ENV_SCHEMA,
        ] {
            if let Ok(value) = std::env::var(key) {
                envs.insert(key.to_string(), value);
            }
        }
        Self::from_env_map(default_sqlite_db_path, &envs)
    }

    fn from_env_map(
        default_sqlite_db_path: &str,
        envs: &HashMap<String, String>,
    ) -> Result<Self, DeckError> {
        let sqlite_db_path = envs
            .get(ENV_SQLITE_DB)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default_sqlite_db_path.to_string());
        let backtrace_root = envs
            .get(ENV_BACKTRACE_ROOT)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let backtrace_silencers = envs
            .get(ENV_BACKTRACE_SILENCE)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let schema_raw = envs
            .get(ENV_SCHEMA)
            .map(|v| v.trim().to_ascii_lowercase())
            .unwrap_or_else(|| "auto".to_string());
        let schema_mode = match schema_raw.as_str() {
            "auto" => SchemaMode::Auto,
            "current" => SchemaMode::Current,
            "legacy" => SchemaMode::Legacy,
            other => {
                return Err(DeckError::Config(format!(
                    "invalid {}='{}'. expected one of: auto, current, legacy",
                    ENV_SCHEMA, other
                )));
            }
        };

        Ok(Self {
            sqlite_db_path,
            backtrace_root,
            backtrace_silencers,
            schema_mode,
        })
    }

    pub fn backtrace_cleaner(&self) -> FilteringBacktraceCleaner {
        let mut cleaner = FilteringBacktraceCleaner::new();
        if let Some(root) = &self.backtrace_root {
            cleaner = cleaner.with_root(root.clone());
        }
        for pattern in &self.backtrace_silencers {
            cleaner = cleaner.with_silencer(pattern.clone());
        }
        cleaner
    }

    /// Open the store. A pinned schema mode skips probing and fails with a
    /// config error when the table lacks a pinned column.
    #[cfg(feature = "sqlite-persistence")]
    pub fn open_repository(&self) -> Result<SqliteExecutionRepository, DeckError> {
        let opened = match self.schema_mode.pinned() {
            Some(capabilities) => {
                SqliteExecutionRepository::open_pinned(&self.sqlite_db_path, capabilities)
            }
            None => SqliteExecutionRepository::new(&self.sqlite_db_path),
        };
        opened.map_err(|e| match e {
            DeckError::Config(msg) => DeckError::Config(format!(
                "{}='{}': {}",
                ENV_SCHEMA,
                self.schema_mode.as_str(),
                msg
            )),
            other => DeckError::Store(format!(
                "open execution store {}='{}': {}",
                ENV_SQLITE_DB, self.sqlite_db_path, other
            )),
        })
    }
}
