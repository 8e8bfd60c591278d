//! Tunables passed in by the bootstrapper. The core reads no environment
//! directly.

use std::time::Duration;

/// Configuration for a [`crate::core::Core`] instance: a plain struct with
/// sensible defaults, resolved once at construction rather than re-read from
/// the environment on every tick.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the local SQLite database file.
    pub db_path: String,
    /// Consecutive failures before a row moves from `failed` to `abandoned`.
    pub max_retries: u32,
    /// Starting tick interval for the Sync Worker.
    pub base_interval: Duration,
    /// Tick interval the worker grows towards when there is no work.
    pub max_interval: Duration,
    /// Rows whose last activity is more recent than this are left for the
    /// Immediate Sync path instead of being picked up by the Worker.
    pub anti_race_window: Duration,
    /// Deadline applied to every outbound remote/credential call.
    pub per_call_timeout: Duration,
    /// Max rows fetched per `getPendingBatch` call.
    pub batch_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "daybook.sqlite3".to_string(),
            max_retries: 5,
            base_interval: Duration::from_secs(120),
            max_interval: Duration::from_secs(300),
            anti_race_window: Duration::from_secs(30),
            per_call_timeout: Duration::from_secs(30),
            batch_size: 50,
        }
    }
}
