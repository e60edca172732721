//! Registry configuration from environment variables.
//!
//! - `ACCORD_DB_PATH`: SQLite database file path (unset: in-memory store)
//! - `ACCORD_LOCK_TIMEOUT_MS`: lock acquisition bound (default: 5000)
//! - `ACCORD_OVERDUE_SECS`: age after which IN_PROGRESS contracts are
//!   breached by the overdue sweep (unset: no sweep)

use std::time::Duration;

use tracing::warn;

pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub db_path: Option<String>,
    pub lock_timeout: Duration,
    pub overdue_after: Option<Duration>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            db_path: None,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            overdue_after: None,
        }
    }
}

impl RegistryConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Unparseable numbers fall back to
    /// their defaults with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("ACCORD_DB_PATH").filter(|path| !path.trim().is_empty());

        let lock_timeout_ms = match lookup("ACCORD_LOCK_TIMEOUT_MS") {
            Some(raw) => raw.trim().parse::<u64>().unwrap_or_else(|_| {
                warn!(value = %raw, "invalid ACCORD_LOCK_TIMEOUT_MS, using default");
                DEFAULT_LOCK_TIMEOUT_MS
            }),
            None => DEFAULT_LOCK_TIMEOUT_MS,
        };

        let overdue_after = lookup("ACCORD_OVERDUE_SECS").and_then(|raw| {
            match raw.trim().parse::<u64>() {
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => {
                    warn!(value = %raw, "invalid ACCORD_OVERDUE_SECS, overdue sweep disabled");
                    None
                }
            }
        });

        RegistryConfig {
            db_path,
            lock_timeout: Duration::from_millis(lock_timeout_ms),
            overdue_after,
        }
    }

    pub fn with_db_path(mut self, path: impl Into<String>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_overdue_after(mut self, age: Duration) -> Self {
        self.overdue_after = Some(age);
        self
    }
}
