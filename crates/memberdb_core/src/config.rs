//! Store and session configuration.
//!
//! # Responsibility
//! - Carry the tunables shared by connection bootstrap and units of work.
//! - Deserialize from any serde format with per-field defaults.
//!
//! # Invariants
//! - Missing fields fall back to the documented `DEFAULT_*` constants.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long SQLite waits on a locked database file before `SQLITE_BUSY`.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// How long a unit of work blocks on a row lock held by another one.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 10_000;

/// Configuration for opened stores and the units of work running on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
    /// Pessimistic row lock wait limit in milliseconds.
    pub lock_timeout_ms: u64,
    /// Use WAL journaling for file databases.
    pub wal: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            wal: true,
        }
    }
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Returns a copy with a different row lock wait limit.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }
}
