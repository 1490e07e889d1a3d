//! Audit metadata and the interceptor hook that stamps it.

use crate::query::row::ResultRow;
use crate::repo::error::RepoResult;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub const CREATED_DATE_COLUMN: &str = "created_date";
pub const LAST_MODIFIED_DATE_COLUMN: &str = "last_modified_date";
pub const CREATED_BY_COLUMN: &str = "created_by";
pub const LAST_MODIFIED_BY_COLUMN: &str = "last_modified_by";

/// Creation/modification stamps. Dates are Unix epoch milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFields {
    pub created_date: Option<i64>,
    pub last_modified_date: Option<i64>,
    pub created_by: Option<String>,
    pub last_modified_by: Option<String>,
}

impl AuditFields {
    pub(crate) fn column_values(&self) -> [(&'static str, Value); 4] {
        [
            (CREATED_DATE_COLUMN, Value::from(self.created_date)),
            (LAST_MODIFIED_DATE_COLUMN, Value::from(self.last_modified_date)),
            (CREATED_BY_COLUMN, Value::from(self.created_by.clone())),
            (LAST_MODIFIED_BY_COLUMN, Value::from(self.last_modified_by.clone())),
        ]
    }

    pub(crate) fn from_row(row: &ResultRow) -> RepoResult<Self> {
        Ok(Self {
            created_date: row.get_opt_i64(CREATED_DATE_COLUMN)?,
            last_modified_date: row.get_opt_i64(LAST_MODIFIED_DATE_COLUMN)?,
            created_by: row.get_opt_text(CREATED_BY_COLUMN)?,
            last_modified_by: row.get_opt_text(LAST_MODIFIED_BY_COLUMN)?,
        })
    }
}

/// Hook invoked by the session whenever an audited entity is written.
///
/// The returned created fields are ignored when `is_new` is false; the
/// session keeps the stamps recorded at insert.
pub trait AuditInterceptor: Send + Sync {
    fn audit(&self, entity: &str, is_new: bool, current: &AuditFields) -> AuditFields;
}

/// Stamps the wall clock and a fixed actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemAuditor {
    actor: String,
}

impl SystemAuditor {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
        }
    }

    /// Uses a random UUID as actor, for hosts without authenticated users.
    pub fn with_random_actor() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }
}

impl AuditInterceptor for SystemAuditor {
    fn audit(&self, _entity: &str, is_new: bool, current: &AuditFields) -> AuditFields {
        let now = now_epoch_ms();
        if is_new {
            return AuditFields {
                created_date: Some(now),
                last_modified_date: Some(now),
                created_by: Some(self.actor.clone()),
                last_modified_by: Some(self.actor.clone()),
            };
        }
        AuditFields {
            last_modified_date: Some(now),
            last_modified_by: Some(self.actor.clone()),
            ..current.clone()
        }
    }
}

/// Current time in Unix epoch milliseconds; 0 if the clock predates the epoch.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
