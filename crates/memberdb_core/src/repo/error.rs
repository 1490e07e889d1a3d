//! Repository error taxonomy.
//!
//! # Responsibility
//! - Give every data-access failure a typed variant callers can match on.
//! - Translate SQLite failure codes into semantic variants.
//!
//! # Invariants
//! - Nothing in the data-access layer retries; every error reaches the caller.

use crate::db::DbError;
use crate::model::entity::EntityId;
use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Data-access error for entity persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    /// No row exists for the requested key.
    NotFound { entity: &'static str, key: String },
    /// A single-result query matched more than one row.
    NonUniqueResult { query: String, count: usize },
    /// Supplied parameters do not match the query's declared placeholders.
    ParameterBinding { query: String, message: String },
    /// A query or projection referenced an attribute the entity does not have.
    UnknownField {
        entity: &'static str,
        field: String,
        query: String,
    },
    /// A query definition cannot be parsed or compiled.
    InvalidQuery { query: String, message: String },
    /// Optimistic version mismatch or row lock acquisition failure.
    ConcurrencyConflict {
        entity: &'static str,
        id: Option<EntityId>,
        reason: String,
    },
    /// Store-level integrity failure (foreign key, not null, unique).
    ConstraintViolation(String),
    /// Caller-supplied argument outside its contract.
    InvalidArgument(String),
    /// Persisted row cannot be decoded into the requested shape.
    InvalidData(String),
    Db(DbError),
}

impl RepoError {
    pub(crate) fn not_found(entity: &'static str, id: EntityId) -> Self {
        Self::NotFound {
            entity,
            key: id.to_string(),
        }
    }

    pub(crate) fn binding(query: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ParameterBinding {
            query: query.into(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid_query(query: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            query: query.into(),
            message: message.into(),
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { entity, key } => write!(f, "{entity} not found: {key}"),
            Self::NonUniqueResult { query, count } => write!(
                f,
                "query `{query}` expected at most one result but matched {count}"
            ),
            Self::ParameterBinding { query, message } => {
                write!(f, "parameter binding failed for `{query}`: {message}")
            }
            Self::UnknownField {
                entity,
                field,
                query,
            } => write!(f, "`{query}` references unknown {entity} field `{field}`"),
            Self::InvalidQuery { query, message } => {
                write!(f, "invalid query `{query}`: {message}")
            }
            Self::ConcurrencyConflict { entity, id, reason } => match id {
                Some(id) => write!(f, "concurrent modification of {entity} {id}: {reason}"),
                None => write!(f, "concurrent modification of {entity}: {reason}"),
            },
            Self::ConstraintViolation(message) => write!(f, "constraint violation: {message}"),
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        classify_sqlite_error(&value).unwrap_or_else(|| Self::Db(DbError::Sqlite(value)))
    }
}

fn classify_sqlite_error(err: &rusqlite::Error) -> Option<RepoError> {
    let rusqlite::Error::SqliteFailure(failure, message) = err else {
        return None;
    };
    let detail = message.clone().unwrap_or_else(|| failure.to_string());
    match failure.code {
        ErrorCode::ConstraintViolation => Some(RepoError::ConstraintViolation(detail)),
        ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
            Some(RepoError::ConcurrencyConflict {
                entity: "database",
                id: None,
                reason: detail,
            })
        }
        _ => None,
    }
}
