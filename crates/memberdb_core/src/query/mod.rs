//! Query descriptors and their execution.
//!
//! # Responsibility
//! - Model the four descriptor kinds: derived-name predicates, named-parameter
//!   templates, structured criteria and raw positional SQL.
//! - Turn a descriptor plus its arguments into bound SQL and map the rows to
//!   entities, projections, scalars, pages or mutation counts.
//!
//! # Invariants
//! - Every execution flushes pending unit-of-work writes first.
//! - Bulk mutations clear the unit-of-work identity map afterwards.

use rusqlite::types::Value;
use std::collections::BTreeMap;

pub mod criteria;
pub mod derived;
pub mod executor;
pub mod page;
pub mod row;
pub mod template;

/// One bound argument. Lists expand into `(?, ?, ...)` where the query
/// expects a collection (`in :names`, derived `In`).
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Single(Value),
    List(Vec<Value>),
}

impl QueryValue {
    pub fn list<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<QueryValue>,
    {
        let mut flat = Vec::new();
        for value in values {
            match value.into() {
                Self::Single(value) => flat.push(value),
                Self::List(values) => flat.extend(values),
            }
        }
        Self::List(flat)
    }

    pub fn null() -> Self {
        Self::Single(Value::Null)
    }

    pub(crate) fn values(&self) -> &[Value] {
        match self {
            Self::Single(value) => std::slice::from_ref(value),
            Self::List(values) => values,
        }
    }
}

impl From<Value> for QueryValue {
    fn from(value: Value) -> Self {
        Self::Single(value)
    }
}

impl From<Vec<Value>> for QueryValue {
    fn from(values: Vec<Value>) -> Self {
        Self::List(values)
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        Self::Single(Value::Text(value.to_string()))
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        Self::Single(Value::Text(value))
    }
}

impl From<i32> for QueryValue {
    fn from(value: i32) -> Self {
        Self::Single(Value::Integer(i64::from(value)))
    }
}

impl From<i64> for QueryValue {
    fn from(value: i64) -> Self {
        Self::Single(Value::Integer(value))
    }
}

impl From<bool> for QueryValue {
    fn from(value: bool) -> Self {
        Self::Single(Value::Integer(i64::from(value)))
    }
}

impl<T: Into<QueryValue>> From<Option<T>> for QueryValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Single(Value::Null), Into::into)
    }
}

/// Named arguments for a [`template::TemplateQuery`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    values: BTreeMap<String, QueryValue>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&QueryValue> {
        self.values.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// SQL text with its positional bind values, ready for rusqlite.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct BoundQuery {
    pub sql: String,
    pub binds: Vec<Value>,
}

impl BoundQuery {
    pub fn new(sql: impl Into<String>, binds: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            binds,
        }
    }
}
