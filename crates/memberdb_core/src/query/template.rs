//! Hand-written SQL queries.
//!
//! `TemplateQuery` takes `:name` placeholders bound from [`QueryParams`];
//! `RawQuery` takes `?` placeholders bound positionally. Both may carry a
//! dedicated count query used by paged execution.
//!
//! # Invariants
//! - Placeholders inside single-quoted string literals are ignored.
//! - Template parameter names must match the placeholders exactly.

use crate::query::{BoundQuery, QueryParams, QueryValue};
use crate::repo::error::{RepoError, RepoResult};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value;
use std::collections::BTreeSet;

static NAMED_PARAM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"'(?:[^']|'')*'|:([A-Za-z_][A-Za-z0-9_]*)").expect("valid named param regex")
});
static POSITIONAL_PARAM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'(?:[^']|'')*'|\?").expect("valid positional param regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Param(String),
}

/// SQL with named placeholders.
#[derive(Debug, Clone)]
pub struct TemplateQuery {
    sql: String,
    segments: Vec<Segment>,
    names: BTreeSet<String>,
    count: Option<Box<TemplateQuery>>,
}

impl TemplateQuery {
    pub fn parse(sql: &str) -> RepoResult<Self> {
        let sql = normalize(sql)?;
        let mut segments = Vec::new();
        let mut names = BTreeSet::new();
        let mut cursor = 0;
        for captures in NAMED_PARAM_RE.captures_iter(&sql) {
            let Some(name) = captures.get(1) else {
                continue;
            };
            let Some(whole) = captures.get(0) else {
                continue;
            };
            if whole.start() > cursor {
                segments.push(Segment::Text(sql[cursor..whole.start()].to_string()));
            }
            segments.push(Segment::Param(name.as_str().to_string()));
            names.insert(name.as_str().to_string());
            cursor = whole.end();
        }
        if cursor < sql.len() {
            segments.push(Segment::Text(sql[cursor..].to_string()));
        }
        Ok(Self {
            sql,
            segments,
            names,
            count: None,
        })
    }

    /// Attaches a cheaper count query for paged execution. It may use any
    /// subset of this query's parameters.
    pub fn with_count_query(mut self, sql: &str) -> RepoResult<Self> {
        let count = Self::parse(sql)?;
        if let Some(extra) = count.names.iter().find(|name| !self.names.contains(*name)) {
            return Err(RepoError::invalid_query(
                sql,
                format!("count query parameter `:{extra}` is not declared by the main query"),
            ));
        }
        self.count = Some(Box::new(count));
        Ok(self)
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn has_count_query(&self) -> bool {
        self.count.is_some()
    }

    pub(crate) fn bind(&self, params: &QueryParams) -> RepoResult<BoundQuery> {
        let missing: Vec<&str> = self
            .names
            .iter()
            .map(String::as_str)
            .filter(|name| params.get(name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(RepoError::binding(
                &self.sql,
                format!("missing parameter(s): {}", missing.join(", ")),
            ));
        }
        let extra: Vec<&str> = params
            .names()
            .filter(|name| !self.names.contains(*name))
            .collect();
        if !extra.is_empty() {
            return Err(RepoError::binding(
                &self.sql,
                format!("undeclared parameter(s): {}", extra.join(", ")),
            ));
        }
        self.render(params)
    }

    pub(crate) fn bind_count(&self, params: &QueryParams) -> RepoResult<Option<BoundQuery>> {
        self.count
            .as_ref()
            .map(|count| count.render(params))
            .transpose()
    }

    fn render(&self, params: &QueryParams) -> RepoResult<BoundQuery> {
        let mut sql = String::with_capacity(self.sql.len());
        let mut binds = Vec::new();
        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Text(text) => sql.push_str(text),
                Segment::Param(name) => {
                    let value = params.get(name).ok_or_else(|| {
                        RepoError::binding(&self.sql, format!("missing parameter(s): {name}"))
                    })?;
                    match value {
                        QueryValue::Single(value) => {
                            sql.push('?');
                            binds.push(value.clone());
                        }
                        QueryValue::List(values) => {
                            // `in (:names)` already has its parentheses.
                            let parenthesized = sql.trim_end().ends_with('(')
                                && matches!(
                                    self.segments.get(index + 1),
                                    Some(Segment::Text(next)) if next.trim_start().starts_with(')')
                                );
                            sql.push_str(&list_marks(values.len(), !parenthesized));
                            binds.extend(values.iter().cloned());
                        }
                    }
                }
            }
        }
        Ok(BoundQuery::new(sql, binds))
    }
}

fn list_marks(len: usize, wrap: bool) -> String {
    let inner = if len == 0 {
        "NULL".to_string()
    } else {
        vec!["?"; len].join(", ")
    };
    if wrap {
        format!("({inner})")
    } else {
        inner
    }
}

/// SQL with `?` placeholders, executed as written.
#[derive(Debug, Clone)]
pub struct RawQuery {
    sql: String,
    placeholders: usize,
    count: Option<Box<RawQuery>>,
}

impl RawQuery {
    pub fn new(sql: &str) -> RepoResult<Self> {
        let sql = normalize(sql)?;
        let placeholders = POSITIONAL_PARAM_RE
            .find_iter(&sql)
            .filter(|found| found.as_str() == "?")
            .count();
        Ok(Self {
            sql,
            placeholders,
            count: None,
        })
    }

    /// Attaches a count query. It receives the leading arguments of the main
    /// query, as many as it has placeholders.
    pub fn with_count_query(mut self, sql: &str) -> RepoResult<Self> {
        let count = Self::new(sql)?;
        if count.placeholders > self.placeholders {
            return Err(RepoError::invalid_query(
                sql,
                format!(
                    "count query has {} placeholder(s), main query only {}",
                    count.placeholders, self.placeholders
                ),
            ));
        }
        self.count = Some(Box::new(count));
        Ok(self)
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn placeholder_count(&self) -> usize {
        self.placeholders
    }

    pub fn has_count_query(&self) -> bool {
        self.count.is_some()
    }

    pub(crate) fn bind(&self, args: &[Value]) -> RepoResult<BoundQuery> {
        if args.len() != self.placeholders {
            return Err(RepoError::binding(
                &self.sql,
                format!(
                    "expected {} positional argument(s), got {}",
                    self.placeholders,
                    args.len()
                ),
            ));
        }
        Ok(BoundQuery::new(self.sql.clone(), args.to_vec()))
    }

    pub(crate) fn bind_count(&self, args: &[Value]) -> RepoResult<Option<BoundQuery>> {
        Ok(self.count.as_ref().map(|count| {
            let leading = args.iter().take(count.placeholders).cloned().collect();
            BoundQuery::new(count.sql.clone(), leading)
        }))
    }
}

/// Trims whitespace and trailing semicolons so the SQL can be wrapped in a
/// subquery.
fn normalize(sql: &str) -> RepoResult<String> {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();
    if trimmed.is_empty() {
        return Err(RepoError::invalid_query(sql, "query text is empty"));
    }
    Ok(trimmed.to_string())
}
