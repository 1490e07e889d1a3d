//! Structured predicate trees.
//!
//! Derived-name queries compile into the same tree, so generated SQL has a
//! single code path.

use crate::model::entity::EntityMeta;
use crate::query::page::Sort;
use crate::query::QueryValue;
use crate::repo::error::{RepoError, RepoResult};
use rusqlite::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
    In,
    NotIn,
}

impl Operator {
    fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Like => "LIKE",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
        }
    }

    pub fn takes_list(self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches every row.
    All,
    Compare {
        attribute: String,
        op: Operator,
        value: QueryValue,
    },
    Null {
        attribute: String,
        negated: bool,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn compare(attribute: impl Into<String>, op: Operator, value: impl Into<QueryValue>) -> Self {
        Self::Compare {
            attribute: attribute.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(attribute: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        Self::compare(attribute, Operator::Eq, value)
    }

    pub fn ne(attribute: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        Self::compare(attribute, Operator::Ne, value)
    }

    pub fn gt(attribute: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        Self::compare(attribute, Operator::Gt, value)
    }

    pub fn ge(attribute: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        Self::compare(attribute, Operator::Ge, value)
    }

    pub fn lt(attribute: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        Self::compare(attribute, Operator::Lt, value)
    }

    pub fn le(attribute: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        Self::compare(attribute, Operator::Le, value)
    }

    pub fn like(attribute: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::compare(attribute, Operator::Like, pattern.into())
    }

    pub fn is_in(attribute: impl Into<String>, values: impl Into<QueryValue>) -> Self {
        Self::compare(attribute, Operator::In, values)
    }

    pub fn not_in(attribute: impl Into<String>, values: impl Into<QueryValue>) -> Self {
        Self::compare(attribute, Operator::NotIn, values)
    }

    pub fn is_null(attribute: impl Into<String>) -> Self {
        Self::Null {
            attribute: attribute.into(),
            negated: false,
        }
    }

    pub fn is_not_null(attribute: impl Into<String>) -> Self {
        Self::Null {
            attribute: attribute.into(),
            negated: true,
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Self::All, other) | (other, Self::All) => other,
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), other) => {
                left.push(other);
                Self::And(left)
            }
            (left, right) => Self::And(vec![left, right]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match (self, other) {
            (Self::All, _) | (_, Self::All) => Self::All,
            (Self::Or(mut left), Self::Or(right)) => {
                left.extend(right);
                Self::Or(left)
            }
            (Self::Or(mut left), other) => {
                left.push(other);
                Self::Or(left)
            }
            (left, right) => Self::Or(vec![left, right]),
        }
    }

    /// Renders the predicate against `meta`'s table alias, appending bind
    /// values in placeholder order.
    pub(crate) fn to_sql(
        &self,
        meta: &EntityMeta,
        context: &str,
        binds: &mut Vec<Value>,
    ) -> RepoResult<String> {
        match self {
            Self::All => Ok("1 = 1".to_string()),
            Self::Compare {
                attribute,
                op,
                value,
            } => {
                let column = meta.qualified(meta.require_field(attribute, context)?.column);
                compare_sql(&column, *op, value, context, binds)
            }
            Self::Null { attribute, negated } => {
                let column = meta.qualified(meta.require_field(attribute, context)?.column);
                Ok(if *negated {
                    format!("{column} IS NOT NULL")
                } else {
                    format!("{column} IS NULL")
                })
            }
            Self::And(parts) => join_parts(parts, " AND ", "1 = 1", meta, context, binds),
            Self::Or(parts) => join_parts(parts, " OR ", "1 = 0", meta, context, binds),
        }
    }
}

fn compare_sql(
    column: &str,
    op: Operator,
    value: &QueryValue,
    context: &str,
    binds: &mut Vec<Value>,
) -> RepoResult<String> {
    if op.takes_list() {
        let values = value.values();
        if values.is_empty() {
            // IN () is not valid SQL.
            let always = if op == Operator::In { "1 = 0" } else { "1 = 1" };
            return Ok(always.to_string());
        }
        binds.extend(values.iter().cloned());
        let marks = vec!["?"; values.len()].join(", ");
        return Ok(format!("{column} {} ({marks})", op.sql()));
    }

    let QueryValue::Single(value) = value else {
        return Err(RepoError::binding(
            context,
            format!("operator `{}` on `{column}` expects a single value", op.sql()),
        ));
    };
    match (op, value) {
        (Operator::Eq, Value::Null) => Ok(format!("{column} IS NULL")),
        (Operator::Ne, Value::Null) => Ok(format!("{column} IS NOT NULL")),
        _ => {
            binds.push(value.clone());
            Ok(format!("{column} {} ?", op.sql()))
        }
    }
}

fn join_parts(
    parts: &[Predicate],
    separator: &str,
    empty: &str,
    meta: &EntityMeta,
    context: &str,
    binds: &mut Vec<Value>,
) -> RepoResult<String> {
    if parts.is_empty() {
        return Ok(empty.to_string());
    }
    let rendered = parts
        .iter()
        .map(|part| part.to_sql(meta, context, binds).map(|sql| format!("({sql})")))
        .collect::<RepoResult<Vec<_>>>()?;
    Ok(rendered.join(separator))
}

/// Predicate plus result shaping for generated entity queries.
#[derive(Debug, Clone, PartialEq)]
pub struct Criteria {
    pub predicate: Predicate,
    pub sort: Sort,
    pub limit: Option<usize>,
}

impl Default for Criteria {
    fn default() -> Self {
        Self::matching(Predicate::All)
    }
}

impl Criteria {
    pub fn matching(predicate: Predicate) -> Self {
        Self {
            predicate,
            sort: Sort::unsorted(),
            limit: None,
        }
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}
