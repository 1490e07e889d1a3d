//! Named-column result rows.
//!
//! Every query path (generated, template, raw) decodes its rows into a
//! `ResultRow` first, so entity and projection mapping never see rusqlite
//! types other than `Value`.
//!
//! Column lookup is ASCII case-insensitive, like SQL identifiers; when two
//! columns share a name the first one wins.

use crate::repo::error::{RepoError, RepoResult};
use rusqlite::types::Value;
use rusqlite::Row;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRow {
    columns: Vec<(String, Value)>,
}

impl ResultRow {
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }

    pub(crate) fn read(row: &Row<'_>, names: &[String]) -> rusqlite::Result<Self> {
        let mut columns = Vec::with_capacity(names.len());
        for (index, name) in names.iter().enumerate() {
            columns.push((name.clone(), row.get::<_, Value>(index)?));
        }
        Ok(Self { columns })
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn has(&self, name: &str) -> bool {
        self.value(name).is_some()
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(column, _)| column.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    /// Value of the first column, for scalar results.
    pub fn first(&self) -> Option<&Value> {
        self.columns.first().map(|(_, value)| value)
    }

    /// Columns whose names start with `prefix`, with the prefix stripped.
    pub fn prefixed(&self, prefix: &str) -> ResultRow {
        let columns = self
            .columns
            .iter()
            .filter_map(|(name, value)| {
                let head = name.get(..prefix.len())?;
                if head.eq_ignore_ascii_case(prefix) {
                    Some((name[prefix.len()..].to_string(), value.clone()))
                } else {
                    None
                }
            })
            .collect();
        ResultRow { columns }
    }

    /// Keeps exactly the `names` columns, in that order.
    ///
    /// Fails when one of them is absent from the row.
    pub fn restrict<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> RepoResult<ResultRow> {
        let mut columns = Vec::new();
        for name in names {
            let value = self.value(name).ok_or_else(|| {
                RepoError::InvalidData(format!("result row has no column `{name}`"))
            })?;
            columns.push((name.to_string(), value.clone()));
        }
        Ok(ResultRow { columns })
    }

    pub fn get_i64(&self, name: &str) -> RepoResult<i64> {
        self.get_opt_i64(name)?
            .ok_or_else(|| RepoError::InvalidData(format!("column `{name}` is null")))
    }

    pub fn get_opt_i64(&self, name: &str) -> RepoResult<Option<i64>> {
        match self.require(name)? {
            Value::Null => Ok(None),
            Value::Integer(value) => Ok(Some(*value)),
            other => Err(type_mismatch(name, "integer", other)),
        }
    }

    pub fn get_i32(&self, name: &str) -> RepoResult<i32> {
        let value = self.get_i64(name)?;
        i32::try_from(value).map_err(|_| {
            RepoError::InvalidData(format!("column `{name}` value {value} overflows i32"))
        })
    }

    pub fn get_text(&self, name: &str) -> RepoResult<String> {
        self.get_opt_text(name)?
            .ok_or_else(|| RepoError::InvalidData(format!("column `{name}` is null")))
    }

    pub fn get_opt_text(&self, name: &str) -> RepoResult<Option<String>> {
        match self.require(name)? {
            Value::Null => Ok(None),
            Value::Text(value) => Ok(Some(value.clone())),
            other => Err(type_mismatch(name, "text", other)),
        }
    }

    fn require(&self, name: &str) -> RepoResult<&Value> {
        self.value(name)
            .ok_or_else(|| RepoError::InvalidData(format!("result row has no column `{name}`")))
    }
}

fn type_mismatch(name: &str, expected: &str, actual: &Value) -> RepoError {
    RepoError::InvalidData(format!(
        "column `{name}` expected {expected}, got {:?}",
        actual.data_type()
    ))
}
