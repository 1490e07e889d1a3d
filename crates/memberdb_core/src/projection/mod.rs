//! Partial result shapes.
//!
//! # Responsibility
//! - Describe which columns a view or DTO exposes (`ProjectionShape`).
//! - Map a result row into that shape without materializing an entity.
//!
//! # Invariants
//! - `from_row` only ever sees the declared aliases; every other column of
//!   the source row is dropped before mapping.
//! - The same shape maps rows of generated, template and raw queries.

use crate::model::entity::{EntityMeta, FieldMeta, RelationMeta};
use crate::query::row::ResultRow;
use crate::repo::error::RepoResult;

pub mod views;

pub use views::{
    ClosedProjection, MemberDto, MemberProjection, MemberSummary, NameOnly, TeamNameView,
    UsernameOnlyDto,
};

/// One exposed column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectedField {
    /// Column name in the result row.
    pub alias: &'static str,
    /// Attribute path on the root entity: `name`, or `team.name` through a
    /// relation.
    pub source: &'static str,
}

impl ProjectedField {
    pub const fn new(alias: &'static str, source: &'static str) -> Self {
        Self { alias, source }
    }

    fn relation(&self) -> Option<&'static str> {
        self.source.split_once('.').map(|(relation, _)| relation)
    }
}

#[derive(Debug)]
pub struct ProjectionShape {
    pub name: &'static str,
    pub fields: &'static [ProjectedField],
}

impl ProjectionShape {
    pub fn aliases(&self) -> impl Iterator<Item = &'static str> {
        let fields: &'static [ProjectedField] = self.fields;
        fields.iter().map(|field| field.alias)
    }

    /// Relations the shape reads through, in first-use order.
    pub(crate) fn relations(&self) -> Vec<&'static str> {
        let mut relations = Vec::new();
        for relation in self.fields.iter().filter_map(ProjectedField::relation) {
            if !relations.contains(&relation) {
                relations.push(relation);
            }
        }
        relations
    }

    /// SELECT list for a generated query rooted at `meta`.
    pub(crate) fn select_sql(&self, meta: &'static EntityMeta, context: &str) -> RepoResult<String> {
        let mut columns = Vec::with_capacity(self.fields.len());
        for field in self.fields {
            let (owner, column) = resolve_source(meta, field.source, context)?;
            columns.push(format!("{}.{} AS {}", owner.alias, column.column, field.alias));
        }
        Ok(columns.join(", "))
    }
}

fn resolve_source(
    meta: &'static EntityMeta,
    source: &str,
    context: &str,
) -> RepoResult<(&'static EntityMeta, &'static FieldMeta)> {
    match source.split_once('.') {
        None => Ok((meta, meta.require_field(source, context)?)),
        Some((relation, attribute)) => {
            let relation: &'static RelationMeta = meta.require_relation(relation, context)?;
            Ok((
                relation.target,
                relation.target.require_field(attribute, context)?,
            ))
        }
    }
}

/// A read-only view over selected columns.
pub trait Projection: Sized {
    fn shape() -> &'static ProjectionShape;

    /// Builds the view from a row that holds exactly the shape's aliases.
    fn from_row(row: &ResultRow) -> RepoResult<Self>;
}

/// Restricts `row` to `P`'s aliases and maps it.
pub fn map_row<P: Projection>(row: &ResultRow) -> RepoResult<P> {
    let restricted = row.restrict(P::shape().aliases())?;
    P::from_row(&restricted)
}

#[cfg(test)]
mod tests {
    use super::{map_row, ClosedProjection, NameOnly, Projection};
    use crate::model::member::MEMBER_META;
    use crate::query::row::ResultRow;
    use rusqlite::types::Value;

    #[test]
    fn mapping_ignores_undeclared_columns() {
        let row = ResultRow::new(vec![
            ("member_id".to_string(), Value::Integer(1)),
            ("name".to_string(), Value::Text("m1".to_string())),
            ("age".to_string(), Value::Integer(0)),
        ]);
        let view: NameOnly = map_row(&row).unwrap();
        assert_eq!(view.name(), "m1");
    }

    #[test]
    fn nested_source_selects_through_relation() {
        let sql = ClosedProjection::shape()
            .select_sql(&MEMBER_META, "test")
            .unwrap();
        assert_eq!(sql, "m.name AS name, t.name AS team_name");
        assert_eq!(ClosedProjection::shape().relations(), vec!["team"]);
    }
}
