//! Entity contract and static mapping metadata.
//!
//! # Responsibility
//! - Describe how an entity type maps onto its table (`EntityMeta`).
//! - Define the `Entity` trait the generic repository and session rely on.
//!
//! # Invariants
//! - `id()` is `None` exactly while the instance is transient.
//! - Attribute names are matched case-sensitively.
//! - `field_values()` yields only `Basic` and `Reference` attributes, in
//!   declaration order; ids, versions and audit columns are written by the
//!   session itself.

use crate::model::audit::AuditFields;
use crate::query::row::ResultRow;
use crate::repo::error::{RepoError, RepoResult};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

/// Surrogate key shared by every entity table.
pub type EntityId = i64;

/// Role a mapped attribute plays in persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Id,
    Basic,
    /// Many-to-one reference stored as a foreign key column.
    Reference,
    Version,
    Audit,
}

/// One mapped attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMeta {
    pub attribute: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
}

impl FieldMeta {
    /// Whether query-by-example probes may match on this attribute.
    pub fn is_probe_candidate(&self) -> bool {
        matches!(
            self.kind,
            FieldKind::Id | FieldKind::Basic | FieldKind::Reference
        )
    }
}

/// Many-to-one association that queries can join and fetch.
#[derive(Debug)]
pub struct RelationMeta {
    pub attribute: &'static str,
    /// Foreign key column on the owning table.
    pub join_column: &'static str,
    pub target: &'static EntityMeta,
}

impl RelationMeta {
    /// Column alias prefix used when the target row is fetched with the owner.
    pub fn fetch_prefix(&self) -> String {
        format!("fetch_{}_", self.attribute)
    }

    pub(crate) fn join_sql(&self, owner: &EntityMeta) -> String {
        format!(
            "LEFT JOIN {table} {alias} ON {alias}.{id} = {owner}.{fk}",
            table = self.target.table,
            alias = self.target.alias,
            id = self.target.id_column,
            owner = owner.alias,
            fk = self.join_column,
        )
    }

    pub(crate) fn fetch_columns(&self) -> String {
        let prefix = self.fetch_prefix();
        self.target
            .fields
            .iter()
            .map(|field| {
                format!(
                    "{}.{} AS {prefix}{}",
                    self.target.alias, field.column, field.column
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Static table mapping for one entity type.
#[derive(Debug)]
pub struct EntityMeta {
    /// Entity name used in errors and audit callbacks.
    pub name: &'static str,
    pub table: &'static str,
    /// Table alias used by generated SQL.
    pub alias: &'static str,
    pub id_column: &'static str,
    pub version_column: &'static str,
    pub fields: &'static [FieldMeta],
    pub relations: &'static [RelationMeta],
}

impl EntityMeta {
    pub fn field(&self, attribute: &str) -> Option<&'static FieldMeta> {
        let fields: &'static [FieldMeta] = self.fields;
        fields.iter().find(|field| field.attribute == attribute)
    }

    pub fn relation(&self, attribute: &str) -> Option<&'static RelationMeta> {
        let relations: &'static [RelationMeta] = self.relations;
        relations
            .iter()
            .find(|relation| relation.attribute == attribute)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &'static str> {
        let fields: &'static [FieldMeta] = self.fields;
        fields.iter().map(|field| field.attribute)
    }

    /// Resolves `attribute` to its column, failing with `UnknownField`.
    pub(crate) fn require_field(
        &self,
        attribute: &str,
        context: &str,
    ) -> RepoResult<&'static FieldMeta> {
        self.field(attribute).ok_or_else(|| RepoError::UnknownField {
            entity: self.name,
            field: attribute.to_string(),
            query: context.to_string(),
        })
    }

    pub(crate) fn require_relation(
        &self,
        attribute: &str,
        context: &str,
    ) -> RepoResult<&'static RelationMeta> {
        self.relation(attribute)
            .ok_or_else(|| RepoError::UnknownField {
                entity: self.name,
                field: attribute.to_string(),
                query: context.to_string(),
            })
    }

    pub(crate) fn qualified(&self, column: &str) -> String {
        format!("{}.{}", self.alias, column)
    }
}

/// Lifecycle of an entity instance relative to one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    /// Never persisted; no id.
    Transient,
    /// Tracked by the unit of work; changes are flushed.
    Managed,
    /// Has an id but is not tracked by this unit of work.
    Detached,
    /// Scheduled for deletion at the next flush.
    Removed,
}

/// Persistent entity type.
///
/// Equality of implementors is by identifier only: two instances are equal
/// iff both carry an id and the ids match.
pub trait Entity: Clone + Send + 'static {
    fn meta() -> &'static EntityMeta;

    fn id(&self) -> Option<EntityId>;

    /// Called once, right after the first insert.
    fn assign_id(&mut self, id: EntityId);

    fn version(&self) -> i64;

    fn set_version(&mut self, version: i64);

    fn field_values(&self) -> Vec<(&'static str, Value)>;

    fn from_row(row: &ResultRow) -> RepoResult<Self>;

    /// Rejects state that must never reach the store.
    fn validate(&self) -> RepoResult<()> {
        Ok(())
    }

    fn audit(&self) -> Option<&AuditFields> {
        None
    }

    fn audit_mut(&mut self) -> Option<&mut AuditFields> {
        None
    }

    /// Copies associations fetched by `loaded` onto an already managed copy.
    fn absorb_fetched(&mut self, _loaded: &Self) {}
}
