//! Team entity.
//!
//! # Invariants
//! - `members` is a non-owning back-reference list; it is never written and
//!   only filled by `TeamRepository::load_members`.

use crate::model::entity::{Entity, EntityId, EntityMeta, FieldKind, FieldMeta};
use crate::model::member::MemberId;
use crate::query::row::ResultRow;
use crate::repo::error::RepoResult;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

pub type TeamId = EntityId;

pub static TEAM_META: EntityMeta = EntityMeta {
    name: "Team",
    table: "team",
    alias: "t",
    id_column: "team_id",
    version_column: "version",
    fields: &[
        FieldMeta {
            attribute: "id",
            column: "team_id",
            kind: FieldKind::Id,
        },
        FieldMeta {
            attribute: "name",
            column: "name",
            kind: FieldKind::Basic,
        },
        FieldMeta {
            attribute: "version",
            column: "version",
            kind: FieldKind::Version,
        },
    ],
    relations: &[],
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: Option<TeamId>,
    pub name: String,
    #[serde(default)]
    pub members: Vec<MemberId>,
    pub version: i64,
}

impl Team {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            members: Vec::new(),
            version: 0,
        }
    }
}

impl PartialEq for Team {
    fn eq(&self, other: &Self) -> bool {
        matches!((self.id, other.id), (Some(left), Some(right)) if left == right)
    }
}

impl Entity for Team {
    fn meta() -> &'static EntityMeta {
        &TEAM_META
    }

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn assign_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    fn field_values(&self) -> Vec<(&'static str, Value)> {
        vec![("name", Value::Text(self.name.clone()))]
    }

    fn from_row(row: &ResultRow) -> RepoResult<Self> {
        Ok(Self {
            id: Some(row.get_i64("team_id")?),
            name: row.get_text("name")?,
            members: Vec::new(),
            version: row.get_i64("version")?,
        })
    }
}
