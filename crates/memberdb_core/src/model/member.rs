//! Member entity.
//!
//! # Invariants
//! - `id` is assigned once, by the session, at first insert.
//! - `team` is lazy (`TeamRef::Unloaded`) unless a fetch directive loaded it.
//! - `address` is `None` when city, street and zipcode are all empty in the
//!   store.

use crate::model::audit::{
    AuditFields, CREATED_BY_COLUMN, CREATED_DATE_COLUMN, LAST_MODIFIED_BY_COLUMN,
    LAST_MODIFIED_DATE_COLUMN,
};
use crate::model::entity::{Entity, EntityId, EntityMeta, FieldKind, FieldMeta, RelationMeta};
use crate::model::team::{Team, TeamId, TEAM_META};
use crate::query::row::ResultRow;
use crate::repo::error::{RepoError, RepoResult};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

pub type MemberId = EntityId;

/// Relation name used by fetch directives for `Member::team`.
pub const TEAM_RELATION: &str = "team";

pub static MEMBER_META: EntityMeta = EntityMeta {
    name: "Member",
    table: "members",
    alias: "m",
    id_column: "member_id",
    version_column: "version",
    fields: &[
        FieldMeta {
            attribute: "id",
            column: "member_id",
            kind: FieldKind::Id,
        },
        FieldMeta {
            attribute: "name",
            column: "name",
            kind: FieldKind::Basic,
        },
        FieldMeta {
            attribute: "age",
            column: "age",
            kind: FieldKind::Basic,
        },
        FieldMeta {
            attribute: "team",
            column: "team_id",
            kind: FieldKind::Reference,
        },
        FieldMeta {
            attribute: "city",
            column: "city",
            kind: FieldKind::Basic,
        },
        FieldMeta {
            attribute: "street",
            column: "street",
            kind: FieldKind::Basic,
        },
        FieldMeta {
            attribute: "zipcode",
            column: "zipcode",
            kind: FieldKind::Basic,
        },
        FieldMeta {
            attribute: "version",
            column: "version",
            kind: FieldKind::Version,
        },
        FieldMeta {
            attribute: "createdDate",
            column: CREATED_DATE_COLUMN,
            kind: FieldKind::Audit,
        },
        FieldMeta {
            attribute: "lastModifiedDate",
            column: LAST_MODIFIED_DATE_COLUMN,
            kind: FieldKind::Audit,
        },
        FieldMeta {
            attribute: "createdBy",
            column: CREATED_BY_COLUMN,
            kind: FieldKind::Audit,
        },
        FieldMeta {
            attribute: "lastModifiedBy",
            column: LAST_MODIFIED_BY_COLUMN,
            kind: FieldKind::Audit,
        },
    ],
    relations: &[RelationMeta {
        attribute: TEAM_RELATION,
        join_column: "team_id",
        target: &TEAM_META,
    }],
};

/// Embedded postal address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub city: String,
    pub street: String,
    pub zipcode: String,
}

/// Many-to-one link from a member to its team.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamRef {
    /// Only the foreign key is known; resolve through the repository.
    Unloaded(TeamId),
    Loaded(Team),
}

impl TeamRef {
    pub fn id(&self) -> Option<TeamId> {
        match self {
            Self::Unloaded(id) => Some(*id),
            Self::Loaded(team) => team.id,
        }
    }

    pub fn loaded(&self) -> Option<&Team> {
        match self {
            Self::Unloaded(_) => None,
            Self::Loaded(team) => Some(team),
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: Option<MemberId>,
    pub name: String,
    pub age: i32,
    pub team: Option<TeamRef>,
    pub address: Option<Address>,
    /// Optimistic lock counter, bumped on every flushed update.
    pub version: i64,
    #[serde(default)]
    pub audit: AuditFields,
}

impl Member {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_age(name, 0)
    }

    pub fn with_age(name: impl Into<String>, age: i32) -> Self {
        Self {
            id: None,
            name: name.into(),
            age,
            team: None,
            address: None,
            version: 0,
            audit: AuditFields::default(),
        }
    }

    pub fn with_team(name: impl Into<String>, age: i32, team: &Team) -> Self {
        let mut member = Self::with_age(name, age);
        member.change_team(team);
        member
    }

    /// Points this member at `team`, keeping the team instance as loaded.
    pub fn change_team(&mut self, team: &Team) {
        self.team = Some(TeamRef::Loaded(team.clone()));
    }

    pub fn team_id(&self) -> Option<TeamId> {
        self.team.as_ref().and_then(TeamRef::id)
    }

    /// Loaded team, if a fetch directive or `resolve_team` produced one.
    pub fn loaded_team(&self) -> Option<&Team> {
        self.team.as_ref().and_then(TeamRef::loaded)
    }
}

impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        matches!((self.id, other.id), (Some(left), Some(right)) if left == right)
    }
}

impl Entity for Member {
    fn meta() -> &'static EntityMeta {
        &MEMBER_META
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
        let address = self.address.as_ref();
        vec![
            ("name", Value::Text(self.name.clone())),
            ("age", Value::Integer(i64::from(self.age))),
            ("team", Value::from(self.team_id())),
            ("city", Value::from(address.map(|a| a.city.clone()))),
            ("street", Value::from(address.map(|a| a.street.clone()))),
            ("zipcode", Value::from(address.map(|a| a.zipcode.clone()))),
        ]
    }

    fn from_row(row: &ResultRow) -> RepoResult<Self> {
        let age = row.get_i64("age")?;
        let age = i32::try_from(age)
            .map_err(|_| RepoError::InvalidData(format!("age `{age}` out of range in members.age")))?;

        let team = match row.get_opt_i64("team_id")? {
            None => None,
            Some(team_id) => match fetched_team(row)? {
                Some(team) => Some(TeamRef::Loaded(team)),
                None => Some(TeamRef::Unloaded(team_id)),
            },
        };

        let city = row.get_opt_text("city")?;
        let street = row.get_opt_text("street")?;
        let zipcode = row.get_opt_text("zipcode")?;
        let address = if city.is_none() && street.is_none() && zipcode.is_none() {
            None
        } else {
            Some(Address {
                city: city.unwrap_or_default(),
                street: street.unwrap_or_default(),
                zipcode: zipcode.unwrap_or_default(),
            })
        };

        Ok(Self {
            id: Some(row.get_i64("member_id")?),
            name: row.get_text("name")?,
            age,
            team,
            address,
            version: row.get_i64("version")?,
            audit: AuditFields::from_row(row)?,
        })
    }

    fn validate(&self) -> RepoResult<()> {
        if let Some(TeamRef::Loaded(team)) = &self.team {
            if team.id.is_none() {
                return Err(RepoError::InvalidArgument(format!(
                    "member `{}` references team `{}` which has not been saved",
                    self.name, team.name
                )));
            }
        }
        Ok(())
    }

    fn audit(&self) -> Option<&AuditFields> {
        Some(&self.audit)
    }

    fn audit_mut(&mut self) -> Option<&mut AuditFields> {
        Some(&mut self.audit)
    }

    fn absorb_fetched(&mut self, loaded: &Self) {
        let same_team = self.team_id() == loaded.team_id();
        let upgrade = !self.team.as_ref().is_some_and(TeamRef::is_loaded);
        if same_team && upgrade {
            if let Some(TeamRef::Loaded(team)) = &loaded.team {
                self.team = Some(TeamRef::Loaded(team.clone()));
            }
        }
    }
}

fn fetched_team(row: &ResultRow) -> RepoResult<Option<Team>> {
    let Some(relation) = MEMBER_META.relation(TEAM_RELATION) else {
        return Ok(None);
    };
    let fetched = row.prefixed(&relation.fetch_prefix());
    if !fetched.has("team_id") || fetched.get_opt_i64("team_id")?.is_none() {
        return Ok(None);
    }
    Team::from_row(&fetched).map(Some)
}
