//! Concrete member views and DTOs.

use super::{ProjectedField, Projection, ProjectionShape};
use crate::query::row::ResultRow;
use crate::repo::error::RepoResult;
use serde::Serialize;

static NAME_ONLY_SHAPE: ProjectionShape = ProjectionShape {
    name: "NameOnly",
    fields: &[ProjectedField::new("name", "name")],
};

static USERNAME_ONLY_SHAPE: ProjectionShape = ProjectionShape {
    name: "UsernameOnlyDto",
    fields: &[ProjectedField::new("username", "name")],
};

static MEMBER_DTO_SHAPE: ProjectionShape = ProjectionShape {
    name: "MemberDto",
    fields: &[
        ProjectedField::new("id", "id"),
        ProjectedField::new("name", "name"),
        ProjectedField::new("team_name", "team.name"),
    ],
};

static CLOSED_SHAPE: ProjectionShape = ProjectionShape {
    name: "ClosedProjection",
    fields: &[
        ProjectedField::new("name", "name"),
        ProjectedField::new("team_name", "team.name"),
    ],
};

static MEMBER_PROJECTION_SHAPE: ProjectionShape = ProjectionShape {
    name: "MemberProjection",
    fields: &[
        ProjectedField::new("id", "id"),
        ProjectedField::new("name", "name"),
        ProjectedField::new("team_name", "team.name"),
    ],
};

static MEMBER_SUMMARY_SHAPE: ProjectionShape = ProjectionShape {
    name: "MemberSummary",
    fields: &[
        ProjectedField::new("name", "name"),
        ProjectedField::new("age", "age"),
        ProjectedField::new("team_name", "team.name"),
    ],
};

/// Accessor-only view exposing the member name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameOnly {
    name: String,
}

impl NameOnly {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Projection for NameOnly {
    fn shape() -> &'static ProjectionShape {
        &NAME_ONLY_SHAPE
    }

    fn from_row(row: &ResultRow) -> RepoResult<Self> {
        Ok(Self {
            name: row.get_text("name")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsernameOnlyDto {
    pub username: String,
}

impl Projection for UsernameOnlyDto {
    fn shape() -> &'static ProjectionShape {
        &USERNAME_ONLY_SHAPE
    }

    fn from_row(row: &ResultRow) -> RepoResult<Self> {
        Ok(Self {
            username: row.get_text("username")?,
        })
    }
}

/// Member joined with its team name; `None` for a member without a team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberDto {
    pub id: i64,
    pub name: String,
    pub team_name: Option<String>,
}

impl Projection for MemberDto {
    fn shape() -> &'static ProjectionShape {
        &MEMBER_DTO_SHAPE
    }

    fn from_row(row: &ResultRow) -> RepoResult<Self> {
        Ok(Self {
            id: row.get_i64("id")?,
            name: row.get_text("name")?,
            team_name: row.get_opt_text("team_name")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamNameView {
    name: String,
}

impl TeamNameView {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Member name plus a nested view of its team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClosedProjection {
    name: String,
    team: Option<TeamNameView>,
}

impl ClosedProjection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn team(&self) -> Option<&TeamNameView> {
        self.team.as_ref()
    }
}

impl Projection for ClosedProjection {
    fn shape() -> &'static ProjectionShape {
        &CLOSED_SHAPE
    }

    fn from_row(row: &ResultRow) -> RepoResult<Self> {
        Ok(Self {
            name: row.get_text("name")?,
            team: row
                .get_opt_text("team_name")?
                .map(|name| TeamNameView { name }),
        })
    }
}

/// Native-query view; the team side of the join may be absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberProjection {
    id: i64,
    name: String,
    team_name: Option<String>,
}

impl MemberProjection {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn team_name(&self) -> Option<&str> {
        self.team_name.as_deref()
    }
}

impl Projection for MemberProjection {
    fn shape() -> &'static ProjectionShape {
        &MEMBER_PROJECTION_SHAPE
    }

    fn from_row(row: &ResultRow) -> RepoResult<Self> {
        Ok(Self {
            id: row.get_i64("id")?,
            name: row.get_text("name")?,
            team_name: row.get_opt_text("team_name")?,
        })
    }
}

/// Computed label, built at mapping time: `"<name> <age>"`, followed by
/// `" @<team>"` when the member has a team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberSummary {
    label: String,
}

impl MemberSummary {
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Projection for MemberSummary {
    fn shape() -> &'static ProjectionShape {
        &MEMBER_SUMMARY_SHAPE
    }

    fn from_row(row: &ResultRow) -> RepoResult<Self> {
        let mut label = format!("{} {}", row.get_text("name")?, row.get_i64("age")?);
        if let Some(team) = row.get_opt_text("team_name")? {
            label.push_str(" @");
            label.push_str(&team);
        }
        Ok(Self { label })
    }
}

#[cfg(test)]
mod tests {
    use super::{MemberSummary, Projection};
    use crate::query::row::ResultRow;
    use rusqlite::types::Value;

    #[test]
    fn summary_label_is_computed_from_columns() {
        let row = ResultRow::new(vec![
            ("name".to_string(), Value::Text("m1".to_string())),
            ("age".to_string(), Value::Integer(10)),
            ("team_name".to_string(), Value::Text("teamA".to_string())),
        ]);
        assert_eq!(MemberSummary::from_row(&row).unwrap().label(), "m1 10 @teamA");

        let row = ResultRow::new(vec![
            ("name".to_string(), Value::Text("m2".to_string())),
            ("age".to_string(), Value::Integer(0)),
            ("team_name".to_string(), Value::Null),
        ]);
        assert_eq!(MemberSummary::from_row(&row).unwrap().label(), "m2 0");
    }
}
