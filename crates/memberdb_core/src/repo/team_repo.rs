//! Team repository.

use crate::model::member::MemberId;
use crate::model::team::{Team, TEAM_META};
use crate::query::derived::DerivedQuery;
use crate::query::executor::{self, QueryDescriptor, QueryOptions};
use crate::query::template::TemplateQuery;
use crate::query::{QueryParams, QueryValue};
use crate::repo::crud::CrudRepository;
use crate::repo::error::{RepoError, RepoResult};
use crate::session::UnitOfWork;

const MEMBER_IDS_SQL: &str =
    "SELECT m.member_id FROM members m WHERE m.team_id = :team_id ORDER BY m.member_id";

#[derive(Debug, Clone)]
pub struct TeamRepository {
    by_name: DerivedQuery,
    member_ids: TemplateQuery,
}

impl TeamRepository {
    pub fn new() -> RepoResult<Self> {
        Ok(Self {
            by_name: DerivedQuery::parse("findByName", &TEAM_META)?,
            member_ids: TemplateQuery::parse(MEMBER_IDS_SQL)?,
        })
    }

    pub fn find_by_name(&self, uow: &mut UnitOfWork<'_>, name: &str) -> RepoResult<Vec<Team>> {
        let args = [QueryValue::from(name)];
        executor::find_entities(
            uow,
            &QueryDescriptor::Derived {
                query: &self.by_name,
                args: &args,
            },
            QueryOptions::default(),
        )
    }

    /// Fills `team.members` with the ids of the members pointing at it.
    ///
    /// The list is derived from `members.team_id`; editing it writes nothing.
    pub fn load_members(&self, uow: &mut UnitOfWork<'_>, team: &mut Team) -> RepoResult<()> {
        let team_id = team.id.ok_or_else(|| {
            RepoError::InvalidArgument(format!("team `{}` has not been saved", team.name))
        })?;
        let params = QueryParams::new().bind("team_id", team_id);
        team.members = executor::find_scalars::<MemberId>(
            uow,
            &QueryDescriptor::Template {
                query: &self.member_ids,
                params: &params,
            },
        )?;
        Ok(())
    }
}

impl CrudRepository<Team> for TeamRepository {}
