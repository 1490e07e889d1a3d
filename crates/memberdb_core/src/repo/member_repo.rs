//! Member repository: generic CRUD plus the member-specific queries.
//!
//! # Responsibility
//! - Resolve every derived-name query and parse every template once, at
//!   build time.
//! - Compose the custom extension so callers see one repository.
//!
//! # Invariants
//! - A `MemberRepository` that built successfully has no unresolved field
//!   references left; remaining failures are binding or store errors.

use crate::model::member::{Member, TeamRef, MEMBER_META, TEAM_RELATION};
use crate::model::team::Team;
use crate::projection::{MemberDto, MemberProjection, Projection};
use crate::query::derived::DerivedQuery;
use crate::query::executor::{self, QueryDescriptor, QueryOptions};
use crate::query::page::{Page, PageRequest};
use crate::query::template::{RawQuery, TemplateQuery};
use crate::query::{QueryParams, QueryValue};
use crate::repo::crud::{CrudRepository, SimpleRepository};
use crate::repo::error::{RepoError, RepoResult};
use crate::repo::member_custom::{MemberRepositoryCustom, MemberRepositoryCustomImpl};
use crate::session::UnitOfWork;
use log::info;
use rusqlite::types::Value;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};

const TEAM_FETCH: &[&str] = &[TEAM_RELATION];

/// Member columns plus the team row under `fetch_team_` aliases.
pub const MEMBER_WITH_TEAM_SELECT: &str = "SELECT m.*,
    t.team_id AS fetch_team_team_id,
    t.name AS fetch_team_name,
    t.version AS fetch_team_version
FROM members m
LEFT JOIN team t ON t.team_id = m.team_id";

const FIND_USER_SQL: &str = "SELECT m.* FROM members m WHERE m.name = :name AND m.age = :age";
const FIND_NAME_LIST_SQL: &str = "SELECT m.name FROM members m ORDER BY m.member_id";
const FIND_MEMBER_DTO_SQL: &str = "SELECT m.member_id AS id, m.name AS name, t.name AS team_name
FROM members m
JOIN team t ON t.team_id = m.team_id
ORDER BY m.member_id";
const FIND_BY_NAMES_SQL: &str = "SELECT m.* FROM members m WHERE m.name IN :names ORDER BY m.member_id";
const FIND_ONE_BY_NAME_SQL: &str = "SELECT m.* FROM members m WHERE m.name = :name";
const BULK_AGE_PLUS_SQL: &str = "UPDATE members SET age = age + 1 WHERE age >= :age";
const NATIVE_BY_NAME_SQL: &str = "SELECT * FROM members WHERE name = ?";
const NATIVE_PROJECTION_SQL: &str = "SELECT m.member_id AS id, m.name AS name, t.name AS team_name
FROM members m
LEFT JOIN team t ON t.team_id = m.team_id";
const NATIVE_PROJECTION_COUNT_SQL: &str = "SELECT COUNT(*) FROM members";

/// Builds a [`MemberRepository`].
#[derive(Default)]
pub struct MemberRepositoryBuilder {
    custom: Option<Box<dyn MemberRepositoryCustom>>,
    derived: Vec<String>,
}

impl MemberRepositoryBuilder {
    /// Replaces the default [`MemberRepositoryCustomImpl`].
    pub fn custom(mut self, custom: impl MemberRepositoryCustom + 'static) -> Self {
        self.custom = Some(Box::new(custom));
        self
    }

    /// Registers an extra derived finder, callable through
    /// [`MemberRepository::find_derived`].
    pub fn derived_query(mut self, method: impl Into<String>) -> Self {
        self.derived.push(method.into());
        self
    }

    pub fn build(self) -> RepoResult<MemberRepository> {
        let custom = match self.custom {
            Some(custom) => custom,
            None => Box::new(MemberRepositoryCustomImpl::new()?),
        };
        let mut extra = BTreeMap::new();
        for method in self.derived {
            let query = DerivedQuery::parse(&method, &MEMBER_META)?;
            extra.insert(method, query);
        }

        let repository = MemberRepository {
            by_name: DerivedQuery::parse("findByName", &MEMBER_META)?,
            by_name_and_age_gt: DerivedQuery::parse("findByNameAndAgeGreaterThan", &MEMBER_META)?,
            top3: DerivedQuery::parse("findTop3ABy", &MEMBER_META)?,
            by_age: DerivedQuery::parse("findByAge", &MEMBER_META)?,
            read_only_by_name: DerivedQuery::parse("findReadOnlyByName", &MEMBER_META)?,
            lock_by_name: DerivedQuery::parse("findLockByName", &MEMBER_META)?,
            projection_by_name: DerivedQuery::parse("findProjectionByName", &MEMBER_META)?,
            user: TemplateQuery::parse(FIND_USER_SQL)?,
            name_list: TemplateQuery::parse(FIND_NAME_LIST_SQL)?,
            member_dto: TemplateQuery::parse(FIND_MEMBER_DTO_SQL)?,
            by_names: TemplateQuery::parse(FIND_BY_NAMES_SQL)?,
            one_by_name: TemplateQuery::parse(FIND_ONE_BY_NAME_SQL)?,
            bulk_age_plus: TemplateQuery::parse(BULK_AGE_PLUS_SQL)?,
            with_team: TemplateQuery::parse(&format!(
                "{MEMBER_WITH_TEAM_SELECT} ORDER BY m.member_id"
            ))?,
            by_name_with_team: TemplateQuery::parse(&format!(
                "{MEMBER_WITH_TEAM_SELECT} WHERE m.name = :name ORDER BY m.member_id"
            ))?,
            native_by_name: RawQuery::new(NATIVE_BY_NAME_SQL)?,
            native_projection: RawQuery::new(NATIVE_PROJECTION_SQL)?
                .with_count_query(NATIVE_PROJECTION_COUNT_SQL)?,
            extra,
            custom,
        };
        info!(
            "event=repo_build module=repo status=ok repository=member registered_derived={}",
            repository.extra.len()
        );
        Ok(repository)
    }
}

pub struct MemberRepository {
    by_name: DerivedQuery,
    by_name_and_age_gt: DerivedQuery,
    top3: DerivedQuery,
    by_age: DerivedQuery,
    read_only_by_name: DerivedQuery,
    lock_by_name: DerivedQuery,
    projection_by_name: DerivedQuery,
    user: TemplateQuery,
    name_list: TemplateQuery,
    member_dto: TemplateQuery,
    by_names: TemplateQuery,
    one_by_name: TemplateQuery,
    bulk_age_plus: TemplateQuery,
    with_team: TemplateQuery,
    by_name_with_team: TemplateQuery,
    native_by_name: RawQuery,
    native_projection: RawQuery,
    extra: BTreeMap<String, DerivedQuery>,
    custom: Box<dyn MemberRepositoryCustom>,
}

impl MemberRepository {
    pub fn builder() -> MemberRepositoryBuilder {
        MemberRepositoryBuilder::default()
    }

    /// Repository with the default custom extension.
    pub fn new() -> RepoResult<Self> {
        Self::builder().build()
    }

    pub fn find_by_name(&self, uow: &mut UnitOfWork<'_>, name: &str) -> RepoResult<Vec<Member>> {
        self.derived(uow, &self.by_name, &[name.into()], QueryOptions::default())
    }

    pub fn find_by_name_and_age_greater_than(
        &self,
        uow: &mut UnitOfWork<'_>,
        name: &str,
        age: i32,
    ) -> RepoResult<Vec<Member>> {
        self.derived(
            uow,
            &self.by_name_and_age_gt,
            &[name.into(), age.into()],
            QueryOptions::default(),
        )
    }

    /// First three members by id.
    pub fn find_top3(&self, uow: &mut UnitOfWork<'_>) -> RepoResult<Vec<Member>> {
        self.derived(uow, &self.top3, &[], QueryOptions::default())
    }

    pub fn find_user(
        &self,
        uow: &mut UnitOfWork<'_>,
        name: &str,
        age: i32,
    ) -> RepoResult<Vec<Member>> {
        let params = QueryParams::new().bind("name", name).bind("age", age);
        self.template(uow, &self.user, &params, QueryOptions::default())
    }

    pub fn find_name_list(&self, uow: &mut UnitOfWork<'_>) -> RepoResult<Vec<String>> {
        let params = QueryParams::new();
        executor::find_scalars(
            uow,
            &QueryDescriptor::Template {
                query: &self.name_list,
                params: &params,
            },
        )
    }

    /// Members that have a team, with the team name.
    pub fn find_member_dto(&self, uow: &mut UnitOfWork<'_>) -> RepoResult<Vec<MemberDto>> {
        let params = QueryParams::new();
        executor::find_projections::<Member, MemberDto>(
            uow,
            &QueryDescriptor::Template {
                query: &self.member_dto,
                params: &params,
            },
        )
    }

    pub fn find_by_names(
        &self,
        uow: &mut UnitOfWork<'_>,
        names: &[&str],
    ) -> RepoResult<Vec<Member>> {
        let params = QueryParams::new().bind("names", QueryValue::list(names.iter().copied()));
        self.template(uow, &self.by_names, &params, QueryOptions::default())
    }

    /// `None` when nobody has `name`; `NonUniqueResult` when several do.
    pub fn find_one_by_name(
        &self,
        uow: &mut UnitOfWork<'_>,
        name: &str,
    ) -> RepoResult<Option<Member>> {
        let params = QueryParams::new().bind("name", name);
        executor::find_single(
            uow,
            &QueryDescriptor::Template {
                query: &self.one_by_name,
                params: &params,
            },
            QueryOptions::default(),
        )
    }

    pub fn find_by_age(
        &self,
        uow: &mut UnitOfWork<'_>,
        age: i32,
        request: &PageRequest,
    ) -> RepoResult<Page<Member>> {
        let args = [QueryValue::from(age)];
        executor::find_page(
            uow,
            &QueryDescriptor::Derived {
                query: &self.by_age,
                args: &args,
            },
            request,
            QueryOptions::default(),
        )
    }

    /// Adds one to the age of every member at least `age` years old.
    ///
    /// Clears the unit of work: managed members must be read again.
    pub fn bulk_age_plus(&self, uow: &mut UnitOfWork<'_>, age: i32) -> RepoResult<usize> {
        let params = QueryParams::new().bind("age", age);
        executor::execute_update(
            uow,
            &QueryDescriptor::Template {
                query: &self.bulk_age_plus,
                params: &params,
            },
        )
    }

    /// All members with their team loaded by a join.
    pub fn get_member_by_fetch(&self, uow: &mut UnitOfWork<'_>) -> RepoResult<Vec<Member>> {
        self.template(uow, &self.with_team, &QueryParams::new(), QueryOptions::default())
    }

    /// Members named `name`, with their team loaded.
    pub fn find_by_name_default(
        &self,
        uow: &mut UnitOfWork<'_>,
        name: &str,
    ) -> RepoResult<Vec<Member>> {
        let params = QueryParams::new().bind("name", name);
        self.template(uow, &self.by_name_with_team, &params, QueryOptions::default())
    }

    /// Loads without change tracking; edits to the result are never written.
    pub fn find_read_only_by_name(
        &self,
        uow: &mut UnitOfWork<'_>,
        name: &str,
    ) -> RepoResult<Option<Member>> {
        let args = [QueryValue::from(name)];
        executor::find_single(
            uow,
            &QueryDescriptor::Derived {
                query: &self.read_only_by_name,
                args: &args,
            },
            QueryOptions::read_only(),
        )
    }

    /// Exclusive-lock lookup; blocks while another unit of work holds the row.
    pub fn find_lock_by_name(&self, uow: &mut UnitOfWork<'_>, name: &str) -> RepoResult<Member> {
        let criteria = self.lock_by_name.bind(&[name.into()])?;
        self.find_with_exclusive_lock(uow, &criteria)
    }

    /// Members named `name`, shaped as `P`.
    pub fn find_projection_by_name<P: Projection>(
        &self,
        uow: &mut UnitOfWork<'_>,
        name: &str,
    ) -> RepoResult<Vec<P>> {
        let args = [QueryValue::from(name)];
        executor::find_projections::<Member, P>(
            uow,
            &QueryDescriptor::Derived {
                query: &self.projection_by_name,
                args: &args,
            },
        )
    }

    pub fn find_by_native_query(
        &self,
        uow: &mut UnitOfWork<'_>,
        name: &str,
    ) -> RepoResult<Option<Member>> {
        let args = [Value::Text(name.to_string())];
        executor::find_single(
            uow,
            &QueryDescriptor::Raw {
                query: &self.native_by_name,
                args: &args,
            },
            QueryOptions::default(),
        )
    }

    /// Paged raw query with a dedicated count statement.
    pub fn find_by_native_projection(
        &self,
        uow: &mut UnitOfWork<'_>,
        request: &PageRequest,
    ) -> RepoResult<Page<MemberProjection>> {
        executor::find_projection_page::<Member, MemberProjection>(
            uow,
            &QueryDescriptor::Raw {
                query: &self.native_projection,
                args: &[],
            },
            request,
        )
    }

    /// Runs a finder registered with [`MemberRepositoryBuilder::derived_query`].
    pub fn find_derived(
        &self,
        uow: &mut UnitOfWork<'_>,
        method: &str,
        args: &[QueryValue],
    ) -> RepoResult<Vec<Member>> {
        let query = self.extra.get(method).ok_or_else(|| {
            RepoError::invalid_query(method, "derived query was not registered at build")
        })?;
        self.derived(uow, query, args, QueryOptions::default())
    }

    /// Loads a lazy team reference in place and returns the team.
    ///
    /// The managed copy of the member, if any, gets the loaded team too.
    pub fn resolve_team(
        &self,
        uow: &mut UnitOfWork<'_>,
        member: &mut Member,
    ) -> RepoResult<Option<Team>> {
        let team_id = match &member.team {
            None => return Ok(None),
            Some(TeamRef::Loaded(team)) => return Ok(Some(team.clone())),
            Some(TeamRef::Unloaded(team_id)) => *team_id,
        };
        let team = SimpleRepository::<Team>::new().get_by_id(uow, team_id)?;
        member.team = Some(TeamRef::Loaded(team.clone()));
        if let Some(id) = member.id {
            if let Some(managed) = uow.get_mut::<Member>(id) {
                if managed.team_id() == Some(team_id) {
                    managed.team = Some(TeamRef::Loaded(team.clone()));
                }
            }
        }
        Ok(Some(team))
    }

    fn derived(
        &self,
        uow: &mut UnitOfWork<'_>,
        query: &DerivedQuery,
        args: &[QueryValue],
        options: QueryOptions,
    ) -> RepoResult<Vec<Member>> {
        executor::find_entities(uow, &QueryDescriptor::Derived { query, args }, options)
    }

    fn template(
        &self,
        uow: &mut UnitOfWork<'_>,
        query: &TemplateQuery,
        params: &QueryParams,
        options: QueryOptions,
    ) -> RepoResult<Vec<Member>> {
        executor::find_entities(uow, &QueryDescriptor::Template { query, params }, options)
    }
}

impl CrudRepository<Member> for MemberRepository {
    /// `find_all` loads every member together with its team.
    fn find_all_options(&self) -> QueryOptions {
        QueryOptions::fetching(TEAM_FETCH)
    }
}

impl MemberRepositoryCustom for MemberRepository {
    fn find_member_custom(&self, uow: &mut UnitOfWork<'_>) -> RepoResult<Vec<Member>> {
        self.custom.find_member_custom(uow)
    }
}

impl Debug for MemberRepository {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberRepository")
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
