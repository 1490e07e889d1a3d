//! Hand-written member queries composed into `MemberRepository`.

use crate::model::member::Member;
use crate::query::executor::{self, QueryDescriptor, QueryOptions};
use crate::query::template::TemplateQuery;
use crate::query::QueryParams;
use crate::repo::error::RepoResult;
use crate::session::UnitOfWork;

const FIND_MEMBER_CUSTOM_SQL: &str = "SELECT m.* FROM members m ORDER BY m.member_id";

/// Queries too irregular for derived names.
///
/// `MemberRepository` takes an implementation through its builder and
/// forwards to it, so callers see a single repository.
pub trait MemberRepositoryCustom: Send + Sync {
    fn find_member_custom(&self, uow: &mut UnitOfWork<'_>) -> RepoResult<Vec<Member>>;
}

/// Default [`MemberRepositoryCustom`].
#[derive(Debug, Clone)]
pub struct MemberRepositoryCustomImpl {
    all_members: TemplateQuery,
}

impl MemberRepositoryCustomImpl {
    pub fn new() -> RepoResult<Self> {
        Ok(Self {
            all_members: TemplateQuery::parse(FIND_MEMBER_CUSTOM_SQL)?,
        })
    }
}

impl MemberRepositoryCustom for MemberRepositoryCustomImpl {
    fn find_member_custom(&self, uow: &mut UnitOfWork<'_>) -> RepoResult<Vec<Member>> {
        let params = QueryParams::new();
        executor::find_entities(
            uow,
            &QueryDescriptor::Template {
                query: &self.all_members,
                params: &params,
            },
            QueryOptions::default(),
        )
    }
}
