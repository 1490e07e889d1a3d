//! Typed data access for members and teams over SQLite.
//!
//! Repositories run inside a [`UnitOfWork`], which owns the transaction,
//! the identity map and any pessimistic row locks.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod projection;
pub mod query;
pub mod repo;
pub mod session;

pub use config::StoreConfig;
pub use db::{open_db, open_db_in_memory, open_db_with_config, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status, LoggingConfig, LoggingError};
pub use model::audit::{AuditFields, AuditInterceptor, SystemAuditor};
pub use model::entity::{Entity, EntityId, EntityState};
pub use model::member::{Address, Member, MemberId, TeamRef};
pub use model::team::{Team, TeamId};
pub use projection::Projection;
pub use query::criteria::{Criteria, Predicate};
pub use query::page::{Direction, Page, PageRequest, Sort};
pub use query::{QueryParams, QueryValue};
pub use repo::crud::{CrudRepository, SimpleRepository};
pub use repo::error::{RepoError, RepoResult};
pub use repo::example::{Example, ExampleMatcher};
pub use repo::member_custom::{MemberRepositoryCustom, MemberRepositoryCustomImpl};
pub use repo::member_repo::{MemberRepository, MemberRepositoryBuilder};
pub use repo::team_repo::TeamRepository;
pub use session::{in_unit_of_work, PersistenceContext, UnitOfWork};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
