//! Generic entity repository.
//!
//! # Responsibility
//! - Offer CRUD, paging, sorting, query by example and exclusive-lock
//!   lookup for any [`Entity`] through provided trait methods.
//!
//! # Invariants
//! - `find_by_id` answers from the identity map before touching the store.
//! - Optional lookups return `None`; `get_*` lookups fail with `NotFound`.
//! - `find_with_exclusive_lock` returns a fresh read taken after the lock
//!   was granted.

use crate::model::entity::{Entity, EntityId};
use crate::query::criteria::{Criteria, Predicate};
use crate::query::executor::{self, QueryDescriptor, QueryOptions};
use crate::query::page::{Page, PageRequest, Sort};
use crate::repo::error::{RepoError, RepoResult};
use crate::repo::example::Example;
use crate::session::unit_of_work::key_of;
use crate::session::UnitOfWork;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;

/// CRUD contract over one entity type.
pub trait CrudRepository<E: Entity> {
    /// Loading hints for `find_all*`.
    fn find_all_options(&self) -> QueryOptions {
        QueryOptions::default()
    }

    /// Inserts a transient entity or merges a detached one. Returns the
    /// managed state.
    fn save(&self, uow: &mut UnitOfWork<'_>, entity: E) -> RepoResult<E> {
        uow.persist(entity)
    }

    fn save_all(&self, uow: &mut UnitOfWork<'_>, entities: Vec<E>) -> RepoResult<Vec<E>> {
        entities
            .into_iter()
            .map(|entity| self.save(uow, entity))
            .collect()
    }

    fn find_by_id(&self, uow: &mut UnitOfWork<'_>, id: EntityId) -> RepoResult<Option<E>> {
        if let Some(managed) = uow.get::<E>(id) {
            return Ok(Some(managed.clone()));
        }
        let criteria = Criteria::matching(Predicate::eq("id", id));
        executor::find_single(
            uow,
            &QueryDescriptor::Criteria(&criteria),
            QueryOptions::default(),
        )
    }

    fn get_by_id(&self, uow: &mut UnitOfWork<'_>, id: EntityId) -> RepoResult<E> {
        self.find_by_id(uow, id)?
            .ok_or_else(|| RepoError::not_found(E::meta().name, id))
    }

    fn exists_by_id(&self, uow: &mut UnitOfWork<'_>, id: EntityId) -> RepoResult<bool> {
        let criteria = Criteria::matching(Predicate::eq("id", id));
        Ok(executor::count::<E>(uow, &QueryDescriptor::Criteria(&criteria))? > 0)
    }

    fn find_all(&self, uow: &mut UnitOfWork<'_>) -> RepoResult<Vec<E>> {
        self.find_all_sorted(uow, &Sort::unsorted())
    }

    fn find_all_sorted(&self, uow: &mut UnitOfWork<'_>, sort: &Sort) -> RepoResult<Vec<E>> {
        let criteria = Criteria::default().with_sort(sort.clone());
        executor::find_entities(
            uow,
            &QueryDescriptor::Criteria(&criteria),
            self.find_all_options(),
        )
    }

    fn find_all_paged(
        &self,
        uow: &mut UnitOfWork<'_>,
        request: &PageRequest,
    ) -> RepoResult<Page<E>> {
        let criteria = Criteria::default();
        executor::find_page(
            uow,
            &QueryDescriptor::Criteria(&criteria),
            request,
            self.find_all_options(),
        )
    }

    fn find_all_by_example(
        &self,
        uow: &mut UnitOfWork<'_>,
        example: &Example<E>,
    ) -> RepoResult<Vec<E>> {
        let criteria = example.to_criteria()?;
        executor::find_entities(
            uow,
            &QueryDescriptor::Criteria(&criteria),
            QueryOptions::default(),
        )
    }

    fn count(&self, uow: &mut UnitOfWork<'_>) -> RepoResult<u64> {
        executor::count::<E>(uow, &QueryDescriptor::Criteria(&Criteria::default()))
    }

    /// Schedules deletion; the row goes at the next flush.
    fn delete(&self, uow: &mut UnitOfWork<'_>, entity: &E) -> RepoResult<()> {
        uow.remove(entity)
    }

    fn delete_by_id(&self, uow: &mut UnitOfWork<'_>, id: EntityId) -> RepoResult<()> {
        let entity = self.get_by_id(uow, id)?;
        uow.remove(&entity)
    }

    /// Finds the single row matching `criteria` and holds an exclusive lock
    /// on it until the unit of work ends.
    ///
    /// Blocks while another unit of work holds the lock, up to
    /// `StoreConfig::lock_timeout`.
    fn find_with_exclusive_lock(
        &self,
        uow: &mut UnitOfWork<'_>,
        criteria: &Criteria,
    ) -> RepoResult<E> {
        let meta = E::meta();
        let ids = executor::find_ids::<E>(uow, criteria)?;
        let id = match ids.as_slice() {
            [] => {
                return Err(RepoError::NotFound {
                    entity: meta.name,
                    key: format!("{:?}", criteria.predicate),
                })
            }
            [id] => *id,
            _ => {
                return Err(RepoError::NonUniqueResult {
                    query: format!("{:?}", criteria.predicate),
                    count: ids.len(),
                })
            }
        };
        uow.lock_row(meta.name, key_of::<E>(id))?;
        executor::reload::<E>(uow, id)?.ok_or_else(|| RepoError::not_found(meta.name, id))
    }
}

/// Repository with only the generic operations.
pub struct SimpleRepository<E> {
    entity: PhantomData<fn() -> E>,
}

impl<E: Entity> SimpleRepository<E> {
    pub fn new() -> Self {
        Self {
            entity: PhantomData,
        }
    }
}

impl<E: Entity> Default for SimpleRepository<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> Debug for SimpleRepository<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SimpleRepository<{}>", E::meta().name)
    }
}

impl<E: Entity> CrudRepository<E> for SimpleRepository<E> {}
