//! Repository layer: typed data access over the unit of work.
//!
//! # Responsibility
//! - Provide generic CRUD for every entity through [`crud::CrudRepository`].
//! - Expose entity-specific finders whose queries are resolved when the
//!   repository is built.
//!
//! # Invariants
//! - Repository methods never commit; transaction boundaries belong to the
//!   caller's `UnitOfWork`.
//! - Semantic failures (`NotFound`, `ConcurrencyConflict`, binding errors)
//!   are reported apart from store errors.

pub mod crud;
pub mod error;
pub mod example;
pub mod member_custom;
pub mod member_repo;
pub mod team_repo;
