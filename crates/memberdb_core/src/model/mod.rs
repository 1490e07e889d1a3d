//! Entity model for members and teams.
//!
//! # Responsibility
//! - Define the persistent records and their static table mappings.
//! - Define the lifecycle and audit vocabulary shared with the session.
//!
//! # Invariants
//! - Entity equality is by identifier only; transient instances equal nothing.

pub mod audit;
pub mod entity;
pub mod member;
pub mod team;
