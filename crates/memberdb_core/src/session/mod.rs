//! Units of work and the store-wide state they share.

pub mod context;
pub mod lock;
pub mod unit_of_work;

pub use context::PersistenceContext;
pub use lock::{LockOwner, RowKey, RowLockManager};
pub use unit_of_work::{in_unit_of_work, UnitOfWork};
