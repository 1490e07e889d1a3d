//! In-process exclusive row locks.
//!
//! # Invariants
//! - A row is held by at most one owner at a time.
//! - Locks are reentrant for their owner and released all at once, when the
//!   owning unit of work ends.
//! - Waiters give up at their deadline; nothing waits forever.

use crate::model::entity::EntityId;
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Identity of one unit of work as lock holder.
pub type LockOwner = u64;

/// Identity of a row: table plus surrogate key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey {
    pub table: &'static str,
    pub id: EntityId,
}

impl RowKey {
    pub fn new(table: &'static str, id: EntityId) -> Self {
        Self { table, id }
    }
}

/// Registry of held row locks, shared by every unit of work of a store.
#[derive(Debug, Default)]
pub struct RowLockManager {
    held: Mutex<HashMap<RowKey, LockOwner>>,
    released: Condvar,
    next_owner: AtomicU64,
}

impl RowLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register_owner(&self) -> LockOwner {
        self.next_owner.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Blocks until `owner` holds `key` or `timeout` elapses.
    ///
    /// Returns `false` on timeout.
    pub fn acquire(&self, key: RowKey, owner: LockOwner, timeout: Duration) -> bool {
        let started_at = Instant::now();
        let deadline = started_at + timeout;
        let mut held = self.held.lock();
        let mut waited = false;
        loop {
            match held.get(&key).copied() {
                None => {
                    held.insert(key, owner);
                    debug!(
                        "event=row_lock_acquired module=session status=ok table={} id={} owner={} wait_ms={}",
                        key.table,
                        key.id,
                        owner,
                        started_at.elapsed().as_millis()
                    );
                    return true;
                }
                Some(holder) if holder == owner => return true,
                Some(holder) => {
                    if !waited {
                        debug!(
                            "event=row_lock_wait module=session status=blocked table={} id={} owner={} holder={}",
                            key.table, key.id, owner, holder
                        );
                        waited = true;
                    }
                    if self.released.wait_until(&mut held, deadline).timed_out()
                        && held.contains_key(&key)
                    {
                        warn!(
                            "event=row_lock_timeout module=session status=error table={} id={} owner={} timeout_ms={}",
                            key.table,
                            key.id,
                            owner,
                            timeout.as_millis()
                        );
                        return false;
                    }
                }
            }
        }
    }

    /// Releases every lock `owner` holds; returns how many.
    pub fn release_all(&self, owner: LockOwner) -> usize {
        let mut held = self.held.lock();
        let before = held.len();
        held.retain(|_, holder| *holder != owner);
        let released = before - held.len();
        drop(held);
        if released > 0 {
            self.released.notify_all();
        }
        released
    }

    pub fn holder(&self, key: RowKey) -> Option<LockOwner> {
        self.held.lock().get(&key).copied()
    }

    pub fn is_locked(&self, key: RowKey) -> bool {
        self.holder(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::{RowKey, RowLockManager};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    const ROW: RowKey = RowKey {
        table: "members",
        id: 1,
    };

    #[test]
    fn reentrant_for_same_owner() {
        let locks = RowLockManager::new();
        let owner = locks.register_owner();
        assert!(locks.acquire(ROW, owner, Duration::from_millis(10)));
        assert!(locks.acquire(ROW, owner, Duration::from_millis(10)));
        assert_eq!(locks.release_all(owner), 1);
        assert!(!locks.is_locked(ROW));
    }

    #[test]
    fn second_owner_times_out() {
        let locks = RowLockManager::new();
        let first = locks.register_owner();
        let second = locks.register_owner();
        assert!(locks.acquire(ROW, first, Duration::from_millis(10)));
        assert!(!locks.acquire(ROW, second, Duration::from_millis(30)));
        assert_eq!(locks.holder(ROW), Some(first));
    }

    #[test]
    fn waiter_proceeds_after_release() {
        let locks = Arc::new(RowLockManager::new());
        let first = locks.register_owner();
        assert!(locks.acquire(ROW, first, Duration::from_millis(10)));

        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                let second = locks.register_owner();
                let started = Instant::now();
                let acquired = locks.acquire(ROW, second, Duration::from_secs(5));
                (acquired, started.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(100));
        locks.release_all(first);
        let (acquired, waited) = waiter.join().unwrap();
        assert!(acquired);
        assert!(waited >= Duration::from_millis(50));
    }

    #[test]
    fn owners_are_distinct() {
        let locks = RowLockManager::new();
        assert_ne!(locks.register_owner(), locks.register_owner());
    }
}
