use crate::config::StoreConfig;
use crate::model::audit::{AuditInterceptor, SystemAuditor};
use crate::session::lock::RowLockManager;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Store-wide collaborators shared by every unit of work.
///
/// Cheap to clone; clones share one lock registry and one auditor.
#[derive(Clone)]
pub struct PersistenceContext {
    config: StoreConfig,
    locks: Arc<RowLockManager>,
    auditor: Arc<dyn AuditInterceptor>,
}

impl PersistenceContext {
    /// Context with a [`SystemAuditor`] stamping a random actor id.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            locks: Arc::new(RowLockManager::new()),
            auditor: Arc::new(SystemAuditor::with_random_actor()),
        }
    }

    pub fn with_auditor(mut self, auditor: impl AuditInterceptor + 'static) -> Self {
        self.auditor = Arc::new(auditor);
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn locks(&self) -> &Arc<RowLockManager> {
        &self.locks
    }

    pub fn auditor(&self) -> &dyn AuditInterceptor {
        self.auditor.as_ref()
    }
}

impl Default for PersistenceContext {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl Debug for PersistenceContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceContext")
            .field("config", &self.config)
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}
