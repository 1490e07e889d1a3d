//! Unit of work: identity map, dirty checking and transaction scope.
//!
//! # Responsibility
//! - Track every entity saved or loaded through it (the identity map).
//! - Write changes of managed entities at flush, guarded by version checks.
//! - Own the SQLite transaction and the row locks taken inside it.
//!
//! # Invariants
//! - Inserts run immediately so ids are known right after `save`.
//! - Updates and deletes run at flush; every one carries
//!   `WHERE <id> = ? AND version = ?`.
//! - The transaction starts lazily: deferred on first access, immediate when
//!   a row lock is the first thing requested.
//! - A row lock never hands out a read older than the lock grant: a deferred
//!   transaction that has only read is ended before the lock is taken.
//! - Ending the unit of work (commit, rollback or drop) detaches every
//!   entity and releases every row lock it holds.

use crate::model::audit::{AuditFields, LAST_MODIFIED_BY_COLUMN, LAST_MODIFIED_DATE_COLUMN};
use crate::model::entity::{Entity, EntityId, EntityMeta, EntityState};
use crate::query::row::ResultRow;
use crate::repo::error::{RepoError, RepoResult};
use crate::session::context::PersistenceContext;
use crate::session::lock::{LockOwner, RowKey};
use log::{debug, warn};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::any::Any;
use std::collections::BTreeMap;
use std::time::Instant;

type Snapshot = Vec<(&'static str, Value)>;

/// Object-safe view of an entity held in the identity map.
trait ManagedEntity: Send {
    fn table_meta(&self) -> &'static EntityMeta;
    fn current_id(&self) -> Option<EntityId>;
    fn current_version(&self) -> i64;
    fn store_version(&mut self, version: i64);
    fn column_values(&self) -> Snapshot;
    fn check(&self) -> RepoResult<()>;
    fn audit_fields(&self) -> Option<&AuditFields>;
    fn audit_fields_mut(&mut self) -> Option<&mut AuditFields>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<E: Entity> ManagedEntity for E {
    fn table_meta(&self) -> &'static EntityMeta {
        E::meta()
    }

    fn current_id(&self) -> Option<EntityId> {
        Entity::id(self)
    }

    fn current_version(&self) -> i64 {
        Entity::version(self)
    }

    fn store_version(&mut self, version: i64) {
        Entity::set_version(self, version);
    }

    fn column_values(&self) -> Snapshot {
        Entity::field_values(self)
    }

    fn check(&self) -> RepoResult<()> {
        Entity::validate(self)
    }

    fn audit_fields(&self) -> Option<&AuditFields> {
        Entity::audit(self)
    }

    fn audit_fields_mut(&mut self) -> Option<&mut AuditFields> {
        Entity::audit_mut(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Managed,
    Removed,
}

struct ManagedEntry {
    entity: Box<dyn ManagedEntity>,
    /// Column values as last read or written; `None` forces an update.
    snapshot: Option<Snapshot>,
    state: EntryState,
    read_only: bool,
}

impl ManagedEntry {
    fn is_dirty(&self) -> bool {
        if self.read_only || self.state != EntryState::Managed {
            return false;
        }
        let current = self.entity.column_values();
        self.snapshot.as_deref() != Some(current.as_slice())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Idle,
    Deferred,
    Immediate,
}

/// One bounded scope of tracked entity work on one connection.
///
/// Entities returned by repositories are copies; change a managed entity
/// through [`UnitOfWork::get_mut`] and the change is written at the next
/// flush.
pub struct UnitOfWork<'conn> {
    conn: &'conn mut Connection,
    context: PersistenceContext,
    owner: LockOwner,
    tx: TxState,
    /// Set once a statement that may write ran in the open transaction.
    wrote: bool,
    entries: BTreeMap<RowKey, ManagedEntry>,
    finished: bool,
}

impl<'conn> UnitOfWork<'conn> {
    pub fn begin(conn: &'conn mut Connection, context: &PersistenceContext) -> Self {
        let owner = context.locks().register_owner();
        debug!("event=uow_begin module=session status=ok owner={owner}");
        Self {
            conn,
            context: context.clone(),
            owner,
            tx: TxState::Idle,
            wrote: false,
            entries: BTreeMap::new(),
            finished: false,
        }
    }

    pub fn context(&self) -> &PersistenceContext {
        &self.context
    }

    /// Whether a SQLite transaction has been started.
    pub fn is_active(&self) -> bool {
        self.tx != TxState::Idle
    }

    pub fn managed_count(&self) -> usize {
        self.entries.len()
    }

    pub fn contains<E: Entity>(&self, entity: &E) -> bool {
        entity
            .id()
            .is_some_and(|id| self.entries.contains_key(&key_of::<E>(id)))
    }

    pub fn state_of<E: Entity>(&self, entity: &E) -> EntityState {
        let Some(id) = entity.id() else {
            return EntityState::Transient;
        };
        match self.entries.get(&key_of::<E>(id)).map(|entry| entry.state) {
            Some(EntryState::Managed) => EntityState::Managed,
            Some(EntryState::Removed) => EntityState::Removed,
            None => EntityState::Detached,
        }
    }

    /// The managed instance for `id`, if this unit of work tracks one.
    pub fn get<E: Entity>(&self, id: EntityId) -> Option<&E> {
        self.entries
            .get(&key_of::<E>(id))
            .filter(|entry| entry.state == EntryState::Managed)
            .and_then(|entry| entry.entity.as_any().downcast_ref::<E>())
    }

    /// Mutable access to a managed instance; changes are flushed unless it
    /// was loaded read-only.
    pub fn get_mut<E: Entity>(&mut self, id: EntityId) -> Option<&mut E> {
        self.entries
            .get_mut(&key_of::<E>(id))
            .filter(|entry| entry.state == EntryState::Managed)
            .and_then(|entry| entry.entity.as_any_mut().downcast_mut::<E>())
    }

    /// Stops tracking `entity`. Pending changes to it are discarded.
    pub fn detach<E: Entity>(&mut self, entity: &E) {
        if let Some(id) = entity.id() {
            self.entries.remove(&key_of::<E>(id));
        }
    }

    /// Detaches everything. Unflushed changes are discarded.
    pub fn clear(&mut self) {
        let detached = self.entries.len();
        self.entries.clear();
        debug!(
            "event=uow_clear module=session status=ok owner={} detached={detached}",
            self.owner
        );
    }

    /// Writes dirty and removed entities without ending the unit of work.
    pub fn flush(&mut self) -> RepoResult<()> {
        let pending: Vec<RowKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.state == EntryState::Removed || entry.is_dirty())
            .map(|(key, _)| *key)
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let started_at = Instant::now();
        self.ensure_tx(false)?;
        self.wrote = true;
        let conn: &Connection = &*self.conn;
        let auditor = self.context.auditor();
        let mut updated = 0usize;
        let mut deleted = 0usize;
        for key in pending {
            let Some(entry) = self.entries.get_mut(&key) else {
                continue;
            };
            match entry.state {
                EntryState::Removed => {
                    delete_row(conn, entry.entity.as_ref())?;
                    self.entries.remove(&key);
                    deleted += 1;
                }
                EntryState::Managed => {
                    entry.entity.check()?;
                    let meta = entry.entity.table_meta();
                    if let Some(current) = entry.entity.audit_fields().cloned() {
                        let stamp = auditor.audit(meta.name, false, &current);
                        if let Some(audit) = entry.entity.audit_fields_mut() {
                            audit.last_modified_date = stamp.last_modified_date;
                            audit.last_modified_by = stamp.last_modified_by;
                        }
                    }
                    let values = entry.entity.column_values();
                    update_row(conn, entry.entity.as_ref(), &values)?;
                    let version = entry.entity.current_version() + 1;
                    entry.entity.store_version(version);
                    entry.snapshot = Some(values);
                    updated += 1;
                }
            }
        }
        debug!(
            "event=flush module=session status=ok owner={} updated={updated} deleted={deleted} duration_ms={}",
            self.owner,
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Flushes and commits; on failure everything is rolled back.
    pub fn commit(mut self) -> RepoResult<()> {
        if let Err(err) = self.flush() {
            // Rollback failures are logged by `finish`; the flush error wins.
            let _ = self.finish(false);
            return Err(err);
        }
        self.finish(true)
    }

    pub fn rollback(mut self) -> RepoResult<()> {
        self.finish(false)
    }

    /// Saves a transient entity (insert) or merges a detached/managed one.
    pub(crate) fn persist<E: Entity>(&mut self, mut entity: E) -> RepoResult<E> {
        entity.validate()?;
        let meta = E::meta();
        let Some(id) = entity.id() else {
            return self.insert(entity);
        };

        let key = key_of::<E>(id);
        if let Some(entry) = self.entries.get_mut(&key) {
            if entry.state == EntryState::Removed {
                return Err(RepoError::InvalidArgument(format!(
                    "{} {id} is scheduled for removal and cannot be saved",
                    meta.name
                )));
            }
            entry.entity = Box::new(entity.clone());
            return Ok(entity);
        }

        let stored: E = self.load_row(id)?.ok_or_else(|| RepoError::not_found(meta.name, id))?;
        if stored.version() != entity.version() {
            return Err(RepoError::ConcurrencyConflict {
                entity: meta.name,
                id: Some(id),
                reason: format!(
                    "detached version {} but stored version {}",
                    entity.version(),
                    stored.version()
                ),
            });
        }
        if let (Some(stored_audit), Some(audit)) = (stored.audit(), entity.audit_mut()) {
            audit.created_date = stored_audit.created_date;
            audit.created_by = stored_audit.created_by.clone();
        }
        self.entries.insert(
            key,
            ManagedEntry {
                entity: Box::new(entity.clone()),
                snapshot: Some(stored.field_values()),
                state: EntryState::Managed,
                read_only: false,
            },
        );
        Ok(entity)
    }

    /// Schedules deletion at the next flush.
    pub(crate) fn remove<E: Entity>(&mut self, entity: &E) -> RepoResult<()> {
        let meta = E::meta();
        let id = entity.id().ok_or_else(|| {
            RepoError::InvalidArgument(format!("cannot delete a transient {}", meta.name))
        })?;
        let key = key_of::<E>(id);
        match self.entries.get_mut(&key) {
            Some(entry) => entry.state = EntryState::Removed,
            None => {
                self.entries.insert(
                    key,
                    ManagedEntry {
                        entity: Box::new(entity.clone()),
                        snapshot: None,
                        state: EntryState::Removed,
                        read_only: false,
                    },
                );
            }
        }
        Ok(())
    }

    /// Registers a row read by a query. An already managed instance wins;
    /// it only picks up associations the new row fetched.
    pub(crate) fn attach_loaded<E: Entity>(&mut self, loaded: E, read_only: bool) -> RepoResult<E> {
        let id = loaded.id().ok_or_else(|| {
            RepoError::InvalidData(format!("{} row without id", E::meta().name))
        })?;
        let key = key_of::<E>(id);
        if let Some(entry) = self.entries.get_mut(&key) {
            if let Some(existing) = entry.entity.as_any_mut().downcast_mut::<E>() {
                existing.absorb_fetched(&loaded);
                return Ok(existing.clone());
            }
        }
        self.entries.insert(
            key,
            ManagedEntry {
                snapshot: Some(loaded.field_values()),
                entity: Box::new(loaded.clone()),
                state: EntryState::Managed,
                read_only,
            },
        );
        Ok(loaded)
    }

    /// Replaces the managed copy with a fresh read of the same row.
    pub(crate) fn refresh<E: Entity>(&mut self, fresh: E) -> RepoResult<E> {
        let id = fresh.id().ok_or_else(|| {
            RepoError::InvalidData(format!("{} row without id", E::meta().name))
        })?;
        self.entries.insert(
            key_of::<E>(id),
            ManagedEntry {
                snapshot: Some(fresh.field_values()),
                entity: Box::new(fresh.clone()),
                state: EntryState::Managed,
                read_only: false,
            },
        );
        Ok(fresh)
    }

    /// Takes the in-process row lock, then makes sure a write transaction
    /// is open. Times out with `ConcurrencyConflict`.
    ///
    /// A read-only deferred transaction pins a snapshot that may predate the
    /// holder's commit, so it is ended first and an immediate one starts
    /// after the grant. Once this unit of work has written, it already owns
    /// the SQLite write lock and its snapshot is the latest committed state.
    pub(crate) fn lock_row(&mut self, entity: &'static str, key: RowKey) -> RepoResult<()> {
        if self.tx == TxState::Deferred && !self.wrote {
            self.conn.execute_batch("COMMIT;")?;
            self.tx = TxState::Idle;
            debug!(
                "event=uow_tx_restart module=session status=ok owner={} table={} id={}",
                self.owner, key.table, key.id
            );
        }
        let timeout = self.context.config().lock_timeout();
        if !self.context.locks().acquire(key, self.owner, timeout) {
            return Err(RepoError::ConcurrencyConflict {
                entity,
                id: Some(key.id),
                reason: format!("row lock not acquired within {} ms", timeout.as_millis()),
            });
        }
        self.ensure_tx(true)
    }

    /// Connection inside this unit of work's transaction.
    pub(crate) fn connection(&mut self) -> RepoResult<&Connection> {
        self.ensure_tx(false)?;
        Ok(&*self.conn)
    }

    /// Like [`connection`](Self::connection), for statements that may write.
    pub(crate) fn write_connection(&mut self) -> RepoResult<&Connection> {
        self.ensure_tx(false)?;
        self.wrote = true;
        Ok(&*self.conn)
    }

    /// Connection without starting a transaction; reads autocommit while idle.
    pub(crate) fn raw_connection(&self) -> &Connection {
        &*self.conn
    }

    fn insert<E: Entity>(&mut self, mut entity: E) -> RepoResult<E> {
        let meta = E::meta();
        if let Some(current) = entity.audit().cloned() {
            let stamp = self.context.auditor().audit(meta.name, true, &current);
            if let Some(audit) = entity.audit_mut() {
                *audit = stamp;
            }
        }
        entity.set_version(0);

        let values = entity.field_values();
        let mut columns = Vec::with_capacity(values.len() + 5);
        let mut binds = Vec::with_capacity(values.len() + 5);
        for (attribute, value) in &values {
            columns.push(meta.require_field(attribute, "insert")?.column);
            binds.push(value.clone());
        }
        columns.push(meta.version_column);
        binds.push(Value::Integer(0));
        if let Some(audit) = entity.audit() {
            for (column, value) in audit.column_values() {
                columns.push(column);
                binds.push(value);
            }
        }
        let marks = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({marks});",
            meta.table,
            columns.join(", ")
        );

        let conn = self.write_connection()?;
        conn.execute(&sql, params_from_iter(binds.iter()))?;
        let id = conn.last_insert_rowid();
        entity.assign_id(id);

        self.entries.insert(
            key_of::<E>(id),
            ManagedEntry {
                entity: Box::new(entity.clone()),
                snapshot: Some(values),
                state: EntryState::Managed,
                read_only: false,
            },
        );
        debug!(
            "event=entity_insert module=session status=ok entity={} id={id}",
            meta.name
        );
        Ok(entity)
    }

    fn load_row<E: Entity>(&mut self, id: EntityId) -> RepoResult<Option<E>> {
        let meta = E::meta();
        let sql = format!("SELECT * FROM {} WHERE {} = ?1;", meta.table, meta.id_column);
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let row = stmt
            .query_row(params![id], |row| ResultRow::read(row, &names))
            .optional()?;
        row.map(|row| E::from_row(&row)).transpose()
    }

    fn ensure_tx(&mut self, immediate: bool) -> RepoResult<()> {
        if self.tx != TxState::Idle {
            return Ok(());
        }
        if immediate {
            self.conn.execute_batch("BEGIN IMMEDIATE;")?;
            self.tx = TxState::Immediate;
        } else {
            self.conn.execute_batch("BEGIN DEFERRED;")?;
            self.tx = TxState::Deferred;
        }
        debug!(
            "event=uow_tx_begin module=session status=ok owner={} immediate={immediate}",
            self.owner
        );
        Ok(())
    }

    fn finish(&mut self, commit: bool) -> RepoResult<()> {
        let mut result = Ok(());
        if self.tx != TxState::Idle {
            let statement = if commit { "COMMIT;" } else { "ROLLBACK;" };
            if let Err(err) = self.conn.execute_batch(statement) {
                result = Err(RepoError::from(err));
                if commit && !self.conn.is_autocommit() {
                    if let Err(rollback_err) = self.conn.execute_batch("ROLLBACK;") {
                        warn!(
                            "event=uow_rollback module=session status=error owner={} error={rollback_err}",
                            self.owner
                        );
                    }
                }
            }
        }
        self.tx = TxState::Idle;
        self.wrote = false;
        let released = self.context.locks().release_all(self.owner);
        let detached = self.entries.len();
        self.entries.clear();
        self.finished = true;

        let event = if commit { "uow_commit" } else { "uow_rollback" };
        match &result {
            Ok(()) => debug!(
                "event={event} module=session status=ok owner={} detached={detached} locks_released={released}",
                self.owner
            ),
            Err(err) => warn!(
                "event={event} module=session status=error owner={} error={err}",
                self.owner
            ),
        }
        result
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if !self.finished {
            // Errors are already logged by `finish`.
            let _ = self.finish(false);
        }
    }
}

/// Runs `work` in a fresh unit of work, committing on `Ok` and rolling back
/// on `Err`.
pub fn in_unit_of_work<T>(
    conn: &mut Connection,
    context: &PersistenceContext,
    work: impl FnOnce(&mut UnitOfWork<'_>) -> RepoResult<T>,
) -> RepoResult<T> {
    let mut uow = UnitOfWork::begin(conn, context);
    match work(&mut uow) {
        Ok(value) => {
            uow.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = uow.rollback() {
                warn!("event=uow_rollback module=session status=error error={rollback_err}");
            }
            Err(err)
        }
    }
}

pub(crate) fn key_of<E: Entity>(id: EntityId) -> RowKey {
    RowKey::new(E::meta().table, id)
}

fn update_row(conn: &Connection, entity: &dyn ManagedEntity, values: &Snapshot) -> RepoResult<()> {
    let meta = entity.table_meta();
    let id = entity
        .current_id()
        .ok_or_else(|| RepoError::InvalidData(format!("managed {} without id", meta.name)))?;
    let version = entity.current_version();

    let mut assignments = Vec::with_capacity(values.len() + 3);
    let mut binds = Vec::with_capacity(values.len() + 5);
    for (attribute, value) in values {
        assignments.push(format!("{} = ?", meta.require_field(attribute, "update")?.column));
        binds.push(value.clone());
    }
    assignments.push(format!("{} = ?", meta.version_column));
    binds.push(Value::Integer(version + 1));
    if let Some(audit) = entity.audit_fields() {
        // Created stamps are written once, at insert.
        assignments.push(format!("{LAST_MODIFIED_DATE_COLUMN} = ?"));
        binds.push(Value::from(audit.last_modified_date));
        assignments.push(format!("{LAST_MODIFIED_BY_COLUMN} = ?"));
        binds.push(Value::from(audit.last_modified_by.clone()));
    }
    binds.push(Value::Integer(id));
    binds.push(Value::Integer(version));

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ? AND {} = ?;",
        meta.table,
        assignments.join(", "),
        meta.id_column,
        meta.version_column
    );
    let changed = conn.execute(&sql, params_from_iter(binds.iter()))?;
    if changed == 0 {
        return Err(missing_or_stale(conn, meta, id, version));
    }
    Ok(())
}

fn delete_row(conn: &Connection, entity: &dyn ManagedEntity) -> RepoResult<()> {
    let meta = entity.table_meta();
    let id = entity
        .current_id()
        .ok_or_else(|| RepoError::InvalidData(format!("removed {} without id", meta.name)))?;
    let version = entity.current_version();
    let sql = format!(
        "DELETE FROM {} WHERE {} = ?1 AND {} = ?2;",
        meta.table, meta.id_column, meta.version_column
    );
    let changed = conn.execute(&sql, params![id, version])?;
    if changed == 0 {
        return Err(missing_or_stale(conn, meta, id, version));
    }
    debug!(
        "event=entity_delete module=session status=ok entity={} id={id}",
        meta.name
    );
    Ok(())
}

fn missing_or_stale(conn: &Connection, meta: &'static EntityMeta, id: EntityId, version: i64) -> RepoError {
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1;",
        meta.version_column, meta.table, meta.id_column
    );
    match conn
        .query_row(&sql, params![id], |row| row.get::<_, i64>(0))
        .optional()
    {
        Ok(Some(stored)) => RepoError::ConcurrencyConflict {
            entity: meta.name,
            id: Some(id),
            reason: format!("expected version {version} but found {stored}"),
        },
        Ok(None) => RepoError::not_found(meta.name, id),
        Err(err) => RepoError::from(err),
    }
}
