//! Ordered schema steps for the `team`/`members` store.
//!
//! `PRAGMA user_version` records the last applied step. Pending steps run in
//! one transaction, so a store is either fully migrated or left untouched.

use crate::db::{DbError, DbResult};
use log::{info, warn};
use rusqlite::Connection;

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "init",
        sql: include_str!("0001_init.sql"),
    },
    Migration {
        version: 2,
        name: "audit_version",
        sql: include_str!("0002_audit_version.sql"),
    },
];

/// Latest schema version this build knows how to reach.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Schema version recorded on `conn`.
pub fn schema_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}

/// Brings `conn` up to [`latest_version`].
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    apply_steps(conn, MIGRATIONS)
}

fn apply_steps(conn: &mut Connection, steps: &[Migration]) -> DbResult<()> {
    let found = schema_version(conn)?;
    let supported = steps.last().map_or(0, |step| step.version);
    if found > supported {
        return Err(DbError::SchemaTooNew { found, supported });
    }

    let pending: Vec<&Migration> = steps.iter().filter(|step| step.version > found).collect();
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for step in pending {
        let applied = tx.execute_batch(step.sql).and_then(|()| {
            tx.execute_batch(&format!("PRAGMA user_version = {};", step.version))
        });
        if let Err(source) = applied {
            warn!(
                "event=db_migrate module=db status=error version={} name={} from_version={found}",
                step.version, step.name
            );
            return Err(DbError::Migration {
                version: step.version,
                name: step.name,
                source,
            });
        }
        info!(
            "event=db_migrate module=db status=ok version={} name={}",
            step.version, step.name
        );
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{apply_steps, schema_version, Migration, MIGRATIONS};
    use crate::db::DbError;
    use rusqlite::Connection;

    #[test]
    fn versions_are_strictly_increasing() {
        assert!(MIGRATIONS
            .windows(2)
            .all(|pair| pair[0].version < pair[1].version));
    }

    #[test]
    fn failed_step_is_named_and_rolls_back_the_batch() {
        let steps = [
            Migration {
                version: 1,
                name: "good",
                sql: "CREATE TABLE kept (id INTEGER PRIMARY KEY);",
            },
            Migration {
                version: 2,
                name: "broken",
                sql: "CREATE TABLE nope (;",
            },
        ];
        let mut conn = Connection::open_in_memory().unwrap();

        let err = apply_steps(&mut conn, &steps).unwrap_err();
        assert!(matches!(
            err,
            DbError::Migration {
                version: 2,
                name: "broken",
                ..
            }
        ));
        assert!(err.to_string().starts_with("migration 0002_broken failed"));
        assert_eq!(err.schema_version(), Some(2));

        assert_eq!(schema_version(&conn).unwrap(), 0);
        let kept: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'kept';",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(kept, 0);
    }
}
