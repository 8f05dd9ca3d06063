//! Schema versioning.
//!
//! The version lives in the `metadata` table under `schema_version`. A
//! fresh database reports version 0 and is brought forward one step at a
//! time.

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::{Error, Result};

use super::schema::SCHEMA_STATEMENTS;

/// Version written by this build.
pub const CURRENT_VERSION: i32 = 1;

/// `metadata` row holding the version.
const VERSION_KEY: &str = "schema_version";

/// Create missing tables and run pending migrations.
///
/// # Errors
///
/// Returns an error if schema creation or migration fails, or if the
/// database was written by a newer version.
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    for statement in SCHEMA_STATEMENTS {
        conn.execute(statement, [])?;
    }

    let version = schema_version(conn)?;
    if version > CURRENT_VERSION {
        return Err(Error::DatabaseMigration {
            message: format!(
                "database schema version {version} is newer than supported version {CURRENT_VERSION}"
            ),
        });
    }
    if version < CURRENT_VERSION {
        migrate(conn, version)?;
    }

    Ok(())
}

/// Read the schema version; 0 when unset.
pub(crate) fn schema_version(conn: &Connection) -> Result<i32> {
    let stored = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [VERSION_KEY],
            |row| row.get::<_, String>(0),
        )
        .optional()?;

    stored.map_or(Ok(0), |value| {
        value.trim().parse().map_err(|_| Error::DatabaseMigration {
            message: format!("schema_version is not a number: {value:?}"),
        })
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO metadata (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (VERSION_KEY, version.to_string()),
    )?;
    Ok(())
}

fn migrate(conn: &Connection, from_version: i32) -> Result<()> {
    for version in (from_version + 1)..=CURRENT_VERSION {
        apply(conn, version)?;
        set_schema_version(conn, version)?;
        info!(version, "Applied schema migration");
    }
    Ok(())
}

fn apply(_conn: &Connection, version: i32) -> Result<()> {
    match version {
        // Base tables come from SCHEMA_STATEMENTS
        1 => Ok(()),
        _ => Err(Error::DatabaseMigration {
            message: format!("no migration to schema version {version}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        conn
    }

    fn tables(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap()
    }

    #[test]
    fn test_fresh_database_is_current() {
        let conn = fresh();
        let names = tables(&conn);
        for table in ["feedback_reports", "metadata", "speed_samples", "trip_snapshots"] {
            assert!(names.iter().any(|n| n == table), "missing table {table}");
        }
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_reopening_keeps_version() {
        let conn = fresh();
        initialize_schema(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_unset_version_reads_zero() {
        let conn = fresh();
        conn.execute("DELETE FROM metadata", []).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let conn = fresh();
        set_schema_version(&conn, CURRENT_VERSION + 1).unwrap();

        let err = initialize_schema(&conn).unwrap_err();
        assert!(err.to_string().contains("newer than supported"));
    }

    #[test]
    fn test_invalid_version_value() {
        let conn = fresh();
        conn.execute("UPDATE metadata SET value = 'two' WHERE key = ?1", [VERSION_KEY])
            .unwrap();

        let err = schema_version(&conn).unwrap_err();
        assert!(err.to_string().contains("not a number"));
    }

    #[test]
    fn test_unknown_migration_version() {
        let conn = Connection::open_in_memory().unwrap();
        let err = apply(&conn, 999).unwrap_err();
        assert!(err.to_string().contains("schema version 999"));
    }
}
