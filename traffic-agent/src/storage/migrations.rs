use rusqlite::{Connection, Transaction};

use crate::error::StorageError;

const CURRENT_SCHEMA_VERSION: i32 = 1;

pub fn run_migrations(conn: &mut Connection) -> Result<(), StorageError> {
    let mut version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(StorageError::InvalidData(format!(
            "database version ({version}) is newer than supported schema ({CURRENT_SCHEMA_VERSION})"
        )));
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;

    while version < CURRENT_SCHEMA_VERSION {
        let next_version = version + 1;
        apply_migration(&tx, next_version)?;
        version = next_version;
    }

    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    tx.commit()?;

    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<(), StorageError> {
    match version {
        1 => {
            tx.execute_batch(include_str!("schemas/schema_v1.sql"))?;
            Ok(())
        }
        other => Err(StorageError::InvalidData(format!("no migration for version {other}"))),
    }
}
