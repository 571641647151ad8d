//! Schema migrations for the SQLite ledger.
//!
//! Migrations are numbered SQL batches applied in order inside one
//! transaction. Applied versions are recorded in `schema_migrations`.

use rusqlite::{params, Connection};

use crate::error::{LedgerError, Result};

/// Ordered migrations. Entry `i` brings the schema to version `i + 1`.
const MIGRATIONS: &[&str] = &[
    // v1: one row per posted envelope, keyed by its address.
    r#"
    CREATE TABLE envelopes (
        channel_id BLOB NOT NULL,
        branch_id BLOB NOT NULL,
        sequence INTEGER NOT NULL,      -- u64 stored as i64
        bytes BLOB NOT NULL,
        posted_at INTEGER NOT NULL,     -- local clock, Unix ms
        PRIMARY KEY (channel_id, branch_id, sequence)
    );
    CREATE INDEX idx_envelopes_posted ON envelopes(posted_at);
    "#,
];

/// Schema version this build writes.
pub const CURRENT_VERSION: u32 = MIGRATIONS.len() as u32;

/// Bring the schema up to [`CURRENT_VERSION`]. Safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
    )?;

    let applied = schema_version(conn)?;
    if applied > CURRENT_VERSION {
        return Err(LedgerError::Migration(format!(
            "schema version {} is newer than {}",
            applied, CURRENT_VERSION
        )));
    }

    let pending = &MIGRATIONS[applied as usize..];
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (offset, sql) in pending.iter().enumerate() {
        let version = applied + offset as u32 + 1;
        tx.execute_batch(sql)
            .map_err(|e| LedgerError::Migration(format!("v{}: {}", version, e)))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, now_millis()],
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Highest applied migration, 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> Result<u32> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?)
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
