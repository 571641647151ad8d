//! SQLite implementation of the Ledger trait.
//!
//! The persistent backend. Uses rusqlite with bundled SQLite, wrapped in
//! async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::trace;

use strand_core::{Address, BranchId, ChannelId};

use crate::error::{LedgerError, Result};
use crate::migration;
use crate::traits::{Envelope, Ledger, PostOutcome};

/// SQLite-based ledger.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedger {
    /// Open a SQLite database at the given path, creating and migrating it
    /// if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking closure against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| LedgerError::Worker(format!("connection lock poisoned: {}", e)))?;
            f(&conn)
        })
        .await
        .map_err(|e| LedgerError::Worker(e.to_string()))?
    }
}

fn sequence_to_sql(sequence: u64) -> Result<i64> {
    i64::try_from(sequence)
        .map_err(|_| LedgerError::InvalidData(format!("sequence {} exceeds storage range", sequence)))
}

fn sequence_from_sql(sequence: i64) -> Result<u64> {
    u64::try_from(sequence)
        .map_err(|_| LedgerError::InvalidData(format!("negative stored sequence {}", sequence)))
}

fn branch_from_sql(bytes: Vec<u8>) -> Result<BranchId> {
    BranchId::try_from(bytes.as_slice())
        .map_err(|_| LedgerError::InvalidData(format!("branch id of {} bytes", bytes.len())))
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn post(&self, address: &Address, bytes: &[u8]) -> Result<PostOutcome> {
        let address = *address;
        let bytes = bytes.to_vec();

        self.run(move |conn| {
            let sequence = sequence_to_sql(address.sequence)?;

            let existing: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT bytes FROM envelopes
                     WHERE channel_id = ?1 AND branch_id = ?2 AND sequence = ?3",
                    params![
                        address.channel_id.as_bytes().as_slice(),
                        address.branch_id.as_bytes().as_slice(),
                        sequence
                    ],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(existing) = existing {
                if existing == bytes {
                    return Ok(PostOutcome::AlreadyPresent);
                }
                return Err(LedgerError::Collision(address));
            }

            conn.execute(
                "INSERT INTO envelopes (channel_id, branch_id, sequence, bytes, posted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    address.channel_id.as_bytes().as_slice(),
                    address.branch_id.as_bytes().as_slice(),
                    sequence,
                    bytes.as_slice(),
                    now_millis(),
                ],
            )?;

            trace!(address = %address, len = bytes.len(), "posted envelope");
            Ok(PostOutcome::Posted)
        })
        .await
    }

    async fn fetch(&self, address: &Address) -> Result<Envelope> {
        let address = *address;

        self.run(move |conn| {
            let sequence = sequence_to_sql(address.sequence)?;
            let bytes: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT bytes FROM envelopes
                     WHERE channel_id = ?1 AND branch_id = ?2 AND sequence = ?3",
                    params![
                        address.channel_id.as_bytes().as_slice(),
                        address.branch_id.as_bytes().as_slice(),
                        sequence
                    ],
                    |row| row.get(0),
                )
                .optional()?;

            bytes
                .map(|bytes| Envelope {
                    address,
                    bytes: Bytes::from(bytes),
                })
                .ok_or(LedgerError::NotFound(address))
        })
        .await
    }

    async fn fetch_after(
        &self,
        channel_id: &ChannelId,
        branch_id: &BranchId,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<Envelope>> {
        let channel_id = *channel_id;
        let branch_id = *branch_id;

        self.run(move |conn| {
            let start = match after {
                None => 0,
                Some(seq) => match i64::try_from(seq).ok().and_then(|s| s.checked_add(1)) {
                    Some(start) => start,
                    None => return Ok(Vec::new()),
                },
            };
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);

            let mut stmt = conn.prepare(
                "SELECT sequence, bytes FROM envelopes
                 WHERE channel_id = ?1 AND branch_id = ?2 AND sequence >= ?3
                 ORDER BY sequence ASC
                 LIMIT ?4",
            )?;
            let rows = stmt.query_map(
                params![
                    channel_id.as_bytes().as_slice(),
                    branch_id.as_bytes().as_slice(),
                    start,
                    limit
                ],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)),
            )?;

            let mut out = Vec::new();
            for row in rows {
                let (sequence, bytes) = row?;
                out.push(Envelope {
                    address: Address::new(channel_id, branch_id, sequence_from_sql(sequence)?),
                    bytes: Bytes::from(bytes),
                });
            }
            Ok(out)
        })
        .await
    }

    async fn branches(&self, channel_id: &ChannelId) -> Result<Vec<BranchId>> {
        let channel_id = *channel_id;

        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT branch_id FROM envelopes
                 WHERE channel_id = ?1
                 ORDER BY branch_id ASC",
            )?;
            let rows = stmt.query_map(params![channel_id.as_bytes().as_slice()], |row| {
                row.get::<_, Vec<u8>>(0)
            })?;

            let mut out = Vec::new();
            for row in rows {
                out.push(branch_from_sql(row?)?);
            }
            Ok(out)
        })
        .await
    }
}
