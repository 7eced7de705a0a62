use crate::batch::progress::{BatchProgress, BatchStatus};
use crate::batch::store::{check_entries, BatchStore, ChunkCompletion, ChunkEntry};
use crate::common::error::{ResolveError, Result};
use crate::common::types::{Identifier, ResultRecord};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// SQLite-backed batch queue. Every mutation runs in a `BEGIN IMMEDIATE`
/// transaction so concurrent processes serialize on the database write lock.
/// Statements run on tokio's blocking pool, so waiting on that lock never
/// stalls a runtime thread.
pub struct SqliteBatchStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBatchStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS batch_progress (
                job_id                  TEXT PRIMARY KEY,
                total                   INTEGER NOT NULL,
                processed               INTEGER NOT NULL DEFAULT 0,
                succeeded               INTEGER NOT NULL DEFAULT 0,
                failed                  INTEGER NOT NULL DEFAULT 0,
                status                  TEXT NOT NULL,
                chunks                  INTEGER NOT NULL,
                started_at              INTEGER NOT NULL,
                completed_at            INTEGER,
                estimated_remaining_ms  INTEGER,
                expires_at              INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS queue_entries (
                job_id        TEXT NOT NULL,
                chunk_index   INTEGER NOT NULL,
                jobs          TEXT NOT NULL,
                available_at  INTEGER NOT NULL,
                attempts      INTEGER NOT NULL DEFAULT 0,
                lease_owner   TEXT,
                lease_until   INTEGER,
                completed_at  INTEGER,
                PRIMARY KEY (job_id, chunk_index)
            );
            CREATE INDEX IF NOT EXISTS idx_queue_visible
                ON queue_entries (completed_at, available_at);
            CREATE TABLE IF NOT EXISTS batch_results (
                seq          INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id       TEXT NOT NULL,
                chunk_index  INTEGER NOT NULL,
                identifier   TEXT NOT NULL,
                result       TEXT NOT NULL,
                expires_at   INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_results_job ON batch_results (job_id);
            "#,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut conn)
        })
        .await?
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(0, ms))
}

fn progress_from_row(row: &Row<'_>) -> rusqlite::Result<BatchProgress> {
    let status: String = row.get(5)?;
    let status = status.parse::<BatchStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, e.into())
    })?;
    let completed_at: Option<i64> = row.get(8)?;
    let eta: Option<i64> = row.get(9)?;
    Ok(BatchProgress {
        job_id: row.get(0)?,
        total: row.get::<_, i64>(1)? as u64,
        processed: row.get::<_, i64>(2)? as u64,
        succeeded: row.get::<_, i64>(3)? as u64,
        failed: row.get::<_, i64>(4)? as u64,
        status,
        chunks: row.get::<_, i64>(6)? as u32,
        started_at: from_millis(row.get(7)?)?,
        completed_at: completed_at.map(from_millis).transpose()?,
        estimated_remaining_ms: eta.map(|ms| ms as u64),
    })
}

const PROGRESS_COLUMNS: &str = "job_id, total, processed, succeeded, failed, status, chunks, \
                                started_at, completed_at, estimated_remaining_ms";

#[async_trait]
impl BatchStore for SqliteBatchStore {
    async fn create_batch_with_chunks(
        &self,
        progress: &BatchProgress,
        entries: &[ChunkEntry],
        retention: Duration,
    ) -> Result<()> {
        check_entries(progress, entries)?;
        let rows = entries
            .iter()
            .map(|e| -> Result<(i64, String, i64)> {
                Ok((e.chunk_index as i64, serde_json::to_string(&e.jobs)?, millis(e.available_at)))
            })
            .collect::<Result<Vec<_>>>()?;
        let progress = progress.clone();
        let expires_at = millis(progress.started_at + retention);

        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO batch_progress
                    (job_id, total, processed, succeeded, failed, status, chunks, started_at, expires_at)
                 VALUES (?1, ?2, 0, 0, 0, ?3, ?4, ?5, ?6)",
                params![
                    progress.job_id,
                    progress.total as i64,
                    progress.status.as_str(),
                    progress.chunks as i64,
                    millis(progress.started_at),
                    expires_at,
                ],
            )?;
            if inserted == 0 {
                return Err(ResolveError::Validation(format!("batch {} already exists", progress.job_id)));
            }
            {
                // a duplicate chunk index fails on the primary key and rolls everything back
                let mut insert = tx.prepare(
                    "INSERT INTO queue_entries (job_id, chunk_index, jobs, available_at, attempts)
                     VALUES (?1, ?2, ?3, ?4, 0)",
                )?;
                for (chunk_index, jobs, available_at) in &rows {
                    insert.execute(params![progress.job_id, chunk_index, jobs, available_at])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn claim_next(&self, consumer: &str, now: DateTime<Utc>, lease: Duration) -> Result<Option<ChunkEntry>> {
        let consumer = consumer.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let candidate = tx
                .query_row(
                    "SELECT job_id, chunk_index, jobs, available_at, attempts FROM queue_entries
                     WHERE completed_at IS NULL
                       AND available_at <= ?1
                       AND (lease_until IS NULL OR lease_until <= ?1)
                     ORDER BY available_at, job_id, chunk_index
                     LIMIT 1",
                    params![millis(now)],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, i64>(4)?,
                        ))
                    },
                )
                .optional()?;
            let Some((job_id, chunk_index, jobs, available_at, attempts)) = candidate else {
                return Ok(None);
            };
            tx.execute(
                "UPDATE queue_entries SET lease_owner = ?1, lease_until = ?2, attempts = attempts + 1
                 WHERE job_id = ?3 AND chunk_index = ?4",
                params![consumer, millis(now + lease), job_id, chunk_index],
            )?;
            tx.commit()?;
            debug!(%job_id, chunk_index, %consumer, "claimed chunk");
            Ok(Some(ChunkEntry {
                job_id,
                chunk_index: chunk_index as u32,
                jobs: serde_json::from_str(&jobs)?,
                available_at: from_millis(available_at)?,
                attempts: attempts as u32 + 1,
            }))
        })
        .await
    }

    async fn next_visible_at(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        self.with_conn(move |conn| {
            let next: Option<i64> = conn.query_row(
                "SELECT MIN(CASE WHEN lease_until IS NOT NULL AND lease_until > ?1
                                 THEN MAX(lease_until, available_at)
                                 ELSE available_at END)
                 FROM queue_entries WHERE completed_at IS NULL",
                params![millis(now)],
                |row| row.get(0),
            )?;
            Ok(next.map(from_millis).transpose()?)
        })
        .await
    }

    async fn complete_chunk(&self, completion: &ChunkCompletion) -> Result<Option<BatchProgress>> {
        let encoded: Vec<(String, String)> = completion
            .results
            .iter()
            .map(|r| -> Result<(String, String)> {
                Ok((r.identifier.to_string(), serde_json::to_string(&r.result)?))
            })
            .collect::<Result<_>>()?;
        let job_id = completion.job_id.clone();
        let chunk_index = completion.chunk_index as i64;
        let tally = completion.tally;
        let completed_at = completion.completed_at;
        let expires_at = millis(completion.completed_at + completion.retention);

        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let done: Option<Option<i64>> = tx
                .query_row(
                    "SELECT completed_at FROM queue_entries WHERE job_id = ?1 AND chunk_index = ?2",
                    params![job_id, chunk_index],
                    |row| row.get(0),
                )
                .optional()?;
            match done {
                None => {
                    return Err(ResolveError::Validation(format!(
                        "unknown chunk {} of batch {}",
                        chunk_index, job_id
                    )))
                }
                Some(Some(_)) => return Ok(None),
                Some(None) => {}
            }

            let mut progress = tx
                .query_row(
                    &format!("SELECT {} FROM batch_progress WHERE job_id = ?1", PROGRESS_COLUMNS),
                    params![job_id],
                    progress_from_row,
                )
                .optional()?
                .ok_or_else(|| ResolveError::Validation(format!("unknown batch {}", job_id)))?;
            progress.apply_chunk(tally, completed_at);

            tx.execute(
                "UPDATE batch_progress
                 SET processed = ?2, succeeded = ?3, failed = ?4, status = ?5,
                     completed_at = ?6, estimated_remaining_ms = ?7, expires_at = ?8
                 WHERE job_id = ?1",
                params![
                    progress.job_id,
                    progress.processed as i64,
                    progress.succeeded as i64,
                    progress.failed as i64,
                    progress.status.as_str(),
                    progress.completed_at.map(millis),
                    progress.estimated_remaining_ms.map(|ms| ms as i64),
                    expires_at,
                ],
            )?;
            tx.execute(
                "UPDATE queue_entries SET completed_at = ?3, lease_owner = NULL, lease_until = NULL
                 WHERE job_id = ?1 AND chunk_index = ?2",
                params![job_id, chunk_index, millis(completed_at)],
            )?;
            {
                let mut insert = tx.prepare(
                    "INSERT INTO batch_results (job_id, chunk_index, identifier, result, expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for (identifier, result) in &encoded {
                    insert.execute(params![job_id, chunk_index, identifier, result, expires_at])?;
                }
            }
            tx.commit()?;
            Ok(Some(progress))
        })
        .await
    }

    async fn progress(&self, job_id: &str, now: DateTime<Utc>) -> Result<Option<BatchProgress>> {
        let job_id = job_id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {} FROM batch_progress WHERE job_id = ?1 AND expires_at > ?2",
                        PROGRESS_COLUMNS
                    ),
                    params![job_id, millis(now)],
                    progress_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn results(&self, job_id: &str, now: DateTime<Utc>) -> Result<Vec<ResultRecord>> {
        let job_id = job_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT identifier, result FROM batch_results
                 WHERE job_id = ?1 AND expires_at > ?2
                 ORDER BY seq",
            )?;
            let rows = stmt
                .query_map(params![job_id, millis(now)], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .map(|(identifier, result)| -> Result<ResultRecord> {
                    Ok(ResultRecord {
                        identifier: Identifier::parse(&identifier)?,
                        result: serde_json::from_str(&result)?,
                    })
                })
                .collect()
        })
        .await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(move |conn| {
            let now = millis(now);
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut removed = tx.execute("DELETE FROM batch_results WHERE expires_at <= ?1", params![now])?;
            removed += tx.execute("DELETE FROM batch_progress WHERE expires_at <= ?1", params![now])?;
            // pending entries of a purged batch could never complete
            removed += tx.execute(
                "DELETE FROM queue_entries WHERE job_id NOT IN (SELECT job_id FROM batch_progress)",
                [],
            )?;
            tx.commit()?;
            Ok(removed)
        })
        .await
    }
}
