use crate::app::ports::PropertyStorePort;
use crate::common::error::Result;
use crate::common::types::{Identifier, Job, PostalHint, ResolutionResult};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// Stored resolution state of one property
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyRecord {
    pub identifier: String,
    pub outward: Option<String>,
    pub inward: Option<String>,
    pub address: Option<String>,
    pub confidence: Option<f64>,
    pub source_tag: Option<String>,
    pub strategy: Option<String>,
    pub last_error: Option<String>,
    pub attempts: u32,
}

/// Source-of-record table of listings and their resolved addresses
pub struct SqlitePropertyStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePropertyStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS properties (
                identifier   TEXT PRIMARY KEY,
                outward      TEXT,
                inward       TEXT,
                address      TEXT,
                confidence   REAL,
                source_tag   TEXT,
                strategy     TEXT,
                resolved_at  INTEGER,
                last_error   TEXT,
                attempts     INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` on the blocking pool so a busy database never stalls the runtime.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&conn)
        })
        .await?
    }

    /// Insert or refresh a property's postal hint without touching its resolution.
    pub fn upsert_property(&self, identifier: &Identifier, hint: &PostalHint) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT INTO properties (identifier, outward, inward) VALUES (?1, ?2, ?3)
             ON CONFLICT(identifier) DO UPDATE SET outward = excluded.outward, inward = excluded.inward",
            params![identifier.as_str(), hint.outward, hint.inward],
        )?;
        Ok(())
    }

    pub fn get(&self, identifier: &Identifier) -> Result<Option<PropertyRecord>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(conn
            .query_row(
                "SELECT identifier, outward, inward, address, confidence, source_tag, strategy,
                        last_error, attempts
                 FROM properties WHERE identifier = ?1",
                params![identifier.as_str()],
                |row| {
                    Ok(PropertyRecord {
                        identifier: row.get(0)?,
                        outward: row.get(1)?,
                        inward: row.get(2)?,
                        address: row.get(3)?,
                        confidence: row.get(4)?,
                        source_tag: row.get(5)?,
                        strategy: row.get(6)?,
                        last_error: row.get(7)?,
                        attempts: row.get::<_, i64>(8)? as u32,
                    })
                },
            )
            .optional()?)
    }
}

#[async_trait]
impl PropertyStorePort for SqlitePropertyStore {
    async fn fetch_unresolved(&self, after: Option<&Identifier>, limit: usize) -> Result<Vec<Job>> {
        let after = after.map(|id| id.as_str().to_string()).unwrap_or_default();
        let rows = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT identifier, outward, inward FROM properties
                     WHERE address IS NULL AND identifier > ?1
                     ORDER BY identifier
                     LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![after, limit as i64], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, Option<String>>(2)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for (identifier, outward, inward) in rows {
            let identifier = match Identifier::parse(&identifier) {
                Ok(id) => id,
                Err(e) => {
                    warn!(%identifier, error = %e, "skipping unusable identifier");
                    continue;
                }
            };
            let hint = PostalHint::new(outward.as_deref(), inward.as_deref()).unwrap_or_else(|e| {
                warn!(%identifier, error = %e, "ignoring malformed postal hint");
                PostalHint::none()
            });
            jobs.push(Job::new(identifier, hint));
        }
        Ok(jobs)
    }

    async fn save_resolution(&self, identifier: &Identifier, result: &ResolutionResult) -> Result<()> {
        let identifier = identifier.as_str().to_string();
        let result = result.clone();
        let resolved_at = Utc::now().timestamp_millis();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO properties (identifier) VALUES (?1) ON CONFLICT(identifier) DO NOTHING",
                params![identifier],
            )?;
            if result.success {
                conn.execute(
                    "UPDATE properties
                     SET address = ?2, confidence = ?3, source_tag = ?4, strategy = ?5,
                         resolved_at = ?6, last_error = NULL, attempts = attempts + 1
                     WHERE identifier = ?1",
                    params![
                        identifier,
                        result.address,
                        result.confidence,
                        result.source_tag.as_str(),
                        result.strategy.map(|s| s.as_str()),
                        resolved_at,
                    ],
                )?;
            } else {
                conn.execute(
                    "UPDATE properties SET last_error = ?2, attempts = attempts + 1 WHERE identifier = ?1",
                    params![identifier, result.error_summary()],
                )?;
            }
            Ok(())
        })
        .await
    }
}
