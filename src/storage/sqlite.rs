//! SQLite storage implementation

use crate::session::{SessionCheckpoint, SessionHeartbeat};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::state::TaskStatus;
use crate::storage::{CrawlState, CrawlStatus, VisitedUrl};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

/// Fixed-width UTC timestamps so stored values order lexically
fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &str, value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StorageError::Timestamp {
            column: column.to_string(),
            value: value.to_string(),
        })
}

fn row_to_visited(row: &Row<'_>) -> rusqlite::Result<(VisitedUrl, String)> {
    let visited_at: String = row.get(3)?;
    Ok((
        VisitedUrl {
            session_id: row.get(0)?,
            url: row.get(1)?,
            domain: row.get(2)?,
            visited_at: Utc::now(),
            success: row.get(4)?,
            status_code: row.get(5)?,
            error_message: row.get(6)?,
            attempts: row.get(7)?,
        },
        visited_at,
    ))
}

impl Storage for SqliteStorage {
    // ===== Checkpoints =====

    fn save_checkpoint(&mut self, checkpoint: &SessionCheckpoint) -> StorageResult<()> {
        let payload = serde_json::to_string(checkpoint)?;
        self.conn.execute(
            "INSERT INTO session_checkpoints (session_id, task_id, checkpoint_time, payload)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_id) DO UPDATE SET
                task_id = excluded.task_id,
                checkpoint_time = excluded.checkpoint_time,
                payload = excluded.payload",
            params![
                checkpoint.session_id,
                checkpoint.task_id,
                timestamp(&checkpoint.checkpoint_time),
                payload
            ],
        )?;
        Ok(())
    }

    fn load_checkpoint(&self, session_id: &str) -> StorageResult<Option<SessionCheckpoint>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM session_checkpoints WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    fn list_checkpoints(&self) -> StorageResult<Vec<SessionCheckpoint>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM session_checkpoints ORDER BY checkpoint_time DESC")?;
        let payloads = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        payloads
            .iter()
            .map(|payload| serde_json::from_str(payload).map_err(StorageError::from))
            .collect()
    }

    fn delete_sessions_before(&mut self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let cutoff = timestamp(&cutoff);
        let tx = self.conn.transaction()?;

        tx.execute(
            "DELETE FROM visited_urls WHERE session_id IN
                (SELECT session_id FROM session_checkpoints WHERE checkpoint_time < ?1)",
            params![cutoff],
        )?;
        tx.execute(
            "DELETE FROM session_heartbeats WHERE session_id IN
                (SELECT session_id FROM session_checkpoints WHERE checkpoint_time < ?1)",
            params![cutoff],
        )?;
        tx.execute(
            "DELETE FROM crawl_states WHERE session_id IN
                (SELECT session_id FROM session_checkpoints WHERE checkpoint_time < ?1)",
            params![cutoff],
        )?;
        let removed = tx.execute(
            "DELETE FROM session_checkpoints WHERE checkpoint_time < ?1",
            params![cutoff],
        )?;

        tx.commit()?;
        Ok(removed)
    }

    // ===== Visited URLs =====

    fn save_visited_url(&mut self, record: &VisitedUrl) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO visited_urls
                (session_id, url, domain, visited_at, success, status_code, error_message, attempts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)
             ON CONFLICT(session_id, url) DO UPDATE SET
                visited_at = excluded.visited_at,
                success = excluded.success,
                status_code = excluded.status_code,
                error_message = excluded.error_message,
                attempts = visited_urls.attempts + 1",
            params![
                record.session_id,
                record.url,
                record.domain,
                timestamp(&record.visited_at),
                record.success,
                record.status_code,
                record.error_message,
            ],
        )?;
        Ok(())
    }

    fn visited_urls(&self, session_id: &str) -> StorageResult<Vec<VisitedUrl>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, url, domain, visited_at, success, status_code, error_message, attempts
             FROM visited_urls WHERE session_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![session_id], row_to_visited)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(mut record, visited_at)| {
                record.visited_at = parse_timestamp("visited_at", &visited_at)?;
                Ok(record)
            })
            .collect()
    }

    // ===== Crawl State =====

    fn save_crawl_state(&mut self, state: &CrawlState) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO crawl_states
                (session_id, task_id, status, max_depth, urls_to_visit, urls_visited,
                 urls_failed, error_message, started_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(session_id) DO UPDATE SET
                task_id = excluded.task_id,
                status = excluded.status,
                max_depth = excluded.max_depth,
                urls_to_visit = excluded.urls_to_visit,
                urls_visited = excluded.urls_visited,
                urls_failed = excluded.urls_failed,
                error_message = excluded.error_message,
                updated_at = excluded.updated_at",
            params![
                state.session_id,
                state.task_id,
                state.status.to_db_string(),
                state.max_depth,
                serde_json::to_string(&state.urls_to_visit)?,
                serde_json::to_string(&state.urls_visited)?,
                serde_json::to_string(&state.urls_failed)?,
                state.error_message,
                timestamp(&state.started_at),
                timestamp(&state.updated_at),
            ],
        )?;
        Ok(())
    }

    fn load_crawl_state(&self, session_id: &str) -> StorageResult<Option<CrawlState>> {
        let row = self
            .conn
            .query_row(
                "SELECT session_id, task_id, status, max_depth, urls_to_visit, urls_visited,
                        urls_failed, error_message, started_at, updated_at
                 FROM crawl_states WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, Option<String>>(7)?,
                        row.get::<_, String>(8)?,
                        row.get::<_, String>(9)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            session_id,
            task_id,
            status,
            max_depth,
            to_visit,
            visited,
            failed,
            error_message,
            started_at,
            updated_at,
        )) = row
        else {
            return Ok(None);
        };

        Ok(Some(CrawlState {
            session_id,
            task_id,
            status: CrawlStatus::from_db_string(&status).unwrap_or(CrawlStatus::Failed),
            max_depth,
            urls_to_visit: serde_json::from_str(&to_visit)?,
            urls_visited: serde_json::from_str(&visited)?,
            urls_failed: serde_json::from_str(&failed)?,
            error_message,
            started_at: parse_timestamp("started_at", &started_at)?,
            updated_at: parse_timestamp("updated_at", &updated_at)?,
        }))
    }

    // ===== Heartbeats =====

    fn save_heartbeat(&mut self, heartbeat: &SessionHeartbeat) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO session_heartbeats
                (session_id, task_id, status, urls_processed, urls_remaining, current_url,
                 memory_usage_mb, active_handles, health_score, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(session_id) DO UPDATE SET
                task_id = excluded.task_id,
                status = excluded.status,
                urls_processed = excluded.urls_processed,
                urls_remaining = excluded.urls_remaining,
                current_url = excluded.current_url,
                memory_usage_mb = excluded.memory_usage_mb,
                active_handles = excluded.active_handles,
                health_score = excluded.health_score,
                recorded_at = excluded.recorded_at",
            params![
                heartbeat.session_id,
                heartbeat.task_id,
                heartbeat.status.as_str(),
                heartbeat.urls_processed as i64,
                heartbeat.urls_remaining as i64,
                heartbeat.current_url,
                heartbeat.memory_usage_mb,
                heartbeat.active_handles as i64,
                heartbeat.health_score,
                timestamp(&heartbeat.recorded_at),
            ],
        )?;
        Ok(())
    }

    fn load_heartbeat(&self, session_id: &str) -> StorageResult<Option<SessionHeartbeat>> {
        let row = self
            .conn
            .query_row(
                "SELECT session_id, task_id, status, urls_processed, urls_remaining, current_url,
                        memory_usage_mb, active_handles, health_score, recorded_at
                 FROM session_heartbeats WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok((
                        SessionHeartbeat {
                            session_id: row.get(0)?,
                            task_id: row.get(1)?,
                            status: TaskStatus::Initializing,
                            urls_processed: row.get::<_, i64>(3)?.max(0) as u64,
                            urls_remaining: row.get::<_, i64>(4)?.max(0) as u64,
                            current_url: row.get(5)?,
                            memory_usage_mb: row.get(6)?,
                            active_handles: row.get::<_, i64>(7)?.max(0) as usize,
                            health_score: row.get(8)?,
                            recorded_at: Utc::now(),
                        },
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(9)?,
                    ))
                },
            )
            .optional()?;

        let Some((mut heartbeat, status, recorded_at)) = row else {
            return Ok(None);
        };
        heartbeat.status = TaskStatus::from_db_string(&status).unwrap_or(TaskStatus::Failed);
        heartbeat.recorded_at = parse_timestamp("recorded_at", &recorded_at)?;
        Ok(Some(heartbeat))
    }
}
