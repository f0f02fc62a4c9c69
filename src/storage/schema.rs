//! Database schema definitions

pub const SCHEMA_SQL: &str = r#"
-- Latest checkpoint per session; the body is a JSON document
CREATE TABLE IF NOT EXISTS session_checkpoints (
    session_id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL,
    checkpoint_time TEXT NOT NULL,
    payload TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_checkpoints_time ON session_checkpoints(checkpoint_time);

-- One row per URL completion in a session; re-completion updates the row
CREATE TABLE IF NOT EXISTS visited_urls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    url TEXT NOT NULL,
    domain TEXT NOT NULL,
    visited_at TEXT NOT NULL,
    success INTEGER NOT NULL,
    status_code INTEGER,
    error_message TEXT,
    attempts INTEGER NOT NULL DEFAULT 1,
    UNIQUE(session_id, url)
);

CREATE INDEX IF NOT EXISTS idx_visited_session ON visited_urls(session_id);

-- URL lists a session needs to rebuild its frontier
CREATE TABLE IF NOT EXISTS crawl_states (
    session_id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL,
    status TEXT NOT NULL,
    max_depth INTEGER NOT NULL,
    urls_to_visit TEXT NOT NULL,
    urls_visited TEXT NOT NULL,
    urls_failed TEXT NOT NULL,
    error_message TEXT,
    started_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Latest liveness sample per session
CREATE TABLE IF NOT EXISTS session_heartbeats (
    session_id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL,
    status TEXT NOT NULL,
    urls_processed INTEGER NOT NULL,
    urls_remaining INTEGER NOT NULL,
    current_url TEXT,
    memory_usage_mb REAL,
    active_handles INTEGER NOT NULL,
    health_score REAL NOT NULL,
    recorded_at TEXT NOT NULL
);
"#;

pub fn initialize_schema(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN
                 ('session_checkpoints', 'visited_urls', 'crawl_states', 'session_heartbeats')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }
}
