//! Database schema definitions
//!
//! The canonical result store and the checkpoint share one database so a
//! merge can update both in a single transaction.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    crawl TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    attempted INTEGER NOT NULL DEFAULT 0,
    succeeded INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    abandoned INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_runs_crawl ON runs(crawl);

-- Canonical merged records, keyed by crawl, work unit and position on the page
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    crawl TEXT NOT NULL,
    unit_id TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    fields TEXT NOT NULL,
    run_id INTEGER NOT NULL,
    flushed_at TEXT NOT NULL,
    UNIQUE(crawl, unit_id, ordinal)
);

CREATE INDEX IF NOT EXISTS idx_records_unit ON records(crawl, unit_id);

-- Work units completed across runs
CREATE TABLE IF NOT EXISTS checkpoint (
    crawl TEXT NOT NULL,
    unit_id TEXT NOT NULL,
    run_id INTEGER NOT NULL,
    completed_at TEXT NOT NULL,
    PRIMARY KEY (crawl, unit_id)
);

-- Work units whose latest attempt failed recoverably
CREATE TABLE IF NOT EXISTS failures (
    crawl TEXT NOT NULL,
    unit_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    reason TEXT NOT NULL,
    run_id INTEGER NOT NULL,
    failed_at TEXT NOT NULL,
    PRIMARY KEY (crawl, unit_id)
);

-- Flush frames already applied, so re-merging a leftover partial is a no-op
CREATE TABLE IF NOT EXISTS merged_flushes (
    crawl TEXT NOT NULL,
    run_id INTEGER NOT NULL,
    worker_id INTEGER NOT NULL,
    seq INTEGER NOT NULL,
    merged_at TEXT NOT NULL,
    PRIMARY KEY (crawl, run_id, worker_id, seq)
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_creation() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for table in ["checkpoint", "failures", "merged_flushes", "records", "runs"] {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }
    }

    #[test]
    fn test_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();
    }
}
