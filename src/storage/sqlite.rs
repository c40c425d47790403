//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::extract::{Fields, Record};
use crate::orchestrator::{FlushFrame, UnitOutcome};
use crate::state::CheckpointState;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{FieldPatch, MergeStats, RunCounts, RunRecord, RunStatus};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::collections::HashSet;
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens (creating if needed) the database at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        crawl: row.get(1)?,
        started_at: row.get(2)?,
        finished_at: row.get(3)?,
        config_hash: row.get(4)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(5)?).unwrap_or(RunStatus::Running),
        counts: RunCounts {
            attempted: row.get(6)?,
            succeeded: row.get(7)?,
            failed: row.get(8)?,
            abandoned: row.get(9)?,
        },
    })
}

const RUN_COLUMNS: &str =
    "id, crawl, started_at, finished_at, config_hash, status, attempted, succeeded, failed, abandoned";

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, crawl: &str, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (crawl, started_at, config_hash, status) VALUES (?1, ?2, ?3, ?4)",
            params![crawl, now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self, crawl: &str) -> StorageResult<Option<RunRecord>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM runs WHERE crawl = ?1 ORDER BY id DESC LIMIT 1",
                    RUN_COLUMNS
                ),
                params![crawl],
                run_from_row,
            )
            .optional()?)
    }

    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        counts: RunCounts,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2, attempted = ?3, succeeded = ?4,
             failed = ?5, abandoned = ?6 WHERE id = ?7",
            params![
                status.to_db_string(),
                now,
                counts.attempted,
                counts.succeeded,
                counts.failed,
                counts.abandoned,
                run_id
            ],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Checkpoint =====

    fn load_checkpoint(&self, crawl: &str) -> StorageResult<CheckpointState> {
        let mut stmt = self
            .conn
            .prepare("SELECT unit_id FROM checkpoint WHERE crawl = ?1")?;
        let ids = stmt
            .query_map(params![crawl], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids.into_iter().collect())
    }

    fn count_checkpoint(&self, crawl: &str) -> StorageResult<u64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM checkpoint WHERE crawl = ?1",
            params![crawl],
            |row| row.get(0),
        )?)
    }

    // ===== Records =====

    fn get_records(&self, crawl: &str) -> StorageResult<Vec<Record>> {
        let mut stmt = self
            .conn
            .prepare("SELECT unit_id, fields FROM records WHERE crawl = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![crawl], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(unit_id, json)| {
                let fields: Fields = serde_json::from_str(&json)?;
                Ok(Record::new(unit_id, fields))
            })
            .collect()
    }

    fn count_records(&self, crawl: &str) -> StorageResult<u64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE crawl = ?1",
            params![crawl],
            |row| row.get(0),
        )?)
    }

    fn field_values(&self, crawl: &str, field: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .get_records(crawl)?
            .into_iter()
            .filter_map(|r| r.get(field).map(str::to_string))
            .collect())
    }

    fn units_missing_field(&self, crawl: &str, field: &str) -> StorageResult<Vec<String>> {
        let mut seen = HashSet::new();
        Ok(self
            .get_records(crawl)?
            .into_iter()
            .filter(|record| record.get(field).is_none())
            .map(|record| record.unit_id)
            .filter(|unit| seen.insert(unit.clone()))
            .collect())
    }

    // ===== Failures =====

    fn count_failures(&self, crawl: &str) -> StorageResult<u64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM failures WHERE crawl = ?1",
            params![crawl],
            |row| row.get(0),
        )?)
    }

    fn failed_units(&self, crawl: &str) -> StorageResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT unit_id FROM failures WHERE crawl = ?1 ORDER BY unit_id")?;
        let ids = stmt
            .query_map(params![crawl], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    // ===== Merge =====

    fn apply_frames(
        &mut self,
        crawl: &str,
        patch: Option<&FieldPatch>,
        frames: &[FlushFrame],
    ) -> StorageResult<MergeStats> {
        let mut stats = MergeStats::default();
        let tx = self.conn.transaction()?;

        for frame in frames {
            let already: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM merged_flushes WHERE crawl = ?1 AND run_id = ?2
                     AND worker_id = ?3 AND seq = ?4",
                    params![crawl, frame.run_id, frame.worker_id as i64, frame.seq as i64],
                    |row| row.get(0),
                )
                .optional()?;
            if already.is_some() {
                stats.frames_skipped += 1;
                continue;
            }

            let flushed_at = frame.flushed_at.to_rfc3339();
            for entry in &frame.entries {
                match entry {
                    UnitOutcome::Completed { unit_id, records } => {
                        apply_completed(&tx, crawl, frame.run_id, &flushed_at, unit_id, records)?;
                        stats.units_completed += 1;
                        stats.records_written += records.len() as u64;

                        if let Some(patch) = patch {
                            stats.fields_patched += apply_patch(&tx, patch, unit_id, records)?;
                        }
                    }
                    UnitOutcome::Failed {
                        unit_id,
                        kind,
                        reason,
                    } => {
                        let checkpointed: Option<i64> = tx
                            .query_row(
                                "SELECT 1 FROM checkpoint WHERE crawl = ?1 AND unit_id = ?2",
                                params![crawl, unit_id],
                                |row| row.get(0),
                            )
                            .optional()?;
                        if checkpointed.is_none() {
                            tx.execute(
                                "INSERT OR REPLACE INTO failures
                                 (crawl, unit_id, kind, reason, run_id, failed_at)
                                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                                params![crawl, unit_id, kind, reason, frame.run_id, flushed_at],
                            )?;
                        }
                        stats.units_failed += 1;
                    }
                }
            }

            tx.execute(
                "INSERT INTO merged_flushes (crawl, run_id, worker_id, seq, merged_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    crawl,
                    frame.run_id,
                    frame.worker_id as i64,
                    frame.seq as i64,
                    Utc::now().to_rfc3339()
                ],
            )?;
            stats.frames_applied += 1;
        }

        tx.commit()?;
        Ok(stats)
    }

    // ===== Statistics =====

    fn crawl_names(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT crawl FROM runs UNION SELECT crawl FROM records ORDER BY crawl",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }
}

/// Replaces a unit's records and checkpoints it
fn apply_completed(
    tx: &Transaction<'_>,
    crawl: &str,
    run_id: i64,
    flushed_at: &str,
    unit_id: &str,
    records: &[Record],
) -> StorageResult<()> {
    tx.execute(
        "DELETE FROM records WHERE crawl = ?1 AND unit_id = ?2",
        params![crawl, unit_id],
    )?;

    for (ordinal, record) in records.iter().enumerate() {
        tx.execute(
            "INSERT INTO records (crawl, unit_id, ordinal, fields, run_id, flushed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                crawl,
                unit_id,
                ordinal as i64,
                serde_json::to_string(&record.fields)?,
                run_id,
                flushed_at
            ],
        )?;
    }

    tx.execute(
        "INSERT OR IGNORE INTO checkpoint (crawl, unit_id, run_id, completed_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![crawl, unit_id, run_id, flushed_at],
    )?;
    tx.execute(
        "DELETE FROM failures WHERE crawl = ?1 AND unit_id = ?2",
        params![crawl, unit_id],
    )?;

    Ok(())
}

/// Copies the repaired field onto the target crawl's records of the same unit
///
/// Returns the number of target records changed. Null values never overwrite.
fn apply_patch(
    tx: &Transaction<'_>,
    patch: &FieldPatch,
    unit_id: &str,
    records: &[Record],
) -> StorageResult<u64> {
    let Some(value) = records.iter().find_map(|r| r.get(&patch.field)) else {
        return Ok(0);
    };

    let targets = {
        let mut stmt =
            tx.prepare("SELECT id, fields FROM records WHERE crawl = ?1 AND unit_id = ?2")?;
        let rows = stmt
            .query_map(params![patch.target_crawl, unit_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let mut patched = 0;
    for (id, json) in targets {
        let mut fields: Fields = serde_json::from_str(&json)?;
        fields.insert(patch.field.clone(), Some(value.to_string()));
        tx.execute(
            "UPDATE records SET fields = ?1 WHERE id = ?2",
            params![serde_json::to_string(&fields)?, id],
        )?;
        patched += 1;
    }

    Ok(patched)
}
