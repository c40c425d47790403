//! Merging worker partial files into the canonical store
//!
//! Frames from every partial file are ordered by flush time and applied in a
//! single storage transaction, so for a unit seen in several frames the last
//! flushed outcome wins. Partial files are deleted only after the transaction
//! commits; a crash in between leaves them on disk, and the next run merges
//! them again, which the store turns into a no-op for frames already applied.

use crate::orchestrator::batch::{parse_partial_file_name, read_partial, FlushFrame};
use crate::storage::{FieldPatch, MergeStats, Storage, StorageError};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while merging partial files
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Failed to read partial file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to list partials directory {path}: {source}")]
    ListDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to apply merged frames: {0}")]
    Storage(#[from] StorageError),
}

/// Reads every frame of the given partial files, in merge order
///
/// Files that no longer exist are skipped.
pub fn collect_frames(paths: &[PathBuf]) -> Result<Vec<FlushFrame>, MergeError> {
    let mut frames = Vec::new();

    for path in paths {
        if !path.exists() {
            tracing::debug!("Partial file {} is gone, skipping", path.display());
            continue;
        }
        let mut read = read_partial(path).map_err(|source| MergeError::Read {
            path: path.clone(),
            source,
        })?;
        frames.append(&mut read);
    }

    frames.sort_by_key(|frame| frame.order_key());
    Ok(frames)
}

/// Merges partial files of `crawl` into storage and deletes them
pub fn merge_partials(
    storage: &mut dyn Storage,
    crawl: &str,
    patch: Option<&FieldPatch>,
    paths: &[PathBuf],
) -> Result<MergeStats, MergeError> {
    let frames = collect_frames(paths)?;
    let stats = storage.apply_frames(crawl, patch, &frames)?;

    tracing::info!(
        "Merged {} frame(s) of {} ({} skipped): {} unit(s) completed, {} failed, {} record(s)",
        stats.frames_applied,
        crawl,
        stats.frames_skipped,
        stats.units_completed,
        stats.units_failed,
        stats.records_written
    );
    if let Some(patch) = patch {
        tracing::info!(
            "Patched {} '{}' value(s) into {}",
            stats.fields_patched,
            patch.field,
            patch.target_crawl
        );
    }

    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Could not delete merged partial {}: {}", path.display(), e),
        }
    }

    Ok(stats)
}

/// Lists partial files of `crawl` left behind in `dir`, oldest run first
pub fn leftover_partials(dir: &Path, crawl: &str) -> Result<Vec<PathBuf>, MergeError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(dir).map_err(|source| MergeError::ListDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut found: Vec<((i64, usize), PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let key = parse_partial_file_name(crawl, name.to_str()?)?;
            Some((key, entry.path()))
        })
        .collect();

    found.sort();
    Ok(found.into_iter().map(|(_, path)| path).collect())
}
