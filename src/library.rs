//! Building graphs for analysis files on disk, through the cache.

use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;
use walkdir::WalkDir;

use crate::analysis::source::{AnalysisSource, JsonFileSource, SourceError};
use crate::db::{DbError, GraphStore};
use crate::graph::{build_graph_with_workers, AnnotatedTrack, GraphConfig, GraphError};

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Built,
    Cached,
}

pub struct BatchResult {
    pub scanned: u64,
    pub built: u64,
    pub cached: u64,
    pub failed: u64,
}

/// Graph for analysis `id`, from the cache when an entry for the same track
/// content and configuration exists. Fresh builds are written back.
pub fn load_or_build(
    store: &GraphStore,
    source: &dyn AnalysisSource,
    id: &str,
    config: &GraphConfig,
    workers: usize,
    use_cache: bool,
) -> Result<(AnnotatedTrack, BuildOutcome), LibraryError> {
    let track = source.fetch(id)?;
    let fingerprint = track.fingerprint();

    if use_cache {
        if let Some(graph) = store.load(&fingerprint, config)? {
            log::debug!("Cache hit for {id} ({fingerprint})");
            return Ok((graph, BuildOutcome::Cached));
        }
    }

    let graph = build_graph_with_workers(track, config, workers)?;
    for warning in graph.warnings() {
        log::warn!("{id}: {warning}");
    }
    store.store(&graph, Some(id))?;
    Ok((graph, BuildOutcome::Built))
}

/// Drop cached graphs for the analysis at `id`. Returns the rows removed.
pub fn forget(store: &GraphStore, source: &dyn AnalysisSource, id: &str) -> Result<usize, LibraryError> {
    let track = source.fetch(id)?;
    Ok(store.remove(&track.fingerprint())?)
}

/// Build graphs for every `.json` analysis under `dir`.
pub fn build_directory(
    store: &GraphStore,
    dir: &Path,
    config: &GraphConfig,
    workers: usize,
    use_cache: bool,
) -> Result<BatchResult, LibraryError> {
    let mut files: Vec<walkdir::DirEntry> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        })
        .collect();
    files.sort_by(|a, b| a.path().cmp(b.path()));

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );
    pb.set_message("Building...");

    let mut result = BatchResult {
        scanned: 0,
        built: 0,
        cached: 0,
        failed: 0,
    };

    let source = JsonFileSource::new(dir);

    // One transaction for the whole batch
    let tx = store.conn.unchecked_transaction().map_err(DbError::from)?;

    for entry in &files {
        let id = entry.path().to_string_lossy();
        result.scanned += 1;

        match load_or_build(store, &source, &id, config, workers, use_cache) {
            Ok((_, BuildOutcome::Built)) => result.built += 1,
            Ok((_, BuildOutcome::Cached)) => result.cached += 1,
            Err(e) => {
                log::warn!("Skipping {}: {}", entry.path().display(), e);
                result.failed += 1;
            }
        }

        pb.inc(1);
    }

    tx.commit().map_err(DbError::from)?;

    pb.finish_with_message(format!(
        "Done: {} built, {} cached, {} failed",
        result.built, result.cached, result.failed
    ));

    Ok(result)
}
