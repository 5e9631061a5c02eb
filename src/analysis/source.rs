use std::path::{Path, PathBuf};

use thiserror::Error;

use super::model::AnalysisPayload;
use super::{AnalysisError, Track};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed analysis JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error("No analysis found for {0}")]
    NotFound(String),
}

/// Supplies complete, parsed tracks. Fetching and retry policy live behind this
/// boundary; the graph code only ever sees a finished [`Track`].
pub trait AnalysisSource {
    fn fetch(&self, id: &str) -> Result<Track, SourceError>;
}

/// Parse an analysis document. Only the five node arrays are read; any other
/// top-level keys are ignored.
pub fn parse_payload(json: &str) -> Result<Track, SourceError> {
    let payload: AnalysisPayload = serde_json::from_str(json)?;
    Ok(Track::from_payload(payload)?)
}

/// Reads `<dir>/<id>.json`, or `id` itself when it names an existing file.
pub struct JsonFileSource {
    dir: PathBuf,
}

impl JsonFileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn resolve(&self, id: &str) -> Option<PathBuf> {
        let direct = Path::new(id);
        if direct.is_file() {
            return Some(direct.to_path_buf());
        }
        let candidate = self.dir.join(format!("{id}.json"));
        candidate.is_file().then_some(candidate)
    }
}

impl AnalysisSource for JsonFileSource {
    fn fetch(&self, id: &str) -> Result<Track, SourceError> {
        let path = self
            .resolve(id)
            .ok_or_else(|| SourceError::NotFound(id.to_string()))?;
        log::debug!("Reading analysis from {}", path.display());
        let json = std::fs::read_to_string(&path).map_err(|source| SourceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        parse_payload(&json)
    }
}
