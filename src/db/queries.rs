use super::models::{CacheStats, CachedGraph};
use super::{GraphStore, Result};
use crate::graph::{AnnotatedTrack, GraphConfig};
use rusqlite::{params, OptionalExtension};

impl GraphStore {
    /// Insert or replace the cached graph for its (fingerprint, config) key.
    pub fn store(&self, graph: &AnnotatedTrack, source: Option<&str>) -> Result<()> {
        let payload = serde_json::to_string(graph)?;
        self.conn.execute(
            "INSERT INTO graphs (
                fingerprint, config_key, source,
                kind, node_count, candidate_count, edge_count, warning_count, threshold,
                payload, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, datetime('now'))
            ON CONFLICT(fingerprint, config_key) DO UPDATE SET
                source = COALESCE(excluded.source, graphs.source),
                kind = excluded.kind,
                node_count = excluded.node_count,
                candidate_count = excluded.candidate_count,
                edge_count = excluded.edge_count,
                warning_count = excluded.warning_count,
                threshold = excluded.threshold,
                payload = excluded.payload,
                created_at = datetime('now')
            ",
            params![
                graph.fingerprint(),
                graph.config().cache_key(),
                source,
                graph.kind().as_str(),
                graph.len() as i64,
                graph.candidate_count() as i64,
                graph.edge_count() as i64,
                graph.warnings().len() as i64,
                graph.threshold(),
                payload,
            ],
        )?;
        Ok(())
    }

    /// Cached graph for this track built with exactly this configuration.
    pub fn load(&self, fingerprint: &str, config: &GraphConfig) -> Result<Option<AnnotatedTrack>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM graphs WHERE fingerprint = ?1 AND config_key = ?2",
                params![fingerprint, config.cache_key()],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Drop every cached graph of a track. Returns the number of rows removed.
    pub fn remove(&self, fingerprint: &str) -> Result<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM graphs WHERE fingerprint = ?1", params![fingerprint])?)
    }

    /// Fingerprints cached for an analysis source id, newest first.
    pub fn fingerprints_for_source(&self, source: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT fingerprint FROM graphs WHERE source = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![source], |row| row.get(0))?;
        Ok(rows.collect::<std::result::Result<Vec<String>, _>>()?)
    }

    pub fn list(&self) -> Result<Vec<CachedGraph>> {
        let mut stmt = self.conn.prepare(
            "SELECT fingerprint, source, kind, node_count, candidate_count, edge_count,
                    warning_count, threshold, created_at
             FROM graphs
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(CachedGraph {
                fingerprint: row.get(0)?,
                source: row.get(1)?,
                kind: row.get(2)?,
                node_count: row.get(3)?,
                candidate_count: row.get(4)?,
                edge_count: row.get(5)?,
                warning_count: row.get(6)?,
                threshold: row.get(7)?,
                created_at: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let mut stats = self.conn.query_row(
            "SELECT COUNT(*),
                    COUNT(DISTINCT fingerprint),
                    COALESCE(SUM(node_count), 0),
                    COALESCE(SUM(edge_count), 0),
                    COALESCE(SUM(warning_count > 0), 0),
                    COALESCE(SUM(LENGTH(payload)), 0)
             FROM graphs",
            [],
            |row| {
                Ok(CacheStats {
                    graphs: row.get(0)?,
                    tracks: row.get(1)?,
                    total_nodes: row.get(2)?,
                    total_edges: row.get(3)?,
                    graphs_with_warnings: row.get(4)?,
                    payload_bytes: row.get(5)?,
                    kinds: Vec::new(),
                })
            },
        )?;

        let mut stmt = self
            .conn
            .prepare("SELECT kind, COUNT(*) FROM graphs GROUP BY kind ORDER BY COUNT(*) DESC")?;
        stats.kinds = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(stats)
    }
}
