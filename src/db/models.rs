/// Summary row for one cached graph.
#[derive(Debug, Clone)]
pub struct CachedGraph {
    pub fingerprint: String,
    pub source: Option<String>,
    pub kind: String,
    pub node_count: i64,
    pub candidate_count: i64,
    pub edge_count: i64,
    pub warning_count: i64,
    pub threshold: Option<f64>,
    pub created_at: String,
}

/// Cache-wide statistics.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub graphs: i64,
    pub tracks: i64,
    pub total_nodes: i64,
    pub total_edges: i64,
    pub graphs_with_warnings: i64,
    pub payload_bytes: i64,
    pub kinds: Vec<(String, i64)>,
}
