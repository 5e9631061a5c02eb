//! Jump graph construction.
//!
//! For one node kind (beats by default) every node gets a candidate edge to
//! each later node at least `min_gap` positions ahead. Candidates are scored by
//! [`TimbreDistance`], then thinned to the `max_neighbours` closest edges that
//! also fall under a percentile threshold of the whole candidate distribution.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::analysis::model::FEATURE_DIM;
use crate::analysis::{Kind, NodeRef, Track};
use crate::config::ConfigError;
use crate::distance::{TimbreAggregation, TimbreDistance};
use crate::link::{link, LinkError, LinkOptions, LinkedTrack};

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Linking failed: {0}")]
    Link(#[from] LinkError),
    #[error("Need at least 2 {kind} nodes to build a jump graph, found {nodes}")]
    EmptyCandidateSet { kind: Kind, nodes: usize },
    #[error("Could not start worker pool: {0}")]
    ThreadPool(String),
}

/// Jump graph tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Node kind the graph is built over.
    pub kind: Kind,
    /// A jump must land at least this many nodes ahead. Shorter jumps stutter.
    pub min_gap: usize,
    /// Retained edges per node.
    pub max_neighbours: usize,
    /// Percentile of all candidate distances used as the acceptance threshold.
    pub percentile: f64,
    /// Leading timbre coefficients compared by the distance metric.
    pub coefficients: usize,
    pub aggregation: TimbreAggregation,
    pub detach_leading_orphans: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            kind: Kind::Beat,
            min_gap: 4,
            max_neighbours: 4,
            percentile: 10.0,
            coefficients: TimbreDistance::DEFAULT_COEFFICIENTS,
            aggregation: TimbreAggregation::OwningSegment,
            detach_leading_orphans: false,
        }
    }
}

impl GraphConfig {
    /// Check every knob and return the distance metric it describes.
    pub fn validate(&self) -> Result<TimbreDistance, ConfigError> {
        if !(0.0..=100.0).contains(&self.percentile) {
            return Err(ConfigError::InvalidThreshold(self.percentile));
        }
        if self.max_neighbours == 0 {
            return Err(ConfigError::InvalidNeighbourCount);
        }
        if self.min_gap == 0 {
            return Err(ConfigError::InvalidMinGap);
        }
        if self.kind == Kind::Section {
            return Err(ConfigError::UnsupportedKind(self.kind));
        }
        TimbreDistance::new(self.coefficients, self.aggregation)
    }

    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            detach_leading_orphans: self.detach_leading_orphans,
        }
    }

    /// Hex digest identifying every setting that affects the built graph.
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind.as_str().as_bytes());
        hasher.update((self.min_gap as u64).to_le_bytes());
        hasher.update((self.max_neighbours as u64).to_le_bytes());
        hasher.update(self.percentile.to_le_bytes());
        hasher.update((self.coefficients as u64).to_le_bytes());
        hasher.update([self.aggregation as u8, self.detach_leading_orphans as u8]);
        format!("{:x}", hasher.finalize())
    }
}

/// A directed jump between two nodes of the same kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JumpEdge {
    pub id: usize,
    pub source: NodeRef,
    pub target: NodeRef,
    pub distance: f64,
}

/// Graph annotations for one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub which: usize,
    /// Retained edges, closest first.
    pub neighbours: Vec<JumpEdge>,
    /// Every candidate edge, closest first.
    pub all_neighbours: Vec<JumpEdge>,
    /// Furthest index reachable through `neighbours`, transitively.
    pub reach: usize,
}

/// Non-fatal findings about how much of the track jumps can reach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphCoverageWarning {
    /// From `from` to the end no node has an outgoing jump, and this run is
    /// longer than the `min_gap` nodes that never can.
    DeadTail { from: usize, len: usize },
    /// Nodes before the tail that no jump path ever leaves.
    DeadNodes { count: usize },
}

impl std::fmt::Display for GraphCoverageWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeadTail { from, len } => {
                write!(f, "last {len} nodes (from #{from}) have no outgoing jumps")
            }
            Self::DeadNodes { count } => write!(f, "{count} nodes have no outgoing jump path"),
        }
    }
}

/// A linked track plus its jump graph. Immutable once built; safe to share
/// between any number of playback sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedTrack {
    fingerprint: String,
    config: GraphConfig,
    linked: LinkedTrack,
    threshold: Option<f64>,
    nodes: Vec<GraphNode>,
    warnings: Vec<GraphCoverageWarning>,
}

impl AnnotatedTrack {
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn kind(&self) -> Kind {
        self.config.kind
    }

    pub fn linked(&self) -> &LinkedTrack {
        &self.linked
    }

    pub fn track(&self) -> &Track {
        self.linked.track()
    }

    /// Distance threshold derived from the percentile; `None` when the track
    /// is too short to have any candidate pair.
    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn node(&self, which: usize) -> Option<&GraphNode> {
        self.nodes.get(which)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn warnings(&self) -> &[GraphCoverageWarning] {
        &self.warnings
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|n| n.neighbours.len()).sum()
    }

    pub fn candidate_count(&self) -> usize {
        self.nodes.iter().map(|n| n.all_neighbours.len()).sum()
    }
}

/// Link `track` and build its jump graph on the global rayon pool.
pub fn build_graph(track: Track, config: &GraphConfig) -> Result<AnnotatedTrack, GraphError> {
    build_graph_with_workers(track, config, 0)
}

/// As [`build_graph`], with a dedicated pool of `workers` threads (0 = global pool).
pub fn build_graph_with_workers(
    track: Track,
    config: &GraphConfig,
    workers: usize,
) -> Result<AnnotatedTrack, GraphError> {
    // Fail fast on configuration before linking does any work.
    config.validate()?;
    let linked = link(track, &config.link_options())?;
    build_linked(linked, config, workers)
}

/// Build the jump graph over an already linked track.
pub fn build_linked(
    linked: LinkedTrack,
    config: &GraphConfig,
    workers: usize,
) -> Result<AnnotatedTrack, GraphError> {
    let distance = config.validate()?;
    let kind = config.kind;
    let n = linked.track().len(kind);
    if n < 2 {
        return Err(GraphError::EmptyCandidateSet { kind, nodes: n });
    }

    let timbres: Vec<Option<[f64; FEATURE_DIM]>> = (0..n)
        .map(|i| distance.timbre(&linked, NodeRef::new(kind, i)))
        .collect();
    let silent = timbres.iter().filter(|t| t.is_none()).count();
    if silent > 0 {
        log::debug!("{silent} of {n} {kind} nodes overlap no segment and get no edges");
    }

    let rows = candidate_rows(&timbres, &distance, config.min_gap, workers)?;

    let mut all: Vec<f64> = rows.iter().flatten().map(|&(_, d)| d).collect();
    all.sort_by(f64::total_cmp);
    let threshold = percentile(&all, config.percentile);

    let mut next_id = 0;
    let mut nodes: Vec<GraphNode> = rows
        .into_iter()
        .enumerate()
        .map(|(which, row)| {
            let source = NodeRef::new(kind, which);
            let mut all_neighbours: Vec<JumpEdge> = row
                .into_iter()
                .map(|(target, distance)| {
                    next_id += 1;
                    JumpEdge {
                        id: next_id - 1,
                        source,
                        target: NodeRef::new(kind, target),
                        distance,
                    }
                })
                .collect();
            all_neighbours.sort_by(|a, b| {
                a.distance
                    .total_cmp(&b.distance)
                    .then(a.target.which.cmp(&b.target.which))
            });
            let neighbours = match threshold {
                Some(t) => all_neighbours
                    .iter()
                    .filter(|e| e.distance <= t)
                    .take(config.max_neighbours)
                    .cloned()
                    .collect(),
                None => Vec::new(),
            };
            GraphNode {
                which,
                neighbours,
                all_neighbours,
                reach: which,
            }
        })
        .collect();

    // Edges only point forward, so targets are final before their sources.
    for which in (0..n).rev() {
        let reach = nodes[which]
            .neighbours
            .iter()
            .map(|e| nodes[e.target.which].reach)
            .fold(which, usize::max);
        nodes[which].reach = reach;
    }

    let warnings = coverage(&nodes, config.min_gap);
    for w in &warnings {
        log::warn!("Coverage: {w}");
    }

    let graph = AnnotatedTrack {
        fingerprint: linked.track().fingerprint(),
        config: config.clone(),
        linked,
        threshold,
        nodes,
        warnings,
    };
    log::info!(
        "Built {kind} graph: {} nodes, {} candidates, {} jump edges, threshold {}",
        graph.len(),
        graph.candidate_count(),
        graph.edge_count(),
        graph.threshold.map_or("n/a".to_string(), |t| format!("{t:.3}")),
    );
    Ok(graph)
}

/// Distances from each node to every node at least `min_gap` ahead, in target order.
fn candidate_rows(
    timbres: &[Option<[f64; FEATURE_DIM]>],
    distance: &TimbreDistance,
    min_gap: usize,
    workers: usize,
) -> Result<Vec<Vec<(usize, f64)>>, GraphError> {
    let n = timbres.len();
    let row = |a: usize| -> Vec<(usize, f64)> {
        let Some(ta) = &timbres[a] else {
            return Vec::new();
        };
        (a.saturating_add(min_gap)..n)
            .filter_map(|b| timbres[b].as_ref().map(|tb| (b, distance.between(ta, tb))))
            .collect()
    };

    if workers == 0 {
        return Ok((0..n).into_par_iter().map(row).collect());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| GraphError::ThreadPool(e.to_string()))?;
    Ok(pool.install(|| (0..n).into_par_iter().map(row).collect()))
}

/// Linear interpolation between closest ranks over sorted values.
fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = p / 100.0 * last as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
}

fn coverage(nodes: &[GraphNode], min_gap: usize) -> Vec<GraphCoverageWarning> {
    let n = nodes.len();
    let dead = |i: usize| nodes[i].reach == i;
    let tail_from = (0..n).rev().take_while(|&i| dead(i)).last().unwrap_or(n);

    let mut warnings = Vec::new();
    let tail_len = n - tail_from;
    if tail_len > min_gap.min(n) {
        warnings.push(GraphCoverageWarning::DeadTail {
            from: tail_from,
            len: tail_len,
        });
    }
    let count = (0..tail_from).filter(|&i| dead(i)).count();
    if count > 0 {
        warnings.push(GraphCoverageWarning::DeadNodes { count });
    }
    warnings
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::analysis::fixtures::{quanta, regular_track, section, segment};
    use crate::analysis::model::AnalysisPayload;

    /// One bar per four beats; each beat is one tatum and one segment with the
    /// given leading timbre values.
    pub fn beat_track(timbres: &[[f64; 3]]) -> Track {
        let n = timbres.len();
        let starts: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let bar_starts: Vec<f64> = (0..n.div_ceil(4)).map(|i| i as f64 * 4.0).collect();
        Track::from_payload(AnalysisPayload {
            sections: Some(vec![section(0.0, n as f64)]),
            bars: Some(quanta(&bar_starts, 4.0)),
            beats: Some(quanta(&starts, 1.0)),
            tatums: Some(quanta(&starts, 1.0)),
            segments: Some(
                timbres
                    .iter()
                    .enumerate()
                    .map(|(i, t)| segment(i as f64, 1.0, *t))
                    .collect(),
            ),
        })
        .unwrap()
    }

    fn check_invariants(graph: &AnnotatedTrack) {
        let config = graph.config();
        for node in graph.nodes() {
            assert!(node.neighbours.len() <= config.max_neighbours);
            for e in &node.all_neighbours {
                assert_eq!(e.source, NodeRef::new(config.kind, node.which));
                assert_eq!(e.target.kind, config.kind);
                assert!(e.target.which >= node.which + config.min_gap);
                assert!(e.distance >= 0.0);
            }
            for pair in node.all_neighbours.windows(2) {
                assert!(pair[0].distance <= pair[1].distance);
            }
            for pair in node.neighbours.windows(2) {
                assert!(pair[0].distance <= pair[1].distance);
            }
            for e in &node.neighbours {
                assert!(node.all_neighbours.contains(e));
                assert!(e.distance <= graph.threshold().unwrap());
            }
            assert!(node.reach >= node.which);
        }
    }

    #[test]
    fn test_regular_track_invariants() {
        for period in [3, 5, 8, 13] {
            let graph = build_graph(regular_track(12, period), &GraphConfig::default()).unwrap();
            assert_eq!(graph.len(), 48);
            check_invariants(&graph);
        }
    }

    #[test]
    fn test_every_candidate_recorded() {
        let config = GraphConfig { min_gap: 3, ..GraphConfig::default() };
        let graph = build_graph(regular_track(6, 7), &config).unwrap();
        let n = graph.len();
        for node in graph.nodes() {
            assert_eq!(node.all_neighbours.len(), n.saturating_sub(node.which + 3));
        }
        let mut ids: Vec<usize> = graph
            .nodes()
            .iter()
            .flat_map(|n| n.all_neighbours.iter().map(|e| e.id))
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..graph.candidate_count()).collect::<Vec<_>>());
    }

    #[test]
    fn test_repeated_material_is_linked() {
        // Period of 8 tatums = 4 beats: beat i sounds like beat i + 4.
        let graph = build_graph(regular_track(8, 8), &GraphConfig::default()).unwrap();
        assert_eq!(graph.threshold(), Some(0.0));
        let first = &graph.nodes()[0];
        let targets: Vec<usize> = first.neighbours.iter().map(|e| e.target.which).collect();
        assert_eq!(targets, vec![4, 8, 12, 16]);
    }

    #[test]
    fn test_deterministic_across_workers() {
        let config = GraphConfig { percentile: 30.0, ..GraphConfig::default() };
        let a = build_graph_with_workers(regular_track(10, 6), &config, 1).unwrap();
        let b = build_graph_with_workers(regular_track(10, 6), &config, 3).unwrap();
        let c = build_graph(regular_track(10, 6), &config).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_ties_prefer_lower_target() {
        let timbres = vec![[0.0, 0.0, 0.0]; 10];
        let graph = build_graph(beat_track(&timbres), &GraphConfig::default()).unwrap();
        let targets: Vec<usize> = graph.nodes()[0].neighbours.iter().map(|e| e.target.which).collect();
        assert_eq!(targets, vec![4, 5, 6, 7]);
    }

    #[test]
    fn test_percentile_bounds() {
        let track = || regular_track(4, 3);
        for bad in [-0.5, 100.5, f64::NAN] {
            let config = GraphConfig { percentile: bad, ..GraphConfig::default() };
            assert!(matches!(
                build_graph(track(), &config),
                Err(GraphError::Config(ConfigError::InvalidThreshold(_)))
            ));
        }
        let all = GraphConfig { percentile: 100.0, ..GraphConfig::default() };
        let graph = build_graph(track(), &all).unwrap();
        for node in graph.nodes() {
            assert_eq!(node.neighbours.len(), node.all_neighbours.len().min(4));
        }
    }

    #[test]
    fn test_other_config_errors() {
        let track = || regular_track(4, 3);
        let cases = [
            (GraphConfig { max_neighbours: 0, ..GraphConfig::default() }, ConfigError::InvalidNeighbourCount),
            (GraphConfig { min_gap: 0, ..GraphConfig::default() }, ConfigError::InvalidMinGap),
            (
                GraphConfig { kind: Kind::Section, ..GraphConfig::default() },
                ConfigError::UnsupportedKind(Kind::Section),
            ),
            (
                GraphConfig { coefficients: 20, ..GraphConfig::default() },
                ConfigError::InvalidCoefficients { got: 20, max: 12 },
            ),
        ];
        for (config, expected) in cases {
            match build_graph(track(), &config) {
                Err(GraphError::Config(e)) => assert_eq!(e, expected),
                other => panic!("expected {expected:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_too_few_nodes() {
        let graph = build_graph(beat_track(&[[1.0, 2.0, 3.0]]), &GraphConfig::default());
        assert!(matches!(
            graph,
            Err(GraphError::EmptyCandidateSet { kind: Kind::Beat, nodes: 1 })
        ));
    }

    #[test]
    fn test_shorter_than_gap_has_no_edges() {
        let graph = build_graph(beat_track(&[[0.0; 3]; 3]), &GraphConfig::default()).unwrap();
        assert_eq!(graph.threshold(), None);
        assert_eq!(graph.candidate_count(), 0);
        assert!(graph.warnings().is_empty());
    }

    #[test]
    fn test_reach_follows_chains() {
        // Distinct ramp: only gap-4 jumps are at the minimum distance.
        let timbres: Vec<[f64; 3]> = (0..20).map(|i| [i as f64, 0.0, 0.0]).collect();
        let config = GraphConfig { percentile: 0.0, ..GraphConfig::default() };
        let graph = build_graph(beat_track(&timbres), &config).unwrap();
        assert_eq!(graph.threshold(), Some(4.0));
        assert_eq!(graph.nodes()[0].reach, 16);
        assert_eq!(graph.nodes()[3].reach, 19);
        assert_eq!(graph.nodes()[15].reach, 19);
        assert_eq!(graph.nodes()[16].reach, 16);
        assert!(graph.warnings().is_empty());
    }

    #[test]
    fn test_dead_tail_warning() {
        // Ten beats alternating two timbres, then ten unique ones.
        let mut timbres: Vec<[f64; 3]> = (0..10).map(|i| [(i % 2) as f64, 0.0, 0.0]).collect();
        timbres.extend((0..10).map(|i| [100.0 * (i + 1) as f64, 0.0, 0.0]));
        let config = GraphConfig { percentile: 5.0, ..GraphConfig::default() };
        let graph = build_graph(beat_track(&timbres), &config).unwrap();
        assert_eq!(graph.threshold(), Some(0.0));
        assert_eq!(
            graph.warnings(),
            &[GraphCoverageWarning::DeadTail { from: 6, len: 14 }]
        );
    }

    #[test]
    fn test_dead_interior_node_warning() {
        // Period-4 run with one unlike beat in the middle: it matches nothing.
        let mut timbres: Vec<[f64; 3]> = (0..24).map(|i| [(i % 4) as f64, 0.0, 0.0]).collect();
        timbres[10] = [500.0, 0.0, 0.0];
        let graph = build_graph(beat_track(&timbres), &GraphConfig::default()).unwrap();
        assert_eq!(graph.threshold(), Some(0.0));
        assert!(graph.nodes()[10].neighbours.is_empty());
        assert_eq!(graph.nodes()[10].reach, 10);
        assert!(graph.nodes()[6].neighbours.iter().all(|e| e.target.which != 10));
        // The last four beats are the unavoidable tail, so no DeadTail.
        assert_eq!(graph.warnings(), &[GraphCoverageWarning::DeadNodes { count: 1 }]);
    }

    #[test]
    fn test_bar_graph() {
        let config = GraphConfig { kind: Kind::Bar, min_gap: 2, ..GraphConfig::default() };
        let graph = build_graph(regular_track(10, 4), &config).unwrap();
        assert_eq!(graph.kind(), Kind::Bar);
        assert_eq!(graph.len(), 10);
        check_invariants(&graph);
    }

    #[test]
    fn test_cache_key_tracks_settings() {
        let base = GraphConfig::default();
        assert_eq!(base.cache_key(), GraphConfig::default().cache_key());
        let other = GraphConfig { percentile: 12.5, ..GraphConfig::default() };
        assert_ne!(base.cache_key(), other.cache_key());
    }

    #[test]
    fn test_percentile_interpolates() {
        let v = [0.0, 10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&v, 0.0), Some(0.0));
        assert_eq!(percentile(&v, 100.0), Some(40.0));
        assert_eq!(percentile(&v, 10.0), Some(4.0));
        assert_eq!(percentile(&[], 50.0), None);
    }
}
