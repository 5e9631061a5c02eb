//! Runtime traversal of a jump graph.
//!
//! Each step either continues to the next node or, with probability
//! `jump_probability`, takes one of the current node's retained jump edges.
//! Closer edges are favoured. All randomness comes from the caller's RNG, so a
//! seeded RNG replays the same remix.

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::analysis::model::Span;
use crate::analysis::{Kind, NodeRef};
use crate::bucket::{to_ms, BucketMap, Frame};
use crate::config::ConfigError;
use crate::graph::{AnnotatedTrack, JumpEdge};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemixConfig {
    /// Chance per step of taking a jump when one is available.
    pub jump_probability: f64,
}

impl Default for RemixConfig {
    fn default() -> Self {
        Self {
            jump_probability: 0.1,
        }
    }
}

impl RemixConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.jump_probability) {
            return Err(ConfigError::InvalidProbability(self.jump_probability));
        }
        Ok(())
    }
}

/// Picks the node that follows the current one. Holds only shared references,
/// so any number of selectors can read one graph concurrently.
#[derive(Debug, Clone)]
pub struct JumpSelector<'a> {
    graph: &'a AnnotatedTrack,
    config: RemixConfig,
}

impl<'a> JumpSelector<'a> {
    pub fn new(graph: &'a AnnotatedTrack, config: RemixConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { graph, config })
    }

    pub fn graph(&self) -> &'a AnnotatedTrack {
        self.graph
    }

    /// Jump edges from `current` that land outside its minimum-gap window.
    pub fn viable_jumps(&self, current: usize) -> Vec<&'a JumpEdge> {
        let min_gap = self.graph.config().min_gap;
        self.graph
            .node(current)
            .map(|node| {
                node.neighbours
                    .iter()
                    .filter(|e| e.target.which != current && e.target.which.abs_diff(current) >= min_gap)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Node to play after `current`.
    ///
    /// The last node wraps around to the first. An index outside the graph
    /// restarts at the first node.
    pub fn next<R: Rng + ?Sized>(&self, current: usize, rng: &mut R) -> NodeRef {
        self.step(current, rng).node
    }

    /// As [`next`](Self::next), also reporting whether a jump edge was taken.
    pub fn step<R: Rng + ?Sized>(&self, current: usize, rng: &mut R) -> Step {
        let kind = self.graph.kind();
        let n = self.graph.len();
        if current >= n {
            return Step { node: NodeRef::new(kind, 0), jumped: false };
        }

        let viable = self.viable_jumps(current);
        if !viable.is_empty() && rng.gen_bool(self.config.jump_probability) {
            return Step { node: pick_weighted(&viable, rng).target, jumped: true };
        }

        let which = if current + 1 < n { current + 1 } else { 0 };
        Step { node: NodeRef::new(kind, which), jumped: false }
    }

    /// Start an endless walk at `start`.
    pub fn session<R: Rng>(self, start: usize, rng: R) -> RemixSession<'a, R> {
        RemixSession {
            selector: self,
            start,
            current: None,
            rng,
        }
    }
}

/// One-shot form of [`JumpSelector::next`].
pub fn next_beat<R: Rng + ?Sized>(
    graph: &AnnotatedTrack,
    current: usize,
    rng: &mut R,
    config: &RemixConfig,
) -> Result<NodeRef, ConfigError> {
    Ok(JumpSelector::new(graph, config.clone())?.next(current, rng))
}

/// Weight `1 / (1 + distance)`: identical material is the most likely pick.
fn pick_weighted<'e, R: Rng + ?Sized>(edges: &[&'e JumpEdge], rng: &mut R) -> &'e JumpEdge {
    match WeightedIndex::new(edges.iter().map(|e| 1.0 / (1.0 + e.distance))) {
        Ok(dist) => edges[dist.sample(rng)],
        Err(e) => {
            log::debug!("Falling back to closest edge: {e}");
            edges[0]
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub node: NodeRef,
    /// True when this step took a jump edge. Wrapping from the last node to
    /// the first is ordinary playback.
    pub jumped: bool,
}

/// An endless iterator over the nodes of one playback.
pub struct RemixSession<'a, R> {
    selector: JumpSelector<'a>,
    start: usize,
    current: Option<usize>,
    rng: R,
}

impl<'a, R: Rng> RemixSession<'a, R> {
    /// Pair every step with the audio frames of the node it lands on.
    ///
    /// Beat graphs read the beat's bucket. Other kinds take every frame whose
    /// timecode falls within the node's own millisecond window.
    pub fn play<'m>(self, buckets: &'m BucketMap) -> impl Iterator<Item = (Step, Vec<&'m Frame>)> {
        let graph = self.selector.graph;
        self.map(move |step| (step, node_frames(graph, buckets, step.node)))
    }
}

fn node_frames<'m>(graph: &AnnotatedTrack, buckets: &'m BucketMap, node: NodeRef) -> Vec<&'m Frame> {
    if node.kind == Kind::Beat {
        return buckets.beat(node.which).iter().collect();
    }
    let span = graph.track().span(node);
    buckets.window(to_ms(span.start()), to_ms(span.end())).collect()
}

impl<R: Rng> Iterator for RemixSession<'_, R> {
    type Item = Step;

    fn next(&mut self) -> Option<Step> {
        let step = match self.current {
            None => {
                let which = if self.start < self.selector.graph.len() { self.start } else { 0 };
                Step { node: NodeRef::new(self.selector.graph.kind(), which), jumped: false }
            }
            Some(cur) => self.selector.step(cur, &mut self.rng),
        };
        self.current = Some(step.node.which);
        Some(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::fixtures::regular_track;
    use crate::analysis::Kind;
    use crate::bucket::bucketize;
    use crate::graph::tests::beat_track;
    use crate::graph::{build_graph, GraphConfig};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn periodic_graph() -> AnnotatedTrack {
        build_graph(regular_track(16, 8), &GraphConfig::default()).unwrap()
    }

    #[test]
    fn test_probability_validated() {
        let graph = periodic_graph();
        for p in [-0.1, 1.5, f64::NAN] {
            let config = RemixConfig { jump_probability: p };
            assert!(matches!(
                JumpSelector::new(&graph, config.clone()),
                Err(ConfigError::InvalidProbability(_))
            ));
            let mut rng = StdRng::seed_from_u64(0);
            assert!(next_beat(&graph, 0, &mut rng, &config).is_err());
        }
    }

    #[test]
    fn test_never_jumping_is_linear_and_wraps() {
        let graph = periodic_graph();
        let selector = JumpSelector::new(&graph, RemixConfig { jump_probability: 0.0 }).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let last = graph.len() - 1;
        assert_eq!(selector.next(0, &mut rng), NodeRef::new(Kind::Beat, 1));
        assert_eq!(selector.next(last, &mut rng), NodeRef::new(Kind::Beat, 0));
        assert_eq!(selector.next(last + 10, &mut rng), NodeRef::new(Kind::Beat, 0));
    }

    #[test]
    fn test_always_jumping_uses_neighbours() {
        let graph = periodic_graph();
        let selector = JumpSelector::new(&graph, RemixConfig { jump_probability: 1.0 }).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..100 {
            let target = selector.next(0, &mut rng);
            assert!(graph.nodes()[0].neighbours.iter().any(|e| e.target == target));
        }
    }

    #[test]
    fn test_ten_thousand_steps_respect_gap() {
        let graph = periodic_graph();
        let min_gap = graph.config().min_gap;
        let selector = JumpSelector::new(&graph, RemixConfig { jump_probability: 0.3 }).unwrap();
        let mut jumps = 0;
        let mut prev: Option<usize> = None;
        for step in selector.session(0, StdRng::seed_from_u64(3)).take(10_000) {
            if let Some(p) = prev {
                let w = step.node.which;
                assert_ne!(w, p);
                if step.jumped {
                    assert!(w.abs_diff(p) >= min_gap, "{p} -> {w}");
                    jumps += 1;
                } else {
                    assert_eq!(w, (p + 1) % graph.len());
                }
            }
            prev = Some(step.node.which);
        }
        assert!(jumps > 100);
    }

    #[test]
    fn test_seeded_sessions_replay() {
        let graph = periodic_graph();
        let walk = |seed| {
            JumpSelector::new(&graph, RemixConfig::default())
                .unwrap()
                .session(5, StdRng::seed_from_u64(seed))
                .take(500)
                .map(|s| s.node.which)
                .collect::<Vec<_>>()
        };
        assert_eq!(walk(9), walk(9));
        assert_eq!(walk(9)[0], 5);
    }

    #[test]
    fn test_closer_edges_favoured() {
        let mut timbres: Vec<[f64; 3]> = (0..10).map(|i| [100.0 * i as f64, 0.0, 0.0]).collect();
        timbres[4] = [0.0, 0.0, 0.0];
        timbres[5] = [3.0, 0.0, 0.0];
        let config = GraphConfig { percentile: 100.0, max_neighbours: 2, ..GraphConfig::default() };
        let graph = build_graph(beat_track(&timbres), &config).unwrap();
        let targets: Vec<usize> = graph.nodes()[0].neighbours.iter().map(|e| e.target.which).collect();
        assert_eq!(targets, vec![4, 5]);

        let selector = JumpSelector::new(&graph, RemixConfig { jump_probability: 1.0 }).unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        let mut hits = [0usize; 2];
        for _ in 0..2000 {
            match selector.next(0, &mut rng).which {
                4 => hits[0] += 1,
                5 => hits[1] += 1,
                other => panic!("unexpected target {other}"),
            }
        }
        assert!(hits[0] > hits[1] * 2, "{hits:?}");
        assert!(hits[1] > 0);
    }

    #[test]
    fn test_wrap_is_not_a_jump() {
        let graph = periodic_graph();
        let last = graph.len() - 1;
        let selector = JumpSelector::new(&graph, RemixConfig { jump_probability: 0.0 }).unwrap();
        let steps: Vec<Step> = selector.session(last, StdRng::seed_from_u64(6)).take(3).collect();
        assert_eq!(
            steps,
            vec![
                Step { node: NodeRef::new(Kind::Beat, last), jumped: false },
                Step { node: NodeRef::new(Kind::Beat, 0), jumped: false },
                Step { node: NodeRef::new(Kind::Beat, 1), jumped: false },
            ]
        );
    }

    #[test]
    fn test_jump_to_successor_is_reported() {
        let config = GraphConfig {
            min_gap: 1,
            max_neighbours: 1,
            percentile: 100.0,
            ..GraphConfig::default()
        };
        let graph = build_graph(beat_track(&[[0.0; 3]; 6]), &config).unwrap();
        let selector = JumpSelector::new(&graph, RemixConfig { jump_probability: 1.0 }).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(
            selector.step(0, &mut rng),
            Step { node: NodeRef::new(Kind::Beat, 1), jumped: true }
        );
    }

    #[test]
    fn test_play_pairs_frames() {
        let graph = periodic_graph();
        let frames = (0..graph.len() as u64 * 5).map(|i| crate::bucket::Frame::new(i * 50, vec![]));
        let buckets = bucketize(graph.track().beats(), frames).unwrap();
        let selector = JumpSelector::new(&graph, RemixConfig::default()).unwrap();
        for (step, frames) in selector.session(0, StdRng::seed_from_u64(5)).play(&buckets).take(200) {
            assert_eq!(frames.len(), 5, "{:?}", step.node);
        }
    }

    #[test]
    fn test_play_bar_graph_uses_bar_window() {
        let config = GraphConfig { kind: Kind::Bar, min_gap: 2, ..GraphConfig::default() };
        let graph = build_graph(regular_track(8, 8), &config).unwrap();
        let frames = (0..160u64).map(|i| crate::bucket::Frame::new(i * 50, vec![]));
        let buckets = bucketize(graph.track().beats(), frames).unwrap();
        let selector = JumpSelector::new(&graph, RemixConfig { jump_probability: 0.0 }).unwrap();

        let (step, frames) = selector
            .session(3, StdRng::seed_from_u64(8))
            .play(&buckets)
            .next()
            .unwrap();
        assert_eq!(step.node, NodeRef::new(Kind::Bar, 3));
        assert_eq!(frames.len(), 20);
        assert_eq!(frames.first().unwrap().timecode_ms, 3000);
        assert_eq!(frames.last().unwrap().timecode_ms, 3950);
    }

    #[test]
    fn test_play_tatum_graph_splits_beats() {
        let config = GraphConfig { kind: Kind::Tatum, ..GraphConfig::default() };
        let graph = build_graph(regular_track(2, 8), &config).unwrap();
        let frames = (0..80u64).map(|i| crate::bucket::Frame::new(i * 25, vec![]));
        let buckets = bucketize(graph.track().beats(), frames).unwrap();
        let selector = JumpSelector::new(&graph, RemixConfig { jump_probability: 0.0 }).unwrap();

        let played: Vec<(Step, Vec<u64>)> = selector
            .session(1, StdRng::seed_from_u64(9))
            .play(&buckets)
            .take(2)
            .map(|(step, frames)| (step, frames.iter().map(|f| f.timecode_ms).collect()))
            .collect();
        // Tatum 1 is [125, 250) ms, tatum 2 is [250, 375) ms.
        assert_eq!(played[0].1, vec![125, 150, 175, 200, 225]);
        assert_eq!(played[1].1, vec![250, 275, 300, 325, 350]);
    }
}
