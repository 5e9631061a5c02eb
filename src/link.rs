//! Hierarchy linking: prev/next chains within each kind, parent/children
//! across kinds, and segment overlap for bars, beats and tatums.
//!
//! All relations are indices into the per-kind sequences of the [`Track`].
//! Every scan is a forward-advancing two-pointer walk over time-ordered
//! sequences, so linking is linear in the total node count.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::model::Span;
use crate::analysis::{Kind, NodeRef, Track};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    #[error("{kind} {index} starts before its predecessor; analysis must be sorted by start")]
    UnsortedAnalysis { kind: Kind, index: usize },
    #[error("{kind} {index} starts before every {parent_kind}; no parent can be assigned")]
    NoParentFound {
        kind: Kind,
        index: usize,
        parent_kind: Kind,
    },
}

/// Knobs for linking real-world analyses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkOptions {
    /// Leave nodes that start before the first coarser node without a parent
    /// instead of failing. Pickup beats before the first bar are the usual case.
    pub detach_leading_orphans: bool,
}

/// Derived relations of one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Links {
    pub which: usize,
    pub prev: Option<usize>,
    pub next: Option<usize>,
    /// Index into the next-coarser kind.
    pub parent: Option<usize>,
    /// Indices into the next-finer kind, in time order.
    pub children: Vec<usize>,
    /// Segment indices whose interval intersects this node (bars, beats, tatums only).
    pub overlapping_segments: Vec<usize>,
    /// The overlapping segment with the largest intersection.
    pub owning_segment: Option<usize>,
}

/// A [`Track`] together with the relations between its nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedTrack {
    track: Track,
    links: [Vec<Links>; 5],
}

impl LinkedTrack {
    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn links(&self, kind: Kind) -> &[Links] {
        &self.links[kind.slot()]
    }

    /// # Panics
    /// If `node.which` is out of range for its kind.
    pub fn node(&self, node: NodeRef) -> &Links {
        &self.links[node.kind.slot()][node.which]
    }

    pub fn prev(&self, node: NodeRef) -> Option<NodeRef> {
        self.node(node).prev.map(|i| NodeRef::new(node.kind, i))
    }

    pub fn next(&self, node: NodeRef) -> Option<NodeRef> {
        self.node(node).next.map(|i| NodeRef::new(node.kind, i))
    }

    pub fn parent(&self, node: NodeRef) -> Option<NodeRef> {
        let kind = node.kind.coarser()?;
        self.node(node).parent.map(|i| NodeRef::new(kind, i))
    }

    pub fn children(&self, node: NodeRef) -> impl Iterator<Item = NodeRef> + '_ {
        let finer = Kind::ALL.get(node.kind.slot() + 1).copied();
        self.node(node)
            .children
            .iter()
            .filter_map(move |&i| finer.map(|kind| NodeRef::new(kind, i)))
    }

    pub fn overlapping_segments(&self, node: NodeRef) -> impl Iterator<Item = NodeRef> + '_ {
        self.node(node)
            .overlapping_segments
            .iter()
            .map(|&i| NodeRef::new(Kind::Segment, i))
    }

    /// Segments are their own owner; other kinds use the linked owning segment.
    pub fn owning_segment(&self, node: NodeRef) -> Option<usize> {
        match node.kind {
            Kind::Segment => Some(node.which),
            _ => self.node(node).owning_segment,
        }
    }
}

/// Link every node of `track` to its neighbours, parent and segments.
pub fn link(track: Track, options: &LinkOptions) -> Result<LinkedTrack, LinkError> {
    for kind in Kind::ALL {
        check_sorted(&track, kind)?;
    }

    let mut links: [Vec<Links>; 5] = Kind::ALL.map(|kind| chain(track.len(kind)));

    for kind in Kind::ALL {
        let Some(coarse) = kind.coarser() else {
            continue;
        };
        let parents = find_parents(&track, kind, coarse, options)?;
        for (index, parent) in parents.into_iter().enumerate() {
            links[kind.slot()][index].parent = parent;
            if let Some(p) = parent {
                links[coarse.slot()][p].children.push(index);
            }
        }
    }

    for kind in Kind::ALL.into_iter().filter(|k| k.has_segment_links()) {
        attach_segments(&track, kind, &mut links[kind.slot()]);
    }

    log::debug!(
        "Linked {} sections, {} bars, {} beats, {} tatums, {} segments",
        track.len(Kind::Section),
        track.len(Kind::Bar),
        track.len(Kind::Beat),
        track.len(Kind::Tatum),
        track.len(Kind::Segment),
    );

    Ok(LinkedTrack { track, links })
}

fn check_sorted(track: &Track, kind: Kind) -> Result<(), LinkError> {
    for index in 1..track.len(kind) {
        let prev = track.span(NodeRef::new(kind, index - 1)).start();
        let cur = track.span(NodeRef::new(kind, index)).start();
        if cur < prev {
            return Err(LinkError::UnsortedAnalysis { kind, index });
        }
    }
    Ok(())
}

fn chain(len: usize) -> Vec<Links> {
    (0..len)
        .map(|which| Links {
            which,
            prev: which.checked_sub(1),
            next: (which + 1 < len).then_some(which + 1),
            ..Links::default()
        })
        .collect()
}

/// Two-pointer parent search. The cursor only moves forward: a coarse node
/// that ended before one child started cannot contain any later child.
fn find_parents(
    track: &Track,
    kind: Kind,
    coarse: Kind,
    options: &LinkOptions,
) -> Result<Vec<Option<usize>>, LinkError> {
    let n_coarse = track.len(coarse);
    let mut cursor = 0;
    let mut parents = Vec::with_capacity(track.len(kind));

    for index in 0..track.len(kind) {
        let start = track.span(NodeRef::new(kind, index)).start();
        while cursor < n_coarse && track.span(NodeRef::new(coarse, cursor)).end() <= start {
            cursor += 1;
        }

        let contains =
            cursor < n_coarse && track.span(NodeRef::new(coarse, cursor)).start() <= start;
        let parent = if contains {
            Some(cursor)
        } else if cursor > 0 {
            // Gap or overhang: everything before the cursor started no later than us.
            log::debug!("{kind} {index} at {start:.3}s not contained; attaching to {coarse} {}", cursor - 1);
            Some(cursor - 1)
        } else if options.detach_leading_orphans {
            log::debug!("{kind} {index} at {start:.3}s precedes every {coarse}; left without parent");
            None
        } else {
            return Err(LinkError::NoParentFound {
                kind,
                index,
                parent_kind: coarse,
            });
        };
        parents.push(parent);
    }

    Ok(parents)
}

fn attach_segments(track: &Track, kind: Kind, links: &mut [Links]) {
    let segments = track.segments();
    let mut lo = 0;

    for (index, node) in links.iter_mut().enumerate() {
        let span = track.span(NodeRef::new(kind, index));
        let (start, end) = (span.start(), span.end());
        let mid = span.midpoint();

        while lo < segments.len() && segments[lo].end() <= start {
            lo += 1;
        }

        let mut j = lo;
        while j < segments.len() && segments[j].start < end {
            if start < segments[j].end() {
                node.overlapping_segments.push(j);
            }
            j += 1;
        }

        let overlap = |s: usize| segments[s].end().min(end) - segments[s].start.max(start);
        let mid_distance = |s: usize| (segments[s].midpoint() - mid).abs();
        node.owning_segment = node.overlapping_segments.iter().copied().min_by(|&a, &b| {
            overlap(b)
                .total_cmp(&overlap(a))
                .then(mid_distance(a).total_cmp(&mid_distance(b)))
                .then(a.cmp(&b))
        });
    }
}
