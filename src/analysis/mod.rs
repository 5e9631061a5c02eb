pub mod model;
pub mod source;

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use model::{AnalysisPayload, Quantum, Section, Segment, Span};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Analysis is missing the {0} sequence")]
    MissingSequence(Kind),
    #[error("{kind} {index} has an empty or non-finite interval (start {start}, duration {duration})")]
    EmptyInterval {
        kind: Kind,
        index: usize,
        start: f64,
        duration: f64,
    },
}

/// Granularity of an analysis node, coarsest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Section,
    Bar,
    Beat,
    Tatum,
    Segment,
}

impl Kind {
    pub const ALL: [Kind; 5] = [
        Kind::Section,
        Kind::Bar,
        Kind::Beat,
        Kind::Tatum,
        Kind::Segment,
    ];

    /// The next-larger kind, whose nodes act as parents. `None` for sections.
    pub fn coarser(self) -> Option<Kind> {
        match self {
            Kind::Section => None,
            Kind::Bar => Some(Kind::Section),
            Kind::Beat => Some(Kind::Bar),
            Kind::Tatum => Some(Kind::Beat),
            Kind::Segment => Some(Kind::Tatum),
        }
    }

    /// Bars, beats and tatums get overlapping-segment links.
    pub fn has_segment_links(self) -> bool {
        matches!(self, Kind::Bar | Kind::Beat | Kind::Tatum)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Section => "section",
            Kind::Bar => "bar",
            Kind::Beat => "beat",
            Kind::Tatum => "tatum",
            Kind::Segment => "segment",
        }
    }

    pub(crate) fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable reference to a node: its kind plus its position in that kind's sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub kind: Kind,
    pub which: usize,
}

impl NodeRef {
    pub fn new(kind: Kind, which: usize) -> Self {
        Self { kind, which }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.which)
    }
}

/// One song's complete analysis: five time-ordered node sequences.
///
/// Built once from a full payload and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "AnalysisPayload")]
pub struct Track {
    sections: Vec<Section>,
    bars: Vec<Quantum>,
    beats: Vec<Quantum>,
    tatums: Vec<Quantum>,
    segments: Vec<Segment>,
}

impl TryFrom<AnalysisPayload> for Track {
    type Error = AnalysisError;

    fn try_from(payload: AnalysisPayload) -> Result<Self, Self::Error> {
        Track::from_payload(payload)
    }
}

impl Track {
    /// Build a track from a payload. Every sequence must be present and every
    /// node must have a finite, non-empty interval.
    pub fn from_payload(payload: AnalysisPayload) -> Result<Self, AnalysisError> {
        let track = Self {
            sections: payload
                .sections
                .ok_or(AnalysisError::MissingSequence(Kind::Section))?,
            bars: payload.bars.ok_or(AnalysisError::MissingSequence(Kind::Bar))?,
            beats: payload.beats.ok_or(AnalysisError::MissingSequence(Kind::Beat))?,
            tatums: payload
                .tatums
                .ok_or(AnalysisError::MissingSequence(Kind::Tatum))?,
            segments: payload
                .segments
                .ok_or(AnalysisError::MissingSequence(Kind::Segment))?,
        };

        for kind in Kind::ALL {
            for index in 0..track.len(kind) {
                let span = track.span(NodeRef::new(kind, index));
                let (start, duration) = (span.start(), span.duration());
                if !start.is_finite() || !duration.is_finite() || duration <= 0.0 {
                    return Err(AnalysisError::EmptyInterval {
                        kind,
                        index,
                        start,
                        duration,
                    });
                }
            }
        }

        Ok(track)
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn bars(&self) -> &[Quantum] {
        &self.bars
    }

    pub fn beats(&self) -> &[Quantum] {
        &self.beats
    }

    pub fn tatums(&self) -> &[Quantum] {
        &self.tatums
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self, kind: Kind) -> usize {
        match kind {
            Kind::Section => self.sections.len(),
            Kind::Bar => self.bars.len(),
            Kind::Beat => self.beats.len(),
            Kind::Tatum => self.tatums.len(),
            Kind::Segment => self.segments.len(),
        }
    }

    /// Timing of a node.
    ///
    /// # Panics
    /// If `node.which` is out of range for its kind.
    pub fn span(&self, node: NodeRef) -> &dyn Span {
        match node.kind {
            Kind::Section => &self.sections[node.which],
            Kind::Bar => &self.bars[node.which],
            Kind::Beat => &self.beats[node.which],
            Kind::Tatum => &self.tatums[node.which],
            Kind::Segment => &self.segments[node.which],
        }
    }

    /// End time of the last node of any kind, in seconds.
    pub fn duration(&self) -> f64 {
        Kind::ALL
            .iter()
            .filter_map(|&kind| {
                let n = self.len(kind);
                (n > 0).then(|| self.span(NodeRef::new(kind, n - 1)).end())
            })
            .fold(0.0, f64::max)
    }

    /// Lowercase hex SHA-256 over the timing and feature values of every node.
    /// Identical analyses give identical fingerprints.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for kind in Kind::ALL {
            hasher.update(kind.as_str().as_bytes());
            hasher.update((self.len(kind) as u64).to_le_bytes());
            for which in 0..self.len(kind) {
                let span = self.span(NodeRef::new(kind, which));
                for v in [span.start(), span.duration(), span.confidence()] {
                    hasher.update(v.to_le_bytes());
                }
            }
        }
        for s in &self.sections {
            for v in [
                s.loudness,
                s.tempo,
                s.tempo_confidence,
                s.key_confidence,
                s.mode_confidence,
                s.time_signature_confidence,
            ] {
                hasher.update(v.to_le_bytes());
            }
            for v in [s.key, s.mode, s.time_signature] {
                hasher.update(v.to_le_bytes());
            }
        }
        for s in &self.segments {
            for v in [s.loudness_start, s.loudness_max, s.loudness_max_time] {
                hasher.update(v.to_le_bytes());
            }
            for v in s.pitches.iter().chain(s.timbre.iter()) {
                hasher.update(v.to_le_bytes());
            }
        }
        format!("{:x}", hasher.finalize())
    }
}
