//! Acoustic distance between nodes of the same kind.
//!
//! Euclidean distance over the leading timbre coefficients. The low
//! coefficients carry loudness, brightness and spectral flatness, which is
//! what makes two moments sound interchangeable.

use serde::{Deserialize, Serialize};

use crate::analysis::model::{FEATURE_DIM, Span};
use crate::analysis::{Kind, NodeRef};
use crate::config::ConfigError;
use crate::link::LinkedTrack;

/// How a bar, beat or tatum gets a timbre vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimbreAggregation {
    /// Timbre of the segment with the greatest overlap.
    #[default]
    OwningSegment,
    /// Mean timbre of all overlapping segments, weighted by overlap length.
    OverlapWeighted,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimbreDistance {
    coefficients: usize,
    aggregation: TimbreAggregation,
}

impl Default for TimbreDistance {
    fn default() -> Self {
        Self {
            coefficients: Self::DEFAULT_COEFFICIENTS,
            aggregation: TimbreAggregation::OwningSegment,
        }
    }
}

impl TimbreDistance {
    pub const DEFAULT_COEFFICIENTS: usize = 3;

    pub fn new(coefficients: usize, aggregation: TimbreAggregation) -> Result<Self, ConfigError> {
        if coefficients == 0 || coefficients > FEATURE_DIM {
            return Err(ConfigError::InvalidCoefficients {
                got: coefficients,
                max: FEATURE_DIM,
            });
        }
        Ok(Self { coefficients, aggregation })
    }

    pub fn coefficients(&self) -> usize {
        self.coefficients
    }

    /// Distance between two raw timbre vectors.
    pub fn between(&self, a: &[f64; FEATURE_DIM], b: &[f64; FEATURE_DIM]) -> f64 {
        a[..self.coefficients]
            .iter()
            .zip(&b[..self.coefficients])
            .map(|(x, y)| (y - x) * (y - x))
            .sum::<f64>()
            .sqrt()
    }

    /// Representative timbre of a node; `None` for a node no segment overlaps.
    pub fn timbre(&self, linked: &LinkedTrack, node: NodeRef) -> Option<[f64; FEATURE_DIM]> {
        let segments = linked.track().segments();
        if node.kind == Kind::Segment || self.aggregation == TimbreAggregation::OwningSegment {
            return linked.owning_segment(node).map(|s| segments[s].timbre);
        }

        let span = linked.track().span(node);
        let mut sum = [0.0; FEATURE_DIM];
        let mut weight = 0.0;
        for seg in linked.overlapping_segments(node) {
            let s = &segments[seg.which];
            let w = s.end().min(span.end()) - s.start.max(span.start());
            for (acc, v) in sum.iter_mut().zip(&s.timbre) {
                *acc += w * v;
            }
            weight += w;
        }
        if weight <= 0.0 {
            return None;
        }
        Some(sum.map(|v| v / weight))
    }

    /// Distance between two nodes of the same kind.
    pub fn nodes(&self, linked: &LinkedTrack, a: NodeRef, b: NodeRef) -> Option<f64> {
        debug_assert_eq!(a.kind, b.kind);
        Some(self.between(&self.timbre(linked, a)?, &self.timbre(linked, b)?))
    }
}
