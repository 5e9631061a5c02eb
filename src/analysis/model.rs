//! Wire-level analysis records.
//!
//! These mirror the five arrays of an audio-analysis document. They carry no
//! links; [`crate::link`] derives those.

use serde::{Deserialize, Serialize};

/// Number of chroma / timbre coefficients carried by every segment.
pub const FEATURE_DIM: usize = 12;

/// Anything with a time interval `[start, start + duration)`.
pub trait Span {
    fn start(&self) -> f64;
    fn duration(&self) -> f64;
    fn confidence(&self) -> f64;

    fn end(&self) -> f64 {
        self.start() + self.duration()
    }

    fn midpoint(&self) -> f64 {
        self.start() + self.duration() / 2.0
    }
}

/// A bar, beat or tatum: timing only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantum {
    pub start: f64,
    pub duration: f64,
    #[serde(default)]
    pub confidence: f64,
}

/// A section with its musical descriptors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub start: f64,
    pub duration: f64,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub loudness: f64,
    #[serde(default)]
    pub tempo: f64,
    #[serde(default)]
    pub tempo_confidence: f64,
    /// Pitch class 0..=11, -1 when no key was detected.
    #[serde(default = "unknown_key")]
    pub key: i32,
    #[serde(default)]
    pub key_confidence: f64,
    /// 1 = major, 0 = minor, -1 = unknown.
    #[serde(default = "unknown_key")]
    pub mode: i32,
    #[serde(default)]
    pub mode_confidence: f64,
    #[serde(default = "common_time")]
    pub time_signature: i32,
    #[serde(default)]
    pub time_signature_confidence: f64,
}

fn unknown_key() -> i32 {
    -1
}

fn common_time() -> i32 {
    4
}

/// The finest-grained unit: roughly one sound event, with its features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub duration: f64,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub loudness_start: f64,
    #[serde(default)]
    pub loudness_max: f64,
    #[serde(default)]
    pub loudness_max_time: f64,
    pub pitches: [f64; FEATURE_DIM],
    pub timbre: [f64; FEATURE_DIM],
}

macro_rules! impl_span {
    ($($ty:ty),*) => {
        $(
            impl Span for $ty {
                fn start(&self) -> f64 {
                    self.start
                }
                fn duration(&self) -> f64 {
                    self.duration
                }
                fn confidence(&self) -> f64 {
                    self.confidence
                }
            }
        )*
    };
}

impl_span!(Quantum, Section, Segment);

/// A complete analysis document as delivered by an analysis source.
///
/// Each sequence is optional here so that a missing array can be reported by
/// name instead of as a generic deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisPayload {
    pub sections: Option<Vec<Section>>,
    pub bars: Option<Vec<Quantum>>,
    pub beats: Option<Vec<Quantum>>,
    pub tatums: Option<Vec<Quantum>>,
    pub segments: Option<Vec<Segment>>,
}
