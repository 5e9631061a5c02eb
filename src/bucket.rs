//! Frame bucketization: assign a stream of decoded, time-stamped audio frames
//! to the beat whose window contains them.
//!
//! Beat windows are `[round(start * 1000), round(end * 1000))` in milliseconds.
//! Frames before the first beat go to [`BucketKey::Before`], frames at or after
//! the last beat's end go to [`BucketKey::After`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::model::{Quantum, Span};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BucketError {
    #[error("Cannot bucketize frames against an empty beat sequence")]
    EmptyBeatSequence,
    #[error("Frame timecode {current} ms precedes previous frame at {previous} ms")]
    NonMonotonicTimecode { previous: u64, current: u64 },
}

/// One decoded audio frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Milliseconds from the start of the track.
    pub timecode_ms: u64,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(timecode_ms: u64, data: impl Into<Vec<u8>>) -> Self {
        Self {
            timecode_ms,
            data: data.into(),
        }
    }
}

/// Which part of the timeline a bucket covers. Ordered by time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BucketKey {
    Before,
    At(usize),
    After,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub key: BucketKey,
    pub frames: Vec<Frame>,
}

/// Non-empty buckets in timeline order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketMap {
    buckets: Vec<Bucket>,
}

impl BucketMap {
    pub fn get(&self, key: BucketKey) -> Option<&[Frame]> {
        self.buckets
            .binary_search_by(|b| b.key.cmp(&key))
            .ok()
            .map(|i| self.buckets[i].frames.as_slice())
    }

    /// Frames of beat `which`; empty when no frame landed there.
    pub fn beat(&self, which: usize) -> &[Frame] {
        self.get(BucketKey::At(which)).unwrap_or(&[])
    }

    pub fn keys(&self) -> impl Iterator<Item = BucketKey> + '_ {
        self.buckets.iter().map(|b| b.key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.iter()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn frame_count(&self) -> usize {
        self.buckets.iter().map(|b| b.frames.len()).sum()
    }

    /// Every frame from the start of beat `which` onward, in order.
    pub fn frames_from_beat(&self, which: usize) -> impl Iterator<Item = &Frame> {
        let first = self
            .buckets
            .partition_point(|b| b.key < BucketKey::At(which));
        self.buckets[first..].iter().flat_map(|b| b.frames.iter())
    }

    /// Frames with `start_ms <= timecode < end_ms`, regardless of bucket.
    pub fn window(&self, start_ms: u64, end_ms: u64) -> impl Iterator<Item = &Frame> {
        // Buckets are never empty and their frames are time-ordered.
        let first = self
            .buckets
            .partition_point(|b| b.frames.last().is_some_and(|f| f.timecode_ms < start_ms));
        self.buckets[first..]
            .iter()
            .flat_map(|b| b.frames.iter())
            .skip_while(move |f| f.timecode_ms < start_ms)
            .take_while(move |f| f.timecode_ms < end_ms)
    }

    /// All frames in bucket order; reproduces the input stream.
    pub fn into_frames(self) -> impl Iterator<Item = Frame> {
        self.buckets.into_iter().flat_map(|b| b.frames)
    }
}

/// Single-pass cursor over beat windows. One instance per playback session.
#[derive(Debug)]
pub struct FrameBucketizer {
    windows: Vec<(u64, u64)>,
    state: BucketKey,
    pending: Vec<Frame>,
    last_timecode: Option<u64>,
    out: Vec<Bucket>,
}

impl FrameBucketizer {
    pub fn new(beats: &[Quantum]) -> Result<Self, BucketError> {
        if beats.is_empty() {
            return Err(BucketError::EmptyBeatSequence);
        }
        let windows = beats
            .iter()
            .map(|b| (to_ms(b.start()), to_ms(b.end())))
            .collect();
        Ok(Self {
            windows,
            state: BucketKey::Before,
            pending: Vec::new(),
            last_timecode: None,
            out: Vec::new(),
        })
    }

    /// Bucket currently accumulating frames.
    pub fn state(&self) -> BucketKey {
        self.state
    }

    pub fn push(&mut self, frame: Frame) -> Result<(), BucketError> {
        let tc = frame.timecode_ms;
        if let Some(previous) = self.last_timecode {
            if tc < previous {
                return Err(BucketError::NonMonotonicTimecode {
                    previous,
                    current: tc,
                });
            }
        }
        self.last_timecode = Some(tc);

        while let Some(next) = self.advance(tc) {
            self.close();
            self.state = next;
        }
        self.pending.push(frame);
        Ok(())
    }

    /// Close the open bucket and return everything collected.
    pub fn finish(mut self) -> BucketMap {
        self.close();
        BucketMap { buckets: self.out }
    }

    /// The state to move to if `tc` lies past the active window.
    fn advance(&self, tc: u64) -> Option<BucketKey> {
        match self.state {
            BucketKey::Before => (tc >= self.windows[0].0).then_some(BucketKey::At(0)),
            BucketKey::At(i) if tc >= self.windows[i].1 => Some(if i + 1 < self.windows.len() {
                BucketKey::At(i + 1)
            } else {
                BucketKey::After
            }),
            BucketKey::At(_) | BucketKey::After => None,
        }
    }

    fn close(&mut self) {
        if !self.pending.is_empty() {
            self.out.push(Bucket {
                key: self.state,
                frames: std::mem::take(&mut self.pending),
            });
        }
    }
}

pub(crate) fn to_ms(seconds: f64) -> u64 {
    (seconds * 1000.0).round().max(0.0) as u64
}

/// Bucketize a whole frame stream against `beats`.
pub fn bucketize<I>(beats: &[Quantum], frames: I) -> Result<BucketMap, BucketError>
where
    I: IntoIterator<Item = Frame>,
{
    let mut bucketizer = FrameBucketizer::new(beats)?;
    for frame in frames {
        bucketizer.push(frame)?;
    }
    Ok(bucketizer.finish())
}
