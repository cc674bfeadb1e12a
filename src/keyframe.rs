//! Keyframe constraints.
//!
//! A keyframe range pins output frames to exemplar frames for the whole
//! optimization. Ranges anchored at the start map output frame `i` to
//! exemplar frame `i`; ranges anchored at the end map the output tail onto
//! the exemplar tail. Ranges are validated once against the requested frame
//! count and then rescaled for every pyramid level.
//!
//! ```
//! use motion_synthesis::{KeyframeRange, KeyframeSet};
//!
//! let set = KeyframeSet::new(vec![KeyframeRange::first(5), KeyframeRange::last(5)]);
//! let resolved = set.resolve(100, 50)?;
//! assert_eq!(resolved.pinned_frames(), 10);
//! # Ok::<(), motion_synthesis::SynthesisError>(())
//! ```

use std::fmt;
use std::ops::Range;

use nalgebra::DMatrix;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Result, SynthesisError};

/// Which end of the sequence a range is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Anchor {
    Start,
    End,
}

/// One half-open range of pinned output frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KeyframeRange {
    /// Offset of the first pinned frame from the anchor.
    start: usize,
    /// Offset one past the last pinned frame; `None` runs to the far end.
    end: Option<usize>,
    anchor: Anchor,
}

impl KeyframeRange {
    /// Frames `[start, end)` counted from the first frame.
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end: Some(end),
            anchor: Anchor::Start,
        }
    }

    /// The first `n` frames.
    #[must_use]
    pub const fn first(n: usize) -> Self {
        Self::new(0, n)
    }

    /// The last `n` frames.
    #[must_use]
    pub const fn last(n: usize) -> Self {
        Self {
            start: n,
            end: None,
            anchor: Anchor::End,
        }
    }

    /// Slice-style range: a negative `start` counts from the end, `None` or a
    /// negative `end` is resolved the same way.
    ///
    /// # Errors
    ///
    /// Returns an error when a non-negative start is paired with a negative
    /// end, which has no frame count independent meaning.
    pub fn from_signed(start: i64, end: Option<i64>) -> Result<Self> {
        if start >= 0 {
            let end = match end {
                None => None,
                Some(e) if e >= 0 => Some(e.unsigned_abs() as usize),
                Some(e) => {
                    return Err(SynthesisError::invalid_config(format!(
                        "keyframe range {start}..{e} mixes absolute start with relative end"
                    )))
                }
            };
            return Ok(Self {
                start: start.unsigned_abs() as usize,
                end,
                anchor: Anchor::Start,
            });
        }

        // Negative start: offsets are distances from the last frame
        let end = match end {
            None => None,
            Some(e) if e < 0 => Some(e.unsigned_abs() as usize),
            Some(e) => {
                return Err(SynthesisError::invalid_config(format!(
                    "keyframe range {start}..{e} mixes relative start with absolute end"
                )))
            }
        };
        Ok(Self {
            start: start.unsigned_abs() as usize,
            end,
            anchor: Anchor::End,
        })
    }

    #[must_use]
    pub const fn anchor(&self) -> Anchor {
        self.anchor
    }

    /// Absolute output frames covered for a sequence of `frames` frames.
    fn output_range(&self, frames: usize) -> Option<Range<usize>> {
        match self.anchor {
            Anchor::Start => {
                let end = self.end.unwrap_or(frames);
                Some(self.start..end)
            }
            Anchor::End => {
                let start = frames.checked_sub(self.start)?;
                let end = match self.end {
                    None => frames,
                    Some(back) => frames.checked_sub(back)?,
                };
                Some(start..end)
            }
        }
    }
}

impl From<Range<usize>> for KeyframeRange {
    fn from(range: Range<usize>) -> Self {
        Self::new(range.start, range.end)
    }
}

impl fmt::Display for KeyframeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.anchor, self.end) {
            (Anchor::Start, Some(end)) => write!(f, "[{}, {})", self.start, end),
            (Anchor::Start, None) => write!(f, "[{}, end)", self.start),
            (Anchor::End, None) => write!(f, "[end-{}, end)", self.start),
            (Anchor::End, Some(end)) => write!(f, "[end-{}, end-{})", self.start, end),
        }
    }
}

/// Ordered collection of keyframe ranges, possibly empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KeyframeSet {
    ranges: Vec<KeyframeRange>,
}

impl KeyframeSet {
    #[must_use]
    pub fn new(ranges: Vec<KeyframeRange>) -> Self {
        Self { ranges }
    }

    /// A set with no pinned frames.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Append a range.
    #[must_use]
    pub fn with(mut self, range: impl Into<KeyframeRange>) -> Self {
        self.ranges.push(range.into());
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    #[must_use]
    pub fn ranges(&self) -> &[KeyframeRange] {
        &self.ranges
    }

    /// Validate against an output length and the pinned exemplar's length.
    ///
    /// # Errors
    ///
    /// Returns an error if a range is empty, falls outside the output, needs
    /// exemplar frames that do not exist, or overlaps another range.
    pub fn resolve(&self, frames: usize, exemplar_frames: usize) -> Result<ResolvedKeyframes> {
        let mut spans: Vec<(KeyframeRange, PinnedSpan)> = Vec::with_capacity(self.ranges.len());

        for range in &self.ranges {
            let out = range
                .output_range(frames)
                .filter(|r| r.start < r.end && r.end <= frames)
                .ok_or(SynthesisError::KeyframeOutOfRange {
                    start: range.start,
                    end: range.end.unwrap_or(frames),
                    frames,
                })?;

            let len = out.end - out.start;
            let source_start = match range.anchor {
                Anchor::Start => Some(out.start),
                Anchor::End => exemplar_frames.checked_sub(frames - out.start),
            };
            let source_start = source_start
                .filter(|s| s + len <= exemplar_frames)
                .ok_or_else(|| {
                    SynthesisError::invalid_config(format!(
                        "keyframe range {range} needs exemplar frames beyond its {exemplar_frames} frames"
                    ))
                })?;

            spans.push((
                *range,
                PinnedSpan {
                    output_start: out.start,
                    len,
                    source_start,
                    anchor: range.anchor,
                },
            ));
        }

        spans.sort_by_key(|(_, s)| s.output_start);
        for pair in spans.windows(2) {
            if pair[0].1.output_end() > pair[1].1.output_start {
                return Err(SynthesisError::KeyframeOverlap {
                    first: pair[0].0.to_string(),
                    second: pair[1].0.to_string(),
                });
            }
        }

        Ok(ResolvedKeyframes {
            frames,
            exemplar_frames,
            spans: spans.into_iter().map(|(_, s)| s).collect(),
        })
    }
}

impl From<Range<usize>> for KeyframeSet {
    fn from(range: Range<usize>) -> Self {
        Self::new(vec![range.into()])
    }
}

impl From<Vec<Range<usize>>> for KeyframeSet {
    fn from(ranges: Vec<Range<usize>>) -> Self {
        Self::new(ranges.into_iter().map(KeyframeRange::from).collect())
    }
}

/// Output frames `[output_start, output_start + len)` copied from exemplar
/// frames `[source_start, source_start + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinnedSpan {
    pub output_start: usize,
    pub len: usize,
    pub source_start: usize,
    pub anchor: Anchor,
}

impl PinnedSpan {
    #[must_use]
    pub const fn output_end(&self) -> usize {
        self.output_start + self.len
    }
}

/// Keyframes validated for the finest level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKeyframes {
    frames: usize,
    exemplar_frames: usize,
    spans: Vec<PinnedSpan>,
}

impl ResolvedKeyframes {
    /// No pinned frames.
    #[must_use]
    pub const fn none(frames: usize, exemplar_frames: usize) -> Self {
        Self {
            frames,
            exemplar_frames,
            spans: Vec::new(),
        }
    }

    #[must_use]
    pub fn spans(&self) -> &[PinnedSpan] {
        &self.spans
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Total pinned output frames.
    #[must_use]
    pub fn pinned_frames(&self) -> usize {
        self.spans.iter().map(|s| s.len).sum()
    }

    /// Rescale the spans to a pyramid level.
    ///
    /// Start-anchored spans scale their offsets from the first frame,
    /// end-anchored spans from the last frame. At the finest level the spans
    /// are returned unchanged. Rounding can make neighbours collide at coarse
    /// levels; a span is then clipped to start where the previous one ends.
    #[must_use]
    pub fn for_level(&self, level_frames: usize, level_exemplar_frames: usize) -> LevelPins {
        if level_frames == self.frames && level_exemplar_frames == self.exemplar_frames {
            return LevelPins {
                spans: self.spans.clone(),
            };
        }

        let (t, l) = (self.frames, level_frames);
        let scale_floor = |v: usize| v * l / t;
        let scale_ceil = |v: usize| (v * l).div_ceil(t);
        let mut spans = Vec::with_capacity(self.spans.len());
        let mut prev_end = 0;

        for span in &self.spans {
            let (mut out_start, out_end, mut source_start) = match span.anchor {
                Anchor::Start => {
                    let a = scale_floor(span.output_start);
                    let b = scale_ceil(span.output_end()).min(level_frames);
                    let src = span.source_start * level_exemplar_frames / self.exemplar_frames;
                    (a, b, src)
                }
                Anchor::End => {
                    let back_a = scale_ceil(t - span.output_start);
                    let back_b = scale_floor(t - span.output_end());
                    let a = level_frames.saturating_sub(back_a);
                    let b = level_frames.saturating_sub(back_b);
                    let src = level_exemplar_frames.saturating_sub(level_frames - a);
                    (a, b, src)
                }
            };

            if out_start < prev_end {
                tracing::warn!(
                    level_frames,
                    output_start = span.output_start,
                    "keyframe span overlaps its neighbour at coarse level"
                );
                source_start += prev_end - out_start;
                out_start = prev_end;
            }

            let len = out_end
                .saturating_sub(out_start)
                .min(level_exemplar_frames.saturating_sub(source_start));
            if len == 0 {
                tracing::warn!(
                    level_frames,
                    output_start = span.output_start,
                    "keyframe span vanished at coarse level"
                );
                continue;
            }
            if len < out_end.saturating_sub(out_start) {
                tracing::warn!(level_frames, len, "keyframe span clipped at coarse level");
            }

            prev_end = out_start + len;
            spans.push(PinnedSpan {
                output_start: out_start,
                len,
                source_start,
                anchor: span.anchor,
            });
        }

        LevelPins { spans }
    }
}

/// Pinned spans for one pyramid level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelPins {
    spans: Vec<PinnedSpan>,
}

impl LevelPins {
    /// No pins.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn spans(&self) -> &[PinnedSpan] {
        &self.spans
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Whether output frame `frame` is pinned.
    #[must_use]
    pub fn is_pinned(&self, frame: usize) -> bool {
        self.spans
            .iter()
            .any(|s| (s.output_start..s.output_end()).contains(&frame))
    }

    /// Overwrite pinned frames of `motion` with their exemplar values.
    pub fn apply(&self, motion: &mut DMatrix<f64>, exemplar: &DMatrix<f64>) {
        for span in &self.spans {
            let len = span
                .len
                .min(motion.ncols().saturating_sub(span.output_start))
                .min(exemplar.ncols().saturating_sub(span.source_start));
            if len == 0 {
                continue;
            }
            motion
                .columns_mut(span.output_start, len)
                .copy_from(&exemplar.columns(span.source_start, len));
        }
    }
}
