//! Motion sequence container.
//!
//! A [`MotionSequence`] is the data contract between the synthesis core and
//! whatever loads and writes motion files. It carries the channel matrix,
//! the encoding of its root channels and the frame time.
//!
//! # Layout
//!
//! | Rows | Content |
//! |------|---------|
//! | `0..C-3` | joint rotations / positions (opaque to the core) |
//! | `C-3` | root horizontal X (position or velocity) |
//! | `C-2` | root vertical Y (always absolute) |
//! | `C-1` | root horizontal Z (position or velocity) |
//!
//! Columns are frames.

use nalgebra::DMatrix;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Result, SynthesisError};
use crate::math::conversion;

/// Minimum channel count: the three root channels.
pub const MIN_CHANNELS: usize = 3;

/// Encoding of the root's horizontal channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RootEncoding {
    /// Absolute horizontal positions.
    Position,
    /// Frame-to-frame horizontal deltas (frame 0 holds the frame-1 position).
    #[default]
    Velocity,
}

impl RootEncoding {
    /// Whether horizontal channels hold velocities.
    #[must_use]
    pub const fn is_velocity(self) -> bool {
        matches!(self, Self::Velocity)
    }
}

/// A motion clip: channels × frames plus its encoding metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionSequence {
    data: DMatrix<f64>,
    encoding: RootEncoding,
    frame_time: f64,
    begin_position: Option<[f64; 3]>,
}

impl MotionSequence {
    /// Wrap a channel matrix.
    ///
    /// # Errors
    ///
    /// Returns an error if there are fewer than three channels, no frames,
    /// a non-positive frame time, or any non-finite value.
    pub fn new(data: DMatrix<f64>, encoding: RootEncoding, frame_time: f64) -> Result<Self> {
        if data.nrows() < MIN_CHANNELS {
            return Err(SynthesisError::invalid_input(format!(
                "motion needs at least {MIN_CHANNELS} channels, got {}",
                data.nrows()
            )));
        }
        if data.ncols() == 0 {
            return Err(SynthesisError::sequence_too_short(1, 0));
        }
        if !(frame_time.is_finite() && frame_time > 0.0) {
            return Err(SynthesisError::invalid_input(format!(
                "frame time must be positive, got {frame_time}"
            )));
        }
        if let Some(index) = data.iter().position(|v| !v.is_finite()) {
            return Err(SynthesisError::numerical_instability(format!(
                "non-finite value at channel {}, frame {}",
                index % data.nrows(),
                index / data.nrows()
            )));
        }

        Ok(Self {
            data,
            encoding,
            frame_time,
            begin_position: None,
        })
    }

    /// Build from per-frame channel vectors (`frames[t][c]`).
    ///
    /// # Errors
    ///
    /// Returns an error if frames have differing channel counts or the
    /// result fails [`MotionSequence::new`] validation.
    pub fn from_frames(frames: &[Vec<f64>], encoding: RootEncoding, frame_time: f64) -> Result<Self> {
        let channels = frames.first().map_or(0, Vec::len);
        if let Some((t, frame)) = frames.iter().enumerate().find(|(_, f)| f.len() != channels) {
            return Err(SynthesisError::shape_mismatch(
                format!("{channels} channels"),
                format!("{} channels at frame {t}", frame.len()),
            ));
        }
        let data = DMatrix::from_fn(channels, frames.len(), |c, t| frames[t][c]);
        Self::new(data, encoding, frame_time)
    }

    /// Attach the world-space origin used when reconstructing positions.
    #[must_use]
    pub const fn with_begin_position(mut self, begin: [f64; 3]) -> Self {
        self.begin_position = Some(begin);
        self
    }

    /// Same metadata, new channel values.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel count differs.
    pub fn with_data(&self, data: DMatrix<f64>) -> Result<Self> {
        if data.nrows() != self.n_channels() {
            return Err(SynthesisError::shape_mismatch(
                format!("{} channels", self.n_channels()),
                format!("{} channels", data.nrows()),
            ));
        }
        Ok(Self {
            data,
            encoding: self.encoding,
            frame_time: self.frame_time,
            begin_position: self.begin_position,
        })
    }

    /// Channel matrix (channels × frames).
    #[must_use]
    pub const fn data(&self) -> &DMatrix<f64> {
        &self.data
    }

    /// Consume into the channel matrix.
    #[must_use]
    pub fn into_data(self) -> DMatrix<f64> {
        self.data
    }

    #[must_use]
    pub fn n_channels(&self) -> usize {
        self.data.nrows()
    }

    #[must_use]
    pub fn n_frames(&self) -> usize {
        self.data.ncols()
    }

    #[must_use]
    pub const fn encoding(&self) -> RootEncoding {
        self.encoding
    }

    /// Seconds per frame.
    #[must_use]
    pub const fn frame_time(&self) -> f64 {
        self.frame_time
    }

    #[must_use]
    pub const fn begin_position(&self) -> Option<[f64; 3]> {
        self.begin_position
    }

    /// Clip duration in seconds.
    #[must_use]
    pub fn duration(&self) -> f64 {
        self.n_frames() as f64 * self.frame_time
    }

    /// Position-encoded copy, offset by the begin position when present.
    #[must_use]
    pub fn to_position(&self) -> Self {
        if self.encoding == RootEncoding::Position {
            return self.clone();
        }

        let mut data = conversion::to_position(&self.data);
        if let (Some(begin), Some((x, _, z))) = (self.begin_position, conversion::root_channels(data.nrows())) {
            data.row_mut(x).add_scalar_mut(begin[0]);
            data.row_mut(z).add_scalar_mut(begin[2]);
        }

        Self {
            data,
            encoding: RootEncoding::Position,
            ..self.clone()
        }
    }

    /// Velocity-encoded copy; the begin position is removed before differencing.
    #[must_use]
    pub fn to_velocity(&self) -> Self {
        if self.encoding == RootEncoding::Velocity {
            return self.clone();
        }

        let mut positions = self.data.clone();
        if let (Some(begin), Some((x, _, z))) = (self.begin_position, conversion::root_channels(positions.nrows())) {
            positions.row_mut(x).add_scalar_mut(-begin[0]);
            positions.row_mut(z).add_scalar_mut(-begin[2]);
        }

        Self {
            data: conversion::to_velocity(&positions),
            encoding: RootEncoding::Velocity,
            ..self.clone()
        }
    }

    /// Root position (X, Y, Z) at the last frame, in world space.
    #[must_use]
    pub fn final_root_position(&self) -> [f64; 3] {
        let positions = self.to_position();
        // Sequences always carry the three root channels
        let Some((x, y, z)) = conversion::root_channels(positions.n_channels()) else {
            return [0.0; 3];
        };
        let last = positions.n_frames() - 1;
        [
            positions.data[(x, last)],
            positions.data[(y, last)],
            positions.data[(z, last)],
        ]
    }

    /// Move the trajectory so its last frame reaches `target`.
    ///
    /// The correction ramps in after `fixed_head` frames and is fully applied
    /// to the last `fixed_tail` frames. Velocity-encoded motion is converted
    /// to positions and back, so the result keeps its encoding.
    #[must_use]
    pub fn align_final_position(&self, target: [f64; 3], fixed_head: usize, fixed_tail: usize) -> Self {
        let mut positions = self.to_position();
        conversion::align_final_position(&mut positions.data, target, fixed_head, fixed_tail);
        match self.encoding {
            RootEncoding::Position => positions,
            RootEncoding::Velocity => positions.to_velocity(),
        }
    }
}
