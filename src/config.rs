//! Configuration for motion synthesis.
//!
//! This module provides the [`SynthesisConfig`] struct which centralizes all
//! tunable parameters of the pyramid optimizer, along with presets and the
//! [`FrameCount`] request type.
//!
//! # Example
//!
//! ```
//! use motion_synthesis::{FrameCount, SynthesisConfig};
//!
//! // Use default configuration
//! let config = SynthesisConfig::default();
//!
//! // Tune a preset
//! let fast = SynthesisConfig::quick().with_patch_size(5).with_seed(7);
//! assert!(fast.validate().is_ok());
//!
//! // "2x" means twice the exemplar length
//! let frames: FrameCount = "2x".parse()?;
//! assert_eq!(frames.resolve(60)?, 120);
//! # Ok::<(), motion_synthesis::SynthesisError>(())
//! ```

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Result, SynthesisError};

/// Length of the coarsest pyramid level relative to the exemplar.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CoarseRatio {
    /// Fixed fraction of the exemplar length.
    Fixed(f64),
    /// Multiple of the patch size: `patch_size · factor / exemplar_len`.
    PatchFactor(f64),
}

impl CoarseRatio {
    /// Ratio for a given patch size and reference exemplar length, capped at 1.
    #[must_use]
    pub fn resolve(self, patch_size: usize, exemplar_len: usize) -> f64 {
        match self {
            Self::Fixed(r) => r.min(1.0),
            Self::PatchFactor(f) => {
                if exemplar_len == 0 {
                    1.0
                } else {
                    (patch_size as f64 * f / exemplar_len as f64).min(1.0)
                }
            }
        }
    }
}

impl Default for CoarseRatio {
    fn default() -> Self {
        Self::Fixed(0.2)
    }
}

/// Configuration for the pyramid optimizer.
///
/// # Core Parameters
///
/// - `patch_size`: Patch width in frames at every level.
/// - `num_steps`: Optimization steps per pyramid level.
/// - `noise_sigma`: Standard deviation of the noise added to the coarsest candidate.
///
/// # Pyramid Parameters
///
/// - `coarse_ratio`: Length of the coarsest level relative to the exemplar.
/// - `pyr_factor`: Ratio between consecutive level lengths.
/// - `num_stages_limit`: Keep only this many of the finest levels.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SynthesisConfig {
    /// Patch width in frames.
    pub patch_size: usize,

    /// Completeness bias of the nearest-neighbor search.
    /// - 0.0: plain nearest neighbor (may copy one region repeatedly)
    /// - 0.01: default, mild push towards covering the whole exemplar
    pub alpha: f64,

    /// Optimization steps per level.
    pub num_steps: usize,

    /// Noise standard deviation for the coarsest initial candidate.
    pub noise_sigma: f64,

    /// Coarsest level length.
    pub coarse_ratio: CoarseRatio,

    /// Downscale factor between consecutive levels, in (0, 1).
    pub pyr_factor: f64,

    /// Maximum number of levels, counted from the finest.
    pub num_stages_limit: Option<usize>,

    /// Synthesize loopable motion (patches wrap around both ends).
    pub loop_motion: bool,

    /// Fraction of the distance to the blend covered per step, in (0, 1].
    pub step_size: f64,

    /// Snap to the blend exactly every this many steps.
    pub reblend_interval: usize,

    /// Seed for the initial noise; `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            patch_size: 11,
            alpha: 0.01,
            num_steps: 3,
            noise_sigma: 10.0,
            coarse_ratio: CoarseRatio::default(),
            pyr_factor: 0.75,
            num_stages_limit: None,
            loop_motion: false,
            step_size: 1.0,
            reblend_interval: 1,
            seed: None,
        }
    }
}

impl SynthesisConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if self.patch_size == 0 {
            return Err(SynthesisError::invalid_config("patch_size must be at least 1"));
        }
        if !(self.alpha.is_finite() && self.alpha >= 0.0) {
            return Err(SynthesisError::invalid_config(
                "alpha must be finite and non-negative",
            ));
        }
        if self.num_steps == 0 {
            return Err(SynthesisError::invalid_config("num_steps must be at least 1"));
        }
        if !(self.noise_sigma.is_finite() && self.noise_sigma >= 0.0) {
            return Err(SynthesisError::invalid_config(
                "noise_sigma must be finite and non-negative",
            ));
        }
        if !(self.pyr_factor > 0.0 && self.pyr_factor < 1.0) {
            return Err(SynthesisError::invalid_config("pyr_factor must be in (0, 1)"));
        }
        match self.coarse_ratio {
            CoarseRatio::Fixed(r) if !(r > 0.0 && r <= 1.0) => {
                return Err(SynthesisError::invalid_config(
                    "fixed coarse_ratio must be in (0, 1]",
                ));
            }
            CoarseRatio::PatchFactor(f) if !(f.is_finite() && f > 0.0) => {
                return Err(SynthesisError::invalid_config(
                    "coarse_ratio patch factor must be positive",
                ));
            }
            _ => {}
        }
        if self.num_stages_limit == Some(0) {
            return Err(SynthesisError::invalid_config(
                "num_stages_limit must be at least 1",
            ));
        }
        if !(self.step_size > 0.0 && self.step_size <= 1.0) {
            return Err(SynthesisError::invalid_config("step_size must be in (0, 1]"));
        }
        if self.reblend_interval == 0 {
            return Err(SynthesisError::invalid_config(
                "reblend_interval must be at least 1",
            ));
        }
        Ok(())
    }

    /// Preset for previews: one step per level and light noise.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            num_steps: 1,
            noise_sigma: 1.0,
            pyr_factor: 0.6,
            ..Self::default()
        }
    }

    /// Preset with a denser pyramid and more steps per level.
    #[must_use]
    pub fn high_quality() -> Self {
        Self {
            num_steps: 6,
            pyr_factor: 0.85,
            step_size: 0.8,
            reblend_interval: 2,
            ..Self::default()
        }
    }

    /// Set the patch size.
    #[must_use]
    pub const fn with_patch_size(mut self, patch_size: usize) -> Self {
        self.patch_size = patch_size;
        self
    }

    /// Set the completeness bias.
    #[must_use]
    pub const fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Set the number of steps per level.
    #[must_use]
    pub const fn with_num_steps(mut self, num_steps: usize) -> Self {
        self.num_steps = num_steps;
        self
    }

    /// Set the initial noise level.
    #[must_use]
    pub const fn with_noise_sigma(mut self, sigma: f64) -> Self {
        self.noise_sigma = sigma;
        self
    }

    #[must_use]
    pub const fn with_coarse_ratio(mut self, ratio: CoarseRatio) -> Self {
        self.coarse_ratio = ratio;
        self
    }

    #[must_use]
    pub const fn with_pyr_factor(mut self, factor: f64) -> Self {
        self.pyr_factor = factor;
        self
    }

    #[must_use]
    pub const fn with_num_stages_limit(mut self, limit: Option<usize>) -> Self {
        self.num_stages_limit = limit;
        self
    }

    /// Enable/disable loopable output.
    #[must_use]
    pub const fn with_loop(mut self, loop_motion: bool) -> Self {
        self.loop_motion = loop_motion;
        self
    }

    #[must_use]
    pub const fn with_step_size(mut self, step_size: f64) -> Self {
        self.step_size = step_size;
        self
    }

    #[must_use]
    pub const fn with_reblend_interval(mut self, interval: usize) -> Self {
        self.reblend_interval = interval;
        self
    }

    /// Fix the random seed for reproducible output.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Requested output length.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FrameCount {
    /// Exactly this many frames.
    Absolute(usize),
    /// Multiple of the first exemplar's length.
    Multiple(f64),
}

impl FrameCount {
    /// Frame count for a duration in seconds.
    ///
    /// # Errors
    ///
    /// Returns an error if either value is not positive and finite.
    pub fn from_duration(seconds: f64, frame_time: f64) -> Result<Self> {
        if !(seconds.is_finite() && seconds > 0.0 && frame_time.is_finite() && frame_time > 0.0) {
            return Err(SynthesisError::invalid_config(format!(
                "cannot convert {seconds}s at {frame_time}s per frame to a frame count"
            )));
        }
        Ok(Self::Absolute((seconds / frame_time).round() as usize))
    }

    /// Concrete frame count for an exemplar of `exemplar_len` frames.
    ///
    /// # Errors
    ///
    /// Returns an error if the result is zero frames.
    pub fn resolve(self, exemplar_len: usize) -> Result<usize> {
        let frames = match self {
            Self::Absolute(n) => n,
            Self::Multiple(m) => (m * exemplar_len as f64).round() as usize,
        };
        if frames == 0 {
            return Err(SynthesisError::invalid_config(format!(
                "requested frame count {self} resolves to zero frames"
            )));
        }
        Ok(frames)
    }
}

impl FromStr for FrameCount {
    type Err = SynthesisError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || SynthesisError::invalid_config(format!("invalid frame count '{s}'"));

        if let Some(multiple) = s.strip_suffix(['x', 'X']) {
            let m: f64 = multiple.trim().parse().map_err(|_| invalid())?;
            if !(m.is_finite() && m > 0.0) {
                return Err(invalid());
            }
            return Ok(Self::Multiple(m));
        }

        let n: usize = s.parse().map_err(|_| invalid())?;
        if n == 0 {
            return Err(invalid());
        }
        Ok(Self::Absolute(n))
    }
}

impl From<usize> for FrameCount {
    fn from(n: usize) -> Self {
        Self::Absolute(n)
    }
}

impl fmt::Display for FrameCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absolute(n) => write!(f, "{n}"),
            Self::Multiple(m) => write!(f, "{m}x"),
        }
    }
}
