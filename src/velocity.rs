//! Velocity profile constraint.
//!
//! A profile is a per-frame curve of speed *multipliers* relative to the
//! motion's own speed, generated from a curve type and start/end values over
//! normalized time `t ∈ [0, 1]`:
//!
//! | Type | Multiplier |
//! |------|------------|
//! | `linear_decel`, `linear_accel` | `s + (e - s)·t` |
//! | `smooth_decel` | `s + (e - s)·(1 - (1 - t)²)` |
//! | `smooth_accel` | `s + (e - s)·t²` |
//! | `ease_in_out` | `s + (e - s)·(3t² - 2t³)` |
//! | `constant` | `s` |
//!
//! The curve is used two ways: [`VelocityProfileConstraint::apply_constraint`]
//! multiplies the horizontal root velocity directly, and
//! [`VelocityProfileLoss`] compares the *shape* of the current speed curve
//! with the target after normalizing both by their means.
//!
//! ```
//! use motion_synthesis::{ProfileType, VelocityProfileConstraint};
//!
//! let profile = VelocityProfileConstraint::new(100, ProfileType::SmoothDecel, 1.5, 0.0)?;
//! assert_eq!(profile.target_speeds().len(), 100);
//! assert!((profile.target_at(0) - 1.5).abs() < 1e-12);
//! # Ok::<(), motion_synthesis::SynthesisError>(())
//! ```

use std::fmt;
use std::str::FromStr;

use nalgebra::DMatrix;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Result, SynthesisError};
use crate::math::conversion::root_channels;
use crate::math::resample::{linspace, resample_curve};

/// Mean speed below which the loss treats motion as static.
pub const MIN_MEAN_SPEED: f64 = 1e-6;

/// Added to the mean speed before normalizing.
const SPEED_EPS: f64 = 1e-6;

/// Default start multiplier when none is given.
pub const DEFAULT_START_MULTIPLIER: f64 = 1.0;

/// Default end multiplier when none is given.
pub const DEFAULT_END_MULTIPLIER: f64 = 0.0;

/// Default weight of the velocity loss relative to the patch loss.
pub const DEFAULT_LOSS_WEIGHT: f64 = 0.1;

/// Shape of the multiplier curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ProfileType {
    LinearDecel,
    LinearAccel,
    SmoothDecel,
    SmoothAccel,
    Constant,
    EaseInOut,
}

impl ProfileType {
    /// Every supported profile.
    pub const ALL: [Self; 6] = [
        Self::LinearDecel,
        Self::LinearAccel,
        Self::SmoothDecel,
        Self::SmoothAccel,
        Self::Constant,
        Self::EaseInOut,
    ];

    /// Snake-case name used on command lines and in configuration files.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::LinearDecel => "linear_decel",
            Self::LinearAccel => "linear_accel",
            Self::SmoothDecel => "smooth_decel",
            Self::SmoothAccel => "smooth_accel",
            Self::Constant => "constant",
            Self::EaseInOut => "ease_in_out",
        }
    }

    /// Interpolation weight at normalized time `t`.
    #[must_use]
    pub fn easing(self, t: f64) -> f64 {
        match self {
            Self::LinearDecel | Self::LinearAccel => t,
            Self::SmoothDecel => 1.0 - (1.0 - t).powi(2),
            Self::SmoothAccel => t * t,
            Self::EaseInOut => 3.0 * t * t - 2.0 * t * t * t,
            Self::Constant => 0.0,
        }
    }
}

impl FromStr for ProfileType {
    type Err = SynthesisError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| SynthesisError::unknown_profile_type(s))
    }
}

impl fmt::Display for ProfileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Velocity profile settings as handed over by an argument parser.
///
/// `start_multiplier`/`end_multiplier` scale the motion's own speed; they
/// are not absolute speeds.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VelocityProfileConfig {
    pub profile_type: ProfileType,
    pub start_multiplier: f64,
    pub end_multiplier: f64,
    pub loss_weight: f64,
}

impl VelocityProfileConfig {
    #[must_use]
    pub const fn new(profile_type: ProfileType, start_multiplier: f64, end_multiplier: f64) -> Self {
        Self {
            profile_type,
            start_multiplier,
            end_multiplier,
            loss_weight: DEFAULT_LOSS_WEIGHT,
        }
    }

    #[must_use]
    pub const fn with_loss_weight(mut self, weight: f64) -> Self {
        self.loss_weight = weight;
        self
    }

    /// Build from raw optional values; no profile means no constraint.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile name is unknown.
    pub fn from_args(
        profile: Option<&str>,
        start: Option<f64>,
        end: Option<f64>,
        loss_weight: Option<f64>,
    ) -> Result<Option<Self>> {
        let Some(name) = profile else {
            return Ok(None);
        };
        Ok(Some(Self {
            profile_type: name.parse()?,
            start_multiplier: start.unwrap_or(DEFAULT_START_MULTIPLIER),
            end_multiplier: end.unwrap_or(DEFAULT_END_MULTIPLIER),
            loss_weight: loss_weight.unwrap_or(DEFAULT_LOSS_WEIGHT),
        }))
    }

    /// Check the multipliers and weight.
    ///
    /// # Errors
    ///
    /// Returns an error for non-finite or negative values.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("start multiplier", self.start_multiplier),
            ("end multiplier", self.end_multiplier),
            ("loss weight", self.loss_weight),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(SynthesisError::invalid_config(format!(
                    "velocity profile {name} must be finite and non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Constraint for a sequence of `frames` frames.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or `frames` is zero.
    pub fn build(&self, frames: usize) -> Result<VelocityProfileConstraint> {
        self.validate()?;
        VelocityProfileConstraint::new(
            frames,
            self.profile_type,
            self.start_multiplier,
            self.end_multiplier,
        )
    }
}

/// Per-frame horizontal root speed `sqrt(vx² + vz²)` of velocity-encoded motion.
///
/// All zeros when the matrix has no root channels.
#[must_use]
pub fn horizontal_speed(motion: &DMatrix<f64>) -> Vec<f64> {
    let Some((x, _, z)) = root_channels(motion.nrows()) else {
        return vec![0.0; motion.ncols()];
    };
    (0..motion.ncols())
        .map(|t| motion[(x, t)].hypot(motion[(z, t)]))
        .collect()
}

/// Target multiplier curve over the output frames.
#[derive(Debug, Clone, PartialEq)]
pub struct VelocityProfileConstraint {
    total_frames: usize,
    profile_type: ProfileType,
    start_multiplier: f64,
    end_multiplier: f64,
    target: Vec<f64>,
}

impl VelocityProfileConstraint {
    /// Compute the curve for `total_frames` frames.
    ///
    /// # Errors
    ///
    /// Returns an error if `total_frames` is zero.
    pub fn new(
        total_frames: usize,
        profile_type: ProfileType,
        start_multiplier: f64,
        end_multiplier: f64,
    ) -> Result<Self> {
        if total_frames == 0 {
            return Err(SynthesisError::invalid_config(
                "velocity profile needs at least one frame",
            ));
        }

        let target = linspace(total_frames)
            .into_iter()
            .map(|t| match profile_type {
                ProfileType::Constant => start_multiplier,
                _ => start_multiplier + (end_multiplier - start_multiplier) * profile_type.easing(t),
            })
            .collect();

        Ok(Self {
            total_frames,
            profile_type,
            start_multiplier,
            end_multiplier,
            target,
        })
    }

    /// Like [`VelocityProfileConstraint::new`] with the curve given by name.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown names or zero frames.
    pub fn from_name(
        total_frames: usize,
        profile: &str,
        start_multiplier: f64,
        end_multiplier: f64,
    ) -> Result<Self> {
        Self::new(total_frames, profile.parse()?, start_multiplier, end_multiplier)
    }

    #[must_use]
    pub const fn total_frames(&self) -> usize {
        self.total_frames
    }

    #[must_use]
    pub const fn profile_type(&self) -> ProfileType {
        self.profile_type
    }

    /// Multiplier curve at native resolution.
    #[must_use]
    pub fn target_speeds(&self) -> &[f64] {
        &self.target
    }

    /// Multiplier at `frame`, clamped to the last frame.
    #[must_use]
    pub fn target_at(&self, frame: usize) -> f64 {
        self.target[frame.min(self.total_frames - 1)]
    }

    /// Curve resampled to `frames` samples with matching end points.
    #[must_use]
    pub fn resampled(&self, frames: usize) -> Vec<f64> {
        resample_curve(&self.target, frames, true)
    }

    /// Multiply the horizontal root velocity by the target curve.
    ///
    /// Position-encoded input is returned unchanged. The vertical channel is
    /// never scaled.
    #[must_use]
    pub fn apply_constraint(&self, motion: &DMatrix<f64>, use_velo: bool) -> DMatrix<f64> {
        let mut constrained = motion.clone();
        let Some((x, _, z)) = root_channels(motion.nrows()).filter(|_| use_velo) else {
            return constrained;
        };

        let target = self.resampled(motion.ncols());
        for (t, &scale) in target.iter().enumerate() {
            constrained[(x, t)] *= scale;
            constrained[(z, t)] *= scale;
        }
        constrained
    }

    /// Acceptable `(min, max)` multiplier at `frame` for a fractional tolerance.
    #[must_use]
    pub fn get_speed_range(&self, frame: usize, tolerance: f64) -> (f64, f64) {
        let target = self.target_at(frame);
        ((target * (1.0 - tolerance)).max(0.0), target * (1.0 + tolerance))
    }
}

impl fmt::Display for VelocityProfileConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VelocityProfileConstraint(frames={}, type='{}', start={:.2}, end={:.2})",
            self.total_frames, self.profile_type, self.start_multiplier, self.end_multiplier
        )
    }
}

/// Shape-matching loss between the current speed curve and the profile.
#[derive(Debug, Clone, PartialEq)]
pub struct VelocityProfileLoss {
    constraint: Option<VelocityProfileConstraint>,
    weight: f64,
}

/// Normalized curves shared by the loss and its gradient.
struct SpeedComparison {
    speed: Vec<f64>,
    denom: f64,
    ratio: Vec<f64>,
    target_ratio: Vec<f64>,
}

impl VelocityProfileLoss {
    #[must_use]
    pub const fn new(constraint: Option<VelocityProfileConstraint>, weight: f64) -> Self {
        Self { constraint, weight }
    }

    #[must_use]
    pub const fn constraint(&self) -> Option<&VelocityProfileConstraint> {
        self.constraint.as_ref()
    }

    #[must_use]
    pub const fn weight(&self) -> f64 {
        self.weight
    }

    /// `None` whenever the loss is identically zero for this input.
    fn compare(&self, motion: &DMatrix<f64>, use_velo: bool) -> Option<SpeedComparison> {
        let constraint = self.constraint.as_ref()?;
        if !use_velo || motion.ncols() == 0 {
            return None;
        }

        let speed = horizontal_speed(motion);
        let n = speed.len() as f64;
        let mean_speed = speed.iter().sum::<f64>() / n;
        if mean_speed < MIN_MEAN_SPEED {
            return None;
        }

        let target = constraint.resampled(motion.ncols());
        let mean_target = target.iter().sum::<f64>() / n;
        if mean_target.abs() < f64::EPSILON {
            tracing::warn!("velocity profile target has zero mean; loss disabled");
            return None;
        }

        let denom = mean_speed + SPEED_EPS;
        Some(SpeedComparison {
            ratio: speed.iter().map(|s| s / denom).collect(),
            target_ratio: target.iter().map(|t| t / mean_target).collect(),
            speed,
            denom,
        })
    }

    /// Weighted mean squared difference of the mean-normalized speed curves.
    ///
    /// Exactly zero when `use_velo` is false, no constraint is configured, or
    /// the mean speed is below [`MIN_MEAN_SPEED`].
    #[must_use]
    pub fn forward(&self, motion: &DMatrix<f64>, use_velo: bool) -> f64 {
        let Some(cmp) = self.compare(motion, use_velo) else {
            return 0.0;
        };
        let mse = cmp
            .ratio
            .iter()
            .zip(cmp.target_ratio.iter())
            .map(|(r, t)| (r - t).powi(2))
            .sum::<f64>()
            / cmp.ratio.len() as f64;
        self.weight * mse
    }

    /// Gradient of [`VelocityProfileLoss::forward`] with respect to `motion`.
    ///
    /// Only the horizontal root rows are non-zero.
    #[must_use]
    pub fn gradient(&self, motion: &DMatrix<f64>, use_velo: bool) -> DMatrix<f64> {
        let mut grad = DMatrix::zeros(motion.nrows(), motion.ncols());
        let Some(cmp) = self.compare(motion, use_velo) else {
            return grad;
        };

        let n = cmp.speed.len() as f64;
        // dL/d(ratio_t)
        let g: Vec<f64> = cmp
            .ratio
            .iter()
            .zip(cmp.target_ratio.iter())
            .map(|(r, t)| 2.0 * self.weight * (r - t) / n)
            .collect();
        let coupling = g.iter().zip(cmp.speed.iter()).map(|(g, s)| g * s).sum::<f64>()
            / (cmp.denom * cmp.denom * n);

        let Some((x, _, z)) = root_channels(motion.nrows()) else {
            return grad;
        };
        for (t, (&g_t, &s_t)) in g.iter().zip(cmp.speed.iter()).enumerate() {
            if s_t <= 0.0 {
                continue;
            }
            let d_speed = g_t / cmp.denom - coupling;
            grad[(x, t)] = d_speed * motion[(x, t)] / s_t;
            grad[(z, t)] = d_speed * motion[(z, t)] / s_t;
        }
        grad
    }

    /// [`VelocityProfileLoss::gradient`] rescaled by `T·D²/2`, where `D` is the
    /// mean speed.
    ///
    /// The raw gradient grows as the motion slows down. After rescaling, a
    /// unit step moves every frame's speed by `w · D · (uₜ − rₜ)` minus a
    /// shared offset, so the normalized curve closes `w` of its distance to
    /// the target regardless of the motion's speed scale. `w` is the loss
    /// weight capped at 1; larger weights would overshoot the target.
    ///
    /// No frame is slowed by more than its current speed, so a step of at
    /// most 1 never reverses the horizontal direction of travel.
    #[must_use]
    pub fn descent_direction(&self, motion: &DMatrix<f64>, use_velo: bool) -> DMatrix<f64> {
        let Some(cmp) = self.compare(motion, use_velo) else {
            return DMatrix::zeros(motion.nrows(), motion.ncols());
        };
        if self.weight <= 0.0 {
            return DMatrix::zeros(motion.nrows(), motion.ncols());
        }
        let effective = self.weight.min(1.0) / self.weight;
        let scale = cmp.speed.len() as f64 * cmp.denom * cmp.denom / 2.0 * effective;
        let mut direction = self.gradient(motion, use_velo) * scale;

        let Some((x, _, z)) = root_channels(motion.nrows()) else {
            return direction;
        };
        for (t, &s_t) in cmp.speed.iter().enumerate() {
            if s_t <= 0.0 {
                continue;
            }
            // Radial component: how much this step slows frame t down
            let slowdown = (direction[(x, t)] * motion[(x, t)] + direction[(z, t)] * motion[(z, t)]) / s_t;
            if slowdown > s_t {
                direction[(x, t)] = motion[(x, t)];
                direction[(z, t)] = motion[(z, t)];
            }
        }
        direction
    }
}
