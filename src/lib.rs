//! Motion Synthesis Library
//!
//! Example-based 3D character motion synthesis by multiscale patch matching.
//!
//! This library generates arbitrarily long motion from one or more short
//! exemplar clips without training a model: a coarse-to-fine pyramid of
//! nearest-neighbor patch searches and overlap blends pulls a noisy
//! candidate towards the exemplar's patch distribution, while an optional
//! velocity profile steers the global horizontal speed of the result.
//!
//! # Features
//!
//! - **Patch matching**: normalized squared-distance search with GPNN-style
//!   completeness bias and loop (wrap-around) support
//! - **Coherent blending**: every output frame averages all overlapping patches
//! - **Velocity profiles**: deceleration, acceleration and easing curves applied
//!   as a multiplier and enforced through a scale-invariant loss
//! - **Keyframes**: output ranges pinned to exemplar frames at every level
//!
//! # Quick Start
//!
//! ```
//! use motion_synthesis::{
//!     GenMM, KeyframeRange, MotionSequence, ProfileType, RootEncoding, SynthesisConfig,
//!     SynthesisRequest, VelocityProfileConfig,
//! };
//! use nalgebra::DMatrix;
//!
//! // 4 joint channels + root X/Y/Z velocity channels, 60 frames
//! let data = DMatrix::from_fn(7, 60, |r, t| {
//!     let t = t as f64;
//!     match r {
//!         4 => 0.05 + 0.01 * (t * 0.3).sin(),
//!         5 => 1.0,
//!         6 => 0.02,
//!         _ => (t * 0.2 + r as f64).sin(),
//!     }
//! });
//! let exemplar = MotionSequence::new(data, RootEncoding::Velocity, 1.0 / 30.0)?;
//!
//! let request = SynthesisRequest::new("2x".parse::<motion_synthesis::FrameCount>()?)
//!     .with_velocity_profile(VelocityProfileConfig::new(ProfileType::SmoothDecel, 1.0, 0.2))
//!     .with_keyframes(motion_synthesis::KeyframeSet::new(vec![KeyframeRange::first(5)]));
//!
//! let config = SynthesisConfig::quick().with_patch_size(5).with_seed(42);
//! let synthesis = GenMM::new(config)?.silent(true).run(&[exemplar], request)?;
//!
//! assert_eq!(synthesis.motion.n_frames(), 120);
//! # Ok::<(), motion_synthesis::SynthesisError>(())
//! ```
//!
//! # Components
//!
//! | Module | Role |
//! |--------|------|
//! | [`math`] | encoding conversion, resampling, patch inner products |
//! | [`distance`] | nearest-neighbor field with epoch cache |
//! | [`blend`] | overlap blend and patch-coherent loss |
//! | [`velocity`] | speed profile constraint and loss |
//! | [`loss`] | combined objective |
//! | [`pyramid`] | level lengths |
//! | [`synthesis`] | the [`GenMM`] optimizer |

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod blend;
pub mod config;
pub mod distance;
pub mod error;
pub mod keyframe;
pub mod loss;
pub mod math;
pub mod motion;
pub mod pyramid;
pub mod synthesis;
pub mod velocity;

// Re-exports for convenient access
pub use blend::{blend_patches, PatchCoherentLoss, PatchLossOutput};
pub use config::{CoarseRatio, FrameCount, SynthesisConfig};
pub use distance::{DistanceOptions, NearestNeighborField, PatchDistanceEngine, PatchMatch};
pub use error::{Result, SynthesisError};
pub use keyframe::{Anchor, KeyframeRange, KeyframeSet, LevelPins, PinnedSpan, ResolvedKeyframes};
pub use loss::{CombinedLoss, ForwardMode, LossOutput, LossTerm};
pub use motion::{MotionSequence, RootEncoding};
pub use pyramid::{PyramidLevel, PyramidPlan};
pub use synthesis::{GenMM, LevelReport, StepLoss, Synthesis, SynthesisReport, SynthesisRequest};
pub use velocity::{
    horizontal_speed, ProfileType, VelocityProfileConfig, VelocityProfileConstraint, VelocityProfileLoss,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
