//! Numeric building blocks for motion synthesis.
//!
//! This module provides:
//! - [`conversion`]: position/velocity encoding of the root channels
//! - [`resample`]: linear resampling along the frame axis
//! - [`patches`]: patch windows and patch inner products

pub mod conversion;
pub mod patches;
pub mod resample;

pub use conversion::{align_final_position, root_channels, to_position, to_velocity};
pub use patches::{patch_count, patch_dot_products, window_sums};
pub use resample::{concat_frames, linspace, resample_curve, resample_frames};
