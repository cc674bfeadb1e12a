//! Patch-coherent blending and its loss.
//!
//! Given a nearest-neighbor field, every output frame becomes the average of
//! the exemplar values that all overlapping matched patches place on it. The
//! loss is the mean squared difference between the candidate and that blend:
//! zero exactly when the candidate already consists of exemplar patches that
//! agree wherever they overlap.

use nalgebra::DMatrix;

use crate::distance::{DistanceOptions, NearestNeighborField, PatchDistanceEngine};
use crate::error::{Result, SynthesisError};
use crate::keyframe::LevelPins;
use crate::math::patches::frame_at;

/// Output of one patch loss evaluation.
#[derive(Debug, Clone)]
pub struct PatchLossOutput {
    /// Mean squared difference between candidate and blend.
    pub loss: f64,
    /// The blend, when requested.
    pub blended: Option<DMatrix<f64>>,
    /// Mean nearest-neighbor distance of the field used.
    pub mean_nn_distance: f64,
}

/// Reconstruct a candidate of `frames` frames from matched exemplar patches.
///
/// # Errors
///
/// Returns an error if the field references a missing exemplar or leaves a
/// frame uncovered.
pub fn blend_patches(
    field: &NearestNeighborField,
    exemplars: &[DMatrix<f64>],
    channels: usize,
) -> Result<DMatrix<f64>> {
    let frames = field.frames();
    let p = field.patch_size();
    let wrap = field.wraps();

    let mut sum = DMatrix::zeros(channels, frames);
    let mut counts = vec![0usize; frames];

    for (i, m) in field.matches().iter().enumerate() {
        let source = exemplars.get(m.exemplar).ok_or_else(|| {
            SynthesisError::invalid_input(format!("field references missing exemplar {}", m.exemplar))
        })?;
        for k in 0..p {
            let dst = frame_at(i, k, frames, wrap);
            let src = frame_at(m.start, k, source.ncols(), wrap);
            let mut column = sum.column_mut(dst);
            column += source.column(src);
            counts[dst] += 1;
        }
    }

    for (frame, &n) in counts.iter().enumerate() {
        if n == 0 {
            return Err(SynthesisError::invalid_input(format!(
                "frame {frame} not covered by any patch"
            )));
        }
        let mut column = sum.column_mut(frame);
        column /= n as f64;
    }

    Ok(sum)
}

/// Patch-coherent loss with its own distance engine.
#[derive(Debug, Clone)]
pub struct PatchCoherentLoss {
    engine: PatchDistanceEngine,
}

impl PatchCoherentLoss {
    /// Create a loss for the given patch search settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the options are invalid.
    pub fn new(options: DistanceOptions) -> Result<Self> {
        Ok(Self {
            engine: PatchDistanceEngine::new(options)?,
        })
    }

    /// Convenience constructor mirroring the command-line knobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the options are invalid.
    pub fn with_params(patch_size: usize, alpha: f64, wrap: bool) -> Result<Self> {
        Self::new(DistanceOptions {
            patch_size,
            alpha,
            wrap,
        })
    }

    #[must_use]
    pub const fn engine(&self) -> &PatchDistanceEngine {
        &self.engine
    }

    #[must_use]
    pub const fn patch_size(&self) -> usize {
        self.engine.options().patch_size
    }

    /// Evaluate the loss, optionally returning the blend.
    ///
    /// Pinned frames are overwritten in the blend after averaging, so they
    /// always hold their exemplar values exactly.
    ///
    /// # Errors
    ///
    /// Returns an error if the nearest-neighbor search fails.
    pub fn forward(
        &mut self,
        candidate: &DMatrix<f64>,
        exemplars: &[DMatrix<f64>],
        pins: &LevelPins,
        return_blended: bool,
    ) -> Result<PatchLossOutput> {
        let field = self.engine.distances(candidate, exemplars)?;
        let mean_nn_distance = field.mean_distance();
        let mut blended = blend_patches(field, exemplars, candidate.nrows())?;

        if let Some(pinned_source) = exemplars.first() {
            pins.apply(&mut blended, pinned_source);
        }

        let loss = (candidate - &blended).norm_squared() / candidate.len() as f64;

        Ok(PatchLossOutput {
            loss,
            blended: return_blended.then_some(blended),
            mean_nn_distance,
        })
    }

    /// Mark the candidate as changed.
    pub fn advance_epoch(&mut self) {
        self.engine.advance_epoch();
    }

    /// Invalidate the distance engine's cache.
    pub fn clean_cache(&mut self) {
        self.engine.clean_cache();
    }
}
