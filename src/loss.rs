//! Combined patch and velocity objective.
//!
//! [`CombinedLoss`] sums a list of [`LossTerm`]s. The patch term always comes
//! first because it produces the blend; the velocity term is then evaluated
//! on either the blend or the raw candidate depending on [`ForwardMode`].

use nalgebra::DMatrix;

use crate::blend::PatchCoherentLoss;
use crate::error::{Result, SynthesisError};
use crate::keyframe::LevelPins;
use crate::velocity::VelocityProfileLoss;

/// What a forward pass evaluates the velocity term on and returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMode {
    /// Loss only; velocity is measured on the candidate.
    LossOnly,
    /// Loss plus the blend; velocity is measured on the blend.
    Blended,
}

/// One summand of the objective.
#[derive(Debug, Clone)]
pub enum LossTerm {
    Patch(PatchCoherentLoss),
    Velocity(VelocityProfileLoss),
}

impl LossTerm {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Patch(_) => "patch",
            Self::Velocity(_) => "velocity",
        }
    }
}

/// Result of a combined forward pass.
#[derive(Debug, Clone)]
pub struct LossOutput {
    pub total: f64,
    pub patch: f64,
    pub velocity: f64,
    /// Mean nearest-neighbor distance from the patch term.
    pub mean_nn_distance: f64,
    /// Present in [`ForwardMode::Blended`].
    pub blended: Option<DMatrix<f64>>,
}

/// Sum of a patch term and an optional velocity term.
#[derive(Debug, Clone)]
pub struct CombinedLoss {
    terms: Vec<LossTerm>,
}

impl CombinedLoss {
    #[must_use]
    pub fn new(patch: PatchCoherentLoss, velocity: Option<VelocityProfileLoss>) -> Self {
        let mut terms = vec![LossTerm::Patch(patch)];
        terms.extend(velocity.map(LossTerm::Velocity));
        Self { terms }
    }

    /// Replace the velocity term, or add one.
    #[must_use]
    pub fn with_velocity(mut self, velocity: VelocityProfileLoss) -> Self {
        self.terms.retain(|t| !matches!(t, LossTerm::Velocity(_)));
        self.terms.push(LossTerm::Velocity(velocity));
        self
    }

    #[must_use]
    pub fn terms(&self) -> &[LossTerm] {
        &self.terms
    }

    #[must_use]
    pub fn has_velocity_term(&self) -> bool {
        self.terms.iter().any(|t| matches!(t, LossTerm::Velocity(_)))
    }

    /// Patch size of the patch term.
    #[must_use]
    pub fn patch_size(&self) -> Option<usize> {
        self.terms.iter().find_map(|t| match t {
            LossTerm::Patch(p) => Some(p.patch_size()),
            LossTerm::Velocity(_) => None,
        })
    }

    /// Evaluate every term.
    ///
    /// # Errors
    ///
    /// Returns an error if the patch search fails or the total is not finite.
    pub fn forward(
        &mut self,
        candidate: &DMatrix<f64>,
        exemplars: &[DMatrix<f64>],
        pins: &LevelPins,
        mode: ForwardMode,
        use_velo: bool,
    ) -> Result<LossOutput> {
        let mut out = LossOutput {
            total: 0.0,
            patch: 0.0,
            velocity: 0.0,
            mean_nn_distance: 0.0,
            blended: None,
        };

        for term in &mut self.terms {
            match term {
                LossTerm::Patch(patch) => {
                    let result = patch.forward(candidate, exemplars, pins, mode == ForwardMode::Blended)?;
                    out.patch += result.loss;
                    out.mean_nn_distance = result.mean_nn_distance;
                    out.blended = result.blended;
                }
                LossTerm::Velocity(velocity) => {
                    let measured = match (&out.blended, mode) {
                        (Some(blended), ForwardMode::Blended) => blended,
                        _ => candidate,
                    };
                    out.velocity += velocity.forward(measured, use_velo);
                }
            }
        }

        out.total = out.patch + out.velocity;
        if !out.total.is_finite() {
            return Err(SynthesisError::numerical_instability(format!(
                "loss is {} (patch {}, velocity {})",
                out.total, out.patch, out.velocity
            )));
        }
        Ok(out)
    }

    /// Summed descent direction of the velocity terms at `motion`; zero
    /// without one.
    ///
    /// See [`VelocityProfileLoss::descent_direction`].
    #[must_use]
    pub fn velocity_descent(&self, motion: &DMatrix<f64>, use_velo: bool) -> DMatrix<f64> {
        let mut direction = DMatrix::zeros(motion.nrows(), motion.ncols());
        for term in &self.terms {
            if let LossTerm::Velocity(velocity) = term {
                direction += velocity.descent_direction(motion, use_velo);
            }
        }
        direction
    }

    /// Mark the candidate as changed.
    pub fn advance_epoch(&mut self) {
        for term in &mut self.terms {
            if let LossTerm::Patch(patch) = term {
                patch.advance_epoch();
            }
        }
    }

    /// Invalidate cached nearest-neighbor fields.
    pub fn clean_cache(&mut self) {
        for term in &mut self.terms {
            if let LossTerm::Patch(patch) = term {
                patch.clean_cache();
            }
        }
    }
}
