//! Coarse-to-fine synthesis.
//!
//! [`GenMM`] runs the pyramid optimizer: the coarsest candidate is a noisy
//! resampling of the exemplars, every finer level starts from the upsampled
//! result of the previous one, and each level runs a fixed number of
//! blend-and-correct steps against exemplars resampled to that level.
//!
//! # Step
//!
//! 1. Evaluate the combined loss and the blend `B` of the candidate `X`.
//! 2. `X ← X + step_size · (B − X)`, or `X ← B` on snap steps (every
//!    `reblend_interval`-th step and the last step of a level).
//! 3. `X ← X − step_size · Δ_vel(X)` when a velocity profile is active, where
//!    `Δ_vel` is the speed-normalized velocity loss gradient
//!    ([`VelocityProfileLoss::descent_direction`]).
//! 4. Overwrite keyframes and advance the distance cache epoch.
//!
//! # Example
//!
//! ```
//! use motion_synthesis::{GenMM, MotionSequence, RootEncoding, SynthesisConfig, SynthesisRequest};
//! use nalgebra::DMatrix;
//!
//! let data = DMatrix::from_fn(6, 40, |r, t| ((t as f64) * 0.2 + r as f64).sin());
//! let exemplar = MotionSequence::new(data, RootEncoding::Velocity, 1.0 / 30.0)?;
//!
//! let config = SynthesisConfig::quick().with_patch_size(5).with_seed(1);
//! let synthesis = GenMM::new(config)?.run(&[exemplar], SynthesisRequest::new(80))?;
//! assert_eq!(synthesis.motion.n_frames(), 80);
//! # Ok::<(), motion_synthesis::SynthesisError>(())
//! ```

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::{debug, info, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::blend::PatchCoherentLoss;
use crate::config::{FrameCount, SynthesisConfig};
use crate::distance::DistanceOptions;
use crate::error::{Result, SynthesisError};
use crate::keyframe::{KeyframeSet, LevelPins};
use crate::loss::{CombinedLoss, ForwardMode};
use crate::math::resample::{concat_frames, resample_frames};
use crate::motion::MotionSequence;
use crate::pyramid::{PyramidLevel, PyramidPlan};
use crate::velocity::{VelocityProfileConfig, VelocityProfileConstraint, VelocityProfileLoss};

/// What to synthesize.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    /// Output length.
    pub num_frames: FrameCount,
    /// Target speed curve; `None` disables the velocity term.
    pub velocity_profile: Option<VelocityProfileConfig>,
    /// Output frames pinned to the first exemplar.
    pub keyframes: KeyframeSet,
    /// Directory for per-level loss traces.
    pub debug_dir: Option<PathBuf>,
}

impl SynthesisRequest {
    #[must_use]
    pub fn new(num_frames: impl Into<FrameCount>) -> Self {
        Self {
            num_frames: num_frames.into(),
            velocity_profile: None,
            keyframes: KeyframeSet::empty(),
            debug_dir: None,
        }
    }

    #[must_use]
    pub fn with_velocity_profile(mut self, profile: VelocityProfileConfig) -> Self {
        self.velocity_profile = Some(profile);
        self
    }

    #[must_use]
    pub fn with_keyframes(mut self, keyframes: impl Into<KeyframeSet>) -> Self {
        self.keyframes = keyframes.into();
        self
    }

    #[must_use]
    pub fn with_debug_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_dir = Some(dir.into());
        self
    }
}

/// Loss values after one optimization step.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StepLoss {
    pub step: usize,
    pub patch: f64,
    pub velocity: f64,
    pub total: f64,
}

/// Trace of one pyramid level.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LevelReport {
    pub index: usize,
    pub exemplar_lengths: Vec<usize>,
    pub synthesized_length: usize,
    pub steps: Vec<StepLoss>,
}

impl LevelReport {
    /// Loss of the last step.
    #[must_use]
    pub fn final_loss(&self) -> Option<&StepLoss> {
        self.steps.last()
    }
}

/// Trace of a whole run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SynthesisReport {
    pub num_frames: usize,
    pub use_velo: bool,
    pub levels: Vec<LevelReport>,
}

impl SynthesisReport {
    /// Total loss of the last step of the finest level.
    #[must_use]
    pub fn final_loss(&self) -> Option<f64> {
        self.levels.last().and_then(LevelReport::final_loss).map(|s| s.total)
    }
}

/// Synthesized motion and its trace.
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub motion: MotionSequence,
    pub report: SynthesisReport,
}

/// Pyramid patch-matching synthesizer.
#[derive(Debug, Clone)]
pub struct GenMM {
    config: SynthesisConfig,
    silent: bool,
}

impl GenMM {
    /// Create a synthesizer.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: SynthesisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            silent: false,
        })
    }

    /// Suppress per-level and per-step progress logging.
    #[must_use]
    pub const fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    /// Patch loss matching this synthesizer's configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the distance options are invalid.
    pub fn patch_loss(&self) -> Result<PatchCoherentLoss> {
        PatchCoherentLoss::new(DistanceOptions {
            patch_size: self.config.patch_size,
            alpha: self.config.alpha,
            wrap: self.config.loop_motion,
        })
    }

    /// Synthesize with the default patch loss.
    ///
    /// # Errors
    ///
    /// See [`GenMM::run_with_loss`].
    pub fn run(&self, exemplars: &[MotionSequence], request: SynthesisRequest) -> Result<Synthesis> {
        let loss = CombinedLoss::new(self.patch_loss()?, None);
        self.run_with_loss(exemplars, loss, request)
    }

    /// Synthesize with a caller-supplied loss.
    ///
    /// A velocity profile in the request replaces any velocity term of
    /// `loss`. The output takes its encoding and metadata from the first
    /// exemplar.
    ///
    /// # Errors
    ///
    /// Returns a configuration error before optimizing if the request is
    /// invalid, and [`SynthesisError::NumericalInstability`] if the loss or
    /// candidate becomes non-finite.
    pub fn run_with_loss(
        &self,
        exemplars: &[MotionSequence],
        mut loss: CombinedLoss,
        request: SynthesisRequest,
    ) -> Result<Synthesis> {
        let first = check_exemplars(exemplars)?;
        if let Some(p) = loss.patch_size().filter(|&p| p != self.config.patch_size) {
            return Err(SynthesisError::invalid_config(format!(
                "loss patch size {p} differs from configured patch size {}",
                self.config.patch_size
            )));
        }

        let use_velo = first.encoding().is_velocity();
        let num_frames = request.num_frames.resolve(first.n_frames())?;
        let keyframes = request.keyframes.resolve(num_frames, first.n_frames())?;

        let constraint = match &request.velocity_profile {
            Some(profile) => {
                let constraint = profile.build(num_frames)?;
                if !use_velo {
                    warn!("velocity profile has no effect on position-encoded exemplars");
                }
                loss = loss.with_velocity(VelocityProfileLoss::new(
                    Some(constraint.clone()),
                    profile.loss_weight,
                ));
                Some(constraint)
            }
            None => None,
        };

        let lengths: Vec<usize> = exemplars.iter().map(MotionSequence::n_frames).collect();
        let plan = PyramidPlan::build(&lengths, num_frames, &self.config)?;

        if let Some(dir) = &request.debug_dir {
            fs::create_dir_all(dir)?;
        }

        let mut rng = self
            .config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);

        if !self.silent {
            info!(
                num_frames,
                levels = plan.len(),
                use_velo,
                exemplars = exemplars.len(),
                "starting synthesis"
            );
            if let Some(c) = &constraint {
                info!("{c}");
            }
        }

        let mut candidate = DMatrix::zeros(0, 0);
        let mut reports = Vec::with_capacity(plan.len());

        for (index, level) in plan.levels().iter().enumerate() {
            let level_exemplars = resample_exemplars(exemplars, level);
            let pins = keyframes.for_level(level.synthesized_length, level.exemplar_lengths[0]);

            candidate = if index == 0 {
                self.initial_candidate(&level_exemplars, level.synthesized_length, &mut rng, constraint.as_ref(), use_velo)
            } else {
                resample_frames(&candidate, level.synthesized_length, false)
            };
            pins.apply(&mut candidate, &level_exemplars[0]);
            loss.clean_cache();

            let steps = self.optimize_level(&mut candidate, &level_exemplars, &pins, &mut loss, use_velo)?;

            if let Some(dir) = &request.debug_dir {
                write_level_trace(dir, index, &steps)?;
            }
            if !self.silent {
                let last = steps.last().map_or(0.0, |s| s.total);
                info!(
                    level = index,
                    frames = level.synthesized_length,
                    exemplar_frames = level.exemplar_lengths[0],
                    loss = last,
                    "level done"
                );
            }

            reports.push(LevelReport {
                index,
                exemplar_lengths: level.exemplar_lengths.clone(),
                synthesized_length: level.synthesized_length,
                steps,
            });
        }

        Ok(Synthesis {
            motion: first.with_data(candidate)?,
            report: SynthesisReport {
                num_frames,
                use_velo,
                levels: reports,
            },
        })
    }

    /// Noisy resampling of the concatenated coarsest exemplars.
    fn initial_candidate(
        &self,
        exemplars: &[DMatrix<f64>],
        frames: usize,
        rng: &mut StdRng,
        constraint: Option<&VelocityProfileConstraint>,
        use_velo: bool,
    ) -> DMatrix<f64> {
        let joined = concat_frames(&exemplars.iter().collect::<Vec<_>>());
        let mut candidate = resample_frames(&joined, frames, false);

        let sigma = self.config.noise_sigma;
        if sigma > 0.0 {
            candidate.iter_mut().for_each(|v| {
                let n: f64 = rng.sample(StandardNormal);
                *v += sigma * n;
            });
        }

        match constraint {
            Some(c) => c.apply_constraint(&candidate, use_velo),
            None => candidate,
        }
    }

    fn optimize_level(
        &self,
        candidate: &mut DMatrix<f64>,
        exemplars: &[DMatrix<f64>],
        pins: &LevelPins,
        loss: &mut CombinedLoss,
        use_velo: bool,
    ) -> Result<Vec<StepLoss>> {
        let num_steps = self.config.num_steps;
        let step_size = self.config.step_size;
        let mut steps = Vec::with_capacity(num_steps);

        for step in 0..num_steps {
            let out = loss.forward(candidate, exemplars, pins, ForwardMode::Blended, use_velo)?;
            let blended = out
                .blended
                .ok_or_else(|| SynthesisError::invalid_input("patch term returned no blend"))?;

            let snap = (step + 1) % self.config.reblend_interval == 0 || step + 1 == num_steps;
            if snap {
                *candidate = blended;
            } else {
                *candidate += (blended - &*candidate) * step_size;
            }

            if loss.has_velocity_term() {
                let direction = loss.velocity_descent(candidate, use_velo);
                *candidate -= direction * step_size;
            }

            pins.apply(candidate, &exemplars[0]);
            loss.advance_epoch();

            if candidate.iter().any(|v| !v.is_finite()) {
                return Err(SynthesisError::numerical_instability(format!(
                    "candidate became non-finite at step {step}"
                )));
            }

            if !self.silent {
                debug!(step, patch = out.patch, velocity = out.velocity, total = out.total, "step");
            }
            steps.push(StepLoss {
                step,
                patch: out.patch,
                velocity: out.velocity,
                total: out.total,
            });
        }

        Ok(steps)
    }
}

fn check_exemplars(exemplars: &[MotionSequence]) -> Result<&MotionSequence> {
    let first = exemplars
        .first()
        .ok_or_else(|| SynthesisError::invalid_input("at least one exemplar is required"))?;
    for (i, exemplar) in exemplars.iter().enumerate().skip(1) {
        if exemplar.n_channels() != first.n_channels() {
            return Err(SynthesisError::shape_mismatch(
                format!("{} channels", first.n_channels()),
                format!("{} channels in exemplar {i}", exemplar.n_channels()),
            ));
        }
        if exemplar.encoding() != first.encoding() {
            return Err(SynthesisError::invalid_input(format!(
                "exemplar {i} uses {:?} encoding, exemplar 0 uses {:?}",
                exemplar.encoding(),
                first.encoding()
            )));
        }
    }
    Ok(first)
}

fn resample_exemplars(exemplars: &[MotionSequence], level: &PyramidLevel) -> Vec<DMatrix<f64>> {
    exemplars
        .iter()
        .zip(level.exemplar_lengths.iter())
        .map(|(e, &len)| resample_frames(e.data(), len, false))
        .collect()
}

fn write_level_trace(dir: &Path, index: usize, steps: &[StepLoss]) -> Result<()> {
    let mut out = BufWriter::new(File::create(dir.join(format!("level_{index:02}.csv")))?);
    writeln!(out, "step,patch_loss,velocity_loss,total_loss")?;
    for s in steps {
        writeln!(out, "{},{},{},{}", s.step, s.patch, s.velocity, s.total)?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyframe::KeyframeRange;
    use crate::motion::RootEncoding;
    use crate::velocity::ProfileType;

    fn exemplar(frames: usize, encoding: RootEncoding) -> MotionSequence {
        let data = DMatrix::from_fn(5, frames, |r, c| {
            let t = c as f64;
            match r {
                2 => 0.3 + 0.1 * (t * 0.2).sin(),
                3 => 1.0 + 0.2 * (t * 0.4).sin(),
                4 => 0.2 + 0.05 * (t * 0.3).cos(),
                _ => (t * 0.15 + r as f64).sin(),
            }
        });
        MotionSequence::new(data, encoding, 1.0 / 30.0).unwrap()
    }

    fn genmm() -> GenMM {
        let config = SynthesisConfig::default()
            .with_patch_size(5)
            .with_noise_sigma(0.5)
            .with_seed(3);
        GenMM::new(config).unwrap().silent(true)
    }

    #[test]
    fn test_output_shape_and_metadata() {
        let ex = exemplar(40, RootEncoding::Velocity).with_begin_position([1.0, 0.0, 2.0]);
        let out = genmm().run(&[ex.clone()], SynthesisRequest::new(60)).unwrap();
        assert_eq!(out.motion.n_frames(), 60);
        assert_eq!(out.motion.n_channels(), ex.n_channels());
        assert_eq!(out.motion.encoding(), RootEncoding::Velocity);
        assert_eq!(out.motion.begin_position(), Some([1.0, 0.0, 2.0]));
        assert_eq!(out.report.num_frames, 60);
        assert!(out.report.use_velo);
        assert_eq!(out.report.levels.last().unwrap().synthesized_length, 60);
    }

    #[test]
    fn test_report_has_every_step() {
        let out = genmm()
            .run(&[exemplar(40, RootEncoding::Velocity)], SynthesisRequest::new(40))
            .unwrap();
        for level in &out.report.levels {
            assert_eq!(level.steps.len(), 3);
            assert!(level.steps.iter().all(|s| s.total.is_finite()));
        }
        assert!(out.report.final_loss().is_some());
    }

    #[test]
    fn test_multiple_exemplars_need_matching_layout() {
        let a = exemplar(40, RootEncoding::Velocity);
        let b = exemplar(30, RootEncoding::Position);
        assert!(genmm().run(&[a.clone(), b], SynthesisRequest::new(40)).is_err());

        let c = MotionSequence::new(DMatrix::zeros(4, 30), RootEncoding::Velocity, 1.0 / 30.0).unwrap();
        assert!(matches!(
            genmm().run(&[a, c], SynthesisRequest::new(40)),
            Err(SynthesisError::ShapeMismatch { .. })
        ));
        assert!(genmm().run(&[], SynthesisRequest::new(40)).is_err());
    }

    #[test]
    fn test_mismatched_loss_patch_size() {
        let loss = CombinedLoss::new(PatchCoherentLoss::with_params(7, 0.0, false).unwrap(), None);
        let err = genmm()
            .run_with_loss(&[exemplar(40, RootEncoding::Velocity)], loss, SynthesisRequest::new(40))
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_configuration_errors_before_optimizing() {
        let ex = exemplar(40, RootEncoding::Velocity);
        let overlapping = KeyframeSet::new(vec![KeyframeRange::new(0, 10), KeyframeRange::new(5, 15)]);
        assert!(matches!(
            genmm().run(&[ex.clone()], SynthesisRequest::new(60).with_keyframes(overlapping)),
            Err(SynthesisError::KeyframeOverlap { .. })
        ));
        assert!(genmm()
            .run(&[ex.clone()], SynthesisRequest::new(FrameCount::Absolute(0)))
            .unwrap_err()
            .is_config_error());

        let bad_profile = VelocityProfileConfig::new(ProfileType::Constant, -1.0, 1.0);
        assert!(genmm()
            .run(&[ex], SynthesisRequest::new(60).with_velocity_profile(bad_profile))
            .is_err());
    }

    #[test]
    fn test_position_encoding_ignores_velocity_profile() {
        let ex = exemplar(40, RootEncoding::Position);
        let profile = VelocityProfileConfig::new(ProfileType::LinearDecel, 1.0, 0.0);
        let out = genmm()
            .run(&[ex], SynthesisRequest::new(50).with_velocity_profile(profile))
            .unwrap();
        assert!(!out.report.use_velo);
        for level in &out.report.levels {
            assert!(level.steps.iter().all(|s| s.velocity == 0.0));
        }
    }
}
