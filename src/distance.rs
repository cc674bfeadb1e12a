//! Nearest-neighbor patch search.
//!
//! For every patch of a candidate sequence the [`PatchDistanceEngine`] finds
//! the closest patch among all exemplars. Distances are mean squared
//! differences over the `channels × patch_size` values of a patch.
//!
//! # Completeness
//!
//! With `alpha > 0` each distance `d(i, j)` is divided by
//! `alpha + min_i d(i, j)`: exemplar patches that some candidate patch already
//! sits close to become relatively more expensive, which pushes the field
//! towards using more of the exemplar instead of copying one region.
//! `alpha == 0` is plain nearest-neighbor search.
//!
//! # Caching
//!
//! The loss and the blend of one optimization step query the same field.
//! Results are memoized under `(channels, frames, patch_size, epoch)` plus a
//! content fingerprint of the exemplars; the
//! optimizer calls [`PatchDistanceEngine::advance_epoch`] whenever the
//! candidate changes and [`PatchDistanceEngine::clean_cache`] between pyramid
//! levels.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use nalgebra::DMatrix;

use crate::error::{Result, SynthesisError};
use crate::math::patches::{frame_sq_norms, patch_count, patch_dot_products, window_sums};

/// Search parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceOptions {
    /// Patch width in frames.
    pub patch_size: usize,
    /// Completeness bias; `0.0` disables it.
    pub alpha: f64,
    /// Wrap patches around sequence ends.
    pub wrap: bool,
}

impl Default for DistanceOptions {
    fn default() -> Self {
        Self {
            patch_size: 11,
            alpha: 0.01,
            wrap: false,
        }
    }
}

/// Closest exemplar patch for one candidate patch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatchMatch {
    /// Index into the exemplar slice.
    pub exemplar: usize,
    /// Start frame within that exemplar.
    pub start: usize,
    /// Mean squared difference to the candidate patch.
    pub distance: f64,
}

/// Candidate patch start → matched exemplar patch.
#[derive(Debug, Clone, PartialEq)]
pub struct NearestNeighborField {
    patch_size: usize,
    wrap: bool,
    frames: usize,
    matches: Vec<PatchMatch>,
}

impl NearestNeighborField {
    #[must_use]
    pub const fn patch_size(&self) -> usize {
        self.patch_size
    }

    #[must_use]
    pub const fn wraps(&self) -> bool {
        self.wrap
    }

    /// Frame count of the candidate the field was computed for.
    #[must_use]
    pub const fn frames(&self) -> usize {
        self.frames
    }

    #[must_use]
    pub fn matches(&self) -> &[PatchMatch] {
        &self.matches
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Mean of the matched distances.
    #[must_use]
    pub fn mean_distance(&self) -> f64 {
        if self.matches.is_empty() {
            return 0.0;
        }
        self.matches.iter().map(|m| m.distance).sum::<f64>() / self.matches.len() as f64
    }

    /// How many candidate patches use each exemplar patch.
    #[must_use]
    pub fn usage_histogram(&self, exemplar: usize, exemplar_patches: usize) -> Vec<usize> {
        let mut counts = vec![0; exemplar_patches];
        for m in self.matches.iter().filter(|m| m.exemplar == exemplar) {
            if let Some(slot) = counts.get_mut(m.start) {
                *slot += 1;
            }
        }
        counts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldKey {
    channels: usize,
    frames: usize,
    patch_size: usize,
    epoch: u64,
    exemplars: u64,
}

/// Content fingerprint of the exemplar set.
fn exemplar_fingerprint(exemplars: &[DMatrix<f64>]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for exemplar in exemplars {
        exemplar.shape().hash(&mut hasher);
        for v in exemplar.iter() {
            v.to_bits().hash(&mut hasher);
        }
    }
    hasher.finish()
}

/// Nearest-neighbor patch search with a per-step memo.
#[derive(Debug, Clone)]
pub struct PatchDistanceEngine {
    options: DistanceOptions,
    epoch: u64,
    field: Option<(FieldKey, NearestNeighborField)>,
    hits: u64,
    misses: u64,
}

impl PatchDistanceEngine {
    /// Create an engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the patch size is zero or alpha is negative or
    /// non-finite.
    pub fn new(options: DistanceOptions) -> Result<Self> {
        if options.patch_size == 0 {
            return Err(SynthesisError::invalid_config("patch_size must be at least 1"));
        }
        if !(options.alpha.is_finite() && options.alpha >= 0.0) {
            return Err(SynthesisError::invalid_config("alpha must be non-negative"));
        }
        Ok(Self {
            options,
            epoch: 0,
            field: None,
            hits: 0,
            misses: 0,
        })
    }

    #[must_use]
    pub const fn options(&self) -> &DistanceOptions {
        &self.options
    }

    /// Current cache epoch.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Mark the candidate as changed; the next query recomputes the field.
    pub fn advance_epoch(&mut self) {
        self.epoch += 1;
        self.field = None;
    }

    /// Drop every cached result.
    pub fn clean_cache(&mut self) {
        self.field = None;
    }

    /// Number of queries answered from the cache.
    #[must_use]
    pub const fn cache_hits(&self) -> u64 {
        self.hits
    }

    /// Number of queries that computed a new field.
    #[must_use]
    pub const fn cache_misses(&self) -> u64 {
        self.misses
    }

    /// Nearest exemplar patch for every candidate patch.
    ///
    /// Ties resolve to the lowest exemplar index, then the lowest start frame.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no exemplars, channel counts differ, or a
    /// sequence is shorter than the patch size.
    pub fn distances(
        &mut self,
        candidate: &DMatrix<f64>,
        exemplars: &[DMatrix<f64>],
    ) -> Result<&NearestNeighborField> {
        let key = FieldKey {
            channels: candidate.nrows(),
            frames: candidate.ncols(),
            patch_size: self.options.patch_size,
            epoch: self.epoch,
            exemplars: exemplar_fingerprint(exemplars),
        };

        let cached = matches!(&self.field, Some((k, _)) if *k == key);
        if cached {
            self.hits += 1;
        } else {
            self.validate(candidate, exemplars)?;
            let field = self.compute(candidate, exemplars);
            self.misses += 1;
            self.field = Some((key, field));
        }

        match &self.field {
            Some((_, field)) => Ok(field),
            None => Err(SynthesisError::invalid_input("nearest-neighbor field missing")),
        }
    }

    fn validate(&self, candidate: &DMatrix<f64>, exemplars: &[DMatrix<f64>]) -> Result<()> {
        let p = self.options.patch_size;
        if exemplars.is_empty() {
            return Err(SynthesisError::invalid_input("at least one exemplar is required"));
        }
        if candidate.ncols() < p {
            return Err(SynthesisError::sequence_too_short(p, candidate.ncols()));
        }
        for (i, exemplar) in exemplars.iter().enumerate() {
            if exemplar.nrows() != candidate.nrows() {
                return Err(SynthesisError::shape_mismatch(
                    format!("{} channels", candidate.nrows()),
                    format!("{} channels in exemplar {i}", exemplar.nrows()),
                ));
            }
            if exemplar.ncols() < p {
                return Err(SynthesisError::sequence_too_short(p, exemplar.ncols()));
            }
        }
        Ok(())
    }

    fn compute(&self, candidate: &DMatrix<f64>, exemplars: &[DMatrix<f64>]) -> NearestNeighborField {
        let DistanceOptions {
            patch_size,
            alpha,
            wrap,
        } = self.options;
        let scale = 1.0 / (candidate.nrows() * patch_size) as f64;
        let n_candidate = patch_count(candidate.ncols(), patch_size, wrap);

        let candidate_norms = window_sums(&frame_sq_norms(candidate), patch_size, wrap);
        let exemplar_norms: Vec<Vec<f64>> = exemplars
            .iter()
            .map(|y| window_sums(&frame_sq_norms(y), patch_size, wrap))
            .collect();

        // Raw distance tables, one per exemplar (candidate patches × exemplar patches)
        let tables: Vec<DMatrix<f64>> = exemplars
            .iter()
            .zip(exemplar_norms.iter())
            .map(|(y, y_norms)| {
                let mut d = patch_dot_products(candidate, y, patch_size, wrap);
                for j in 0..d.ncols() {
                    for i in 0..d.nrows() {
                        let ssd = candidate_norms[i] + y_norms[j] - 2.0 * d[(i, j)];
                        d[(i, j)] = ssd.max(0.0) * scale;
                    }
                }
                d
            })
            .collect();

        // Completeness normalizer per exemplar patch
        let normalizers: Vec<Vec<f64>> = tables
            .iter()
            .map(|d| {
                if alpha > 0.0 {
                    d.column_iter()
                        .map(|col| alpha + col.min())
                        .collect()
                } else {
                    vec![1.0; d.ncols()]
                }
            })
            .collect();

        let mut matches = Vec::with_capacity(n_candidate);
        for i in 0..n_candidate {
            let mut best = PatchMatch {
                exemplar: 0,
                start: 0,
                distance: f64::INFINITY,
            };
            let mut best_score = f64::INFINITY;

            for (e, (d, norm)) in tables.iter().zip(normalizers.iter()).enumerate() {
                for j in 0..d.ncols() {
                    let score = d[(i, j)] / norm[j];
                    if score < best_score {
                        best_score = score;
                        best = PatchMatch {
                            exemplar: e,
                            start: j,
                            distance: d[(i, j)],
                        };
                    }
                }
            }
            matches.push(best);
        }

        NearestNeighborField {
            patch_size,
            wrap,
            frames: candidate.ncols(),
            matches,
        }
    }
}
