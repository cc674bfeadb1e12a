//! Coarse-to-fine level planning.
//!
//! Reference lengths grow geometrically from `round(E · coarse_ratio)` by
//! `1 / pyr_factor` until they reach the reference exemplar length `E`.
//! Every exemplar and the synthesized sequence are scaled by the same
//! per-level ratio, so the output/exemplar length ratio is constant across
//! the pyramid. Levels too short to hold a single patch are dropped.

use crate::config::SynthesisConfig;
use crate::error::{Result, SynthesisError};

/// Frame counts of one pyramid level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyramidLevel {
    /// Length of each exemplar at this level.
    pub exemplar_lengths: Vec<usize>,
    /// Length of the synthesized candidate at this level.
    pub synthesized_length: usize,
}

/// Ordered levels, coarsest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyramidPlan {
    levels: Vec<PyramidLevel>,
}

/// Reference lengths from coarse to `final_len`, the last one exact.
fn reference_lengths(final_len: usize, coarse_ratio: f64, pyr_factor: f64) -> Vec<usize> {
    let mut lengths = vec![(final_len as f64 * coarse_ratio).round() as usize];
    while let Some(&last) = lengths.last() {
        if last >= final_len {
            break;
        }
        let mut next = (last as f64 / pyr_factor).round() as usize;
        if next == last {
            next += 1;
        }
        lengths.push(next);
    }
    if let Some(last) = lengths.last_mut() {
        *last = final_len;
    }
    lengths
}

fn scale_length(len: usize, level: usize, reference: usize) -> usize {
    (len as f64 * level as f64 / reference as f64).round() as usize
}

impl PyramidPlan {
    /// Plan the levels for the given exemplars and requested length.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no exemplars, the requested length is
    /// zero, the configuration is invalid, or no level can hold a patch.
    pub fn build(exemplar_lengths: &[usize], num_frames: usize, config: &SynthesisConfig) -> Result<Self> {
        config.validate()?;
        let reference = exemplar_lengths.iter().copied().max().unwrap_or(0);
        if reference == 0 {
            return Err(SynthesisError::invalid_input("at least one non-empty exemplar is required"));
        }
        if num_frames == 0 {
            return Err(SynthesisError::invalid_config("num_frames must be positive"));
        }

        let p = config.patch_size;
        let ratio = config.coarse_ratio.resolve(p, reference);
        let refs = reference_lengths(reference, ratio, config.pyr_factor);
        let last = refs.len() - 1;

        let mut levels: Vec<PyramidLevel> = refs
            .iter()
            .enumerate()
            .map(|(k, &l)| {
                if k == last {
                    PyramidLevel {
                        exemplar_lengths: exemplar_lengths.to_vec(),
                        synthesized_length: num_frames,
                    }
                } else {
                    PyramidLevel {
                        exemplar_lengths: exemplar_lengths
                            .iter()
                            .map(|&e| scale_length(e, l, reference))
                            .collect(),
                        synthesized_length: scale_length(num_frames, l, reference),
                    }
                }
            })
            .filter(|level| level.synthesized_length >= p && level.exemplar_lengths.iter().all(|&e| e >= p))
            .collect();

        if levels.is_empty() {
            let shortest = exemplar_lengths.iter().copied().min().unwrap_or(0).min(num_frames);
            return Err(SynthesisError::sequence_too_short(p, shortest));
        }

        if let Some(limit) = config.num_stages_limit {
            if levels.len() > limit {
                levels.drain(..levels.len() - limit);
            }
        }

        Ok(Self { levels })
    }

    #[must_use]
    pub fn levels(&self) -> &[PyramidLevel] {
        &self.levels
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Coarsest level.
    #[must_use]
    pub fn coarsest(&self) -> Option<&PyramidLevel> {
        self.levels.first()
    }

    /// Finest level (the requested output length).
    #[must_use]
    pub fn finest(&self) -> Option<&PyramidLevel> {
        self.levels.last()
    }
}
