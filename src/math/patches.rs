//! Patch geometry over frame-major motion matrices.
//!
//! A patch is `patch_size` consecutive frames across all channels. Patch
//! dot products are assembled from the frame gram matrix `Xᵀ·Y` by summing
//! along its diagonals, so a full candidate-by-exemplar distance table costs
//! one matrix product plus one pass over the table.

use nalgebra::DMatrix;

/// Number of patch start positions in a sequence of `frames` frames.
///
/// With `wrap` every frame starts a patch (indices are taken modulo the
/// length); otherwise only fully contained windows count.
#[must_use]
pub const fn patch_count(frames: usize, patch_size: usize, wrap: bool) -> usize {
    if patch_size == 0 || frames < patch_size {
        0
    } else if wrap {
        frames
    } else {
        frames - patch_size + 1
    }
}

/// Frame index of offset `k` inside the patch starting at `start`.
#[inline]
#[must_use]
pub const fn frame_at(start: usize, k: usize, frames: usize, wrap: bool) -> usize {
    if wrap {
        (start + k) % frames
    } else {
        start + k
    }
}

/// Squared norm of every frame (column).
#[must_use]
pub fn frame_sq_norms(motion: &DMatrix<f64>) -> Vec<f64> {
    motion.column_iter().map(|c| c.norm_squared()).collect()
}

/// Per-patch sums of a per-frame quantity.
#[must_use]
pub fn window_sums(per_frame: &[f64], patch_size: usize, wrap: bool) -> Vec<f64> {
    let frames = per_frame.len();
    let count = patch_count(frames, patch_size, wrap);
    if count == 0 {
        return Vec::new();
    }

    let mut sums = Vec::with_capacity(count);
    let mut acc: f64 = per_frame[..patch_size].iter().sum();
    sums.push(acc);
    for start in 1..count {
        acc += per_frame[frame_at(start - 1, patch_size, frames, wrap)] - per_frame[start - 1];
        sums.push(acc);
    }
    sums
}

/// Patch-by-patch inner products between two motions.
///
/// Entry `(i, j)` is the inner product of candidate patch `i` with exemplar
/// patch `j`. The first row and column are summed directly; every other entry
/// reuses its upper-left neighbour by dropping one gram entry and adding one.
#[must_use]
pub fn patch_dot_products(
    candidate: &DMatrix<f64>,
    exemplar: &DMatrix<f64>,
    patch_size: usize,
    wrap: bool,
) -> DMatrix<f64> {
    let (nx, ny) = (candidate.ncols(), exemplar.ncols());
    let rows = patch_count(nx, patch_size, wrap);
    let cols = patch_count(ny, patch_size, wrap);
    let mut dots = DMatrix::zeros(rows, cols);
    if rows == 0 || cols == 0 {
        return dots;
    }

    let gram = candidate.transpose() * exemplar;
    let direct = |i: usize, j: usize| -> f64 {
        (0..patch_size)
            .map(|k| gram[(frame_at(i, k, nx, wrap), frame_at(j, k, ny, wrap))])
            .sum()
    };

    for j in 0..cols {
        dots[(0, j)] = direct(0, j);
    }
    for i in 1..rows {
        dots[(i, 0)] = direct(i, 0);
    }
    for i in 1..rows {
        for j in 1..cols {
            dots[(i, j)] = dots[(i - 1, j - 1)] - gram[(i - 1, j - 1)]
                + gram[(
                    frame_at(i - 1, patch_size, nx, wrap),
                    frame_at(j - 1, patch_size, ny, wrap),
                )];
        }
    }

    dots
}
