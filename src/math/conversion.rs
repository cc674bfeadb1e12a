//! Root channel encoding conversion.
//!
//! A motion matrix holds one column per frame and one row per channel. The
//! last three rows are the root's horizontal X, vertical Y and horizontal Z.
//! In velocity encoding the horizontal rows store per-frame deltas, except
//! frame 0 which stores the absolute position of frame 1:
//!
//! ```text
//! velo[0] = pos[1]
//! velo[i] = pos[i] - pos[i - 1]    (i > 0)
//! ```
//!
//! Reconstruction discards `velo[0]` and starts from the origin, so
//! `to_position(to_velocity(p)) == p` whenever `p[0] == 0` on the horizontal
//! rows. Callers with a non-zero world origin add it back separately.

use nalgebra::DMatrix;

/// Row indices of the root's (horizontal X, vertical Y, horizontal Z) channels.
///
/// `None` when there are fewer than three channels; the conversions below
/// then leave their input unchanged.
#[must_use]
pub fn root_channels(n_channels: usize) -> Option<(usize, usize, usize)> {
    let x = n_channels.checked_sub(3)?;
    Some((x, x + 1, x + 2))
}

/// Convert velocity-encoded root channels to positions.
///
/// Horizontal rows are cumulatively summed after zeroing frame 0; the vertical
/// row and every non-root row pass through unchanged.
#[must_use]
pub fn to_position(motion: &DMatrix<f64>) -> DMatrix<f64> {
    let mut result = motion.clone();
    let Some((x, _, z)) = root_channels(motion.nrows()) else {
        return result;
    };

    for row in [x, z] {
        let mut acc = 0.0;
        for frame in 0..motion.ncols() {
            if frame > 0 {
                acc += motion[(row, frame)];
            }
            result[(row, frame)] = acc;
        }
    }

    result
}

/// Convert position-encoded root channels to velocities.
///
/// Frame 0 of each horizontal row receives the position at frame 1. A
/// single-frame motion has no frame 1, so its frame 0 becomes zero.
#[must_use]
pub fn to_velocity(motion: &DMatrix<f64>) -> DMatrix<f64> {
    let mut result = motion.clone();
    let Some((x, _, z)) = root_channels(motion.nrows()) else {
        return result;
    };
    let n = motion.ncols();

    for row in [x, z] {
        if n == 0 {
            continue;
        }
        result[(row, 0)] = if n > 1 { motion[(row, 1)] } else { 0.0 };
        for frame in 1..n {
            result[(row, frame)] = motion[(row, frame)] - motion[(row, frame - 1)];
        }
    }

    result
}

/// Shift a position-encoded root trajectory so its last frame lands on `target`.
///
/// The offset ramps linearly from zero at `fixed_head` to full strength at
/// `frames - fixed_tail`; the tail frames receive the full offset. Nothing
/// happens when the ramp region is empty.
pub fn align_final_position(
    motion: &mut DMatrix<f64>,
    target: [f64; 3],
    fixed_head: usize,
    fixed_tail: usize,
) {
    let n = motion.ncols();
    if n == 0 {
        return;
    }

    let Some((x, y, z)) = root_channels(motion.nrows()) else {
        return;
    };
    let rows = [x, y, z];
    let offset = [
        target[0] - motion[(x, n - 1)],
        target[1] - motion[(y, n - 1)],
        target[2] - motion[(z, n - 1)],
    ];

    let start = fixed_head;
    let end = n.saturating_sub(fixed_tail);
    if end <= start {
        return;
    }

    let span = (end - start) as f64;
    for frame in start..n {
        let weight = if frame < end {
            (frame - start) as f64 / span
        } else {
            1.0
        };
        for (row, delta) in rows.iter().zip(offset.iter()) {
            motion[(*row, frame)] += delta * weight;
        }
    }
}
