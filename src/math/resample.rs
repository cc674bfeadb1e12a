//! Linear resampling along the frame axis.
//!
//! Two sampling grids are supported. With `align_corners` the first and last
//! samples of input and output coincide; without it samples sit at pixel
//! centres and edge samples clamp, which is the grid used to move between
//! pyramid levels.

use nalgebra::DMatrix;

/// `n` evenly spaced values covering `[0, 1]`; a single sample is `0.0`.
#[must_use]
pub fn linspace(n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => {
            let step = 1.0 / (n - 1) as f64;
            (0..n).map(|i| i as f64 * step).collect()
        }
    }
}

/// Source position and blend weight for output sample `i`.
fn source_coordinate(i: usize, in_len: usize, out_len: usize, align_corners: bool) -> (usize, usize, f64) {
    let src = if align_corners {
        if out_len > 1 {
            i as f64 * (in_len - 1) as f64 / (out_len - 1) as f64
        } else {
            0.0
        }
    } else {
        let scale = in_len as f64 / out_len as f64;
        ((i as f64 + 0.5) * scale - 0.5).max(0.0)
    };

    let i0 = (src.floor() as usize).min(in_len - 1);
    let i1 = (i0 + 1).min(in_len - 1);
    let lambda = if i1 == i0 { 0.0 } else { src - i0 as f64 };
    (i0, i1, lambda)
}

/// Resample a 1-D curve to `out_len` samples.
#[must_use]
pub fn resample_curve(values: &[f64], out_len: usize, align_corners: bool) -> Vec<f64> {
    if values.is_empty() || out_len == 0 {
        return Vec::new();
    }
    if values.len() == out_len {
        return values.to_vec();
    }

    (0..out_len)
        .map(|i| {
            let (i0, i1, lambda) = source_coordinate(i, values.len(), out_len, align_corners);
            values[i0] * (1.0 - lambda) + values[i1] * lambda
        })
        .collect()
}

/// Resample every channel of a motion matrix to `out_frames` columns.
#[must_use]
pub fn resample_frames(motion: &DMatrix<f64>, out_frames: usize, align_corners: bool) -> DMatrix<f64> {
    let in_frames = motion.ncols();
    if in_frames == out_frames {
        return motion.clone();
    }
    if in_frames == 0 || out_frames == 0 {
        return DMatrix::zeros(motion.nrows(), out_frames);
    }

    let mut out = DMatrix::zeros(motion.nrows(), out_frames);
    for i in 0..out_frames {
        let (i0, i1, lambda) = source_coordinate(i, in_frames, out_frames, align_corners);
        let column = motion.column(i0) * (1.0 - lambda) + motion.column(i1) * lambda;
        out.set_column(i, &column);
    }
    out
}

/// Concatenate motions along the frame axis.
///
/// All inputs must share a channel count.
#[must_use]
pub fn concat_frames(motions: &[&DMatrix<f64>]) -> DMatrix<f64> {
    let rows = motions.first().map_or(0, |m| m.nrows());
    let total: usize = motions.iter().map(|m| m.ncols()).sum();

    let mut out = DMatrix::zeros(rows, total);
    let mut offset = 0;
    for m in motions {
        out.columns_mut(offset, m.ncols()).copy_from(*m);
        offset += m.ncols();
    }
    out
}
