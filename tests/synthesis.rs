//! End-to-end synthesis tests.
//!
//! These tests run the full pyramid on small synthetic clips and check the
//! output contract: length, layout, keyframes, determinism and the effect of
//! the velocity profile.

use approx::assert_relative_eq;
use motion_synthesis::{
    horizontal_speed, CoarseRatio, FrameCount, GenMM, KeyframeRange, KeyframeSet, MotionSequence,
    ProfileType, RootEncoding, SynthesisConfig, SynthesisError, SynthesisRequest,
    VelocityProfileConfig,
};
use nalgebra::DMatrix;
use std::f64::consts::PI;

// =============================================================================
// MOTION GENERATORS
// =============================================================================

/// Periodic gait: joint channels oscillate, root moves forward steadily.
fn generate_gait(frames: usize, joints: usize, period: f64) -> MotionSequence {
    let channels = joints + 3;
    let data = DMatrix::from_fn(channels, frames, |r, c| {
        let phase = 2.0 * PI * c as f64 / period;
        if r == channels - 3 {
            0.05 + 0.01 * phase.sin()
        } else if r == channels - 2 {
            0.9 + 0.03 * (2.0 * phase).cos()
        } else if r == channels - 1 {
            0.02 + 0.005 * phase.cos()
        } else {
            (phase + r as f64 * 0.6).sin() * (1.0 + 0.1 * r as f64)
        }
    });
    MotionSequence::new(data, RootEncoding::Velocity, 1.0 / 30.0).unwrap()
}

/// Same gait stored with absolute root positions.
fn generate_gait_positions(frames: usize) -> MotionSequence {
    generate_gait(frames, 4, 16.0).to_position()
}

fn config(patch_size: usize, seed: u64) -> SynthesisConfig {
    SynthesisConfig::default()
        .with_patch_size(patch_size)
        .with_seed(seed)
}

fn synthesize(
    exemplars: &[MotionSequence],
    config: SynthesisConfig,
    request: SynthesisRequest,
) -> motion_synthesis::Synthesis {
    GenMM::new(config)
        .unwrap()
        .silent(true)
        .run(exemplars, request)
        .unwrap()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

// =============================================================================
// OUTPUT CONTRACT
// =============================================================================

#[test]
fn test_doubles_exemplar_length() {
    let exemplar = generate_gait(50, 6, 20.0);
    let out = synthesize(&[exemplar.clone()], config(5, 1), SynthesisRequest::new(100));

    assert_eq!(out.motion.n_frames(), 100);
    assert_eq!(out.motion.n_channels(), exemplar.n_channels());
    assert_eq!(out.motion.encoding(), exemplar.encoding());
    assert_relative_eq!(out.motion.frame_time(), exemplar.frame_time());
    assert!(out.motion.data().iter().all(|v| v.is_finite()));
}

#[test]
fn test_keyframe_prefix_matches_exemplar() {
    let exemplar = generate_gait(50, 6, 20.0);
    let request = SynthesisRequest::new(100).with_keyframes(KeyframeSet::from(0..5));
    let out = synthesize(&[exemplar.clone()], config(5, 2), request);

    for c in 0..5 {
        assert_eq!(out.motion.data().column(c), exemplar.data().column(c));
    }
}

#[test]
fn test_keyframe_suffix_matches_exemplar_tail() {
    let exemplar = generate_gait(40, 4, 16.0);
    let request = SynthesisRequest::new(70).with_keyframes(KeyframeSet::new(vec![
        KeyframeRange::first(4),
        KeyframeRange::last(6),
    ]));
    let out = synthesize(&[exemplar.clone()], config(5, 3), request);

    for k in 0..6 {
        assert_eq!(out.motion.data().column(64 + k), exemplar.data().column(34 + k));
    }
    for c in 0..4 {
        assert_eq!(out.motion.data().column(c), exemplar.data().column(c));
    }
}

#[test]
fn test_multiple_length_notation() {
    let exemplar = generate_gait(30, 3, 10.0);
    let frames: FrameCount = "1.5x".parse().unwrap();
    let out = synthesize(&[exemplar], config(5, 4), SynthesisRequest::new(frames));
    assert_eq!(out.motion.n_frames(), 45);
}

#[test]
fn test_shorter_than_exemplar() {
    let exemplar = generate_gait(60, 3, 12.0);
    let out = synthesize(&[exemplar], config(5, 5), SynthesisRequest::new(25));
    assert_eq!(out.motion.n_frames(), 25);
}

#[test]
fn test_multiple_exemplars() {
    let a = generate_gait(40, 4, 16.0);
    let b = generate_gait(30, 4, 10.0);
    let out = synthesize(&[a, b], config(5, 6), SynthesisRequest::new(60));
    assert_eq!(out.motion.n_frames(), 60);
    assert_eq!(out.report.levels.last().unwrap().exemplar_lengths, vec![40, 30]);
}

// =============================================================================
// DETERMINISM & CONVERGENCE
// =============================================================================

#[test]
fn test_same_seed_same_output() {
    let exemplar = generate_gait(40, 4, 16.0);
    let a = synthesize(&[exemplar.clone()], config(5, 99), SynthesisRequest::new(60));
    let b = synthesize(&[exemplar.clone()], config(5, 99), SynthesisRequest::new(60));
    let c = synthesize(&[exemplar], config(5, 100), SynthesisRequest::new(60));

    assert_eq!(a.motion.data(), b.motion.data());
    assert_eq!(a.report, b.report);
    assert_ne!(a.motion.data(), c.motion.data());
}

#[test]
fn test_output_stays_in_exemplar_range() {
    // Blends are convex combinations of exemplar frames
    let exemplar = generate_gait(48, 5, 12.0);
    let out = synthesize(&[exemplar.clone()], config(7, 8), SynthesisRequest::new(96));

    for r in 0..exemplar.n_channels() {
        let row = exemplar.data().row(r);
        let (lo, hi) = (row.min() - 1e-9, row.max() + 1e-9);
        assert!(out.motion.data().row(r).iter().all(|&v| v >= lo && v <= hi));
    }
}

#[test]
fn test_loss_decreases_across_pyramid() {
    let exemplar = generate_gait(50, 4, 25.0);
    let cfg = config(5, 9).with_num_steps(5);
    let out = synthesize(&[exemplar], cfg, SynthesisRequest::new(80));

    let first_level = out.report.levels.first().unwrap().steps[0].total;
    let final_loss = out.report.final_loss().unwrap();
    assert!(final_loss < first_level);
}

#[test]
fn test_stage_limit_and_coarse_ratio() {
    let exemplar = generate_gait(60, 3, 15.0);
    let cfg = config(5, 10)
        .with_coarse_ratio(CoarseRatio::PatchFactor(4.0))
        .with_num_stages_limit(Some(2));
    let out = synthesize(&[exemplar], cfg, SynthesisRequest::new(90));
    assert_eq!(out.report.levels.len(), 2);
    assert_eq!(out.report.levels[1].synthesized_length, 90);
}

// =============================================================================
// LOOP MODE
// =============================================================================

#[test]
fn test_loop_mode() {
    let exemplar = generate_gait(32, 4, 16.0);
    let cfg = config(6, 11).with_loop(true);
    let out = synthesize(&[exemplar], cfg, SynthesisRequest::new(64));
    assert_eq!(out.motion.n_frames(), 64);
    assert!(out.motion.data().iter().all(|v| v.is_finite()));
}

// =============================================================================
// VELOCITY PROFILE
// =============================================================================

#[test]
fn test_velocity_profile_slows_the_end() {
    let exemplar = generate_gait(50, 4, 10.0);
    let profile = VelocityProfileConfig::new(ProfileType::LinearDecel, 1.0, 0.1).with_loss_weight(1.0);
    let request = SynthesisRequest::new(100).with_velocity_profile(profile);
    let out = synthesize(&[exemplar], config(5, 12).with_noise_sigma(0.1), request);

    let speed = horizontal_speed(out.motion.data());
    let head = mean(&speed[..25]);
    let tail = mean(&speed[75..]);
    assert!(tail < head, "head {head}, tail {tail}");
    assert!(out.report.levels.iter().any(|l| l.steps.iter().any(|s| s.velocity > 0.0)));
}

#[test]
fn test_heavy_velocity_weight_keeps_walking_forward() {
    let exemplar = generate_gait(50, 4, 10.0);
    let vx_row = exemplar.n_channels() - 3;
    assert!(exemplar.data().row(vx_row).iter().all(|&vx| vx > 0.0));

    for weight in [3.0, 10.0] {
        let profile = VelocityProfileConfig::new(ProfileType::LinearDecel, 1.0, 0.1).with_loss_weight(weight);
        let request = SynthesisRequest::new(100).with_velocity_profile(profile);
        let out = synthesize(&[exemplar.clone()], config(5, 17).with_noise_sigma(0.1), request);

        let backwards = out.motion.data().row(vx_row).iter().filter(|&&vx| vx < 0.0).count();
        assert_eq!(backwards, 0, "weight {weight}");
    }
}

#[test]
fn test_velocity_profile_with_position_encoding() {
    let exemplar = generate_gait_positions(40);
    let profile = VelocityProfileConfig::new(ProfileType::SmoothDecel, 1.0, 0.0);
    let request = SynthesisRequest::new(60).with_velocity_profile(profile);
    let out = synthesize(&[exemplar], config(5, 13), request);

    assert_eq!(out.motion.encoding(), RootEncoding::Position);
    assert!(!out.report.use_velo);
}

// =============================================================================
// ERRORS & DEBUG OUTPUT
// =============================================================================

#[test]
fn test_configuration_errors() {
    let exemplar = generate_gait(40, 4, 16.0);
    let genmm = GenMM::new(config(5, 14)).unwrap().silent(true);

    let out_of_range = SynthesisRequest::new(30).with_keyframes(KeyframeSet::from(25..35));
    assert!(matches!(
        genmm.run(&[exemplar.clone()], out_of_range),
        Err(SynthesisError::KeyframeOutOfRange { .. })
    ));

    let too_short = MotionSequence::new(DMatrix::zeros(6, 3), RootEncoding::Velocity, 0.03).unwrap();
    assert!(matches!(
        genmm.run(&[too_short], SynthesisRequest::new(30)),
        Err(SynthesisError::SequenceTooShort { .. })
    ));

    assert!(GenMM::new(config(5, 14).with_pyr_factor(1.2)).is_err());
}

#[test]
fn test_debug_dir_traces() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();

    let dir = std::env::temp_dir().join(format!("motion_synthesis_trace_{}", std::process::id()));
    let exemplar = generate_gait(40, 4, 16.0);
    let request = SynthesisRequest::new(50).with_debug_dir(&dir);
    let out = synthesize(&[exemplar], config(5, 15), request);

    for level in &out.report.levels {
        let path = dir.join(format!("level_{:02}.csv", level.index));
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("step,patch_loss,velocity_loss,total_loss"));
        assert_eq!(lines.count(), level.steps.len());
    }
    std::fs::remove_dir_all(&dir).unwrap();
}

#[cfg(feature = "serde")]
#[test]
fn test_report_serializes() {
    let exemplar = generate_gait(40, 4, 16.0);
    let out = synthesize(&[exemplar], config(5, 16), SynthesisRequest::new(40));

    let json = serde_json::to_string(&out.report).unwrap();
    let back: motion_synthesis::SynthesisReport = serde_json::from_str(&json).unwrap();
    assert_eq!(back.levels.len(), out.report.levels.len());
    assert_eq!(back.num_frames, 40);
}
