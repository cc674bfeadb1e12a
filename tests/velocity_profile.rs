//! Velocity profile constraint and loss behaviour.
//!
//! These tests cover the curve shapes, the multiplicative constraint on
//! velocity-encoded root channels and the shape-matching loss.

use approx::assert_relative_eq;
use motion_synthesis::{
    horizontal_speed, ProfileType, SynthesisError, VelocityProfileConfig, VelocityProfileConstraint,
    VelocityProfileLoss,
};
use nalgebra::DMatrix;

// =============================================================================
// MOTION GENERATORS
// =============================================================================

/// Joint channels plus root velocity channels with a uniform horizontal step.
fn generate_uniform_walk(channels: usize, frames: usize, vx: f64, vz: f64) -> DMatrix<f64> {
    DMatrix::from_fn(channels, frames, |r, c| {
        if r == channels - 3 {
            vx
        } else if r == channels - 2 {
            0.5
        } else if r == channels - 1 {
            vz
        } else {
            (c as f64 * 0.37 + r as f64).cos()
        }
    })
}

/// Root velocity channels following a slowing stride.
fn generate_slowing_walk(frames: usize) -> DMatrix<f64> {
    DMatrix::from_fn(6, frames, |r, c| {
        let t = c as f64 / (frames - 1) as f64;
        match r {
            3 => 0.8 * (1.0 - 0.7 * t),
            4 => 0.9,
            5 => 0.6 * (1.0 - 0.7 * t),
            _ => (c as f64 * 0.2).sin(),
        }
    })
}

// =============================================================================
// PROFILE CURVES
// =============================================================================

#[test]
fn test_constant_profile_is_flat_for_any_length() {
    for frames in [1, 2, 7, 100] {
        let c = VelocityProfileConstraint::new(frames, ProfileType::Constant, 1.7, 0.0).unwrap();
        assert_eq!(c.target_speeds().len(), frames);
        assert!(c.target_speeds().iter().all(|&v| v == 1.7));
    }
}

#[test]
fn test_linear_decel_monotonic() {
    let c = VelocityProfileConstraint::new(100, ProfileType::LinearDecel, 2.0, 0.0).unwrap();
    let speeds = c.target_speeds();
    assert_relative_eq!(speeds[0], 2.0, epsilon = 1e-12);
    assert_relative_eq!(speeds[99], 0.0, epsilon = 1e-12);
    assert!(speeds.windows(2).all(|w| w[0] > w[1]));
}

#[test]
fn test_accel_profiles_increase() {
    for p in [ProfileType::LinearAccel, ProfileType::SmoothAccel, ProfileType::EaseInOut] {
        let c = VelocityProfileConstraint::new(30, p, 0.5, 1.5).unwrap();
        assert!(c.target_speeds().windows(2).all(|w| w[0] < w[1]), "{p}");
    }
}

#[test]
fn test_smooth_decel_front_loaded() {
    // Slows fastest at the start: below the linear ramp everywhere inside
    let smooth = VelocityProfileConstraint::new(21, ProfileType::SmoothDecel, 2.0, 0.0).unwrap();
    let linear = VelocityProfileConstraint::new(21, ProfileType::LinearDecel, 2.0, 0.0).unwrap();
    for f in 1..20 {
        assert!(smooth.target_at(f) < linear.target_at(f));
    }
}

#[test]
fn test_invalid_profile_type_lists_valid_types() {
    let err = VelocityProfileConstraint::from_name(100, "invalid_type", 1.0, 0.0).unwrap_err();
    assert!(matches!(err, SynthesisError::UnknownProfileType { .. }));
    assert!(err.is_config_error());

    let msg = err.to_string();
    assert!(msg.contains("invalid_type"));
    for p in ProfileType::ALL {
        assert!(msg.contains(p.name()), "missing {p}");
    }
}

// =============================================================================
// APPLY CONSTRAINT
// =============================================================================

#[test]
fn test_unit_multiplier_keeps_speed() {
    let c = VelocityProfileConstraint::new(40, ProfileType::Constant, 1.0, 1.0).unwrap();
    let motion = generate_slowing_walk(40);
    let out = c.apply_constraint(&motion, true);
    for (a, b) in horizontal_speed(&out).iter().zip(horizontal_speed(&motion).iter()) {
        assert!((a - b).abs() < 1e-6);
    }
}

#[test]
fn test_relative_scaling_multiplies_uniform_speed() {
    let c = VelocityProfileConstraint::new(25, ProfileType::Constant, 2.0, 2.0).unwrap();
    let motion = generate_uniform_walk(9, 25, 0.3, 0.4);
    let out = c.apply_constraint(&motion, true);
    for s in horizontal_speed(&out) {
        assert_relative_eq!(s, 1.0, epsilon = 1e-12);
    }
}

#[test]
fn test_decel_constraint_reaches_zero() {
    let c = VelocityProfileConstraint::new(10, ProfileType::LinearDecel, 1.0, 0.0).unwrap();
    let motion = generate_uniform_walk(99, 10, 1.0, 0.5);
    let out = c.apply_constraint(&motion, true);
    let speed = horizontal_speed(&out);
    assert_relative_eq!(speed[0], 1.25f64.sqrt(), epsilon = 1e-12);
    assert!(speed[9] < 1e-12);
    // Vertical channel untouched
    assert!(out.row(97).iter().all(|&y| y == 0.5));
}

#[test]
fn test_constraint_interpolates_to_level_length() {
    let c = VelocityProfileConstraint::new(100, ProfileType::LinearDecel, 1.0, 0.0).unwrap();
    let coarse = generate_uniform_walk(6, 11, 1.0, 0.0);
    let out = c.apply_constraint(&coarse, true);
    for f in 0..11 {
        assert_relative_eq!(out[(3, f)], 1.0 - f as f64 / 10.0, epsilon = 1e-9);
    }
}

#[test]
fn test_position_encoding_is_left_alone() {
    let c = VelocityProfileConstraint::new(10, ProfileType::SmoothAccel, 0.0, 3.0).unwrap();
    let motion = generate_uniform_walk(6, 10, 1.0, 1.0);
    assert_eq!(c.apply_constraint(&motion, false), motion);
}

// =============================================================================
// SPEED RANGE
// =============================================================================

#[test]
fn test_speed_range_tolerance() {
    let c = VelocityProfileConstraint::new(100, ProfileType::LinearDecel, 2.0, 0.0).unwrap();
    let (lo, hi) = c.get_speed_range(0, 0.2);
    assert_relative_eq!(lo, 1.6, epsilon = 1e-12);
    assert_relative_eq!(hi, 2.4, epsilon = 1e-12);

    let (lo, hi) = c.get_speed_range(99, 0.2);
    assert_eq!(lo, 0.0);
    assert_relative_eq!(hi, 0.0, epsilon = 1e-12);

    // Frames past the end clamp to the last one
    assert_eq!(c.get_speed_range(500, 0.2), c.get_speed_range(99, 0.2));
}

#[test]
fn test_speed_range_lower_bound_never_negative() {
    let c = VelocityProfileConstraint::new(10, ProfileType::Constant, 0.0, 0.0).unwrap();
    for f in 0..10 {
        let (lo, _) = c.get_speed_range(f, 1.5);
        assert!(lo >= 0.0);
    }
}

// =============================================================================
// LOSS
// =============================================================================

#[test]
fn test_loss_zero_cases() {
    let c = VelocityProfileConstraint::new(20, ProfileType::LinearDecel, 2.0, 0.0).unwrap();
    let moving = generate_slowing_walk(20);
    let still = generate_uniform_walk(6, 20, 0.0, 0.0);

    assert_eq!(VelocityProfileLoss::new(Some(c.clone()), 1.0).forward(&moving, false), 0.0);
    assert_eq!(VelocityProfileLoss::new(None, 1.0).forward(&moving, true), 0.0);
    assert_eq!(VelocityProfileLoss::new(Some(c), 1.0).forward(&still, true), 0.0);
}

#[test]
fn test_loss_prefers_matching_shape() {
    let c = VelocityProfileConstraint::new(30, ProfileType::LinearDecel, 1.0, 0.3).unwrap();
    let loss = VelocityProfileLoss::new(Some(c), 1.0);
    let slowing = generate_slowing_walk(30);
    let uniform = generate_uniform_walk(6, 30, 0.8, 0.6);
    assert!(loss.forward(&slowing, true) < 1e-9);
    assert!(loss.forward(&uniform, true) > 1e-3);
}

#[test]
fn test_loss_scales_with_weight() {
    let c = VelocityProfileConstraint::new(30, ProfileType::SmoothDecel, 1.5, 0.2).unwrap();
    let motion = generate_uniform_walk(6, 30, 0.2, 0.1);
    let light = VelocityProfileLoss::new(Some(c.clone()), 0.1).forward(&motion, true);
    let heavy = VelocityProfileLoss::new(Some(c), 1.0).forward(&motion, true);
    assert_relative_eq!(heavy, light * 10.0, max_relative = 1e-12);
}

#[test]
fn test_gradient_descent_reduces_loss() {
    let c = VelocityProfileConstraint::new(30, ProfileType::LinearDecel, 2.0, 0.5).unwrap();
    let loss = VelocityProfileLoss::new(Some(c), 1.0);
    let mut motion = generate_uniform_walk(6, 30, 0.3, 0.2);

    let before = loss.forward(&motion, true);
    for _ in 0..20 {
        let grad = loss.gradient(&motion, true);
        motion -= grad * 0.01;
    }
    assert!(loss.forward(&motion, true) < before);
}

// =============================================================================
// ARGUMENT PARSING
// =============================================================================

#[test]
fn test_config_from_args() {
    assert_eq!(VelocityProfileConfig::from_args(None, None, None, None).unwrap(), None);

    let cfg = VelocityProfileConfig::from_args(Some("ease_in_out"), Some(0.5), Some(1.5), Some(0.3))
        .unwrap()
        .unwrap();
    assert_eq!(cfg.profile_type, ProfileType::EaseInOut);
    let c = cfg.build(50).unwrap();
    assert_relative_eq!(c.target_at(0), 0.5);
    assert_relative_eq!(c.target_at(49), 1.5, epsilon = 1e-12);
}

#[test]
fn test_display_format() {
    let c = VelocityProfileConstraint::new(100, ProfileType::LinearDecel, 2.0, 0.0).unwrap();
    assert_eq!(
        c.to_string(),
        "VelocityProfileConstraint(frames=100, type='linear_decel', start=2.00, end=0.00)"
    );
}
