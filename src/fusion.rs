//! 3DoF orientation fusion.
//!
//! Gyroscope samples are integrated into an orientation quaternion. When
//! the device has been still and level for a whole gravity trust window,
//! the mean accelerometer direction is compared against world up and the
//! tilt error is bled off slowly, faster while the device is rotating.

use crate::config::FilterConfig;
use crate::fifo::TimedFifo;
use glam::{Quat, Vec3};
use std::f32::consts::PI;

/// Standard gravity in m/s².
pub const STANDARD_GRAVITY: f32 = 9.80665;

/// An accelerometer at rest reads +g along this world axis.
pub const WORLD_UP: Vec3 = Vec3::Y;

const NS_PER_S: f64 = 1_000_000_000.0;

/// Accel magnitudes further than this from g are not gravity.
const GRAVITY_TOLERANCE: f32 = 0.9;
/// Rotation rates at or above this (rad/s) mean the device is moving.
const GYRO_TOLERANCE: f32 = 0.1;
/// Measured tilt below this is treated as noise.
const TILT_NOISE_FLOOR: f32 = 0.01;
/// Outstanding tilt error below this is left alone.
const TILT_DEADBAND: f32 = 0.05;
/// Gyro magnitudes below this are not integrated.
const MIN_GYRO_LENGTH: f32 = 0.0001;

/// What [`OrientationFilter::update`] did with a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// First sample after init or reset; only its timestamp was kept.
    Bootstrapped,
    /// Orientation was advanced.
    Integrated,
    /// Sample dropped: non-finite input or an implausible time step.
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Bootstrap,
    Running,
}

#[derive(Debug, Clone, Copy, Default)]
struct LastSample {
    timestamp_ns: u64,
    accel: Vec3,
    gyro: Vec3,
    delta_ms: f32,
}

#[derive(Debug, Clone, Copy)]
struct Gravity {
    /// Last time the device was seen accelerating or rotating.
    level_timestamp_ns: u64,
    error_axis: Vec3,
    error_angle: f32,
}

impl Default for Gravity {
    fn default() -> Self {
        Self {
            level_timestamp_ns: 0,
            error_axis: Vec3::X,
            error_angle: 0.0,
        }
    }
}

/// Gyro-integrating orientation filter with gravity tilt correction.
#[derive(Debug, Clone)]
pub struct OrientationFilter {
    config: FilterConfig,
    phase: Phase,
    rot: Quat,
    angular_velocity: Vec3,
    last: LastSample,
    grav: Gravity,
    world_accel: TimedFifo,
    integrated: u64,
    /// Timestamp of a rejected sample that jumped past `max_step`.
    pending_jump_ns: Option<u64>,
}

impl OrientationFilter {
    pub fn new(config: FilterConfig) -> Self {
        let world_accel = TimedFifo::new(config.history_len);
        Self {
            config,
            phase: Phase::Bootstrap,
            rot: Quat::IDENTITY,
            angular_velocity: Vec3::ZERO,
            last: LastSample::default(),
            grav: Gravity::default(),
            world_accel,
            integrated: 0,
            pending_jump_ns: None,
        }
    }

    /// Back to identity with no timing history.
    pub fn reset(&mut self) {
        self.phase = Phase::Bootstrap;
        self.rot = Quat::IDENTITY;
        self.angular_velocity = Vec3::ZERO;
        self.last = LastSample::default();
        self.grav = Gravity::default();
        self.world_accel.clear();
        self.integrated = 0;
        self.pending_jump_ns = None;
    }

    /// Overwrite the orientation, e.g. with the last pose of another tracker.
    pub fn seed(&mut self, orientation: Quat) {
        if !orientation.is_finite() || orientation.length_squared() < 1e-12 {
            log::debug!("Ignoring degenerate seed orientation {:?}", orientation);
            return;
        }
        self.rot = orientation.normalize();
    }

    /// Feed one IMU sample stamped on the host clock.
    pub fn update(&mut self, timestamp_ns: u64, accel: Vec3, gyro: Vec3) -> UpdateOutcome {
        if !accel.is_finite() || !gyro.is_finite() {
            log::debug!("Skipping non-finite IMU sample accel={} gyro={}", accel, gyro);
            return UpdateOutcome::Rejected;
        }

        if self.phase == Phase::Bootstrap {
            self.phase = Phase::Running;
            self.last = LastSample {
                timestamp_ns,
                accel,
                gyro,
                delta_ms: 0.0,
            };
            self.grav.level_timestamp_ns = timestamp_ns;
            self.angular_velocity = gyro;
            return UpdateOutcome::Bootstrapped;
        }

        if timestamp_ns <= self.last.timestamp_ns {
            log::debug!(
                "Rejecting IMU sample with non-positive step ({} <= {})",
                timestamp_ns,
                self.last.timestamp_ns
            );
            return UpdateOutcome::Rejected;
        }

        let max_step_ns = self.config.max_step.as_nanos() as u64;
        let mut diff_ns = timestamp_ns - self.last.timestamp_ns;
        if diff_ns > max_step_ns {
            // A single jump is a glitch. The time base only moves once the
            // following sample lands shortly after the jump.
            match self.pending_jump_ns {
                Some(jump) if timestamp_ns > jump && timestamp_ns - jump <= max_step_ns => {
                    log::debug!(
                        "IMU time moved ahead by {:.3} ms, restarting integration",
                        (jump - self.last.timestamp_ns) as f64 / 1e6
                    );
                    self.last.timestamp_ns = jump;
                    self.grav.level_timestamp_ns = jump;
                    diff_ns = timestamp_ns - jump;
                }
                _ => {
                    log::debug!("Rejecting IMU step of {:.3} ms", diff_ns as f64 / 1e6);
                    self.pending_jump_ns = Some(timestamp_ns);
                    return UpdateOutcome::Rejected;
                }
            }
        }
        self.pending_jump_ns = None;

        let dt = diff_ns as f64 / NS_PER_S;
        let previous = self.rot;

        self.world_accel.push(self.rot * accel, timestamp_ns);

        let gyro_length = gyro.length();
        if gyro_length > MIN_GYRO_LENGTH {
            let axis = gyro / gyro_length;
            let delta = Quat::from_axis_angle(axis, gyro_length * dt as f32);
            // Gyro is measured in the device frame.
            self.rot = self.rot * delta;
        }

        self.gravity_correction(timestamp_ns, accel, dt, gyro_length);

        self.rot = self.rot.normalize();
        if !self.rot.is_finite() {
            log::debug!("Integration produced a non-finite orientation, dropping sample");
            self.rot = previous;
            return UpdateOutcome::Rejected;
        }

        self.last = LastSample {
            timestamp_ns,
            accel,
            gyro,
            delta_ms: (dt * 1000.0) as f32,
        };
        self.angular_velocity = gyro;
        self.integrated += 1;

        UpdateOutcome::Integrated
    }

    fn gravity_correction(&mut self, timestamp_ns: u64, accel: Vec3, dt: f64, gyro_length: f32) {
        let Some(window) = self.config.gravity_trust_window else {
            return;
        };
        let window_ns = window.as_nanos() as u64;

        let accel_length = accel.length();
        let is_accelerating = (accel_length - STANDARD_GRAVITY).abs() >= GRAVITY_TOLERANCE;
        let is_rotating = gyro_length >= GYRO_TOLERANCE;
        if is_accelerating || is_rotating {
            self.grav.level_timestamp_ns = timestamp_ns;
        }

        // Level for a full window: measure tilt from the mean world accel.
        if self.grav.level_timestamp_ns.saturating_add(window_ns) < timestamp_ns {
            self.grav.level_timestamp_ns = timestamp_ns;

            let (mean, count) = self
                .world_accel
                .mean(timestamp_ns.saturating_sub(window_ns), timestamp_ns);

            if count > 0 && (mean.length() - STANDARD_GRAVITY).abs() < GRAVITY_TOLERANCE {
                let tilt_angle = WORLD_UP.angle_between(mean);
                // Rotating about mean x up turns the measured up onto world up.
                let axis = mean.cross(WORLD_UP).normalize_or_zero();
                let axis = if axis == Vec3::ZERO { Vec3::X } else { axis };

                if tilt_angle > TILT_NOISE_FLOOR {
                    self.grav.error_angle = tilt_angle;
                    self.grav.error_axis = axis;
                }
            }
        }

        if self.grav.error_angle <= TILT_DEADBAND {
            return;
        }

        // 180° over 5 s while moving, 180° over 60 s while still.
        let max_radians = (PI as f64 * dt / 5.0) as f32;
        let min_radians = (PI as f64 * dt / 60.0) as f32;

        let mut correction = (0.5 * gyro_length * max_radians).clamp(min_radians, max_radians);
        correction *= gravity_weight(accel_length);
        let correction = correction.min(self.grav.error_angle);
        if correction <= 0.0 {
            return;
        }

        self.grav.error_angle -= correction;
        let corr = Quat::from_axis_angle(self.grav.error_axis, correction);
        self.rot = corr * self.rot;
    }

    pub fn orientation(&self) -> Quat {
        self.rot
    }

    /// Last raw gyro reading (device frame, rad/s).
    pub fn angular_velocity(&self) -> Vec3 {
        self.angular_velocity
    }

    /// Timestamp of the newest accepted sample, `None` before the first one.
    pub fn last_timestamp_ns(&self) -> Option<u64> {
        match self.phase {
            Phase::Bootstrap => None,
            Phase::Running => Some(self.last.timestamp_ns),
        }
    }

    /// Whether any sample has been integrated since init or reset.
    pub fn has_integrated(&self) -> bool {
        self.integrated > 0
    }

    pub fn integrated_samples(&self) -> u64 {
        self.integrated
    }

    pub fn last_delta_ms(&self) -> f32 {
        self.last.delta_ms
    }

    pub fn last_accel(&self) -> Vec3 {
        self.last.accel
    }

    /// Tilt error still waiting to be corrected, in radians.
    pub fn gravity_error_angle(&self) -> f32 {
        self.grav.error_angle
    }
}

/// 1 at exactly one g, falling to 0 at the edge of the gravity tolerance.
fn gravity_weight(accel_length: f32) -> f32 {
    (1.0 - (accel_length - STANDARD_GRAVITY).abs() / GRAVITY_TOLERANCE).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const MS: u64 = 1_000_000;

    fn no_gravity() -> FilterConfig {
        FilterConfig {
            gravity_trust_window: None,
            ..FilterConfig::default()
        }
    }

    /// Angle between two orientations, accurate for small angles.
    fn angle(a: Quat, b: Quat) -> f32 {
        let d = a.inverse() * b;
        2.0 * d.xyz().length().atan2(d.w.abs())
    }

    fn tilt_error(filter: &OrientationFilter, accel: Vec3) -> f32 {
        WORLD_UP.angle_between(filter.orientation() * accel)
    }

    #[test]
    fn test_first_sample_only_bootstraps() {
        let mut f = OrientationFilter::new(no_gravity());
        let out = f.update(5 * MS, Vec3::Y * 9.8, Vec3::new(0.0, 0.0, 3.0));
        assert_eq!(out, UpdateOutcome::Bootstrapped);
        assert_eq!(f.orientation(), Quat::IDENTITY);
        assert_eq!(f.last_timestamp_ns(), Some(5 * MS));
        assert!(!f.has_integrated());
    }

    #[test]
    fn test_integrates_gyro() {
        let mut f = OrientationFilter::new(no_gravity());
        let gyro = Vec3::new(0.0, 0.0, 1.0);
        for i in 0..=1000u64 {
            f.update(i * MS, Vec3::Y * 9.8, gyro);
        }
        let expected = Quat::from_rotation_z(1.0);
        assert!(angle(f.orientation(), expected) < 1e-3);
        assert_eq!(f.integrated_samples(), 1000);
        assert!((f.last_delta_ms() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_integration_is_in_device_frame() {
        let mut f = OrientationFilter::new(no_gravity());
        let start = Quat::from_rotation_x(std::f32::consts::FRAC_PI_2);
        f.seed(start);
        let gyro = Vec3::new(0.0, 0.0, 0.5);
        for i in 0..=1000u64 {
            f.update(i * MS, Vec3::Y * 9.8, gyro);
        }
        let expected = start * Quat::from_rotation_z(0.5);
        assert!(angle(f.orientation(), expected) < 1e-3);
    }

    #[test]
    fn test_norm_invariant_under_noisy_input() {
        let mut f = OrientationFilter::new(FilterConfig::default());
        let mut seed: u32 = 0x1234_5678;
        let mut next = move || {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (seed >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0
        };

        let mut t = 0u64;
        for _ in 0..20_000 {
            t += 1 * MS;
            let gyro = Vec3::new(next(), next(), next()) * 40.0;
            let accel = Vec3::new(next(), next(), next()) * 30.0;
            f.update(t, accel, gyro);
            assert!((f.orientation().length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_non_finite_sample_skipped() {
        let mut f = OrientationFilter::new(no_gravity());
        f.update(0, Vec3::Y * 9.8, Vec3::ZERO);
        f.update(MS, Vec3::Y * 9.8, Vec3::Z);
        let before = f.orientation();

        assert_eq!(
            f.update(2 * MS, Vec3::new(f32::NAN, 0.0, 0.0), Vec3::Z),
            UpdateOutcome::Rejected
        );
        assert_eq!(
            f.update(3 * MS, Vec3::Y, Vec3::new(0.0, f32::INFINITY, 0.0)),
            UpdateOutcome::Rejected
        );
        assert_eq!(f.orientation(), before);
        assert_eq!(f.last_timestamp_ns(), Some(MS));

        // Tracking continues normally afterwards.
        assert_eq!(f.update(4 * MS, Vec3::Y * 9.8, Vec3::Z), UpdateOutcome::Integrated);
        assert!(f.orientation().is_finite());
    }

    #[test]
    fn test_non_positive_step_rejected() {
        let mut f = OrientationFilter::new(no_gravity());
        f.update(10 * MS, Vec3::Y * 9.8, Vec3::ZERO);
        f.update(11 * MS, Vec3::Y * 9.8, Vec3::Z);
        let before = f.orientation();
        assert_eq!(f.update(11 * MS, Vec3::Y * 9.8, Vec3::Z), UpdateOutcome::Rejected);
        assert_eq!(f.update(9 * MS, Vec3::Y * 9.8, Vec3::Z), UpdateOutcome::Rejected);
        assert_eq!(f.orientation(), before);
    }

    #[test]
    fn test_huge_step_restarts_integration() {
        let mut f = OrientationFilter::new(no_gravity());
        f.update(0, Vec3::Y * 9.8, Vec3::ZERO);
        f.update(MS, Vec3::Y * 9.8, Vec3::Z);
        let before = f.orientation();

        let glitch = 60_000 * MS;
        assert_eq!(f.update(glitch, Vec3::Y * 9.8, Vec3::Z), UpdateOutcome::Rejected);
        assert_eq!(f.orientation(), before);

        // Time really did move: the next sample integrates from the jump.
        assert_eq!(
            f.update(glitch + MS, Vec3::Y * 9.8, Vec3::Z),
            UpdateOutcome::Integrated
        );
        let step = angle(before, f.orientation());
        assert!((step - 0.001).abs() < 1e-4);
    }

    #[test]
    fn test_single_glitch_keeps_time_base() {
        let mut f = OrientationFilter::new(no_gravity());
        f.update(0, Vec3::Y * 9.8, Vec3::ZERO);
        f.update(MS, Vec3::Y * 9.8, Vec3::Z);
        let before = f.orientation();

        assert_eq!(f.update(60_000 * MS, Vec3::Y * 9.8, Vec3::Z), UpdateOutcome::Rejected);
        assert_eq!(f.last_timestamp_ns(), Some(MS));

        // Samples on the old time base carry on as if nothing happened.
        assert_eq!(f.update(2 * MS, Vec3::Y * 9.8, Vec3::Z), UpdateOutcome::Integrated);
        let step = angle(before, f.orientation());
        assert!((step - 0.001).abs() < 1e-4);

        // A later out-of-range step is judged on its own, not against the old jump.
        assert_eq!(f.update(90_000 * MS, Vec3::Y * 9.8, Vec3::Z), UpdateOutcome::Rejected);
        assert_eq!(f.update(3 * MS, Vec3::Y * 9.8, Vec3::Z), UpdateOutcome::Integrated);
        assert_eq!(f.last_timestamp_ns(), Some(3 * MS));
    }

    #[test]
    fn test_gravity_corrects_tilt() {
        let mut f = OrientationFilter::new(FilterConfig::default());
        // Device is physically upright but the filter starts 90° off.
        f.seed(Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));
        let accel = Vec3::new(0.0, 9.81, 0.0);
        assert!(tilt_error(&f, accel) > 1.5);

        for i in 0..=40_000u64 {
            f.update(i * MS, accel, Vec3::ZERO);
        }

        assert!(tilt_error(&f, accel) < 0.06, "tilt {}", tilt_error(&f, accel));
        assert!((f.orientation().length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_gravity_ignored_while_shaking() {
        let mut f = OrientationFilter::new(FilterConfig::default());
        let tilt = Quat::from_rotation_z(0.5);
        f.seed(tilt);
        // Accelerating at 1.5 g: never level, never corrected.
        let accel = Vec3::new(0.0, 14.7, 0.0);
        for i in 0..=5_000u64 {
            f.update(i * MS, accel, Vec3::ZERO);
        }
        assert!(angle(f.orientation(), tilt) < 1e-4);
        assert_eq!(f.gravity_error_angle(), 0.0);
    }

    #[test]
    fn test_gravity_disabled() {
        let mut f = OrientationFilter::new(no_gravity());
        let tilt = Quat::from_rotation_x(0.3);
        f.seed(tilt);
        for i in 0..=2_000u64 {
            f.update(i * MS, Vec3::Y * 9.81, Vec3::ZERO);
        }
        assert!(angle(f.orientation(), tilt) < 1e-5);
    }

    #[test]
    fn test_longer_window_waits_longer() {
        let config = FilterConfig {
            gravity_trust_window: Some(Duration::from_millis(300)),
            ..FilterConfig::default()
        };
        let mut f = OrientationFilter::new(config);
        f.seed(Quat::from_rotation_z(0.5));
        for i in 0..=250u64 {
            f.update(i * MS, Vec3::Y * 9.81, Vec3::ZERO);
        }
        assert_eq!(f.gravity_error_angle(), 0.0);
        for i in 251..=400u64 {
            f.update(i * MS, Vec3::Y * 9.81, Vec3::ZERO);
        }
        assert!(f.gravity_error_angle() > 0.4);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut f = OrientationFilter::new(no_gravity());
        for i in 0..10u64 {
            f.update(i * MS, Vec3::Y * 9.8, Vec3::Z);
        }
        f.reset();
        assert_eq!(f.orientation(), Quat::IDENTITY);
        assert_eq!(f.last_timestamp_ns(), None);
        assert!(!f.has_integrated());
        assert_eq!(f.angular_velocity(), Vec3::ZERO);
    }

    #[test]
    fn test_seed_rejects_degenerate() {
        let mut f = OrientationFilter::new(no_gravity());
        f.seed(Quat::from_xyzw(0.0, 0.0, 0.0, 0.0));
        assert_eq!(f.orientation(), Quat::IDENTITY);
        f.seed(Quat::from_xyzw(0.0, 0.0, 0.0, 2.0));
        assert_eq!(f.orientation(), Quat::IDENTITY);
    }

    #[test]
    fn test_gravity_weight() {
        assert_eq!(gravity_weight(STANDARD_GRAVITY), 1.0);
        assert_eq!(gravity_weight(STANDARD_GRAVITY + 2.0), 0.0);
        let half = gravity_weight(STANDARD_GRAVITY - 0.45);
        assert!((half - 0.5).abs() < 1e-3);
    }
}
