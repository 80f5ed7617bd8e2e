//! Constant-velocity pose extrapolation.

use crate::types::PoseSnapshot;
use glam::Quat;

/// Extrapolate `base` by `dt_seconds` at its current velocities.
///
/// Angular velocity is taken in the fixed frame, so the increment is
/// applied on the left. A negative `dt_seconds` runs the motion backwards
/// and zero returns `base` untouched. No ceiling is applied; callers clamp
/// the horizon if they need one.
pub fn predict(base: &PoseSnapshot, dt_seconds: f64) -> PoseSnapshot {
    if dt_seconds == 0.0 {
        return *base;
    }

    let mut out = *base;
    let dt = dt_seconds as f32;

    if let Some(linear) = base.linear_velocity {
        out.pose.position = base.pose.position + linear * dt;
    }

    if let Some(angular) = base.angular_velocity {
        let delta = Quat::from_scaled_axis(angular * dt);
        out.pose.orientation = (delta * base.pose.orientation).normalize();
    }

    out
}
