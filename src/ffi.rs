//! C FFI layer for posefusion.
//!
//! Provides an opaque handle-based API over [`PoseService`] for C/C++
//! drivers that own their own polling thread. The generated C header is
//! written to `include/posefusion.h` by cbindgen.

use crate::config::TrackerConfig;
use crate::error::LastError;
use crate::service::PoseService;
use crate::types::PoseSnapshot;
use glam::Vec3;
use std::ffi::{c_char, c_int};
use std::time::Duration;

/// Last error message for C consumers.
static LAST_ERROR: LastError = LastError::new();

/// Opaque pose service handle for C consumers.
pub struct PfService(PoseService);

/// Service configuration in C-compatible layout.
///
/// Zero in any field selects the built-in default for it.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PfConfig {
    /// Device tick rate in Hz.
    pub tick_frequency_hz: f64,
    /// Rate of clock observations in Hz.
    pub report_rate_hz: f64,
    /// Gravity trust window in ms; negative disables gravity correction.
    pub gravity_window_ms: i32,
}

/// Vector in C-compatible layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PfVec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl From<PfVec3> for Vec3 {
    fn from(v: PfVec3) -> Self {
        Vec3::new(v.x, v.y, v.z)
    }
}

impl From<Vec3> for PfVec3 {
    fn from(v: Vec3) -> Self {
        PfVec3 {
            x: v.x,
            y: v.y,
            z: v.z,
        }
    }
}

/// Pose snapshot in C-compatible layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PfPose {
    /// Position in meters.
    pub position: PfVec3,
    /// Orientation quaternion [x, y, z, w].
    pub orientation: [f32; 4],
    /// World-frame angular velocity in rad/s; zero unless flagged valid.
    pub angular_velocity: PfVec3,
    /// Linear velocity in m/s; zero unless flagged valid.
    pub linear_velocity: PfVec3,
    /// `RelationFlags` bits.
    pub flags: u32,
}

impl From<PoseSnapshot> for PfPose {
    fn from(s: PoseSnapshot) -> Self {
        PfPose {
            position: s.pose.position.into(),
            orientation: s.pose.orientation.to_array(),
            angular_velocity: s.angular_velocity.unwrap_or(Vec3::ZERO).into(),
            linear_velocity: s.linear_velocity.unwrap_or(Vec3::ZERO).into(),
            flags: s.flags.bits(),
        }
    }
}

fn config_from_c(c: &PfConfig) -> TrackerConfig {
    let mut config = TrackerConfig {
        prefer_external_tracker: false,
        ..TrackerConfig::default()
    };
    if c.tick_frequency_hz != 0.0 {
        config.clock.tick_frequency_hz = c.tick_frequency_hz;
    }
    if c.report_rate_hz != 0.0 {
        config.clock.report_rate_hz = c.report_rate_hz;
    }
    match c.gravity_window_ms {
        0 => {}
        ms if ms < 0 => config.filter.gravity_trust_window = None,
        ms => config.filter.gravity_trust_window = Some(Duration::from_millis(ms as u64)),
    }
    config
}

/// Create a filter-only pose service.
///
/// `config` may be null for defaults. Returns NULL on error (check
/// pf_last_error()).
///
/// # Safety
/// `config` must point to a valid `PfConfig`, or be null.
#[no_mangle]
pub unsafe extern "C" fn pf_service_create(config: *const PfConfig) -> *mut PfService {
    let c = if config.is_null() {
        PfConfig::default()
    } else {
        *config
    };

    match PoseService::new(config_from_c(&c)) {
        Ok(service) => Box::into_raw(Box::new(PfService(service))),
        Err(e) => {
            LAST_ERROR.set(&e);
            std::ptr::null_mut()
        }
    }
}

/// Destroy a service. The caller's polling thread must have stopped first.
///
/// # Safety
/// `service` must be a valid pointer returned by `pf_service_create`, or null.
/// Must not be called twice on the same pointer.
#[no_mangle]
pub unsafe extern "C" fn pf_service_destroy(service: *mut PfService) {
    if !service.is_null() {
        drop(Box::from_raw(service));
    }
}

/// Record a `(device ticks, host ns)` clock observation.
///
/// # Safety
/// `service` must be a valid pointer returned by `pf_service_create`, or null.
#[no_mangle]
pub unsafe extern "C" fn pf_observe_clock(service: *const PfService, device_ticks: u64, host_ns: u64) {
    if let Some(service) = service.as_ref() {
        service.0.observe_clock(device_ticks, host_ns);
    }
}

/// Feed one IMU sample. Accel in m/s², gyro in rad/s.
///
/// # Safety
/// `service` must be a valid pointer returned by `pf_service_create`, or null.
#[no_mangle]
pub unsafe extern "C" fn pf_ingest_imu(
    service: *const PfService,
    device_ticks: u64,
    accel: PfVec3,
    gyro: PfVec3,
) {
    if let Some(service) = service.as_ref() {
        service.0.ingest_imu_sample(device_ticks, accel.into(), gyro.into());
    }
}

/// Query the pose at a host timestamp.
/// Returns 0 on success, -1 on a null argument.
///
/// # Safety
/// `service` must be a valid pointer returned by `pf_service_create`.
/// `out` must point to a writable `PfPose`.
#[no_mangle]
pub unsafe extern "C" fn pf_get_tracked_pose(
    service: *const PfService,
    at_timestamp_ns: u64,
    out: *mut PfPose,
) -> c_int {
    let Some(service) = service.as_ref() else {
        return -1;
    };
    if out.is_null() {
        return -1;
    }
    out.write(service.0.get_tracked_pose(at_timestamp_ns).into());
    0
}

/// Returns 1 once the device clock map has stabilised, 0 otherwise.
///
/// # Safety
/// `service` must be a valid pointer returned by `pf_service_create`, or null.
#[no_mangle]
pub unsafe extern "C" fn pf_is_clock_stable(service: *const PfService) -> c_int {
    match service.as_ref() {
        Some(service) if service.0.is_clock_stable() => 1,
        _ => 0,
    }
}

/// Get the last error message, or NULL if none.
/// The returned string is valid until the next posefusion call.
#[no_mangle]
pub extern "C" fn pf_last_error() -> *const c_char {
    LAST_ERROR.as_ptr()
}
