use glam::{Quat, Vec3};

/// Rigid pose: position in meters plus a unit orientation quaternion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: Vec3::ZERO,
        orientation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

bitflags::bitflags! {
    /// Which parts of a [`PoseSnapshot`] can be trusted.
    ///
    /// A `*_TRACKED` bit is only ever set together with the matching
    /// `*_VALID` bit. Valid but untracked means a default or extrapolated value.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RelationFlags: u32 {
        const ORIENTATION_VALID      = 1 << 0;
        const POSITION_VALID         = 1 << 1;
        const LINEAR_VELOCITY_VALID  = 1 << 2;
        const ANGULAR_VELOCITY_VALID = 1 << 3;
        const ORIENTATION_TRACKED    = 1 << 4;
        const POSITION_TRACKED       = 1 << 5;
    }
}

impl Default for RelationFlags {
    fn default() -> Self {
        RelationFlags::empty()
    }
}

impl RelationFlags {
    /// Everything a 6DoF tracker reports when it has a lock.
    pub const FULLY_TRACKED: RelationFlags = RelationFlags::ORIENTATION_VALID
        .union(RelationFlags::ORIENTATION_TRACKED)
        .union(RelationFlags::POSITION_VALID)
        .union(RelationFlags::POSITION_TRACKED);
}

/// Pose plus optional velocities, the unit returned by every pose query.
///
/// Angular velocity is expressed in the same fixed frame as the pose.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PoseSnapshot {
    pub pose: Pose,
    pub angular_velocity: Option<Vec3>,
    pub linear_velocity: Option<Vec3>,
    pub flags: RelationFlags,
}

impl PoseSnapshot {
    /// Nothing known yet: identity pose, no validity bits.
    pub const EMPTY: PoseSnapshot = PoseSnapshot {
        pose: Pose::IDENTITY,
        angular_velocity: None,
        linear_velocity: None,
        flags: RelationFlags::empty(),
    };

    pub fn is_orientation_tracked(&self) -> bool {
        self.flags.contains(RelationFlags::ORIENTATION_TRACKED)
    }

    pub fn is_position_tracked(&self) -> bool {
        self.flags.contains(RelationFlags::POSITION_TRACKED)
    }
}

/// One IMU reading in device units after scaling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuReading {
    /// Accelerometer [x, y, z] in m/s².
    pub accel: Vec3,
    /// Gyroscope [x, y, z] in rad/s.
    pub gyro: Vec3,
}

impl ImuReading {
    pub fn is_finite(&self) -> bool {
        self.accel.is_finite() && self.gyro.is_finite()
    }
}

/// A decoded IMU report as delivered by the hardware layer.
///
/// `timestamp` is the raw device counter of the first reading; each further
/// reading is `interval_ticks` later.
#[derive(Debug, Clone, PartialEq)]
pub struct ImuReport {
    pub timestamp: u32,
    pub interval_ticks: u32,
    pub readings: Vec<ImuReading>,
}

/// IMU sample on the host clock, as forwarded to an external tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    /// Host monotonic timestamp in nanoseconds.
    pub timestamp_ns: u64,
    pub accel: Vec3,
    pub gyro: Vec3,
}

/// Device identification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub serial: String,
}

/// Which pose source answers queries.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingMode {
    /// Orientation from the built-in 3DoF fusion filter.
    Filter = 0,
    /// Pose from an attached external tracker (e.g. visual-inertial SLAM).
    External = 1,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fully_tracked_implies_valid() {
        let flags = RelationFlags::FULLY_TRACKED;
        assert!(flags.contains(RelationFlags::ORIENTATION_VALID));
        assert!(flags.contains(RelationFlags::POSITION_VALID));
        assert!(!flags.contains(RelationFlags::ANGULAR_VELOCITY_VALID));
    }

    #[test]
    fn test_reading_finite() {
        let mut reading = ImuReading {
            accel: Vec3::new(0.0, 9.8, 0.0),
            gyro: Vec3::ZERO,
        };
        assert!(reading.is_finite());
        reading.gyro.y = f32::NAN;
        assert!(!reading.is_finite());
    }
}
