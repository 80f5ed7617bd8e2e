//! # posefusion - IMU fusion and clock sync for XR tracked devices
//!
//! The tracking core shared by headset and controller drivers. Provides:
//! - Device-to-host clock offset estimation with a stability gate
//! - 3DoF orientation fusion (gyro integration + gravity tilt correction)
//! - Constant-velocity pose prediction to any query timestamp
//! - A thread-safe pose service that can delegate to an external SLAM tracker
//! - C FFI for integration with C/C++ drivers
//!
//! ## Quick Start
//! ```no_run
//! use posefusion::{DeviceInfo, ImuDevice, TrackedDevice, TrackerConfig};
//! use posefusion::pump::ChannelSource;
//!
//! let (_tx, rx) = crossbeam_channel::unbounded();
//! let info = DeviceInfo { name: "HMD".into(), serial: "0001".into() };
//! let device = ImuDevice::open(info, ChannelSource::new(rx), TrackerConfig::from_env().unwrap()).unwrap();
//!
//! // Predict 20 ms ahead of now.
//! let pose = device.get_tracked_pose(device.now_ns() + 20_000_000);
//! println!("orientation: {:?} flags: {:?}", pose.pose.orientation, pose.flags);
//! ```

pub mod error;
pub mod types;
pub mod config;
pub mod ticks;
pub mod clock;
pub mod fifo;
pub mod fusion;
pub mod predict;
pub mod history;
pub mod tracker;
pub mod service;
pub mod protocol;
pub mod pump;
pub mod device;
pub mod ffi;

pub use config::TrackerConfig;
pub use device::{ImuDevice, TrackedDevice};
pub use error::FusionError;
pub use service::PoseService;
pub use tracker::{ExternalTracker, SlamPoseCache};
pub use types::*;

/// Result type alias for posefusion operations.
pub type Result<T> = std::result::Result<T, FusionError>;
