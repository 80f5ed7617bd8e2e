use crate::clock::MonotonicClock;
use crate::config::TrackerConfig;
use crate::pump::{ImuPump, ImuSource};
use crate::service::PoseService;
use crate::tracker::ExternalTracker;
use crate::types::{DeviceInfo, PoseSnapshot, TrackingMode};
use crate::{FusionError, Result};
use std::sync::Arc;
use std::time::Duration;

/// Output requests a runtime can send to a device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputRequest {
    Vibration {
        amplitude: f32,
        frequency_hz: f32,
        duration: Duration,
    },
}

/// Capabilities every tracked device exposes to the runtime.
///
/// Destroying a device is dropping it.
pub trait TrackedDevice: Send + Sync {
    fn info(&self) -> &DeviceInfo;

    /// Latch input state for the current frame.
    fn update_inputs(&self) -> Result<()>;

    /// Pose at host time `at_timestamp_ns`.
    fn get_tracked_pose(&self, at_timestamp_ns: u64) -> PoseSnapshot;

    fn set_output(&self, request: OutputRequest) -> Result<()>;
}

/// IMU-only device: a [`PoseService`] fed by its own polling thread.
pub struct ImuDevice {
    // Declared first so the polling thread is joined before the service goes.
    pump: ImuPump,
    service: Arc<PoseService>,
    info: DeviceInfo,
}

impl ImuDevice {
    /// Start a filter-only device reading from `source`.
    pub fn open<S: ImuSource>(info: DeviceInfo, source: S, config: TrackerConfig) -> Result<ImuDevice> {
        let service = Arc::new(PoseService::new(config)?);
        Self::start(info, source, service)
    }

    /// Start a device that can hand tracking over to `tracker`.
    pub fn open_with_tracker<S: ImuSource>(
        info: DeviceInfo,
        source: S,
        config: TrackerConfig,
        tracker: Arc<dyn ExternalTracker>,
    ) -> Result<ImuDevice> {
        let service = Arc::new(PoseService::with_tracker(config, tracker)?);
        Self::start(info, source, service)
    }

    fn start<S: ImuSource>(info: DeviceInfo, source: S, service: Arc<PoseService>) -> Result<ImuDevice> {
        let pump = ImuPump::start(source, service.clone(), MonotonicClock::new())?;

        log::info!(
            "Opened {} (serial {}) in {:?} mode",
            info.name,
            info.serial,
            service.tracking_mode()
        );

        Ok(ImuDevice {
            pump,
            service,
            info,
        })
    }

    /// Current time on the host clock this device's poses are stamped with.
    pub fn now_ns(&self) -> u64 {
        self.pump.clock().now_ns()
    }

    pub fn service(&self) -> &Arc<PoseService> {
        &self.service
    }

    /// Whether the polling thread is still running.
    pub fn is_streaming(&self) -> bool {
        self.pump.is_active()
    }

    /// Debug toggle between the external tracker and the 3DoF filter.
    pub fn set_external_tracker_active(&self, active: bool) -> TrackingMode {
        self.service.set_external_tracker_active(active)
    }
}

impl TrackedDevice for ImuDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn update_inputs(&self) -> Result<()> {
        // No buttons or axes on a bare IMU.
        Ok(())
    }

    fn get_tracked_pose(&self, at_timestamp_ns: u64) -> PoseSnapshot {
        self.service.get_tracked_pose(at_timestamp_ns)
    }

    fn set_output(&self, request: OutputRequest) -> Result<()> {
        Err(FusionError::UnsupportedOutput(format!(
            "{} has no outputs ({:?})",
            self.info.name, request
        )))
    }
}

impl Drop for ImuDevice {
    fn drop(&mut self) {
        log::info!("Closing {}", self.info.name);
    }
}
