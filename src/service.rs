//! Thread-safe pose service for one tracked device.
//!
//! One polling thread feeds clock observations and IMU samples; any number
//! of threads query poses. A single mutex guards the clock estimator and the
//! fusion filter, and queries only hold it long enough to copy state out.

use crate::clock::ClockOffsetEstimator;
use crate::config::TrackerConfig;
use crate::fusion::{OrientationFilter, UpdateOutcome};
use crate::predict::predict;
use crate::tracker::ExternalTracker;
use crate::types::{ImuSample, Pose, PoseSnapshot, RelationFlags, TrackingMode};
use crate::Result;
use glam::{Quat, Vec3};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const NS_PER_S: f64 = 1_000_000_000.0;

/// Frame and IMU timestamps further apart than this (in µs) are in
/// different 32-bit epochs.
const EPOCH_SPLIT_US: i64 = 1 << 31;

const UPPER_32_BITS: u64 = 0xffff_ffff_0000_0000;

struct FusionState {
    clock: ClockOffsetEstimator,
    filter: OrientationFilter,
    mode: TrackingMode,
    /// Filter orientation was seeded and nothing has been integrated since.
    seeded: bool,
    /// Most recent pose handed out by the external tracker.
    last_pose: PoseSnapshot,
    last_imu_device_ns: Option<u64>,
    last_imu_host_ns: Option<u64>,
    camera_ts_offset_ns: i64,
    last_frame_host_ns: u64,
}

impl FusionState {
    /// Copy of the filter output, before any extrapolation.
    fn filter_snapshot(&self, neutral_position: Vec3) -> (PoseSnapshot, Option<u64>) {
        let orientation = self.filter.orientation();
        let mut snapshot = PoseSnapshot {
            pose: Pose::new(neutral_position, orientation),
            ..PoseSnapshot::EMPTY
        };

        if self.filter.has_integrated() {
            snapshot.flags = RelationFlags::ORIENTATION_VALID
                | RelationFlags::ORIENTATION_TRACKED
                | RelationFlags::ANGULAR_VELOCITY_VALID
                | RelationFlags::POSITION_VALID;
            // The filter reports device-frame rates; poses live in the world frame.
            snapshot.angular_velocity = Some(orientation * self.filter.angular_velocity());
        } else if self.seeded {
            snapshot.flags = RelationFlags::ORIENTATION_VALID | RelationFlags::POSITION_VALID;
        }

        (snapshot, self.filter.last_timestamp_ns())
    }
}

/// Tracked-device pose service: clock reconciliation, 3DoF fusion and
/// prediction, with optional delegation to an [`ExternalTracker`].
pub struct PoseService {
    config: TrackerConfig,
    tracker: Option<Arc<dyn ExternalTracker>>,
    state: Mutex<FusionState>,
}

impl PoseService {
    /// Filter-only service.
    pub fn new(config: TrackerConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Service that can delegate to `tracker`. Starts delegated when
    /// `config.prefer_external_tracker` is set.
    pub fn with_tracker(config: TrackerConfig, tracker: Arc<dyn ExternalTracker>) -> Result<Self> {
        Self::build(config, Some(tracker))
    }

    fn build(config: TrackerConfig, tracker: Option<Arc<dyn ExternalTracker>>) -> Result<Self> {
        config.validate()?;

        let mode = if tracker.is_some() && config.prefer_external_tracker {
            TrackingMode::External
        } else {
            TrackingMode::Filter
        };
        log::info!("Pose service starting in {:?} mode", mode);

        let state = FusionState {
            clock: ClockOffsetEstimator::new(config.clock.clone()),
            filter: OrientationFilter::new(config.filter.clone()),
            mode,
            seeded: false,
            last_pose: PoseSnapshot::EMPTY,
            last_imu_device_ns: None,
            last_imu_host_ns: None,
            camera_ts_offset_ns: 0,
            last_frame_host_ns: 0,
        };

        Ok(PoseService {
            config,
            tracker,
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> MutexGuard<'_, FusionState> {
        // Critical sections never leave the state half-written.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn has_external_tracker(&self) -> bool {
        self.tracker.is_some()
    }

    /// Record that the device counter read `device_ticks` at `host_ns`.
    pub fn observe_clock(&self, device_ticks: u64, host_ns: u64) {
        self.lock().clock.observe_ticks(device_ticks, host_ns);
    }

    /// Feed one IMU sample stamped with extended device ticks.
    ///
    /// Dropped until the clock map is stable. Otherwise the sample goes to
    /// the fusion filter, or to the external tracker in delegated mode.
    pub fn ingest_imu_sample(&self, device_ticks: u64, accel: Vec3, gyro: Vec3) {
        let forward = {
            let mut state = self.lock();

            if !state.clock.is_stable() {
                log::trace!("Clock not stable yet, dropping IMU sample at {} ticks", device_ticks);
                return;
            }

            let device_ns = state.clock.ticks_to_ns(device_ticks);
            let host_ns = state.clock.convert(device_ns);

            if let Some(last) = state.last_imu_host_ns.filter(|&last| host_ns < last) {
                log::warn!("IMU time went backward by {} ns", last - host_ns);
                return;
            }

            // Only samples the consumer accepted move the IMU time forward.
            let mode = state.mode;
            let (accepted, forward) = match mode {
                TrackingMode::Filter => {
                    let outcome = state.filter.update(host_ns, accel, gyro);
                    if state.filter.has_integrated() {
                        state.seeded = false;
                    }
                    (outcome != UpdateOutcome::Rejected, None)
                }
                TrackingMode::External => (
                    true,
                    Some(ImuSample {
                        timestamp_ns: host_ns,
                        accel,
                        gyro,
                    }),
                ),
            };

            if accepted {
                state.last_imu_device_ns = Some(device_ns);
                state.last_imu_host_ns = Some(host_ns);
            }
            forward
        };

        if let (Some(sample), Some(tracker)) = (forward, self.tracker.as_ref()) {
            if accel.is_finite() && gyro.is_finite() {
                tracker.push_imu_sample(&sample);
            } else {
                log::debug!("Not forwarding non-finite IMU sample to the external tracker");
            }
        }
    }

    /// Pose at host time `at_timestamp_ns`. Never fails and never blocks on
    /// device I/O; confidence is carried in the snapshot flags.
    pub fn get_tracked_pose(&self, at_timestamp_ns: u64) -> PoseSnapshot {
        let (mode, snapshot, last_ns) = {
            let state = self.lock();
            let (snapshot, last_ns) = state.filter_snapshot(self.config.neutral_position);
            (state.mode, snapshot, last_ns)
        };

        if mode == TrackingMode::External {
            if let Some(tracker) = self.tracker.as_ref() {
                let pose = tracker.get_tracked_pose_at(at_timestamp_ns);
                if pose.flags.contains(RelationFlags::ORIENTATION_VALID) {
                    self.lock().last_pose = pose;
                }
                return pose;
            }
        }

        match last_ns {
            Some(last) if at_timestamp_ns > last => {
                let dt = (at_timestamp_ns - last) as f64 / NS_PER_S;
                predict(&snapshot, dt)
            }
            _ => snapshot,
        }
    }

    /// Switch between the external tracker and the built-in filter.
    ///
    /// Moving to the filter resets it and seeds it from the last external
    /// pose so the reported orientation does not jump. Activating without an
    /// attached tracker keeps filter mode. Returns the mode now in effect.
    pub fn set_external_tracker_active(&self, active: bool) -> TrackingMode {
        let Some(tracker) = self.tracker.as_ref() else {
            if active {
                log::warn!("No external tracker attached, staying in filter mode");
            }
            return TrackingMode::Filter;
        };

        let (mode, last_imu_host_ns) = {
            let state = self.lock();
            (state.mode, state.last_imu_host_ns)
        };

        match (mode, active) {
            (TrackingMode::Filter, true) => {
                self.lock().mode = TrackingMode::External;
                log::info!("Switched to external tracker");
                TrackingMode::External
            }
            (TrackingMode::External, false) => {
                let fresh = last_imu_host_ns
                    .map(|ts| tracker.get_tracked_pose_at(ts))
                    .filter(|p| p.flags.contains(RelationFlags::ORIENTATION_VALID));

                let mut state = self.lock();
                let seed = fresh.unwrap_or(state.last_pose);

                state.filter.reset();
                state.seeded = false;
                if seed.flags.contains(RelationFlags::ORIENTATION_VALID) {
                    state.filter.seed(seed.pose.orientation);
                    state.seeded = true;
                }
                state.mode = TrackingMode::Filter;
                log::info!(
                    "Switched to 3DoF filter, seeded from {:?}",
                    state.seeded.then_some(seed.pose.orientation)
                );
                TrackingMode::Filter
            }
            (current, _) => current,
        }
    }

    /// Map a camera frame timestamp (device ns) onto the host clock.
    ///
    /// Frame and IMU counters are extended separately and can land in
    /// different 32-bit microsecond epochs; frames are shifted into the IMU
    /// epoch when that happens. Returns `None` before the clock is stable,
    /// before any IMU sample, and for frames that would go back in time.
    pub fn ingest_frame_timestamp(&self, frame_device_ns: u64) -> Option<u64> {
        let mut state = self.lock();

        if !state.clock.is_stable() {
            return None;
        }
        let imu_ns = state.last_imu_device_ns?;

        let adjusted_ns = shift_ns(frame_device_ns, state.camera_ts_offset_ns);
        let frame_to_imu_us = (adjusted_ns / 1000) as i64 - (imu_ns / 1000) as i64;
        if !(-EPOCH_SPLIT_US..=EPOCH_SPLIT_US).contains(&frame_to_imu_us) {
            let imu_epoch = ((imu_ns / 1000) & UPPER_32_BITS) as i64;
            let frame_epoch = ((frame_device_ns / 1000) & UPPER_32_BITS) as i64;
            state.camera_ts_offset_ns = (imu_epoch - frame_epoch) * 1000;
            log::debug!(
                "Applying epoch offset to frame times of {} ns (frame to imu was {} µs)",
                state.camera_ts_offset_ns,
                frame_to_imu_us
            );
        }

        let frame_ns = shift_ns(frame_device_ns, state.camera_ts_offset_ns);
        let host_ns = state.clock.convert(frame_ns);

        if host_ns < state.last_frame_host_ns {
            log::warn!(
                "Camera frame time went backward by {} ns",
                state.last_frame_host_ns - host_ns
            );
            return None;
        }
        state.last_frame_host_ns = host_ns;
        Some(host_ns)
    }

    pub fn is_clock_stable(&self) -> bool {
        self.lock().clock.is_stable()
    }

    pub fn clock_offset_ns(&self) -> Option<i64> {
        self.lock().clock.offset_ns()
    }

    pub fn tracking_mode(&self) -> TrackingMode {
        self.lock().mode
    }

    /// Host time of the newest IMU sample accepted after clock stabilisation.
    pub fn last_imu_timestamp_ns(&self) -> Option<u64> {
        self.lock().last_imu_host_ns
    }

    /// Current filter orientation, ignoring mode and prediction.
    pub fn filter_orientation(&self) -> Quat {
        self.lock().filter.orientation()
    }
}

fn shift_ns(ns: u64, offset_ns: i64) -> u64 {
    (ns as i64).saturating_add(offset_ns).max(0) as u64
}
