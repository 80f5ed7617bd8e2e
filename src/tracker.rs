use crate::history::{HistoryResult, RelationHistory};
use crate::types::{ImuSample, PoseSnapshot};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::{Mutex, PoisonError};

/// A pose source that can stand in for the built-in 3DoF filter,
/// typically a visual-inertial SLAM engine.
///
/// Both calls may arrive from different threads at the same time, and
/// neither may block on I/O.
pub trait ExternalTracker: Send + Sync {
    /// Hand over an IMU sample already mapped onto the host clock.
    fn push_imu_sample(&self, sample: &ImuSample);

    /// Best pose estimate at a host timestamp.
    fn get_tracked_pose_at(&self, at_timestamp_ns: u64) -> PoseSnapshot;
}

/// Channel depth for IMU samples waiting for the SLAM engine.
pub const IMU_QUEUE_DEPTH: usize = 1024;

/// Glue between [`PoseService`](crate::service::PoseService) and a SLAM
/// engine running on its own threads.
///
/// IMU samples go out through a bounded channel. The engine reports its
/// poses back with [`push_pose`](Self::push_pose), and queries are
/// answered from that history.
pub struct SlamPoseCache {
    imu_tx: Sender<ImuSample>,
    poses: Mutex<RelationHistory>,
}

impl SlamPoseCache {
    /// Create the cache and the receiver the SLAM engine reads IMU from.
    pub fn new() -> (Self, Receiver<ImuSample>) {
        Self::with_capacity(IMU_QUEUE_DEPTH, crate::history::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(queue_depth: usize, history_len: usize) -> (Self, Receiver<ImuSample>) {
        let (imu_tx, imu_rx) = crossbeam_channel::bounded(queue_depth);
        let cache = SlamPoseCache {
            imu_tx,
            poses: Mutex::new(RelationHistory::with_capacity(history_len)),
        };
        (cache, imu_rx)
    }

    /// Record a pose solved by the SLAM engine. Out-of-order poses are dropped.
    pub fn push_pose(&self, timestamp_ns: u64, snapshot: PoseSnapshot) -> bool {
        let mut poses = self.poses.lock().unwrap_or_else(PoisonError::into_inner);
        let motion = poses.estimate_motion(&snapshot, timestamp_ns);
        let accepted = poses.push(motion.unwrap_or(snapshot), timestamp_ns);
        if !accepted {
            log::debug!("Dropping out-of-order SLAM pose at {} ns", timestamp_ns);
        }
        accepted
    }

    pub fn latest_pose(&self) -> Option<(u64, PoseSnapshot)> {
        self.poses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .latest()
    }
}

impl ExternalTracker for SlamPoseCache {
    fn push_imu_sample(&self, sample: &ImuSample) {
        if let Err(e) = self.imu_tx.try_send(*sample) {
            match e {
                TrySendError::Full(_) => {
                    log::trace!("SLAM IMU channel full, dropping sample");
                }
                TrySendError::Disconnected(_) => {
                    log::trace!("SLAM IMU channel disconnected, dropping sample");
                }
            }
        }
    }

    fn get_tracked_pose_at(&self, at_timestamp_ns: u64) -> PoseSnapshot {
        let (result, snapshot) = self
            .poses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(at_timestamp_ns);
        match result {
            HistoryResult::Invalid => PoseSnapshot::EMPTY,
            _ => snapshot,
        }
    }
}
