//! Short history of timestamped pose snapshots.
//!
//! Queries inside the buffered range are interpolated between neighbours;
//! queries outside it are extrapolated from the nearest end with
//! [`predict`](crate::predict::predict).

use crate::predict::predict;
use crate::types::{PoseSnapshot, RelationFlags};
use std::collections::VecDeque;

pub const DEFAULT_CAPACITY: usize = 4096;

const NS_PER_S: f64 = 1_000_000_000.0;

/// How a [`RelationHistory::get`] answer was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryResult {
    /// Empty buffer or a zero timestamp.
    Invalid,
    Exact,
    /// Between two entries.
    Interpolated,
    /// Newer than the newest entry.
    Predicted,
    /// Older than the oldest entry.
    ReversePredicted,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    timestamp_ns: u64,
    snapshot: PoseSnapshot,
}

/// Bounded buffer of snapshots with strictly increasing timestamps.
#[derive(Debug, Clone)]
pub struct RelationHistory {
    entries: VecDeque<Entry>,
    capacity: usize,
}

impl RelationHistory {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Append a snapshot. Returns false, keeping the buffer as is, unless
    /// `timestamp_ns` is newer than every stored entry.
    pub fn push(&mut self, snapshot: PoseSnapshot, timestamp_ns: u64) -> bool {
        if let Some(newest) = self.entries.back() {
            if timestamp_ns <= newest.timestamp_ns {
                return false;
            }
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(Entry {
            timestamp_ns,
            snapshot,
        });
        true
    }

    /// Newest entry and its timestamp.
    pub fn latest(&self) -> Option<(u64, PoseSnapshot)> {
        self.entries.back().map(|e| (e.timestamp_ns, e.snapshot))
    }

    /// Snapshot at `at_timestamp_ns`, interpolated or extrapolated as needed.
    pub fn get(&self, at_timestamp_ns: u64) -> (HistoryResult, PoseSnapshot) {
        let (Some(front), Some(back)) = (self.entries.front(), self.entries.back()) else {
            return (HistoryResult::Invalid, PoseSnapshot::EMPTY);
        };
        if at_timestamp_ns == 0 {
            return (HistoryResult::Invalid, PoseSnapshot::EMPTY);
        }

        // First entry not older than the query.
        let idx = self
            .entries
            .partition_point(|e| e.timestamp_ns < at_timestamp_ns);

        if idx == self.entries.len() {
            let dt = seconds_between(back.timestamp_ns, at_timestamp_ns);
            log::trace!("Extrapolating {} s past the newest pose", dt);
            return (HistoryResult::Predicted, predict(&back.snapshot, dt));
        }

        let successor = &self.entries[idx];
        if successor.timestamp_ns == at_timestamp_ns {
            return (HistoryResult::Exact, successor.snapshot);
        }

        if idx == 0 {
            let dt = seconds_between(front.timestamp_ns, at_timestamp_ns);
            log::trace!("Extrapolating {} s before the oldest pose", dt);
            return (HistoryResult::ReversePredicted, predict(&front.snapshot, dt));
        }

        let predecessor = &self.entries[idx - 1];
        let before = (at_timestamp_ns - predecessor.timestamp_ns) as f64;
        let after = (successor.timestamp_ns - at_timestamp_ns) as f64;
        let t = (before / (before + after)) as f32;

        (
            HistoryResult::Interpolated,
            interpolate(&predecessor.snapshot, &successor.snapshot, t),
        )
    }

    /// Fill in velocities for `snapshot` by finite difference against the
    /// newest entry. Returns `None` when the history is empty or the
    /// timestamp is not newer.
    pub fn estimate_motion(&self, snapshot: &PoseSnapshot, timestamp_ns: u64) -> Option<PoseSnapshot> {
        let (last_ns, last) = self.latest()?;
        if timestamp_ns <= last_ns {
            return None;
        }
        let dt = ((timestamp_ns - last_ns) as f64 / NS_PER_S) as f32;
        let both = last.flags & snapshot.flags;

        let mut out = *snapshot;

        if both.contains(RelationFlags::POSITION_VALID) {
            out.flags |= RelationFlags::POSITION_VALID
                | RelationFlags::POSITION_TRACKED
                | RelationFlags::LINEAR_VELOCITY_VALID;
            out.linear_velocity = Some((snapshot.pose.position - last.pose.position) / dt);
        }

        if both.contains(RelationFlags::ORIENTATION_VALID) {
            out.flags |= RelationFlags::ORIENTATION_VALID
                | RelationFlags::ORIENTATION_TRACKED
                | RelationFlags::ANGULAR_VELOCITY_VALID;
            let mut delta = snapshot.pose.orientation * last.pose.orientation.inverse();
            // Shortest arc.
            if delta.w < 0.0 {
                delta = -delta;
            }
            out.angular_velocity = Some(delta.to_scaled_axis() / dt);
        }

        Some(out)
    }
}

impl Default for RelationHistory {
    fn default() -> Self {
        Self::new()
    }
}

fn seconds_between(from_ns: u64, to_ns: u64) -> f64 {
    (to_ns as i128 - from_ns as i128) as f64 / NS_PER_S
}

fn interpolate(a: &PoseSnapshot, b: &PoseSnapshot, t: f32) -> PoseSnapshot {
    let flags = a.flags & b.flags;
    let mut out = PoseSnapshot {
        flags,
        ..PoseSnapshot::EMPTY
    };

    if flags.contains(RelationFlags::POSITION_VALID) {
        out.pose.position = a.pose.position.lerp(b.pose.position, t);
    }
    if flags.contains(RelationFlags::ORIENTATION_VALID) {
        out.pose.orientation = a.pose.orientation.slerp(b.pose.orientation, t);
    }
    if let (Some(va), Some(vb)) = (a.angular_velocity, b.angular_velocity) {
        out.angular_velocity = Some(va.lerp(vb, t));
    }
    if let (Some(va), Some(vb)) = (a.linear_velocity, b.linear_velocity) {
        out.linear_velocity = Some(va.lerp(vb, t));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Pose;
    use glam::{Quat, Vec3};

    const MS: u64 = 1_000_000;

    fn snapshot(x: f32, yaw: f32) -> PoseSnapshot {
        PoseSnapshot {
            pose: Pose::new(Vec3::new(x, 0.0, 0.0), Quat::from_rotation_y(yaw)),
            angular_velocity: None,
            linear_velocity: Some(Vec3::new(1.0, 0.0, 0.0)),
            flags: RelationFlags::FULLY_TRACKED | RelationFlags::LINEAR_VELOCITY_VALID,
        }
    }

    #[test]
    fn test_empty_is_invalid() {
        let rh = RelationHistory::new();
        assert_eq!(rh.get(10).0, HistoryResult::Invalid);
        assert!(rh.latest().is_none());
    }

    #[test]
    fn test_push_requires_increasing_time() {
        let mut rh = RelationHistory::new();
        assert!(rh.push(snapshot(0.0, 0.0), 10 * MS));
        assert!(!rh.push(snapshot(1.0, 0.0), 10 * MS));
        assert!(!rh.push(snapshot(1.0, 0.0), 5 * MS));
        assert_eq!(rh.len(), 1);
    }

    #[test]
    fn test_zero_timestamp_is_invalid() {
        let mut rh = RelationHistory::new();
        rh.push(snapshot(0.0, 0.0), 10 * MS);
        assert_eq!(rh.get(0).0, HistoryResult::Invalid);
    }

    #[test]
    fn test_exact_and_interpolated() {
        let mut rh = RelationHistory::new();
        rh.push(snapshot(0.0, 0.0), 10 * MS);
        rh.push(snapshot(1.0, 1.0), 20 * MS);

        let (res, exact) = rh.get(20 * MS);
        assert_eq!(res, HistoryResult::Exact);
        assert_eq!(exact.pose.position.x, 1.0);

        let (res, mid) = rh.get(15 * MS);
        assert_eq!(res, HistoryResult::Interpolated);
        assert!((mid.pose.position.x - 0.5).abs() < 1e-6);
        let expected = Quat::from_rotation_y(0.5);
        assert!((mid.pose.orientation.dot(expected).abs() - 1.0).abs() < 1e-5);
        assert!(mid.flags.contains(RelationFlags::POSITION_TRACKED));
    }

    #[test]
    fn test_extrapolation_both_ends() {
        let mut rh = RelationHistory::new();
        rh.push(snapshot(0.0, 0.0), 100 * MS);
        rh.push(snapshot(1.0, 0.0), 200 * MS);

        let (res, ahead) = rh.get(300 * MS);
        assert_eq!(res, HistoryResult::Predicted);
        assert!((ahead.pose.position.x - 1.1).abs() < 1e-5);

        let (res, behind) = rh.get(50 * MS);
        assert_eq!(res, HistoryResult::ReversePredicted);
        assert!((behind.pose.position.x + 0.05).abs() < 1e-5);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut rh = RelationHistory::with_capacity(3);
        for i in 1..=5u64 {
            rh.push(snapshot(i as f32, 0.0), i * MS);
        }
        assert_eq!(rh.len(), 3);
        assert_eq!(rh.get(3 * MS).0, HistoryResult::Exact);
        assert_eq!(rh.get(2 * MS).0, HistoryResult::ReversePredicted);
    }

    #[test]
    fn test_estimate_motion() {
        let mut rh = RelationHistory::new();
        let mut first = snapshot(0.0, 0.0);
        first.linear_velocity = None;
        rh.push(first, 100 * MS);

        let mut next = snapshot(0.2, 0.1);
        next.linear_velocity = None;
        let out = rh.estimate_motion(&next, 200 * MS).unwrap();

        let lin = out.linear_velocity.unwrap();
        assert!((lin - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-4);
        let ang = out.angular_velocity.unwrap();
        assert!((ang - Vec3::new(0.0, 1.0, 0.0)).length() < 1e-3);
        assert!(out.flags.contains(RelationFlags::ANGULAR_VELOCITY_VALID));
        assert!(out.flags.contains(RelationFlags::LINEAR_VELOCITY_VALID));

        assert!(rh.estimate_motion(&next, 100 * MS).is_none());
    }
}
