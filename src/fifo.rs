//! Fixed-capacity ring of timestamped vectors with windowed averaging.

use glam::Vec3;

/// Ring buffer of `(timestamp_ns, Vec3)` samples.
///
/// Storage is allocated once; pushing overwrites the oldest sample.
/// Timestamps must be pushed in non-decreasing order.
#[derive(Debug, Clone)]
pub struct TimedFifo {
    samples: Vec<Vec3>,
    timestamps_ns: Vec<u64>,
    /// Index of the newest sample.
    latest: usize,
    len: usize,
}

impl TimedFifo {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: vec![Vec3::ZERO; capacity],
            timestamps_ns: vec![0; capacity],
            latest: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.latest = 0;
        self.len = 0;
    }

    pub fn push(&mut self, sample: Vec3, timestamp_ns: u64) {
        debug_assert!(
            self.is_empty() || self.timestamps_ns[self.latest] <= timestamp_ns,
            "fifo timestamps must not go backwards"
        );

        let next = if self.is_empty() {
            0
        } else {
            (self.latest + 1) % self.capacity()
        };
        self.samples[next] = sample;
        self.timestamps_ns[next] = timestamp_ns;
        self.latest = next;
        self.len = (self.len + 1).min(self.capacity());
    }

    /// The `age`-th newest sample (0 = newest).
    pub fn get(&self, age: usize) -> Option<(Vec3, u64)> {
        if age >= self.len {
            return None;
        }
        let pos = (self.latest + self.capacity() - age) % self.capacity();
        Some((self.samples[pos], self.timestamps_ns[pos]))
    }

    /// Mean of all samples with `start_ns <= t <= stop_ns`.
    ///
    /// Returns the mean and how many samples contributed; the mean is zero
    /// when nothing falls in the window. Accumulates in double precision.
    pub fn mean(&self, start_ns: u64, stop_ns: u64) -> (Vec3, usize) {
        if start_ns > stop_ns {
            return (Vec3::ZERO, 0);
        }

        let (mut x, mut y, mut z) = (0.0f64, 0.0f64, 0.0f64);
        let mut count = 0usize;

        for age in 0..self.len {
            let Some((sample, ts)) = self.get(age) else {
                break;
            };
            if ts > stop_ns {
                continue;
            }
            if ts < start_ns {
                break;
            }
            x += sample.x as f64;
            y += sample.y as f64;
            z += sample.z as f64;
            count += 1;
        }

        if count == 0 {
            return (Vec3::ZERO, 0);
        }
        let n = count as f64;
        (
            Vec3::new((x / n) as f32, (y / n) as f32, (z / n) as f32),
            count,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overwrites_oldest() {
        let mut ff = TimedFifo::new(3);
        for i in 0..5u64 {
            ff.push(Vec3::splat(i as f32), i * 10);
        }
        assert_eq!(ff.len(), 3);
        assert_eq!(ff.get(0), Some((Vec3::splat(4.0), 40)));
        assert_eq!(ff.get(2), Some((Vec3::splat(2.0), 20)));
        assert_eq!(ff.get(3), None);
    }

    #[test]
    fn test_window_mean() {
        let mut ff = TimedFifo::new(16);
        for i in 0..10u64 {
            ff.push(Vec3::new(i as f32, 0.0, 1.0), i * 1_000);
        }
        let (mean, count) = ff.mean(3_000, 6_000);
        assert_eq!(count, 4);
        assert!((mean.x - 4.5).abs() < 1e-6);
        assert!((mean.z - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_window() {
        let mut ff = TimedFifo::new(4);
        assert_eq!(ff.mean(0, 100), (Vec3::ZERO, 0));
        ff.push(Vec3::ONE, 500);
        assert_eq!(ff.mean(0, 100), (Vec3::ZERO, 0));
        assert_eq!(ff.mean(600, 100), (Vec3::ZERO, 0));
    }

    #[test]
    fn test_clear() {
        let mut ff = TimedFifo::new(4);
        ff.push(Vec3::ONE, 10);
        ff.clear();
        assert!(ff.is_empty());
        ff.push(Vec3::X, 5);
        assert_eq!(ff.get(0), Some((Vec3::X, 5)));
    }
}
