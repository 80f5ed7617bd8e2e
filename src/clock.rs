//! Device-to-host clock reconciliation.
//!
//! Devices stamp IMU reports with a free-running tick counter. The
//! [`ClockOffsetEstimator`] keeps a smoothed offset so that
//! `host_ns ≈ device_ns + offset`, and flags when that mapping has settled.

use crate::config::ClockConfig;
use std::time::Instant;

const NS_PER_S: f64 = 1_000_000_000.0;

/// Host monotonic clock in nanoseconds since an arbitrary epoch.
///
/// Cloning shares the epoch, so every clone reports the same time base.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert device ticks to nanoseconds at `frequency_hz`.
///
/// Done in double precision; tick counts stay exact up to 2^53.
pub fn ticks_to_ns(ticks: u64, frequency_hz: f64) -> u64 {
    if frequency_hz <= 0.0 || !frequency_hz.is_finite() {
        return 0;
    }
    (ticks as f64 * NS_PER_S / frequency_hz).round() as u64
}

/// Running estimate of the device-to-host clock offset.
///
/// Not internally synchronized; the owning service serializes access.
#[derive(Debug, Clone)]
pub struct ClockOffsetEstimator {
    config: ClockConfig,
    offset_ns: Option<i64>,
    observations: u64,
    stable: bool,
}

impl ClockOffsetEstimator {
    pub fn new(config: ClockConfig) -> Self {
        Self {
            config,
            offset_ns: None,
            observations: 0,
            stable: false,
        }
    }

    /// Weight given to the accumulated offset on each observation.
    fn alpha(&self) -> f64 {
        (1.0 - 12.5 / self.config.report_rate_hz).clamp(0.0, 0.999)
    }

    /// Feed one `(device ticks, host time)` pair.
    ///
    /// A non-positive or non-finite frequency makes this a no-op.
    pub fn observe(&mut self, device_ticks: u64, host_time_ns: u64, nominal_frequency_hz: f64) {
        if nominal_frequency_hz <= 0.0 || !nominal_frequency_hz.is_finite() {
            return;
        }

        let device_ns = ticks_to_ns(device_ticks, nominal_frequency_hz);
        let candidate = host_time_ns as i64 - device_ns as i64;

        let previous = self.offset_ns;
        let smoothed = match previous {
            None => candidate,
            Some(old) => {
                let alpha = self.alpha();
                (old as f64 * alpha + candidate as f64 * (1.0 - alpha)).round() as i64
            }
        };
        self.offset_ns = Some(smoothed);
        self.observations += 1;

        if self.stable || self.observations < self.config.min_observations {
            return;
        }

        if let Some(old) = previous {
            let change = smoothed - old;
            if change.abs() <= self.config.stability_tolerance_ns {
                log::info!(
                    "Device to host clock map stabilised after {} observations (offset {} ns)",
                    self.observations,
                    smoothed
                );
                self.stable = true;
            }
        }
    }

    /// Feed an observation using the configured tick frequency.
    pub fn observe_ticks(&mut self, device_ticks: u64, host_time_ns: u64) {
        self.observe(device_ticks, host_time_ns, self.config.tick_frequency_hz);
    }

    /// Map a device timestamp (already in ns) onto the host clock.
    pub fn convert(&self, device_ns: u64) -> u64 {
        let offset = self.offset_ns.unwrap_or(0);
        (device_ns as i64).saturating_add(offset).max(0) as u64
    }

    /// Device ticks at the configured frequency, in ns.
    pub fn ticks_to_ns(&self, device_ticks: u64) -> u64 {
        ticks_to_ns(device_ticks, self.config.tick_frequency_hz)
    }

    pub fn is_stable(&self) -> bool {
        self.stable
    }

    pub fn offset_ns(&self) -> Option<i64> {
        self.offset_ns
    }

    pub fn observations(&self) -> u64 {
        self.observations
    }
}
