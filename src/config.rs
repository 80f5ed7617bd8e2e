//! Tracker configuration, read once when a device is set up.

use crate::{FusionError, Result};
use glam::Vec3;
use std::time::Duration;

pub const ENV_TICK_HZ: &str = "POSEFUSION_TICK_HZ";
pub const ENV_REPORT_HZ: &str = "POSEFUSION_REPORT_HZ";
pub const ENV_GRAVITY_WINDOW_MS: &str = "POSEFUSION_GRAVITY_WINDOW_MS";
pub const ENV_USE_SLAM: &str = "POSEFUSION_USE_SLAM";

/// Clock offset estimator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ClockConfig {
    /// Nominal device tick rate, used to turn ticks into nanoseconds.
    pub tick_frequency_hz: f64,
    /// How often clock observations arrive. Sets the smoothing weight.
    pub report_rate_hz: f64,
    /// Observations to see before the offset may be declared stable.
    pub min_observations: u64,
    /// Largest change between consecutive estimates that counts as settled.
    pub stability_tolerance_ns: i64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            tick_frequency_hz: 1_000_000.0,
            report_rate_hz: 250.0,
            min_observations: 100,
            stability_tolerance_ns: 500_000,
        }
    }
}

/// 3DoF fusion filter settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    /// How long the device must look level before gravity corrects tilt.
    /// `None` disables gravity correction.
    pub gravity_trust_window: Option<Duration>,
    /// Integration steps longer than this are treated as clock glitches.
    pub max_step: Duration,
    /// Capacity of the world-accel history used for the gravity mean.
    pub history_len: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            gravity_trust_window: Some(Duration::from_millis(20)),
            max_step: Duration::from_millis(500),
            history_len: 1000,
        }
    }
}

/// Everything a tracked device needs at init.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    pub clock: ClockConfig,
    pub filter: FilterConfig,
    /// Start in external-tracker mode when a tracker is attached.
    pub prefer_external_tracker: bool,
    /// Width of the raw hardware tick counter.
    pub tick_bits: u32,
    /// Position reported while only orientation is tracked.
    pub neutral_position: Vec3,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            clock: ClockConfig::default(),
            filter: FilterConfig::default(),
            prefer_external_tracker: true,
            tick_bits: 32,
            neutral_position: Vec3::ZERO,
        }
    }
}

impl TrackerConfig {
    /// Defaults overridden by `POSEFUSION_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.clock.tick_frequency_hz =
            read_f64(&lookup, ENV_TICK_HZ, config.clock.tick_frequency_hz);
        config.clock.report_rate_hz = read_f64(&lookup, ENV_REPORT_HZ, config.clock.report_rate_hz);

        let default_window_ms = config
            .filter
            .gravity_trust_window
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        config.filter.gravity_trust_window =
            match read_u64(&lookup, ENV_GRAVITY_WINDOW_MS, default_window_ms) {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            };

        config.prefer_external_tracker =
            read_bool(&lookup, ENV_USE_SLAM, config.prefer_external_tracker);

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.clock.tick_frequency_hz > 0.0 && self.clock.tick_frequency_hz.is_finite()) {
            return Err(FusionError::InvalidConfig(format!(
                "tick frequency must be positive, got {}",
                self.clock.tick_frequency_hz
            )));
        }
        if !(self.clock.report_rate_hz > 0.0 && self.clock.report_rate_hz.is_finite()) {
            return Err(FusionError::InvalidConfig(format!(
                "report rate must be positive, got {}",
                self.clock.report_rate_hz
            )));
        }
        if self.clock.stability_tolerance_ns < 0 {
            return Err(FusionError::InvalidConfig(
                "stability tolerance must not be negative".into(),
            ));
        }
        if !(1..=32).contains(&self.tick_bits) {
            return Err(FusionError::InvalidConfig(format!(
                "tick counter width must be 1..=32 bits, got {}",
                self.tick_bits
            )));
        }
        if self.filter.history_len == 0 {
            return Err(FusionError::InvalidConfig(
                "filter history must hold at least one sample".into(),
            ));
        }
        if self.filter.max_step.is_zero() {
            return Err(FusionError::InvalidConfig(
                "max integration step must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

fn read_bool<F: Fn(&str) -> Option<String>>(lookup: &F, name: &str, default: bool) -> bool {
    lookup(name)
        .and_then(|v| {
            let v = v.trim().to_ascii_lowercase();
            match v.as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => {
                    log::warn!("Ignoring {}='{}', expected a boolean", name, v);
                    None
                }
            }
        })
        .unwrap_or(default)
}

fn read_u64<F: Fn(&str) -> Option<String>>(lookup: &F, name: &str, default: u64) -> u64 {
    lookup(name)
        .and_then(|v| match v.trim().parse::<u64>() {
            Ok(n) => Some(n),
            Err(_) => {
                log::warn!("Ignoring {}='{}', expected an integer", name, v);
                None
            }
        })
        .unwrap_or(default)
}

fn read_f64<F: Fn(&str) -> Option<String>>(lookup: &F, name: &str, default: f64) -> f64 {
    lookup(name)
        .and_then(|v| match v.trim().parse::<f64>() {
            Ok(n) => Some(n),
            Err(_) => {
                log::warn!("Ignoring {}='{}', expected a number", name, v);
                None
            }
        })
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = TrackerConfig::default();
        config.validate().unwrap();
        assert_eq!(
            config.filter.gravity_trust_window,
            Some(Duration::from_millis(20))
        );
        assert_eq!(config.clock.min_observations, 100);
    }

    #[test]
    fn test_env_overrides() {
        let config = TrackerConfig::from_lookup(lookup_from(&[
            (ENV_TICK_HZ, "1000000000"),
            (ENV_GRAVITY_WINDOW_MS, "300"),
            (ENV_USE_SLAM, "off"),
        ]))
        .unwrap();
        assert_eq!(config.clock.tick_frequency_hz, 1e9);
        assert_eq!(
            config.filter.gravity_trust_window,
            Some(Duration::from_millis(300))
        );
        assert!(!config.prefer_external_tracker);
    }

    #[test]
    fn test_zero_window_disables_gravity() {
        let config =
            TrackerConfig::from_lookup(lookup_from(&[(ENV_GRAVITY_WINDOW_MS, "0")])).unwrap();
        assert_eq!(config.filter.gravity_trust_window, None);
    }

    #[test]
    fn test_garbage_falls_back_to_default() {
        let config = TrackerConfig::from_lookup(lookup_from(&[
            (ENV_REPORT_HZ, "fast"),
            (ENV_USE_SLAM, "maybe"),
        ]))
        .unwrap();
        assert_eq!(config.clock.report_rate_hz, 250.0);
        assert!(config.prefer_external_tracker);
    }

    #[test]
    fn test_invalid_frequency_rejected() {
        let err = TrackerConfig::from_lookup(lookup_from(&[(ENV_TICK_HZ, "0")])).unwrap_err();
        assert!(matches!(err, FusionError::InvalidConfig(_)));
    }

    #[test]
    fn test_invalid_tick_bits_rejected() {
        let config = TrackerConfig {
            tick_bits: 40,
            ..TrackerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
