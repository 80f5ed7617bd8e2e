//! Extension of narrow hardware counters into monotonic 64-bit values.
//!
//! Neither type is synchronized: each instance belongs to the single
//! producer thread that reads the hardware.

const NS_PER_US: u64 = 1_000;

/// Extends a free-running counter of `bits` width (at most 32) to 64 bits.
///
/// A raw value smaller than the previous one is taken as a wraparound.
#[derive(Debug, Clone)]
pub struct TickExtender {
    bits: u32,
    last_raw: Option<u32>,
    high: u64,
}

impl TickExtender {
    /// Extender for a full 32-bit counter.
    pub fn new() -> Self {
        Self::with_bits(32)
    }

    /// Extender for a counter `bits` wide. Clamped to `1..=32`.
    pub fn with_bits(bits: u32) -> Self {
        Self {
            bits: bits.clamp(1, 32),
            last_raw: None,
            high: 0,
        }
    }

    fn mask(&self) -> u64 {
        (1u64 << self.bits) - 1
    }

    /// Feed the next raw counter value and get the extended one.
    pub fn extend(&mut self, raw: u32) -> u64 {
        let raw = (raw as u64 & self.mask()) as u32;
        if let Some(last) = self.last_raw {
            if raw < last {
                self.high += 1u64 << self.bits;
            }
        }
        self.last_raw = Some(raw);
        self.high + raw as u64
    }

    /// Last extended value, if any raw value was seen.
    pub fn current(&self) -> Option<u64> {
        self.last_raw.map(|raw| self.high + raw as u64)
    }
}

impl Default for TickExtender {
    fn default() -> Self {
        Self::new()
    }
}

/// 32-bit microsecond device clock turned into a 64-bit nanosecond timeline.
///
/// Advances by wrapping deltas so the 71.5 minute rollover is invisible.
/// Repeated reports (delta 0) and steps backwards (delta above 2^31) are
/// rejected; controllers are known to resend the same IMU report.
#[derive(Debug, Clone, Default)]
pub struct MicrosTimeline {
    last_raw: Option<u32>,
    time_ns: u64,
}

impl MicrosTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the device time in ns, or `None` if the report must be ignored.
    pub fn advance(&mut self, raw_us: u32) -> Option<u64> {
        match self.last_raw {
            Some(last) => {
                let dt = raw_us.wrapping_sub(last);
                if dt == 0 || dt > (1u32 << 31) {
                    log::trace!("Ignoring repeated IMU timestamp {} (last {})", raw_us, last);
                    return None;
                }
                self.time_ns += dt as u64 * NS_PER_US;
            }
            None => {
                self.time_ns = raw_us as u64 * NS_PER_US;
            }
        }
        self.last_raw = Some(raw_us);
        Some(self.time_ns)
    }

    pub fn time_ns(&self) -> Option<u64> {
        self.last_raw.map(|_| self.time_ns)
    }
}
