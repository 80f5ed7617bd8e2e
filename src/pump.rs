use crate::clock::MonotonicClock;
use crate::protocol::{self, ImuScales};
use crate::service::PoseService;
use crate::ticks::{MicrosTimeline, TickExtender};
use crate::types::ImuReport;
use crate::{FusionError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long a source read may block before the stop flag is checked again.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Anything that yields decoded IMU reports: a HID handle, a replay file,
/// a test channel.
pub trait ImuSource: Send + 'static {
    /// Wait up to `timeout` for the next report.
    ///
    /// `Ok(None)` means nothing arrived in time. `SourceDisconnected` ends
    /// the polling thread; other errors are logged and reading continues.
    fn read_report(&mut self, timeout: Duration) -> Result<Option<ImuReport>>;
}

/// Reports already decoded by another thread.
pub struct ChannelSource {
    receiver: Receiver<ImuReport>,
}

impl ChannelSource {
    pub fn new(receiver: Receiver<ImuReport>) -> Self {
        Self { receiver }
    }
}

impl ImuSource for ChannelSource {
    fn read_report(&mut self, timeout: Duration) -> Result<Option<ImuReport>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(report) => Ok(Some(report)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(FusionError::SourceDisconnected),
        }
    }
}

/// Raw interrupt reports, decoded with [`protocol::parse_imu_report`].
pub struct PacketSource {
    receiver: Receiver<Vec<u8>>,
    scales: ImuScales,
}

impl PacketSource {
    pub fn new(receiver: Receiver<Vec<u8>>, scales: ImuScales) -> Self {
        Self { receiver, scales }
    }
}

impl ImuSource for PacketSource {
    fn read_report(&mut self, timeout: Duration) -> Result<Option<ImuReport>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(packet) => protocol::parse_imu_report(&packet, &self.scales).map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(FusionError::SourceDisconnected),
        }
    }
}

/// Tick rate [`TimestampPolicy::SkipRepeats`] produces.
const MICROS_TICK_HZ: f64 = 1_000_000.0;

/// How raw report timestamps are turned into 64-bit device ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampPolicy {
    /// Free-running counter of the given width; every report is used.
    Wrapping { bits: u32 },
    /// 32-bit microsecond counter; repeated or backwards reports are
    /// skipped. Needs a 1 MHz tick frequency.
    SkipRepeats,
}

enum ReportClock {
    Wrapping(TickExtender),
    SkipRepeats(MicrosTimeline),
}

impl ReportClock {
    fn new(policy: TimestampPolicy) -> Self {
        match policy {
            TimestampPolicy::Wrapping { bits } => ReportClock::Wrapping(TickExtender::with_bits(bits)),
            TimestampPolicy::SkipRepeats => ReportClock::SkipRepeats(MicrosTimeline::new()),
        }
    }

    fn ticks(&mut self, raw: u32) -> Option<u64> {
        match self {
            ReportClock::Wrapping(ext) => Some(ext.extend(raw)),
            ReportClock::SkipRepeats(timeline) => timeline.advance(raw).map(|ns| ns / 1_000),
        }
    }
}

/// Handle to a device's IMU polling thread.
///
/// The thread owns the source, stamps every report with the host receive
/// time and feeds the [`PoseService`]. It is joined on [`stop`](Self::stop)
/// or drop, so the service never sees input after the pump is gone.
pub struct ImuPump {
    stop_flag: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
    clock: MonotonicClock,
}

impl ImuPump {
    /// Start polling with the counter width from the service config.
    pub fn start<S: ImuSource>(source: S, service: Arc<PoseService>, clock: MonotonicClock) -> Result<ImuPump> {
        let bits = service.config().tick_bits;
        Self::start_with(source, service, clock, TimestampPolicy::Wrapping { bits })
    }

    pub fn start_with<S: ImuSource>(
        source: S,
        service: Arc<PoseService>,
        clock: MonotonicClock,
        policy: TimestampPolicy,
    ) -> Result<ImuPump> {
        let tick_hz = service.config().clock.tick_frequency_hz;
        if policy == TimestampPolicy::SkipRepeats && tick_hz != MICROS_TICK_HZ {
            return Err(FusionError::InvalidConfig(format!(
                "microsecond report timestamps need a {} Hz tick frequency, got {}",
                MICROS_TICK_HZ, tick_hz
            )));
        }

        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_clone = stop_flag.clone();

        let thread = std::thread::Builder::new()
            .name("posefusion-imu".into())
            .spawn(move || {
                pump_loop(source, service, clock, ReportClock::new(policy), &stop_clone);
                stop_clone.store(true, Ordering::Relaxed);
            })
            .map_err(|e| FusionError::ThreadSpawn(e.to_string()))?;

        Ok(ImuPump {
            stop_flag,
            thread: Some(thread),
            clock,
        })
    }

    /// Host clock the pump stamps reports with; pose queries must use it too.
    pub fn clock(&self) -> MonotonicClock {
        self.clock
    }

    /// Check if the polling thread is still running.
    pub fn is_active(&self) -> bool {
        !self.stop_flag.load(Ordering::Relaxed)
    }

    /// Stop polling and wait for the thread to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ImuPump {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn pump_loop<S: ImuSource>(
    mut source: S,
    service: Arc<PoseService>,
    clock: MonotonicClock,
    mut report_clock: ReportClock,
    stop_flag: &AtomicBool,
) {
    log::info!("IMU pump started");

    loop {
        if stop_flag.load(Ordering::Relaxed) {
            log::info!("IMU pump stopping (stop flag set)");
            break;
        }

        let report = match source.read_report(READ_TIMEOUT) {
            Ok(Some(report)) => report,
            Ok(None) => continue,
            Err(FusionError::SourceDisconnected) => {
                log::info!("IMU source disconnected, stopping pump");
                break;
            }
            Err(e) => {
                log::warn!("IMU read error: {}", e);
                continue;
            }
        };

        let host_ns = clock.now_ns();
        let Some(ticks) = report_clock.ticks(report.timestamp) else {
            continue;
        };

        service.observe_clock(ticks, host_ns);

        let interval = report.interval_ticks as u64;
        for (i, reading) in report.readings.iter().enumerate() {
            service.ingest_imu_sample(ticks + i as u64 * interval, reading.accel, reading.gyro);
        }
    }
}
