//! Drive an `ImuDevice` with synthetic IMU reports and print the fused pose.
//!
//! A generator thread plays a headset resting level for one second, then
//! turning its head at 90°/s, as raw 0x65 reports at the real rate.
//!
//! Usage: cargo run --example replay
//! Set POSEFUSION_* variables to change the tracker config.

use posefusion::protocol::{self, ImuScales};
use posefusion::pump::PacketSource;
use posefusion::{DeviceInfo, ImuDevice, TrackedDevice, TrackerConfig};
use std::time::{Duration, Instant};

const RUN_FOR: Duration = Duration::from_secs(4);

fn main() {
    env_logger::init();

    let config = match TrackerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Bad configuration: {}", e);
            std::process::exit(1);
        }
    };

    let scales = ImuScales::default();
    let (tx, rx) = crossbeam_channel::bounded::<Vec<u8>>(64);

    let info = DeviceInfo {
        name: "Synthetic HMD".into(),
        serial: "REPLAY-0001".into(),
    };
    let device = match ImuDevice::open(info, PacketSource::new(rx, scales), config) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Failed to open device: {}", e);
            std::process::exit(1);
        }
    };

    let generator = std::thread::spawn(move || {
        let start = Instant::now();
        let report_period = Duration::from_micros(3 * scales.sample_interval_ticks as u64);
        // 90°/s about Y once the first second is over.
        let spin_counts = (90.0 * scales.gyro_counts_per_dps) as i16;
        let one_g = scales.accel_counts_per_g as i16;

        // Close to rollover so the 32-bit counter wraps during the run.
        let mut timestamp: u32 = 0xffc0_0000;
        while start.elapsed() < RUN_FOR {
            let gyro_y = if start.elapsed() > Duration::from_secs(1) {
                spin_counts
            } else {
                0
            };
            let sample = ([0, one_g, 0], [0, gyro_y, 0]);
            let packet = protocol::encode_imu_report(timestamp, &[sample; 3]);
            if tx.send(packet.to_vec()).is_err() {
                break;
            }
            timestamp = timestamp.wrapping_add(3 * scales.sample_interval_ticks);
            std::thread::sleep(report_period);
        }
    });

    println!("Replaying synthetic IMU for {:?}...", RUN_FOR);

    let start = Instant::now();
    let mut last_print = Instant::now();
    while start.elapsed() < RUN_FOR {
        std::thread::sleep(Duration::from_millis(10));
        if last_print.elapsed() < Duration::from_millis(250) {
            continue;
        }
        last_print = Instant::now();

        // Predict one frame ahead, as a compositor would.
        let pose = device.get_tracked_pose(device.now_ns() + 11_000_000);
        let (axis, angle) = pose.pose.orientation.to_axis_angle();
        println!(
            "t={:>5.2}s  stable={:<5}  yaw={:+7.1}°  axis=[{:+.2}, {:+.2}, {:+.2}]  flags={:?}",
            start.elapsed().as_secs_f64(),
            device.service().is_clock_stable(),
            angle.to_degrees() * axis.y.signum(),
            axis.x,
            axis.y,
            axis.z,
            pose.flags,
        );
    }

    let _ = generator.join();
    println!("\nClock offset: {:?} ns", device.service().clock_offset_ns());
}
