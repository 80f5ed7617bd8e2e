use crate::types::{ImuReading, ImuReport};
use crate::{FusionError, Result};
use glam::Vec3;

// -- Report geometry --
pub const IMU_REPORT_ID: u8 = 0x65;
/// Full interrupt report as sent by the headset; trailing bytes are unused here.
pub const REPORT_SIZE: usize = 64;
/// Samples carried by one report.
pub const SAMPLES_PER_REPORT: usize = 3;
/// marker u8 + accel i16×3 + gyro i16×3 + temperature i16.
pub const SAMPLE_SIZE: usize = 15;
/// id u8 + reserved u16 + timestamp u32.
pub const HEADER_SIZE: usize = 7;
/// Bytes needed to decode every sample slot.
pub const IMU_PAYLOAD_SIZE: usize = HEADER_SIZE + SAMPLES_PER_REPORT * SAMPLE_SIZE;

/// Set in a sample marker when that sample and the rest of the report are empty.
pub const MARKER_INVALID: u8 = 0x80;

/// Standard gravity used to turn accelerometer counts into m/s².
const GRAVITY_M_S2: f32 = 9.80665;

/// Per-device conversion from raw counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuScales {
    /// Accelerometer counts for 1 g.
    pub accel_counts_per_g: f32,
    /// Gyroscope counts for 1 °/s.
    pub gyro_counts_per_dps: f32,
    /// Device ticks between consecutive samples in a report.
    pub sample_interval_ticks: u32,
}

impl Default for ImuScales {
    /// ±4 g / ±2000 °/s ranges at 1 kHz on a 1 MHz counter.
    fn default() -> Self {
        Self {
            accel_counts_per_g: 8192.0,
            gyro_counts_per_dps: 16.4,
            sample_interval_ticks: 1000,
        }
    }
}

/// Bounds-checked little-endian cursor over a report buffer.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos + N;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or(FusionError::ReportTooShort {
                expected: end,
                actual: self.data.len(),
            })?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        self.pos = end;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        let end = self.pos + n;
        if end > self.data.len() {
            return Err(FusionError::ReportTooShort {
                expected: end,
                actual: self.data.len(),
            });
        }
        self.pos = end;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.take()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    /// 24-bit unsigned, as used by some controller timestamps.
    pub fn read_u24(&mut self) -> Result<u32> {
        let [a, b, c] = self.take::<3>()?;
        Ok(u32::from_le_bytes([a, b, c, 0]))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take()?))
    }

    pub fn read_i16_vec3(&mut self) -> Result<[i16; 3]> {
        Ok([self.read_i16()?, self.read_i16()?, self.read_i16()?])
    }
}

/// Parse an IMU interrupt report.
///
/// Report layout:
/// - `[0]`: 0x65 report id
/// - `[1..3]`: reserved
/// - `[3..7]`: uint32 LE timestamp of the first sample (device µs)
/// - `[7..52]`: 3 samples of `{marker u8, accel i16×3, gyro i16×3, temperature i16}`
///
/// A sample whose marker has bit 7 set ends the report.
pub fn parse_imu_report(data: &[u8], scales: &ImuScales) -> Result<ImuReport> {
    if data.len() < IMU_PAYLOAD_SIZE {
        return Err(FusionError::ReportTooShort {
            expected: IMU_PAYLOAD_SIZE,
            actual: data.len(),
        });
    }

    let mut reader = ByteReader::new(data);
    let id = reader.read_u8()?;
    if id != IMU_REPORT_ID {
        return Err(FusionError::InvalidReportId(id));
    }
    reader.skip(2)?;
    let timestamp = reader.read_u32()?;

    let accel_scale = GRAVITY_M_S2 / scales.accel_counts_per_g;
    let gyro_scale = (1.0 / scales.gyro_counts_per_dps).to_radians();

    let mut readings = Vec::with_capacity(SAMPLES_PER_REPORT);
    for _ in 0..SAMPLES_PER_REPORT {
        let marker = reader.read_u8()?;
        if marker & MARKER_INVALID != 0 {
            break;
        }
        let accel = reader.read_i16_vec3()?;
        let gyro = reader.read_i16_vec3()?;
        let _temperature = reader.read_i16()?;

        readings.push(ImuReading {
            accel: counts_to_vec3(accel) * accel_scale,
            gyro: counts_to_vec3(gyro) * gyro_scale,
        });
    }

    Ok(ImuReport {
        timestamp,
        interval_ticks: scales.sample_interval_ticks,
        readings,
    })
}

fn counts_to_vec3(raw: [i16; 3]) -> Vec3 {
    Vec3::new(raw[0] as f32, raw[1] as f32, raw[2] as f32)
}

/// Build a report buffer from raw counts. Used by tests and the replay demo.
pub fn encode_imu_report(timestamp: u32, samples: &[([i16; 3], [i16; 3])]) -> [u8; REPORT_SIZE] {
    let mut buf = [0u8; REPORT_SIZE];
    buf[0] = IMU_REPORT_ID;
    buf[3..7].copy_from_slice(&timestamp.to_le_bytes());

    for slot in 0..SAMPLES_PER_REPORT {
        let base = HEADER_SIZE + slot * SAMPLE_SIZE;
        let Some((accel, gyro)) = samples.get(slot) else {
            buf[base] = MARKER_INVALID;
            continue;
        };
        let mut off = base + 1;
        for v in accel.iter().chain(gyro.iter()) {
            buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
            off += 2;
        }
    }
    buf
}
