use std::fmt;

/// Errors surfaced by configuration, report decoding and device plumbing.
///
/// The continuous tracking paths (clock observation, filter updates, pose
/// queries) never produce these; bad samples are logged and dropped there.
#[derive(Debug, thiserror::Error)]
pub enum FusionError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IMU report too short: expected {expected} bytes, got {actual}")]
    ReportTooShort { expected: usize, actual: usize },

    #[error("Invalid report: expected id 0x65, got 0x{0:02x}")]
    InvalidReportId(u8),

    #[error("IMU source disconnected")]
    SourceDisconnected,

    #[error("Timeout waiting for data")]
    Timeout,

    #[error("Failed to spawn polling thread: {0}")]
    ThreadSpawn(String),

    #[error("Output not supported: {0}")]
    UnsupportedOutput(String),
}

/// Thread-safe last-error storage for the C FFI layer.
pub(crate) struct LastError {
    message: std::sync::Mutex<String>,
}

impl LastError {
    pub const fn new() -> Self {
        Self {
            message: std::sync::Mutex::new(String::new()),
        }
    }

    pub fn set(&self, err: &FusionError) {
        if let Ok(mut msg) = self.message.lock() {
            *msg = fmt::format(format_args!("{}\0", err));
        }
    }

    pub fn as_ptr(&self) -> *const std::ffi::c_char {
        match self.message.lock() {
            Ok(msg) if !msg.is_empty() => msg.as_ptr() as *const std::ffi::c_char,
            _ => std::ptr::null(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_error_roundtrip() {
        let last = LastError::new();
        assert!(last.as_ptr().is_null());

        last.set(&FusionError::InvalidReportId(0x12));
        let ptr = last.as_ptr();
        assert!(!ptr.is_null());
        let msg = unsafe { std::ffi::CStr::from_ptr(ptr) };
        assert_eq!(msg.to_str().unwrap(), "Invalid report: expected id 0x65, got 0x12");
    }
}
