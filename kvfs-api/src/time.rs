//! Nanosecond-resolution timestamps for file attributes

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds + nanoseconds since the epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: u32,
}

impl Timespec {
    pub const WIRE_SIZE: usize = 12;

    pub const fn new(sec: i64, nsec: u32) -> Self {
        Self { sec, nsec }
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => Self {
                sec: d.as_secs() as i64,
                nsec: d.subsec_nanos(),
            },
            // Clock before the epoch; clamp rather than panic.
            Err(_) => Self { sec: 0, nsec: 0 },
        }
    }

    pub fn to_bytes(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[..8].copy_from_slice(&self.sec.to_le_bytes());
        out[8..].copy_from_slice(&self.nsec.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; 12]) -> Self {
        Self {
            sec: i64::from_le_bytes(bytes[..8].try_into().unwrap()),
            nsec: u32::from_le_bytes(bytes[8..].try_into().unwrap()),
        }
    }
}
