//! Wall-clock access for timestamp banners and export file names.
//!
//! Export code never calls `chrono::Local::now()` directly; it asks a
//! [`Clock`] so tests can pin the time.

use chrono::{DateTime, Local, TimeZone};

/// Format used for timestamps burned into frames and written to records.
pub const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format used in generated file and directory names.
pub const FILE_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;

    /// Human-readable timestamp, e.g. `2024-05-01 13:45:09`.
    fn display_stamp(&self) -> String {
        self.now().format(DISPLAY_FORMAT).to_string()
    }

    /// Compact timestamp for file names, e.g. `20240501_134509`.
    fn file_stamp(&self) -> String {
        self.now().format(FILE_STAMP_FORMAT).to_string()
    }
}

/// The host's local clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    at: DateTime<Local>,
}

impl FixedClock {
    pub fn new(at: DateTime<Local>) -> Self {
        Self { at }
    }

    /// Build from local calendar fields; returns `None` for invalid or
    /// ambiguous local times.
    pub fn from_ymd_hms(year: i32, month: u32, day: u32, h: u32, m: u32, s: u32) -> Option<Self> {
        Local
            .with_ymd_and_hms(year, month, day, h, m, s)
            .single()
            .map(Self::new)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        self.at
    }
}
