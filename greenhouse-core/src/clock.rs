//! Monotonic and wall-clock-of-day time (C1).
//!
//! Grounded on `original_source/GHS/include/Common/Timing.hpp`: a
//! process-lifetime monotonic clock, plus a one-shot calibration that lets
//! the rest of the system ask "what second of the day is it" without the
//! core depending on an RTC or NTP client directly; those stay external
//! collaborators.

use parking_lot::Mutex;
use std::time::Instant;

pub const SECONDS_PER_DAY: u32 = 86_400;

/// `hh:mm:ss` plus the raw seconds-past-midnight value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallTime {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub seconds_of_day: u32,
}

impl WallTime {
    fn from_seconds_of_day(seconds_of_day: u32) -> Self {
        let seconds_of_day = seconds_of_day % SECONDS_PER_DAY;
        Self {
            hour: (seconds_of_day / 3600) as u8,
            minute: ((seconds_of_day % 3600) / 60) as u8,
            second: (seconds_of_day % 60) as u8,
            seconds_of_day,
        }
    }
}

#[derive(Debug)]
struct Calibration {
    seconds_of_day_at_calibration: u32,
    calibrated_at_monotonic_seconds: u64,
    calibrated: bool,
}

/// Process-lifetime clock. One instance is owned at the application root and
/// shared via `Arc`; it never wraps within a mission lifetime.
pub struct Clock {
    boot: Instant,
    calibration: Mutex<Calibration>,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        Self {
            boot: Instant::now(),
            calibration: Mutex::new(Calibration {
                seconds_of_day_at_calibration: 0,
                calibrated_at_monotonic_seconds: 0,
                calibrated: false,
            }),
        }
    }

    pub fn micros(&self) -> u64 {
        self.boot.elapsed().as_micros() as u64
    }

    pub fn millis(&self) -> u64 {
        self.boot.elapsed().as_millis() as u64
    }

    pub fn seconds(&self) -> u64 {
        self.boot.elapsed().as_secs()
    }

    /// Sets the wall-clock epoch. `seconds_of_day` is clamped into
    /// `0..SECONDS_PER_DAY` rather than rejected, since a calibration source
    /// (NTP, RTC) close to a day boundary is still useful data.
    pub fn calibrate(&self, seconds_of_day: u32) {
        let mut cal = self.calibration.lock();
        cal.seconds_of_day_at_calibration = seconds_of_day % SECONDS_PER_DAY;
        cal.calibrated_at_monotonic_seconds = self.seconds();
        cal.calibrated = true;
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration.lock().calibrated
    }

    /// Current wall time. Before calibration this reports seconds-of-day
    /// computed from a zero epoch (i.e. "time since boot mod a day"); the
    /// caller should consult [`Clock::is_calibrated`] before trusting it for
    /// anything but relative scheduling. Daily schedulers (C7, C12) may
    /// still run uncalibrated; their first-boot behavior is simply "as if
    /// calibrated at seconds_of_day = 0 at boot".
    pub fn wall(&self) -> WallTime {
        let cal = self.calibration.lock();
        let elapsed = self.seconds().saturating_sub(cal.calibrated_at_monotonic_seconds);
        let seconds_of_day =
            (cal.seconds_of_day_at_calibration as u64 + elapsed) % SECONDS_PER_DAY as u64;
        WallTime::from_seconds_of_day(seconds_of_day as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncalibrated_reports_time_since_boot() {
        let clock = Clock::new();
        assert!(!clock.is_calibrated());
        let wall = clock.wall();
        assert_eq!(wall.seconds_of_day, 0);
    }

    #[test]
    fn calibration_sets_seconds_of_day() {
        let clock = Clock::new();
        clock.calibrate(3600 * 10); // 10:00:00
        assert!(clock.is_calibrated());
        let wall = clock.wall();
        assert_eq!(wall.hour, 10);
        assert_eq!(wall.minute, 0);
        assert_eq!(wall.second, 0);
    }

    #[test]
    fn calibration_out_of_range_wraps() {
        let clock = Clock::new();
        clock.calibrate(SECONDS_PER_DAY + 30);
        let wall = clock.wall();
        assert_eq!(wall.seconds_of_day, 30);
    }

    #[test]
    fn wall_time_field_decomposition() {
        let wt = WallTime::from_seconds_of_day(84_600); // 23:30:00
        assert_eq!((wt.hour, wt.minute, wt.second), (23, 30, 0));
        let wt = WallTime::from_seconds_of_day(3_600); // 01:00:00
        assert_eq!((wt.hour, wt.minute, wt.second), (1, 0, 0));
    }
}
