//! Wall-clock sources.
//!
//! The orchestrator never reads time directly; it asks a [`Clock`] so the
//! simulation can be driven by real time, by tokio's pausable time, or by a
//! hand-advanced clock in tests.

use std::cell::Cell;
use std::rc::Rc;

/// Source of wall-clock milliseconds since the Unix epoch.
pub trait Clock {
    fn now_ms(&self) -> i64;
}

/// Real time via `chrono`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Hand-advanced clock. Clones share the same instant.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<i64>>,
}

impl ManualClock {
    #[must_use]
    pub fn starting_at(now_ms: i64) -> Self {
        Self {
            now: Rc::new(Cell::new(now_ms)),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.set(now_ms);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.set(self.now.get().saturating_add(delta_ms));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.get()
    }
}

/// Clock anchored to an epoch instant and advanced by tokio's monotonic time.
///
/// Under `#[tokio::test(start_paused = true)]` this follows virtual time, so
/// the runtime loop can be exercised without sleeping.
#[cfg(feature = "async")]
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    epoch_ms: i64,
    origin: tokio::time::Instant,
}

#[cfg(feature = "async")]
impl TokioClock {
    #[must_use]
    pub fn anchored_at(epoch_ms: i64) -> Self {
        Self {
            epoch_ms,
            origin: tokio::time::Instant::now(),
        }
    }

    #[must_use]
    pub fn from_system() -> Self {
        Self::anchored_at(SystemClock.now_ms())
    }
}

#[cfg(feature = "async")]
impl Clock for TokioClock {
    fn now_ms(&self) -> i64 {
        let elapsed = i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.epoch_ms.saturating_add(elapsed)
    }
}

/// Format a timestamp as the `[HH:MM:SS]` stamp used by narrative logs.
#[must_use]
pub fn stamp(now_ms: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(now_ms)
        .map_or_else(|| String::from("--:--:--"), |dt| dt.format("%H:%M:%S").to_string())
}

/// Human readable duration (`1h 2m 3s`, `4m 5s`, `6s`).
#[must_use]
pub fn format_duration_ms(ms: f64) -> String {
    let total = crate::numbers::floor_f64_to_u64(ms / 1000.0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::starting_at(1_000);
        let other = clock.clone();
        clock.advance(250);
        assert_eq!(other.now_ms(), 1_250);
        other.set(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn stamp_formats_utc_time() {
        // 1970-01-01T01:02:03Z
        assert_eq!(stamp(3_723_000), "01:02:03");
    }

    #[test]
    fn durations_pick_largest_unit() {
        assert_eq!(format_duration_ms(3_600_000.0), "1h 0m 0s");
        assert_eq!(format_duration_ms(65_000.0), "1m 5s");
        assert_eq!(format_duration_ms(999.0), "0s");
    }

    #[cfg(feature = "async")]
    #[tokio::test(start_paused = true)]
    async fn tokio_clock_follows_virtual_time() {
        let clock = TokioClock::anchored_at(5_000);
        tokio::time::advance(std::time::Duration::from_millis(1_500)).await;
        assert_eq!(clock.now_ms(), 6_500);
    }
}
