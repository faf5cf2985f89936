//! Timing utilities
//!
//! Suite and test records carry wall-clock timestamps in milliseconds since
//! the Unix epoch; durations are measured separately with a monotonic clock.

use std::time::Duration;

/// Milliseconds since the Unix epoch
#[inline]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Wall-clock start paired with a monotonic start
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started_at: i64,
    instant: tokio::time::Instant,
}

impl Stopwatch {
    #[inline]
    pub fn start() -> Self {
        Self {
            started_at: now_millis(),
            instant: tokio::time::Instant::now(),
        }
    }

    /// Epoch milliseconds when the stopwatch started
    #[inline]
    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.instant.elapsed()
    }

    #[inline]
    pub fn elapsed_millis(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::start()
    }
}

/// Format a duration in human-readable form
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use fleetsync::util::time::format_duration;
///
/// assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
/// assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();

    if millis < 1_000 {
        format!("{}ms", millis)
    } else if millis < 60_000 {
        format!("{:.2}s", millis as f64 / 1_000.0)
    } else {
        let secs = duration.as_secs();
        format!("{}m{}s", secs / 60, secs % 60)
    }
}
