//! # Sensor Sampling Module
//!
//! Turns noisy single-shot ultrasonic measurements into one denoised distance.
//!
//! ## Filter
//!
//! 1. Take 5 raw measurements, each bounded by a 30 ms echo timeout, with a
//!    60 ms settle delay after each one so reflections die down.
//! 2. Sort them; the middle value is the median `m`. A timed-out measurement
//!    sorts below every real distance.
//! 3. Average the 3 interior values that lie within 300 mm of `m`. If none
//!    does, use `m` itself. A timed-out median means the burst failed.
//! 4. Run the whole burst twice, 100 ms apart. Average both results when both
//!    succeeded, otherwise keep the one that did.
//!
//! The median rejects single dropouts, the window around it rejects
//! multi-path echoes off the tank walls, and the second burst rejects
//! transient splashes.

pub mod ranger;

use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use ranger::RangeFinder;

/// Raw measurements per burst
pub const RAW_SAMPLES: usize = 5;

/// Maximum wait for one echo
pub const ECHO_TIMEOUT: Duration = Duration::from_millis(30);

/// Delay after each raw measurement
pub const SETTLE_DELAY: Duration = Duration::from_millis(60);

/// Delay between the two bursts
pub const BURST_GAP: Duration = Duration::from_millis(100);

/// Interior values further than this from the median are discarded
pub const MEDIAN_WINDOW_MM: i32 = 300;

/// Produces filtered distance samples from a range finder
pub struct SensorSampler<R> {
    ranger: R,
}

impl<R: RangeFinder> SensorSampler<R> {
    pub fn new(ranger: R) -> Self {
        Self { ranger }
    }

    /// Take one filtered distance sample
    ///
    /// Takes roughly 0.7 s with a responsive sensor and about 1 s when every
    /// echo times out.
    ///
    /// # Returns
    ///
    /// Distance in mm, or `None` if neither burst produced a reading
    pub async fn sample(&mut self) -> Option<i32> {
        let first = self.burst().await;
        sleep(BURST_GAP).await;
        let second = self.burst().await;

        let result = match (first, second) {
            (Some(a), Some(b)) => Some((a + b) / 2),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        };
        debug!("Sample bursts {:?} / {:?} -> {:?}", first, second, result);
        result
    }

    async fn burst(&mut self) -> Option<i32> {
        let mut raw = [None; RAW_SAMPLES];
        for slot in raw.iter_mut() {
            *slot = self.ranger.measure(ECHO_TIMEOUT).await;
            sleep(SETTLE_DELAY).await;
        }
        filter_burst(&raw)
    }
}

/// Median-anchored trimmed mean over one burst of raw measurements
///
/// # Examples
///
/// ```
/// use tank_bridge::sensor::filter_burst;
///
/// // One multi-path echo and one dropout are both rejected
/// let raw = [Some(510), Some(1900), None, Some(500), Some(490)];
/// assert_eq!(filter_burst(&raw), Some(500));
/// ```
#[must_use]
pub fn filter_burst(raw: &[Option<u32>; RAW_SAMPLES]) -> Option<i32> {
    let mut sorted: Vec<Option<i32>> = raw
        .iter()
        .map(|v| v.map(|mm| i32::try_from(mm).unwrap_or(i32::MAX)))
        .collect();
    // None orders before Some, matching a timeout sorting below any distance
    sorted.sort_unstable();

    let median = sorted[RAW_SAMPLES / 2]?;

    let close: Vec<i32> = sorted[1..RAW_SAMPLES - 1]
        .iter()
        .flatten()
        .copied()
        .filter(|v| (v - median).abs() <= MEDIAN_WINDOW_MM)
        .collect();

    if close.is_empty() {
        return Some(median);
    }
    Some(close.iter().sum::<i32>() / close.len() as i32)
}
