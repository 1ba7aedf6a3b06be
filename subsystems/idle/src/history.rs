//! # Interval History
//!
//! Ring of the most recent measured idle residencies, and the typical
//! interval estimator built on top of it.
//!
//! A core that alternates between bursts of short idles and the occasional
//! long pause should report the short, recurring interval. The estimator
//! therefore trims outliers from the top until the remaining samples are
//! tight, or until only three quarters of them are left.

use crate::INTERVALS;

/// Standard deviation (us) below which the samples are always considered stable
pub const STDDEV_FLOOR_US: u64 = 20;

/// Mean must exceed this multiple of the standard deviation to be stable
const STDDEV_RATIO: u64 = 6;

/// Typical interval estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalPattern {
    /// Mean of the retained samples (microseconds)
    pub mean_us: u64,
    /// Whether the retained samples form a stable pattern
    pub stable: bool,
}

impl IntervalPattern {
    /// Mean, if it describes a stable pattern
    #[inline]
    pub fn stable_mean(&self) -> Option<u64> {
        self.stable.then_some(self.mean_us)
    }
}

/// Per-core residency ring buffer
#[derive(Debug, Clone)]
pub struct IntervalHistory {
    intervals: [u32; INTERVALS],
    ptr: usize,
    filled: usize,
}

impl IntervalHistory {
    /// Create an empty history
    pub const fn new() -> Self {
        Self {
            intervals: [0; INTERVALS],
            ptr: 0,
            filled: 0,
        }
    }

    /// Append a residency sample, overwriting the oldest
    pub fn record(&mut self, duration_us: u32) {
        self.intervals[self.ptr] = duration_us;
        self.ptr = (self.ptr + 1) % INTERVALS;
        if self.filled < INTERVALS {
            self.filled += 1;
        }
    }

    /// Number of samples recorded so far (saturates at `INTERVALS`)
    #[inline]
    pub fn len(&self) -> usize {
        self.filled
    }

    /// Check if no sample was recorded yet
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Largest sample currently buffered
    pub fn max_sample(&self) -> Option<u32> {
        self.samples().iter().copied().max()
    }

    fn samples(&self) -> &[u32] {
        // Slots fill from index 0, so the first `filled` slots are live.
        &self.intervals[..self.filled]
    }

    /// Estimate the dominant recurring idle length
    ///
    /// Returns `None` before the first sample. Otherwise the mean of the
    /// retained samples, flagged stable or not.
    pub fn typical_interval(&self) -> Option<IntervalPattern> {
        let samples = self.samples();
        let total = samples.len() as u64;
        if total == 0 {
            return None;
        }

        let mut thresh = u64::MAX;
        loop {
            let mut max = 0u64;
            let mut sum = 0u64;
            let mut divisor = 0u64;
            for &value in samples {
                let value = value as u64;
                if value <= thresh {
                    sum += value;
                    divisor += 1;
                    max = max.max(value);
                }
            }
            if divisor == 0 {
                // Only reachable if every remaining sample equalled the cut maximum.
                return None;
            }
            let avg = sum / divisor;

            let variance = samples
                .iter()
                .map(|&v| v as u64)
                .filter(|&v| v <= thresh)
                .map(|v| {
                    let diff = v.abs_diff(avg) as u128;
                    diff * diff
                })
                .sum::<u128>()
                / divisor as u128;
            let stddev = isqrt(variance.min(u64::MAX as u128) as u64);

            let retained_enough = divisor * 4 >= total * 3;
            if (avg > stddev * STDDEV_RATIO && retained_enough) || stddev <= STDDEV_FLOOR_US {
                return Some(IntervalPattern {
                    mean_us: avg,
                    stable: true,
                });
            }
            if divisor * 4 > total * 3 {
                thresh = max.saturating_sub(1);
                continue;
            }
            return Some(IntervalPattern {
                mean_us: avg,
                stable: false,
            });
        }
    }

    /// Forget every sample
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

impl Default for IntervalHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// Integer square root (floor)
pub fn isqrt(value: u64) -> u64 {
    if value < 2 {
        return value;
    }
    // Newton iteration from an upper bound
    let mut x = 1u64 << (64 - value.leading_zeros()).div_ceil(2);
    loop {
        let y = (x + value / x) / 2;
        if y >= x {
            return x;
        }
        x = y;
    }
}
