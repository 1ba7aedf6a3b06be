//! # Bucketed Correction Model
//!
//! The tick subsystem tells us when the next timer fires, but cores are
//! frequently woken earlier by other interrupts. Each bucket keeps a
//! fixed-point factor (`RESOLUTION * DECAY` means 1.0) describing how much
//! of the expected sleep was actually spent idle, decayed after every idle
//! period.
//!
//! Statistics are kept separately for cores with and without tasks in I/O
//! wait, so the I/O-wait case gets its own expectation.

use crate::{BUCKETS, DECAY, MAX_INTERESTING, RESOLUTION};

/// Number of magnitude bands per I/O-wait group
const BANDS: usize = BUCKETS / 2;

/// Upper bounds (exclusive, us) of every band but the last
const BAND_LIMITS: [u32; BANDS - 1] = [10, 100, 1_000, 10_000, 100_000];

static_assertions::const_assert_eq!(BANDS, 6);

/// Factor meaning "trust the expected sleep length as is"
pub const NEUTRAL_FACTOR: u64 = RESOLUTION * DECAY;

/// Classification of an expected idle duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Bucket(u8);

impl Bucket {
    /// Classify an expected duration
    pub fn classify(expected_us: u32, io_wait: bool) -> Self {
        let base = if io_wait { BANDS } else { 0 };
        let band = BAND_LIMITS
            .iter()
            .position(|&limit| expected_us < limit)
            .unwrap_or(BANDS - 1);
        Bucket((base + band) as u8)
    }

    /// Bucket index in `[0, BUCKETS)`
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Whether this bucket belongs to the I/O-wait group
    #[inline]
    pub fn is_io_wait(self) -> bool {
        self.index() >= BANDS
    }
}

/// Per-core correction factor table
#[derive(Debug, Clone)]
pub struct CorrectionModel {
    factors: [u64; BUCKETS],
}

impl CorrectionModel {
    /// Create a table with every bucket untouched
    pub const fn new() -> Self {
        Self {
            factors: [0; BUCKETS],
        }
    }

    /// Current factor of a bucket, seeding an untouched bucket to neutral
    pub fn factor(&mut self, bucket: Bucket) -> u64 {
        let slot = &mut self.factors[bucket.index()];
        if *slot == 0 {
            *slot = NEUTRAL_FACTOR;
        }
        *slot
    }

    /// Raw factor without seeding (0 = untouched)
    #[inline]
    pub fn peek(&self, bucket: Bucket) -> u64 {
        self.factors[bucket.index()]
    }

    /// Fold one observed idle period into a bucket's factor
    ///
    /// The exit latency is subtracted first, floored at zero: it is paid
    /// after the wake-up event being predicted. Returns the new factor.
    pub fn update_after_sleep(
        &mut self,
        bucket: Bucket,
        expected_us: u32,
        measured_us: u32,
        exit_latency_us: u32,
    ) -> u64 {
        let measured_us = measured_us.saturating_sub(exit_latency_us);

        let old = self.factors[bucket.index()];
        let mut new_factor = old * (DECAY - 1) / DECAY;

        if expected_us > 0 && measured_us < MAX_INTERESTING {
            new_factor += RESOLUTION * measured_us as u64 / expected_us as u64;
        } else {
            // Idle for so long that it counts as a perfect prediction
            new_factor += RESOLUTION;
        }

        if new_factor == 0 {
            new_factor = 1;
        }

        self.factors[bucket.index()] = new_factor;
        new_factor
    }
}

impl Default for CorrectionModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_bands() {
        assert_eq!(Bucket::classify(0, false).index(), 0);
        assert_eq!(Bucket::classify(9, false).index(), 0);
        assert_eq!(Bucket::classify(10, false).index(), 1);
        assert_eq!(Bucket::classify(999, false).index(), 2);
        assert_eq!(Bucket::classify(5_000, false).index(), 3);
        assert_eq!(Bucket::classify(99_999, false).index(), 4);
        assert_eq!(Bucket::classify(100_000, false).index(), 5);
        assert_eq!(Bucket::classify(u32::MAX, false).index(), 5);
    }

    #[test]
    fn test_classify_io_wait_group() {
        assert_eq!(Bucket::classify(5, true).index(), 6);
        assert_eq!(Bucket::classify(2_000, true).index(), 9);
        assert_eq!(Bucket::classify(u32::MAX, true).index(), BUCKETS - 1);
        assert!(Bucket::classify(50, true).is_io_wait());
        assert!(!Bucket::classify(50, false).is_io_wait());
    }

    #[test]
    fn test_classify_idempotent() {
        for expected in [0, 7, 10, 64, 1_000, 45_000, 250_000] {
            for io_wait in [false, true] {
                assert_eq!(
                    Bucket::classify(expected, io_wait),
                    Bucket::classify(expected, io_wait)
                );
            }
        }
    }

    #[test]
    fn test_lazy_neutral_seed() {
        let mut model = CorrectionModel::new();
        let bucket = Bucket::classify(2_000, false);
        assert_eq!(model.peek(bucket), 0);
        assert_eq!(model.factor(bucket), NEUTRAL_FACTOR);
        assert_eq!(model.peek(bucket), NEUTRAL_FACTOR);
    }

    #[test]
    fn test_accurate_sleeps_stay_neutral() {
        let mut model = CorrectionModel::new();
        let bucket = Bucket::classify(2_000, false);
        model.factor(bucket);
        for _ in 0..32 {
            model.update_after_sleep(bucket, 2_000, 2_000, 0);
        }
        assert_eq!(model.peek(bucket), NEUTRAL_FACTOR);
    }

    #[test]
    fn test_early_wakeups_shrink_factor() {
        let mut model = CorrectionModel::new();
        let bucket = Bucket::classify(2_000, false);
        model.factor(bucket);
        let after = model.update_after_sleep(bucket, 2_000, 500, 0);
        // 8192 * 7/8 + 1024 * 500/2000
        assert_eq!(after, 7_168 + 256);
    }

    #[test]
    fn test_exit_latency_subtracted() {
        let mut a = CorrectionModel::new();
        let mut b = CorrectionModel::new();
        let bucket = Bucket::classify(1_000, false);
        a.factor(bucket);
        b.factor(bucket);
        assert_eq!(
            a.update_after_sleep(bucket, 1_000, 600, 100),
            b.update_after_sleep(bucket, 1_000, 500, 0)
        );
    }

    #[test]
    fn test_exit_latency_floors_at_zero() {
        let mut model = CorrectionModel::new();
        let bucket = Bucket::classify(1_000, false);
        model.factor(bucket);
        // Woke inside the exit latency: nothing of the sleep was predicted
        assert_eq!(model.update_after_sleep(bucket, 1_000, 50, 100), 7_168);
        assert_eq!(model.update_after_sleep(bucket, 1_000, 100, 100), 6_272);
    }

    #[test]
    fn test_long_sleep_counts_as_perfect() {
        let mut flat = CorrectionModel::new();
        let mut proportional = CorrectionModel::new();
        let bucket = Bucket::classify(20_000, false);
        flat.factor(bucket);
        proportional.factor(bucket);

        let flat_result = flat.update_after_sleep(bucket, 20_000, MAX_INTERESTING + 10, 0);
        let proportional_result = proportional.update_after_sleep(bucket, 20_000, 40_000, 0);

        assert_eq!(flat_result, 7_168 + RESOLUTION);
        assert_eq!(proportional_result, 7_168 + 2 * RESOLUTION);
        assert_ne!(flat_result, proportional_result);
    }

    #[test]
    fn test_zero_expected_counts_as_perfect() {
        let mut model = CorrectionModel::new();
        let bucket = Bucket::classify(0, false);
        assert_eq!(model.update_after_sleep(bucket, 0, 30, 0), RESOLUTION);
    }

    #[test]
    fn test_factor_never_zero() {
        let mut model = CorrectionModel::new();
        let bucket = Bucket::classify(80_000, true);
        model.factor(bucket);
        for _ in 0..500 {
            let factor = model.update_after_sleep(bucket, 80_000, 0, 0);
            assert_ne!(factor, 0);
        }
        assert_eq!(model.peek(bucket), 1);
        assert_ne!(model.factor(bucket), 0);
    }
}
