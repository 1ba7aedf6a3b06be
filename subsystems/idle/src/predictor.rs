//! # Duration Predictor
//!
//! Scales the tick subsystem's expected sleep length by the bucket's
//! correction factor and carries the typical interval alongside it. The
//! selector takes the smaller of the two, so a recurring short pattern can
//! pull the estimate down without erasing the corrected value.

use crate::correction::{Bucket, CorrectionModel, NEUTRAL_FACTOR};
use crate::history::IntervalHistory;

/// Exit-cost penalty per task in I/O wait
const IO_WAIT_PENALTY: u32 = 10;

/// Idle duration prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prediction {
    /// Expected sleep length the prediction was made from (us)
    pub expected_us: u32,
    /// Bucket of `expected_us`
    pub bucket: Bucket,
    /// Correction-based estimate (us)
    pub predicted_us: u64,
    /// Stable typical interval, if one was found (us)
    pub typical_us: Option<u64>,
    /// Exit-cost multiplier
    pub multiplier: u32,
}

impl Prediction {
    /// Estimate handed to the state selector
    pub fn effective_us(&self) -> u64 {
        match self.typical_us {
            Some(typical) => self.predicted_us.min(typical),
            None => self.predicted_us,
        }
    }
}

/// Divide, rounding to the nearest integer
#[inline]
pub fn div_round(dividend: u64, divisor: u64) -> u64 {
    dividend.saturating_add(divisor / 2) / divisor
}

/// Reluctance to enter states with a high relative exit cost
#[inline]
pub fn performance_multiplier(io_wait_count: u32) -> u32 {
    io_wait_count
        .saturating_mul(IO_WAIT_PENALTY)
        .saturating_add(1)
}

/// Predict the next idle duration
pub fn predict(
    model: &mut CorrectionModel,
    history: &IntervalHistory,
    expected_us: u32,
    io_wait_count: u32,
) -> Prediction {
    let bucket = Bucket::classify(expected_us, io_wait_count > 0);
    let factor = model.factor(bucket);
    let predicted_us = div_round((expected_us as u64).saturating_mul(factor), NEUTRAL_FACTOR);

    let typical_us = history
        .typical_interval()
        .and_then(|pattern| pattern.stable_mean());

    Prediction {
        expected_us,
        bucket,
        predicted_us,
        typical_us,
        multiplier: performance_multiplier(io_wait_count),
    }
}
