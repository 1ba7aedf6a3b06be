//! # Per-CPU Idle Devices
//!
//! One [`IdleDevice`] per core holds everything the predictor learns about
//! that core. A device is only touched by its own core, or by the hot-plug
//! path while the core is offline. Each slot has its own lock, so cores
//! never contend with each other.

use spin::Mutex;

use crate::correction::{Bucket, CorrectionModel};
use crate::error::{IdleError, IdleResult};
use crate::history::IntervalHistory;
use crate::predictor::Prediction;
use crate::selector::{Selection, StateFlags, StateTable};
use crate::MAX_CPUS;

/// Per-core predictor state
#[derive(Debug, Clone)]
pub struct IdleDevice {
    cpu: usize,
    last_state_idx: usize,
    needs_update: bool,
    expected_us: u32,
    predicted_us: u64,
    effective_us: u64,
    exit_us: u32,
    bucket: Bucket,
    last_residency_us: u32,
    usage_disabled: u32,
    model: CorrectionModel,
    history: IntervalHistory,
}

impl IdleDevice {
    /// Create a zeroed device
    pub fn new(cpu: usize) -> Self {
        Self {
            cpu,
            last_state_idx: 0,
            needs_update: false,
            expected_us: 0,
            predicted_us: 0,
            effective_us: 0,
            exit_us: 0,
            bucket: Bucket::default(),
            last_residency_us: 0,
            usage_disabled: 0,
            model: CorrectionModel::new(),
            history: IntervalHistory::new(),
        }
    }

    /// CPU owning the device
    #[inline]
    pub fn cpu(&self) -> usize {
        self.cpu
    }

    /// State chosen by the last decision
    #[inline]
    pub fn last_state_idx(&self) -> usize {
        self.last_state_idx
    }

    /// Expected sleep length of the last decision (us)
    #[inline]
    pub fn expected_us(&self) -> u32 {
        self.expected_us
    }

    /// Correction-based prediction of the last decision (us)
    #[inline]
    pub fn predicted_us(&self) -> u64 {
        self.predicted_us
    }

    /// Estimate the last decision was made with, capped by the typical interval (us)
    #[inline]
    pub fn effective_us(&self) -> u64 {
        self.effective_us
    }

    /// Exit latency of the chosen state (us)
    #[inline]
    pub fn exit_us(&self) -> u32 {
        self.exit_us
    }

    /// Bucket of the last decision
    #[inline]
    pub fn bucket(&self) -> Bucket {
        self.bucket
    }

    /// An update is waiting for the next decision
    #[inline]
    pub fn needs_update(&self) -> bool {
        self.needs_update
    }

    /// Correction table
    #[inline]
    pub fn model(&self) -> &CorrectionModel {
        &self.model
    }

    /// Residency history
    #[inline]
    pub fn history(&self) -> &IntervalHistory {
        &self.history
    }

    /// Per-core state disable mask
    #[inline]
    pub fn usage_disabled(&self) -> u32 {
        self.usage_disabled
    }

    /// Disable or re-enable a state on this core only
    pub fn set_state_disabled(&mut self, index: usize, disabled: bool) {
        if index >= u32::BITS as usize {
            return;
        }
        if disabled {
            self.usage_disabled |= 1 << index;
        } else {
            self.usage_disabled &= !(1 << index);
        }
    }

    pub(crate) fn model_and_history(&mut self) -> (&mut CorrectionModel, &IntervalHistory) {
        (&mut self.model, &self.history)
    }

    /// Reset the decision fields before a new selection
    pub(crate) fn begin_decision(&mut self) {
        self.last_state_idx = 0;
        self.exit_us = 0;
    }

    /// Remember the inputs of this decision for the post-sleep update
    pub(crate) fn note_prediction(&mut self, prediction: &Prediction) {
        self.expected_us = prediction.expected_us;
        self.bucket = prediction.bucket;
        self.predicted_us = prediction.predicted_us;
        self.effective_us = prediction.effective_us();
    }

    /// Remember the chosen state
    pub(crate) fn commit(&mut self, selection: Selection) {
        self.last_state_idx = selection.index;
        self.exit_us = selection.exit_latency_us;
    }

    /// Post-wake hook: queue an update for the next decision
    pub fn reflect(&mut self, index: usize, residency_us: u32) {
        self.last_state_idx = index;
        self.last_residency_us = residency_us;
        self.needs_update = true;
    }

    /// Fold the pending residency into the model and history
    ///
    /// States without valid residency reporting are assumed to have slept
    /// for the whole expected time. Returns the new correction factor.
    pub fn apply_pending_update(&mut self, table: &StateTable) -> Option<u64> {
        if !self.needs_update {
            return None;
        }
        self.needs_update = false;

        let time_valid = table
            .get(self.last_state_idx)
            .is_some_and(|s| s.flags.contains(StateFlags::TIME_VALID));
        let last_idle_us = if time_valid {
            self.last_residency_us
        } else {
            self.expected_us
        };

        let factor =
            self.model
                .update_after_sleep(self.bucket, self.expected_us, last_idle_us, self.exit_us);
        self.history.record(last_idle_us);
        Some(factor)
    }
}

/// Fixed arena of per-core devices, indexed by CPU id
#[derive(Debug)]
pub struct DeviceArena {
    slots: [Mutex<Option<IdleDevice>>; MAX_CPUS],
}

impl DeviceArena {
    /// Create an arena with no CPU enabled
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| Mutex::new(None)),
        }
    }

    fn slot(&self, cpu: usize) -> IdleResult<&Mutex<Option<IdleDevice>>> {
        self.slots.get(cpu).ok_or(IdleError::InvalidCpu(cpu))
    }

    /// Allocate and zero the device of a CPU
    pub fn enable(&self, cpu: usize, strict: bool) -> IdleResult<()> {
        let mut slot = self.slot(cpu)?.lock();
        if strict && slot.is_some() {
            return Err(IdleError::AlreadyEnabled(cpu));
        }
        *slot = Some(IdleDevice::new(cpu));
        Ok(())
    }

    /// Tear down the device of a CPU
    pub fn disable(&self, cpu: usize) -> IdleResult<()> {
        self.slot(cpu)?
            .lock()
            .take()
            .map(|_| ())
            .ok_or(IdleError::NotEnabled(cpu))
    }

    /// Run `f` on the device of a CPU
    ///
    /// Returns `None` when the CPU is out of range or not enabled.
    pub fn with_device<R>(&self, cpu: usize, f: impl FnOnce(&mut IdleDevice) -> R) -> Option<R> {
        let mut slot = self.slots.get(cpu)?.lock();
        slot.as_mut().map(f)
    }

    /// Copy of the device of a CPU
    pub fn get(&self, cpu: usize) -> Option<IdleDevice> {
        self.slots.get(cpu).and_then(|slot| (*slot.lock()).clone())
    }

    /// Check if a CPU is enabled
    pub fn is_enabled(&self, cpu: usize) -> bool {
        self.slots.get(cpu).is_some_and(|slot| slot.lock().is_some())
    }
}

impl Default for DeviceArena {
    fn default() -> Self {
        Self::new()
    }
}

static_assertions::assert_impl_all!(DeviceArena: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::IdleType;
    use crate::predictor::predict;
    use crate::selector::IdleStateDesc;
    use crate::{DECAY, RESOLUTION};

    fn table() -> StateTable {
        StateTable::from_states(&[
            IdleStateDesc::new("poll", IdleType::Regular, 0, 0),
            IdleStateDesc::new("wfi", IdleType::Regular, 1, 1),
            IdleStateDesc::new("legacy", IdleType::Regular, 10, 20).with_flags(StateFlags::empty()),
        ])
        .unwrap()
    }

    fn decide(device: &mut IdleDevice, expected_us: u32, selection: Selection) {
        device.begin_decision();
        let (model, history) = device.model_and_history();
        let prediction = predict(model, history, expected_us, 0);
        device.note_prediction(&prediction);
        device.commit(selection);
    }

    #[test]
    fn test_arena_enable_disable() {
        let arena = DeviceArena::new();
        assert!(!arena.is_enabled(0));
        arena.enable(0, false).unwrap();
        assert!(arena.is_enabled(0));
        assert_eq!(arena.get(0).unwrap().cpu(), 0);
        arena.disable(0).unwrap();
        assert_eq!(arena.disable(0), Err(IdleError::NotEnabled(0)));
        assert_eq!(arena.enable(MAX_CPUS, false), Err(IdleError::InvalidCpu(MAX_CPUS)));
    }

    #[test]
    fn test_reenable_zeroes_state() {
        let arena = DeviceArena::new();
        arena.enable(1, false).unwrap();
        arena.with_device(1, |device| device.reflect(1, 500)).unwrap();
        assert!(arena.get(1).unwrap().needs_update());
        arena.enable(1, false).unwrap();
        assert!(!arena.get(1).unwrap().needs_update());
        assert_eq!(arena.enable(1, true), Err(IdleError::AlreadyEnabled(1)));
    }

    #[test]
    fn test_update_is_deferred_to_next_decision() {
        let table = table();
        let mut device = IdleDevice::new(0);
        decide(&mut device, 2_000, Selection { index: 1, exit_latency_us: 1 });
        assert_eq!(device.apply_pending_update(&table), None);

        device.reflect(1, 1_001);
        assert!(device.needs_update());
        // (1001 - 1) * 1024 / 2000 = 512
        assert_eq!(device.apply_pending_update(&table), Some(7_168 + 512));
        assert!(!device.needs_update());
        assert_eq!(device.history().len(), 1);
        assert_eq!(device.history().max_sample(), Some(1_001));
    }

    #[test]
    fn test_invalid_residency_assumes_full_sleep() {
        let table = table();
        let mut device = IdleDevice::new(0);
        decide(&mut device, 4_000, Selection { index: 2, exit_latency_us: 0 });
        device.reflect(2, 3);
        assert_eq!(device.apply_pending_update(&table), Some(RESOLUTION * DECAY));
        assert_eq!(device.history().max_sample(), Some(4_000));
    }

    #[test]
    fn test_with_device_on_missing_cpu() {
        let arena = DeviceArena::new();
        assert_eq!(arena.with_device(2, |device| device.cpu()), None);
        assert_eq!(arena.with_device(MAX_CPUS, |device| device.cpu()), None);
        arena.enable(2, false).unwrap();
        assert_eq!(arena.with_device(2, |device| device.cpu()), Some(2));
    }

    #[test]
    fn test_prediction_and_effective_kept_apart() {
        let mut device = IdleDevice::new(0);
        let prediction = Prediction {
            expected_us: 20_000,
            bucket: Bucket::classify(20_000, false),
            predicted_us: 20_000,
            typical_us: Some(200),
            multiplier: 1,
        };
        device.note_prediction(&prediction);
        assert_eq!(device.predicted_us(), 20_000);
        assert_eq!(device.effective_us(), 200);
    }

    #[test]
    fn test_per_core_disable_mask() {
        let mut device = IdleDevice::new(3);
        device.set_state_disabled(2, true);
        device.set_state_disabled(40, true);
        assert_eq!(device.usage_disabled(), 1 << 2);
        device.set_state_disabled(2, false);
        assert_eq!(device.usage_disabled(), 0);
    }
}
