//! # Idle Governor
//!
//! Entry points called by the host idle framework:
//!
//! | Hook | When | Work |
//! |------|------|------|
//! | `enable` | CPU joins idle (boot, hot-plug online) | zero the device |
//! | `disable` | CPU goes offline | drop the device |
//! | `select` | CPU about to idle | gate + predict + scan |
//! | `reflect` | CPU woke up | queue model/history update |
//!
//! The update queued by `reflect` is applied at the start of the next
//! `select`, so the wake-up path stays as short as possible.
//!
//! ## Concurrency
//!
//! Every hook takes `&self`. A core only locks its own device slot, which
//! no other core touches while it is online. The gate, the software locks
//! and the report sink are shared and held for one short section each.

use alloc::sync::Arc;

use spin::{Mutex, MutexGuard};

use crate::config::{GovernorConfig, SelectPolicy};
use crate::device::{DeviceArena, IdleDevice};
use crate::diagnostics::BlockDiagnostics;
use crate::error::{IdleError, IdleResult};
use crate::gate::{BlockReason, EntryGate, IdleType, SoftwareLocks};
use crate::platform::IdlePlatform;
use crate::predictor::{predict, Prediction};
use crate::report::{LogSink, ReportSink};
use crate::selector::{is_enabled, select_state, SelectInput, Selection, StateTable};
use crate::MAX_CPUS;

/// CPU idle governor
#[derive(Debug)]
pub struct IdleGovernor<P: IdlePlatform, S: ReportSink = LogSink> {
    config: GovernorConfig,
    platform: P,
    sink: Mutex<S>,
    gate: EntryGate,
    devices: DeviceArena,
}

impl<P: IdlePlatform> IdleGovernor<P, LogSink> {
    /// Create a governor reporting through the `log` facade
    pub fn new(config: GovernorConfig, platform: P) -> IdleResult<Self> {
        Self::with_sink(config, platform, LogSink)
    }
}

impl<P: IdlePlatform, S: ReportSink> IdleGovernor<P, S> {
    /// Create a governor with a custom report sink
    pub fn with_sink(config: GovernorConfig, platform: P, sink: S) -> IdleResult<Self> {
        config.validate()?;
        let gate = EntryGate::new(&config);
        Ok(Self {
            config,
            platform,
            sink: Mutex::new(sink),
            gate,
            devices: DeviceArena::new(),
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// Platform collaborator
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Platform collaborator, mutably
    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Locked report sink
    pub fn sink(&self) -> MutexGuard<'_, S> {
        self.sink.lock()
    }

    /// Deep idle gate
    pub fn gate(&self) -> &EntryGate {
        &self.gate
    }

    /// Shared handle to the software locks
    pub fn lock_handle(&self) -> Arc<SoftwareLocks> {
        self.gate.locks()
    }

    /// Enable or disable an idle type
    pub fn set_switch(&self, kind: IdleType, enabled: bool) {
        self.gate.set_switch(kind, enabled);
    }

    /// Copy of the device of a CPU
    pub fn device(&self, cpu: usize) -> Option<IdleDevice> {
        self.devices.get(cpu)
    }

    /// Disable or re-enable a state on one core only
    pub fn set_state_disabled(&self, cpu: usize, index: usize, disabled: bool) -> IdleResult<()> {
        if cpu >= MAX_CPUS {
            return Err(IdleError::InvalidCpu(cpu));
        }
        self.devices
            .with_device(cpu, |device| device.set_state_disabled(index, disabled))
            .ok_or(IdleError::NotEnabled(cpu))
    }

    /// Copy of the block-reason diagnostics
    pub fn diagnostics_snapshot(&self) -> BlockDiagnostics {
        self.gate.diagnostics()
    }

    /// Selections of `kind` on `cpu`
    pub fn entry_count(&self, cpu: usize, kind: IdleType) -> u64 {
        self.gate.diagnostics().entry_count(cpu, kind)
    }

    /// Deep idle refusals of `reason` on `cpu` since the last report
    pub fn block_count(&self, cpu: usize, reason: BlockReason) -> u64 {
        self.gate.diagnostics().block_count(cpu, reason)
    }

    /// Start tracking a CPU
    pub fn enable(&self, cpu: usize) -> IdleResult<()> {
        self.devices.enable(cpu, self.config.strict_enable)?;
        log::info!("idle: cpu{} enabled", cpu);
        Ok(())
    }

    /// Stop tracking a CPU
    pub fn disable(&self, cpu: usize) -> IdleResult<()> {
        self.devices.disable(cpu)?;
        log::info!("idle: cpu{} disabled", cpu);
        Ok(())
    }

    /// Choose the idle state `cpu` should enter
    ///
    /// Never fails: an unknown CPU or an empty table gets state 0.
    pub fn select(&self, cpu: usize, table: &StateTable) -> usize {
        self.devices
            .with_device(cpu, |device| self.decide(cpu, table, device))
            .unwrap_or_else(|| {
                log::warn!("idle: select on disabled cpu{}", cpu);
                0
            })
    }

    /// Post-wake hook
    ///
    /// `residency_us` is the time actually spent in state `index`.
    pub fn reflect(&self, cpu: usize, index: usize, residency_us: u32) {
        self.devices
            .with_device(cpu, |device| device.reflect(index, residency_us));
    }

    fn decide(&self, cpu: usize, table: &StateTable, device: &mut IdleDevice) -> usize {
        device.apply_pending_update(table);
        device.begin_decision();

        let latency_budget_us = self.platform.latency_budget_us();
        if latency_budget_us == 0 || table.is_empty() {
            record_entry(&self.gate, cpu, table, 0);
            return 0;
        }

        let expected_us = self.platform.expected_sleep_us(cpu);
        let io_wait = self.platform.io_wait_count(cpu);
        let prediction = {
            let (model, history) = device.model_and_history();
            predict(model, history, expected_us, io_wait)
        };
        device.note_prediction(&prediction);

        let mut sink = &self.sink;
        let selection = match self.config.policy {
            SelectPolicy::Predictive => select_predictive(
                &self.gate,
                &self.platform,
                &mut sink,
                cpu,
                table,
                device,
                &prediction,
                latency_budget_us,
            ),
            SelectPolicy::GateOnly => {
                select_gated(&self.gate, &self.platform, &mut sink, cpu, table, device)
            }
        };

        #[cfg(feature = "debug")]
        log::trace!(
            "idle: cpu{} expected={} predicted={} typical={:?} mult={} budget={} -> {}",
            cpu,
            prediction.expected_us,
            prediction.predicted_us,
            prediction.typical_us,
            prediction.multiplier,
            latency_budget_us,
            selection.index
        );

        device.commit(selection);
        record_entry(&self.gate, cpu, table, selection.index);
        selection.index
    }
}

fn record_entry(gate: &EntryGate, cpu: usize, table: &StateTable, index: usize) {
    if let Some(state) = table.get(index) {
        gate.record_entry(cpu, state.kind);
    }
}

/// Gate the deepest state, then scan the shallower ones
fn select_predictive<P: IdlePlatform>(
    gate: &EntryGate,
    platform: &P,
    sink: &mut dyn ReportSink,
    cpu: usize,
    table: &StateTable,
    device: &IdleDevice,
    prediction: &Prediction,
    latency_budget_us: u32,
) -> Selection {
    let deep = table.deepest_of(IdleType::Deep).filter(|&i| i > 0);

    if let Some(index) = deep {
        let within_budget = table
            .get(index)
            .is_some_and(|s| s.exit_latency_us <= latency_budget_us);
        if within_budget
            && is_enabled(table, index, device.usage_disabled())
            && gate.may_enter(IdleType::Deep, cpu, platform, sink)
        {
            return Selection {
                index,
                exit_latency_us: table.get(index).map_or(0, |s| s.exit_latency_us),
            };
        }
    }

    select_state(
        table,
        &SelectInput {
            latency_budget_us,
            expected_us: prediction.expected_us,
            predicted_us: prediction.effective_us(),
            multiplier: prediction.multiplier,
            limit: deep.unwrap_or(table.len()),
            usage_disabled: device.usage_disabled(),
        },
    )
}

/// First idle type, in priority order, that has a state and passes its check
fn select_gated<P: IdlePlatform>(
    gate: &EntryGate,
    platform: &P,
    sink: &mut dyn ReportSink,
    cpu: usize,
    table: &StateTable,
    device: &IdleDevice,
) -> Selection {
    for kind in IdleType::ALL {
        let Some(index) = table.deepest_of(kind) else {
            continue;
        };
        if !is_enabled(table, index, device.usage_disabled()) {
            continue;
        }
        if gate.may_enter(kind, cpu, platform, sink) {
            return Selection {
                index,
                exit_latency_us: table.get(index).map_or(0, |s| s.exit_latency_us),
            };
        }
    }
    Selection::default()
}
