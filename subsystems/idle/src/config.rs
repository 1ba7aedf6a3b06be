//! # Governor Configuration

use crate::error::{IdleError, IdleResult};
use crate::gate::IdleSwitch;
use crate::MAX_CPUS;

/// How the governor turns gate outcomes and predictions into a state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectPolicy {
    /// Gate the deepest state, predict among the rest
    #[default]
    Predictive,
    /// First idle type, in priority order, whose check passes
    GateOnly,
}

/// Idle governor configuration
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Minimum time to the next local timer for deep idle (us)
    pub timer_threshold_us: u32,
    /// Minimum time between two block-reason reports (ms)
    pub dump_window_ms: u64,
    /// CPU that emits the block-reason report
    pub reporting_cpu: usize,
    /// Skip the policy and clock-domain checks (bring-up only)
    pub bypass_clock_check: bool,
    /// Idle types enabled at start
    pub switches: IdleSwitch,
    /// Selection policy
    pub policy: SelectPolicy,
    /// Refuse to re-enable a CPU that is already enabled
    pub strict_enable: bool,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            timer_threshold_us: 2_000,
            dump_window_ms: 30_000,
            reporting_cpu: 0,
            bypass_clock_check: false,
            switches: IdleSwitch::default(),
            policy: SelectPolicy::Predictive,
            strict_enable: false,
        }
    }
}

impl GovernorConfig {
    /// Configuration for the gating-only policy
    pub fn gate_only() -> Self {
        Self {
            policy: SelectPolicy::GateOnly,
            ..Default::default()
        }
    }

    /// Set the timer proximity threshold
    pub fn with_timer_threshold(mut self, threshold_us: u32) -> Self {
        self.timer_threshold_us = threshold_us;
        self
    }

    /// Set the report window
    pub fn with_dump_window(mut self, window_ms: u64) -> Self {
        self.dump_window_ms = window_ms;
        self
    }

    /// Set the reporting CPU
    pub fn with_reporting_cpu(mut self, cpu: usize) -> Self {
        self.reporting_cpu = cpu;
        self
    }

    /// Skip the policy and clock-domain checks
    pub fn with_clock_bypass(mut self, bypass: bool) -> Self {
        self.bypass_clock_check = bypass;
        self
    }

    /// Set the initial idle type switches
    pub fn with_switches(mut self, switches: IdleSwitch) -> Self {
        self.switches = switches;
        self
    }

    /// Set the selection policy
    pub fn with_policy(mut self, policy: SelectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> IdleResult<()> {
        if self.reporting_cpu >= MAX_CPUS {
            return Err(IdleError::InvalidConfig("reporting cpu out of range"));
        }
        if self.dump_window_ms == 0 {
            return Err(IdleError::InvalidConfig("dump window must be non-zero"));
        }
        if self.timer_threshold_us > i32::MAX as u32 {
            return Err(IdleError::InvalidConfig("timer threshold too large"));
        }
        Ok(())
    }
}
