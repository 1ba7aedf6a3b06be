//! # Deep Idle Entry Gate
//!
//! The deepest idle state powers down the whole system domain. Whether it
//! may be entered does not depend on the predictor at all: it depends on
//! the other cores, software locks held by drivers, the clock manager and
//! the next local timer. The checks run cheapest first and the first
//! failure wins.
//!
//! ```text
//!  policy ──▶ cpu ──▶ lock ──▶ clock ──▶ timer ──▶ Allowed
//!    │         │        │        │         │
//!    ▼         ▼        ▼        ▼         ▼
//!  Blocked(reason) ──────────────────────────▶ BlockDiagnostics
//! ```

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use spin::Mutex;

use crate::config::GovernorConfig;
use crate::diagnostics::BlockDiagnostics;
use crate::error::{IdleError, IdleResult};
use crate::platform::IdlePlatform;
use crate::report::ReportSink;
use crate::{MAX_CLOCK_GROUPS, MAX_LOCKS};

// =============================================================================
// Idle Types
// =============================================================================

/// Closed set of idle types, in dispatch priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IdleType {
    /// System-wide power down, gated
    Deep      = 0,
    /// Screen-off idle
    ScreenOff = 1,
    /// Slow idle
    Slow      = 2,
    /// Regular core idle
    Regular   = 3,
}

impl IdleType {
    /// All types, highest priority first
    pub const ALL: [IdleType; 4] = [
        IdleType::Deep,
        IdleType::ScreenOff,
        IdleType::Slow,
        IdleType::Regular,
    ];

    /// Array index of the type
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Switch bit controlling the type
    pub const fn switch(self) -> IdleSwitch {
        match self {
            IdleType::Deep => IdleSwitch::DEEP,
            IdleType::ScreenOff => IdleSwitch::SCREEN_OFF,
            IdleType::Slow => IdleSwitch::SLOW,
            IdleType::Regular => IdleSwitch::REGULAR,
        }
    }

    /// Short name
    pub const fn name(self) -> &'static str {
        match self {
            IdleType::Deep => "dpidle",
            IdleType::ScreenOff => "soidle",
            IdleType::Slow => "slidle",
            IdleType::Regular => "rgidle",
        }
    }
}

bitflags! {
    /// Run-time enable switches per idle type
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IdleSwitch: u32 {
        /// Deep idle
        const DEEP = 1 << 0;
        /// Screen-off idle
        const SCREEN_OFF = 1 << 1;
        /// Slow idle
        const SLOW = 1 << 2;
        /// Regular idle
        const REGULAR = 1 << 3;
    }
}

impl Default for IdleSwitch {
    fn default() -> Self {
        IdleSwitch::DEEP | IdleSwitch::REGULAR
    }
}

// =============================================================================
// Refusal Reasons
// =============================================================================

/// Why deep idle was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlockReason {
    /// Voltage/thermal policy veto
    Policy = 0,
    /// More than one CPU online, or hot-plug in progress
    Cpu    = 1,
    /// A software lock is held
    Lock   = 2,
    /// Clock/power groups still in use
    Clock  = 3,
    /// Next timer too close
    Timer  = 4,
}

/// Number of refusal reasons
pub const REASON_COUNT: usize = BlockReason::ALL.len();

impl BlockReason {
    /// All reasons, in evaluation order
    pub const ALL: [BlockReason; 5] = [
        BlockReason::Policy,
        BlockReason::Cpu,
        BlockReason::Lock,
        BlockReason::Clock,
        BlockReason::Timer,
    ];

    /// Array index of the reason
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Short name used in reports
    pub const fn name(self) -> &'static str {
        match self {
            BlockReason::Policy => "vtg",
            BlockReason::Cpu => "cpu",
            BlockReason::Lock => "lock",
            BlockReason::Clock => "clk",
            BlockReason::Timer => "tmr",
        }
    }
}

/// Gate outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Deep idle may be entered
    Allowed,
    /// Deep idle refused
    Blocked(BlockReason),
}

impl GateDecision {
    /// Check if entry is allowed
    #[inline]
    pub fn is_allowed(self) -> bool {
        matches!(self, GateDecision::Allowed)
    }
}

// =============================================================================
// Software Locks
// =============================================================================

/// Named software locks preventing deep idle
///
/// Drivers on any core take a lock while they need the system domain
/// powered. The bitmask is only modified under its own lock.
#[derive(Debug, Default)]
pub struct SoftwareLocks {
    bits: Mutex<u32>,
}

impl SoftwareLocks {
    /// Create with no lock held
    pub const fn new() -> Self {
        Self {
            bits: Mutex::new(0),
        }
    }

    fn mask(id: u8) -> IdleResult<u32> {
        if id >= MAX_LOCKS {
            return Err(IdleError::InvalidLockId(id));
        }
        Ok(1 << id)
    }

    /// Take a lock
    pub fn lock(&self, id: u8) -> IdleResult<()> {
        let mask = Self::mask(id)?;
        *self.bits.lock() |= mask;
        Ok(())
    }

    /// Release a lock
    pub fn unlock(&self, id: u8) -> IdleResult<()> {
        let mask = Self::mask(id)?;
        *self.bits.lock() &= !mask;
        Ok(())
    }

    /// Current bitmask
    #[inline]
    pub fn bits(&self) -> u32 {
        *self.bits.lock()
    }

    /// Check if any lock is held
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.bits() != 0
    }
}

static_assertions::assert_impl_all!(SoftwareLocks: Send, Sync);

// =============================================================================
// Entry Gate
// =============================================================================

/// Deep idle precondition checker
#[derive(Debug)]
pub struct EntryGate {
    timer_threshold_us: i64,
    bypass_clock_check: bool,
    dump_window_ms: u64,
    reporting_cpu: usize,
    switches: AtomicU32,
    locks: Arc<SoftwareLocks>,
    diagnostics: Mutex<BlockDiagnostics>,
}

impl EntryGate {
    /// Create a gate from the configuration
    pub fn new(config: &GovernorConfig) -> Self {
        Self {
            timer_threshold_us: config.timer_threshold_us as i64,
            bypass_clock_check: config.bypass_clock_check,
            dump_window_ms: config.dump_window_ms,
            reporting_cpu: config.reporting_cpu,
            switches: AtomicU32::new(config.switches.bits()),
            locks: Arc::new(SoftwareLocks::new()),
            diagnostics: Mutex::new(BlockDiagnostics::new()),
        }
    }

    /// Shared handle to the software locks
    pub fn locks(&self) -> Arc<SoftwareLocks> {
        Arc::clone(&self.locks)
    }

    /// Current idle type switches
    pub fn switches(&self) -> IdleSwitch {
        IdleSwitch::from_bits_truncate(self.switches.load(Ordering::Relaxed))
    }

    /// Enable or disable an idle type
    pub fn set_switch(&self, kind: IdleType, enabled: bool) {
        let bit = kind.switch().bits();
        if enabled {
            self.switches.fetch_or(bit, Ordering::SeqCst);
        } else {
            self.switches.fetch_and(!bit, Ordering::SeqCst);
        }
        log::debug!("idle: {} switch {}", kind.name(), if enabled { "on" } else { "off" });
    }

    /// Copy of the diagnostics
    pub fn diagnostics(&self) -> BlockDiagnostics {
        self.diagnostics.lock().clone()
    }

    /// Count a selection of `kind` on `cpu`
    pub fn record_entry(&self, cpu: usize, kind: IdleType) {
        self.diagnostics.lock().record_entry(cpu, kind);
    }

    /// Run the precondition checks without accounting
    pub fn check<P: IdlePlatform + ?Sized>(&self, platform: &P) -> GateDecision {
        if !self.bypass_clock_check && !platform.policy_allows_deep_idle() {
            return GateDecision::Blocked(BlockReason::Policy);
        }

        if platform.hotplug_in_flight() || platform.online_cpu_count() != 1 {
            return GateDecision::Blocked(BlockReason::Cpu);
        }

        if self.locks.is_locked() {
            return GateDecision::Blocked(BlockReason::Lock);
        }

        if !self.bypass_clock_check {
            let groups = platform.clock_group_count().min(MAX_CLOCK_GROUPS);
            let mut condition_mask = [0u32; MAX_CLOCK_GROUPS];
            let mut block_mask = [0u32; MAX_CLOCK_GROUPS];
            let idle = platform
                .clock_domains_idle(&mut condition_mask[..groups], &mut block_mask[..groups]);
            self.diagnostics
                .lock()
                .set_clock_masks(&condition_mask[..groups], &block_mask[..groups]);
            if !idle {
                return GateDecision::Blocked(BlockReason::Clock);
            }
        }

        let remaining = platform.hw_timer_remaining_us();
        if remaining < 0 || remaining < self.timer_threshold_us {
            return GateDecision::Blocked(BlockReason::Timer);
        }

        GateDecision::Allowed
    }

    /// Run the checks and account for the outcome
    ///
    /// A refusal on the reporting CPU may emit the periodic report.
    pub fn evaluate<P: IdlePlatform + ?Sized>(
        &self,
        cpu: usize,
        platform: &P,
        sink: &mut dyn ReportSink,
    ) -> GateDecision {
        let decision = self.check(platform);
        let now_ms = platform.now_ms();

        let report = {
            let mut diagnostics = self.diagnostics.lock();
            match decision {
                GateDecision::Allowed => {
                    diagnostics.record_allowed(now_ms);
                    None
                }
                GateDecision::Blocked(reason) => diagnostics.record_refusal(
                    cpu,
                    reason,
                    now_ms,
                    self.dump_window_ms,
                    self.reporting_cpu,
                ),
            }
        };

        if let GateDecision::Blocked(reason) = decision {
            log::debug!("idle: cpu{} deep idle blocked by {}", cpu, reason.name());
        }
        if let Some(snapshot) = report {
            snapshot.dump(platform, sink);
        }

        decision
    }

    /// Check whether an idle type may be entered right now
    pub fn may_enter<P: IdlePlatform + ?Sized>(
        &self,
        kind: IdleType,
        cpu: usize,
        platform: &P,
        sink: &mut dyn ReportSink,
    ) -> bool {
        if !self.switches().contains(kind.switch()) {
            return false;
        }
        match kind {
            IdleType::Deep => self.evaluate(cpu, platform, sink).is_allowed(),
            // No platform preconditions exist for these types yet
            IdleType::ScreenOff | IdleType::Slow => false,
            IdleType::Regular => true,
        }
    }
}
