//! # Helix Idle Governor
//!
//! Decision core of the CPU idle-state governor. When a core is about to go
//! idle, the governor predicts how long it will stay idle and selects the
//! deepest idle state whose residency and latency requirements fit that
//! prediction. Before the deepest, system-wide state is entered, a gate
//! verifies the platform preconditions and records why entry was refused.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         IdleGovernor                             │
//! │                                                                  │
//! │   select(cpu) ──┬──▶ EntryGate ──────▶ BlockDiagnostics ──▶ dump │
//! │                 │    (deepest state)   (per-reason counters)     │
//! │                 │                                                │
//! │                 └──▶ Predictor ──────▶ StateSelector             │
//! │                      ▲       ▲         (remaining states)        │
//! │                      │       │                                   │
//! │   reflect(cpu) ──▶ CorrectionModel  IntervalHistory              │
//! │                    (12 buckets)     (8-sample ring)              │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Components
//!
//! - **Interval History**: ring of recent residencies, typical interval by
//!   iterative outlier trimming
//! - **Correction Model**: per-bucket adaptive factor scaling the tick
//!   subsystem's sleep estimate toward observed residency
//! - **Predictor**: combines both into a [`predictor::Prediction`]
//! - **State Selector**: scan of the state table, shallowest first
//! - **Entry Gate**: ordered precondition checks for deep idle
//! - **Diagnostics**: rate-limited refusal accounting
//!
//! Platform queries are consumed through [`platform::IdlePlatform`]; nothing
//! in this crate touches hardware.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

extern crate alloc;

pub mod config;
pub mod correction;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod gate;
pub mod governor;
pub mod history;
pub mod platform;
pub mod predictor;
pub mod report;
pub mod selector;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{GovernorConfig, SelectPolicy};
pub use error::{IdleError, IdleResult};
pub use gate::{BlockReason, EntryGate, GateDecision, IdleSwitch, IdleType, SoftwareLocks};
pub use governor::IdleGovernor;
pub use platform::IdlePlatform;
pub use report::{LogSink, ReportSink};
pub use selector::{IdleStateDesc, StateFlags, StateTable};

// =============================================================================
// Limits
// =============================================================================

/// Maximum number of cores the governor tracks
pub const MAX_CPUS: usize = 8;

/// Maximum number of idle states in a state table
pub const MAX_STATES: usize = 10;

/// Maximum number of clock/power groups reported by the platform
pub const MAX_CLOCK_GROUPS: usize = 16;

/// Number of software lock bits
pub const MAX_LOCKS: u8 = 32;

// =============================================================================
// Predictor constants
// =============================================================================

/// Number of correction buckets (two I/O-wait groups of six bands)
pub const BUCKETS: usize = 12;

/// Number of residency samples in the interval history
pub const INTERVALS: usize = 8;

/// Fixed-point scale of a correction factor
pub const RESOLUTION: u64 = 1024;

/// Decay divisor of the correction factor
pub const DECAY: u64 = 8;

/// Residencies at or above this many microseconds count as a perfect prediction
pub const MAX_INTERESTING: u32 = 50_000;

static_assertions::const_assert!(BUCKETS % 2 == 0);
static_assertions::const_assert!(INTERVALS >= 4);
static_assertions::const_assert!(MAX_CPUS <= 64);
static_assertions::const_assert!(MAX_STATES >= 2);
static_assertions::const_assert!((MAX_LOCKS as u32) <= u32::BITS);
