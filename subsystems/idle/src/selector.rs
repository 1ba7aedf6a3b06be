//! # State Selector
//!
//! Idle states are ordered shallowest first; index 0 is the poll/halt
//! fallback that is always available. The selector walks the table and
//! keeps the deepest state whose target residency, exit latency and
//! relative exit cost all fit the prediction.

use arrayvec::ArrayVec;
use bitflags::bitflags;

use crate::error::{IdleError, IdleResult};
use crate::gate::IdleType;
use crate::MAX_STATES;

/// First state the selector may pick over the fallback
pub const STATE_START: usize = 1;

/// Expected sleep (us) above which halting is preferred over polling
const POLL_EXPECTED_MAX_US: u32 = 5;

bitflags! {
    /// Idle state flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StateFlags: u32 {
        /// Residency reported after wake-up is meaningful
        const TIME_VALID = 1 << 0;
        /// State disabled by the driver
        const DISABLED = 1 << 1;
    }
}

/// Description of one idle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleStateDesc {
    /// Short state name
    pub name: &'static str,
    /// Worst-case wake-up latency (us)
    pub exit_latency_us: u32,
    /// Minimum residency for the state to pay off (us)
    pub target_residency_us: u32,
    /// Idle type the state implements
    pub kind: IdleType,
    /// State flags
    pub flags: StateFlags,
}

impl IdleStateDesc {
    /// Create a state with valid residency reporting
    pub const fn new(
        name: &'static str,
        kind: IdleType,
        exit_latency_us: u32,
        target_residency_us: u32,
    ) -> Self {
        Self {
            name,
            exit_latency_us,
            target_residency_us,
            kind,
            flags: StateFlags::TIME_VALID,
        }
    }

    /// Replace the flags
    pub const fn with_flags(mut self, flags: StateFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Check the driver-level disable flag
    #[inline]
    pub fn is_disabled(&self) -> bool {
        self.flags.contains(StateFlags::DISABLED)
    }
}

/// Ordered idle state table
#[derive(Debug, Clone, Default)]
pub struct StateTable {
    states: ArrayVec<IdleStateDesc, MAX_STATES>,
}

impl StateTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            states: ArrayVec::new(),
        }
    }

    /// Build a table from a slice of states
    pub fn from_states(states: &[IdleStateDesc]) -> IdleResult<Self> {
        let mut table = Self::new();
        for &state in states {
            table.push(state)?;
        }
        Ok(table)
    }

    /// Append the next deeper state
    pub fn push(&mut self, state: IdleStateDesc) -> IdleResult<()> {
        self.states.try_push(state).map_err(|_| IdleError::TableFull)
    }

    /// Get a state
    #[inline]
    pub fn get(&self, index: usize) -> Option<&IdleStateDesc> {
        self.states.get(index)
    }

    /// Number of states
    #[inline]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Check if the table is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Iterate states, shallowest first
    pub fn iter(&self) -> impl Iterator<Item = &IdleStateDesc> {
        self.states.iter()
    }

    /// Index of the deepest state of the given kind
    pub fn deepest_of(&self, kind: IdleType) -> Option<usize> {
        self.states.iter().rposition(|s| s.kind == kind)
    }

    /// Index of the shallowest state of the given kind
    pub fn first_of(&self, kind: IdleType) -> Option<usize> {
        self.states.iter().position(|s| s.kind == kind)
    }
}

/// Inputs of one selection
#[derive(Debug, Clone, Copy)]
pub struct SelectInput {
    /// Exit latency ceiling (us)
    pub latency_budget_us: u32,
    /// Expected sleep length from the tick subsystem (us)
    pub expected_us: u32,
    /// Predicted idle duration (us)
    pub predicted_us: u64,
    /// Relative exit cost multiplier
    pub multiplier: u32,
    /// Exclusive upper bound of the scanned indices
    pub limit: usize,
    /// Per-core disable bitmask (bit n disables state n)
    pub usage_disabled: u32,
}

/// Outcome of a selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    /// Chosen state index
    pub index: usize,
    /// Exit latency recorded for residency correction
    pub exit_latency_us: u32,
}

/// State exists, is not driver-disabled and is not masked on this core
pub(crate) fn is_enabled(table: &StateTable, index: usize, usage_disabled: u32) -> bool {
    let usage_ok = index >= u32::BITS as usize || usage_disabled & (1 << index) == 0;
    table.get(index).is_some_and(|s| !s.is_disabled()) && usage_ok
}

/// Pick the deepest state satisfying every constraint
///
/// The latency ceiling does not stop the scan: tables are not required to
/// be monotonic in exit latency.
pub fn select_state(table: &StateTable, input: &SelectInput) -> Selection {
    let mut best = Selection::default();
    if input.latency_budget_us == 0 {
        return best;
    }

    let limit = input.limit.min(table.len());

    if input.expected_us > POLL_EXPECTED_MAX_US
        && STATE_START < limit
        && is_enabled(table, STATE_START, input.usage_disabled)
    {
        best.index = STATE_START;
    }

    for (index, state) in table.iter().enumerate().take(limit).skip(STATE_START) {
        if !is_enabled(table, index, input.usage_disabled) {
            continue;
        }
        if state.target_residency_us as u64 > input.predicted_us {
            continue;
        }
        if state.exit_latency_us > input.latency_budget_us {
            continue;
        }
        if state.exit_latency_us as u64 * input.multiplier as u64 > input.predicted_us {
            continue;
        }
        best = Selection {
            index,
            exit_latency_us: state.exit_latency_us,
        };
    }

    best
}
