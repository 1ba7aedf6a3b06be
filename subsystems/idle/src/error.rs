//! # Idle Governor Errors
//!
//! Errors are confined to the setup surface (enabling cores, taking locks,
//! validating configuration). The decision path itself never fails: gate
//! refusals are outcomes, not errors.

use core::fmt;

/// Idle governor error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleError {
    /// CPU id is outside the governor's arena
    InvalidCpu(usize),
    /// CPU was never enabled
    NotEnabled(usize),
    /// CPU is already enabled (strict enable only)
    AlreadyEnabled(usize),
    /// Software lock id does not fit the lock bitmask
    InvalidLockId(u8),
    /// State table has no room for another state
    TableFull,
    /// Configuration rejected
    InvalidConfig(&'static str),
}

impl fmt::Display for IdleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCpu(cpu) => write!(f, "Invalid CPU id {}", cpu),
            Self::NotEnabled(cpu) => write!(f, "CPU {} is not enabled", cpu),
            Self::AlreadyEnabled(cpu) => write!(f, "CPU {} is already enabled", cpu),
            Self::InvalidLockId(id) => write!(f, "Invalid lock id {}", id),
            Self::TableFull => write!(f, "Idle state table is full"),
            Self::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

/// Result type for idle governor operations
pub type IdleResult<T> = Result<T, IdleError>;
