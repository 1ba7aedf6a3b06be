//! # Platform Queries
//!
//! Everything the governor needs to know about the machine comes through
//! [`IdlePlatform`]. Implementations wrap the tick subsystem, the PM QoS
//! latency constraint, the clock manager and the local timer. All queries
//! must be non-blocking reads; they run on the idle path.

/// Platform collaborator consumed by the governor
pub trait IdlePlatform {
    /// Time until the next scheduled wake event on `cpu` (microseconds)
    fn expected_sleep_us(&self, cpu: usize) -> u32;

    /// Number of tasks blocked on I/O that were last running on `cpu`
    fn io_wait_count(&self, cpu: usize) -> u32;

    /// Current system-wide exit latency constraint (microseconds)
    ///
    /// Zero forbids anything deeper than state 0.
    fn latency_budget_us(&self) -> u32;

    /// Time until the next local hardware timer event (microseconds)
    ///
    /// Negative values mean the timer is already due or has wrapped.
    fn hw_timer_remaining_us(&self) -> i64;

    /// Check whether every clock/power group may be powered down
    ///
    /// `condition_mask` and `block_mask` receive, per group, the clocks the
    /// platform requires off and the clocks currently preventing it.
    fn clock_domains_idle(&self, condition_mask: &mut [u32], block_mask: &mut [u32]) -> bool;

    /// Number of clock groups reported by `clock_domains_idle`
    fn clock_group_count(&self) -> usize;

    /// Human-readable name of a clock group
    fn clock_group_name(&self, group: usize) -> &'static str;

    /// Voltage/thermal policy permits deep idle
    fn policy_allows_deep_idle(&self) -> bool;

    /// A CPU hot-plug transition is in progress
    fn hotplug_in_flight(&self) -> bool;

    /// Number of online CPUs
    fn online_cpu_count(&self) -> u32;

    /// Wall-clock time in milliseconds
    fn now_ms(&self) -> u64;
}
