//! Test doubles shared by the unit tests.

use crate::platform::IdlePlatform;
use crate::report::ReportSink;

/// Clock groups exposed by [`MockPlatform`]
pub const CLOCK_GROUPS: [&str; 3] = ["top", "periph", "mm"];

/// Scriptable platform
#[derive(Debug, Clone, Default)]
pub struct MockPlatform {
    pub policy_ok: bool,
    pub online_cpus: u32,
    pub hotplug: bool,
    pub clock_idle: bool,
    pub condition_mask: [u32; 3],
    pub block_mask: [u32; 3],
    pub timer_remaining_us: i64,
    pub latency_budget_us: u32,
    pub expected_us: u32,
    pub io_wait: u32,
    pub now_ms: u64,
}

impl MockPlatform {
    /// Single core up, nothing blocking deep idle
    pub fn deep_ready() -> Self {
        Self {
            policy_ok: true,
            online_cpus: 1,
            clock_idle: true,
            timer_remaining_us: 100_000,
            latency_budget_us: 100_000,
            expected_us: 10_000,
            ..Default::default()
        }
    }
}

impl IdlePlatform for MockPlatform {
    fn expected_sleep_us(&self, _cpu: usize) -> u32 {
        self.expected_us
    }

    fn io_wait_count(&self, _cpu: usize) -> u32 {
        self.io_wait
    }

    fn latency_budget_us(&self) -> u32 {
        self.latency_budget_us
    }

    fn hw_timer_remaining_us(&self) -> i64 {
        self.timer_remaining_us
    }

    fn clock_domains_idle(&self, condition_mask: &mut [u32], block_mask: &mut [u32]) -> bool {
        for (dst, src) in condition_mask.iter_mut().zip(&self.condition_mask) {
            *dst = *src;
        }
        for (dst, src) in block_mask.iter_mut().zip(&self.block_mask) {
            *dst = *src;
        }
        self.clock_idle
    }

    fn clock_group_count(&self) -> usize {
        CLOCK_GROUPS.len()
    }

    fn clock_group_name(&self, group: usize) -> &'static str {
        CLOCK_GROUPS.get(group).copied().unwrap_or("?")
    }

    fn policy_allows_deep_idle(&self) -> bool {
        self.policy_ok
    }

    fn hotplug_in_flight(&self) -> bool {
        self.hotplug
    }

    fn online_cpu_count(&self) -> u32 {
        self.online_cpus
    }

    fn now_ms(&self) -> u64 {
        self.now_ms
    }
}

/// Sink keeping every line in memory
#[derive(Debug, Default)]
pub struct CaptureSink {
    pub lines: Vec<String>,
    pub flushes: usize,
}

impl ReportSink for CaptureSink {
    fn write_line(&mut self, line: &str) {
        self.lines.push(line.into());
    }

    fn flush(&mut self) {
        self.flushes += 1;
    }
}
