//! # Block-Reason Diagnostics
//!
//! Counts why deep idle was refused and prints the aggregate at most once
//! per window. A platform that is blocked for good would otherwise log on
//! every idle entry.
//!
//! ## Window
//!
//! ```text
//!   refusal ──▶ count[cpu][reason] += 1
//!                  │
//!                  ├── window never measured ──▶ start = now
//!                  │
//!                  └── now - start > window && cpu == reporting_cpu
//!                           │
//!                           ▼
//!                      dump, clear counts, start = now
//!
//!   allowed ──▶ start = now
//! ```
//!
//! An allowed entry restarts the window, so only continuous blocking is
//! ever reported. Counters are cleared at a dump and nowhere else.

use crate::gate::{BlockReason, IdleType, REASON_COUNT};
use crate::platform::IdlePlatform;
use crate::report::{emit, ReportSink};
use crate::{MAX_CLOCK_GROUPS, MAX_CPUS};

/// Number of idle types tracked per core
pub const IDLE_TYPE_COUNT: usize = IdleType::ALL.len();

/// Shared refusal and entry accounting
#[derive(Debug, Clone)]
pub struct BlockDiagnostics {
    block_counts: [[u64; REASON_COUNT]; MAX_CPUS],
    entry_counts: [[u64; IDLE_TYPE_COUNT]; MAX_CPUS],
    last_block_ms: Option<u64>,
    condition_mask: [u32; MAX_CLOCK_GROUPS],
    block_mask: [u32; MAX_CLOCK_GROUPS],
    group_count: usize,
    dumps: u64,
}

impl BlockDiagnostics {
    /// Create empty accounting
    pub const fn new() -> Self {
        Self {
            block_counts: [[0; REASON_COUNT]; MAX_CPUS],
            entry_counts: [[0; IDLE_TYPE_COUNT]; MAX_CPUS],
            last_block_ms: None,
            condition_mask: [0; MAX_CLOCK_GROUPS],
            block_mask: [0; MAX_CLOCK_GROUPS],
            group_count: 0,
            dumps: 0,
        }
    }

    /// Refusals of `reason` on `cpu` since the last dump
    pub fn block_count(&self, cpu: usize, reason: BlockReason) -> u64 {
        self.block_counts
            .get(cpu)
            .map_or(0, |counts| counts[reason.index()])
    }

    /// Selections of `kind` on `cpu`
    pub fn entry_count(&self, cpu: usize, kind: IdleType) -> u64 {
        self.entry_counts
            .get(cpu)
            .map_or(0, |counts| counts[kind.index()])
    }

    /// Start of the current window, if it was ever measured
    #[inline]
    pub fn window_start_ms(&self) -> Option<u64> {
        self.last_block_ms
    }

    /// Number of dumps emitted so far
    #[inline]
    pub fn dumps(&self) -> u64 {
        self.dumps
    }

    /// Clock masks of the last evaluation
    pub fn clock_masks(&self) -> (&[u32], &[u32]) {
        (
            &self.condition_mask[..self.group_count],
            &self.block_mask[..self.group_count],
        )
    }

    /// Store the clock masks of the current evaluation
    pub fn set_clock_masks(&mut self, condition_mask: &[u32], block_mask: &[u32]) {
        let count = condition_mask.len().min(block_mask.len()).min(MAX_CLOCK_GROUPS);
        self.condition_mask[..count].copy_from_slice(&condition_mask[..count]);
        self.block_mask[..count].copy_from_slice(&block_mask[..count]);
        self.group_count = count;
    }

    /// Count a successful selection
    pub fn record_entry(&mut self, cpu: usize, kind: IdleType) {
        if let Some(counts) = self.entry_counts.get_mut(cpu) {
            counts[kind.index()] += 1;
        }
    }

    /// Deep idle was allowed: restart the window
    pub fn record_allowed(&mut self, now_ms: u64) {
        self.last_block_ms = Some(now_ms);
    }

    /// Count a refusal
    ///
    /// Returns a snapshot to dump when the window elapsed on the reporting
    /// CPU. The counters are already cleared when this returns `Some`.
    pub fn record_refusal(
        &mut self,
        cpu: usize,
        reason: BlockReason,
        now_ms: u64,
        window_ms: u64,
        reporting_cpu: usize,
    ) -> Option<BlockDiagnostics> {
        if let Some(counts) = self.block_counts.get_mut(cpu) {
            counts[reason.index()] += 1;
        }

        let Some(start) = self.last_block_ms else {
            self.last_block_ms = Some(now_ms);
            return None;
        };

        if now_ms.saturating_sub(start) <= window_ms || cpu != reporting_cpu {
            return None;
        }

        self.dumps += 1;
        let snapshot = self.clone();
        self.block_counts = [[0; REASON_COUNT]; MAX_CPUS];
        self.last_block_ms = Some(now_ms);
        Some(snapshot)
    }

    /// Write the report
    pub fn dump<P: IdlePlatform + ?Sized>(&self, platform: &P, sink: &mut dyn ReportSink) {
        for cpu in 0..MAX_CPUS {
            emit(
                sink,
                format_args!(
                    "dpidle_cnt[{}]={}, rgidle_cnt[{}]={}",
                    cpu,
                    self.entry_count(cpu, IdleType::Deep),
                    cpu,
                    self.entry_count(cpu, IdleType::Regular)
                ),
            );
        }

        for cpu in 0..MAX_CPUS {
            for reason in BlockReason::ALL {
                emit(
                    sink,
                    format_args!(
                        "[{}]dpidle_block_cnt[{}]={}",
                        cpu,
                        reason.name(),
                        self.block_count(cpu, reason)
                    ),
                );
            }
        }

        let (condition, block) = self.clock_masks();
        for (group, (cond, blk)) in condition.iter().zip(block).enumerate() {
            let name = platform.clock_group_name(group);
            emit(
                sink,
                format_args!(
                    "[{:02}]dpidle_condition_mask[{:<8}]=0x{:08x}\t\tdpidle_block_mask[{:<8}]=0x{:08x}",
                    group, name, cond, name, blk
                ),
            );
        }

        sink.flush();
    }
}

impl Default for BlockDiagnostics {
    fn default() -> Self {
        Self::new()
    }
}
