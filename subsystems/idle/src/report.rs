//! # Diagnostic Report Output
//!
//! Destination of the periodic block-reason dump. The default sink forwards
//! every line to the `log` facade; kernels with an early console can route
//! lines elsewhere.

use core::fmt::{self, Write};

use spin::Mutex;

/// Tag prefixed to every report line
pub const REPORT_TAG: &str = "[Power/idle]";

/// Capacity of a formatted report line (bytes)
pub const LINE_CAPACITY: usize = 192;

/// Fixed-capacity report line
pub type ReportLine = heapless::String<LINE_CAPACITY>;

/// Report sink trait
pub trait ReportSink {
    /// Write one complete line
    fn write_line(&mut self, line: &str);

    /// Flush after a full report
    fn flush(&mut self) {}
}

/// Sink forwarding lines to `log::info!`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn write_line(&mut self, line: &str) {
        log::info!(target: "idle", "{}", line);
    }
}

/// Sink shared between cores
///
/// The lock is taken per line, only while a report is being written.
impl<S: ReportSink> ReportSink for &Mutex<S> {
    fn write_line(&mut self, line: &str) {
        self.lock().write_line(line);
    }

    fn flush(&mut self) {
        self.lock().flush();
    }
}

/// Writer filling a [`ReportLine`] up to its capacity
struct Truncating<'a>(&'a mut ReportLine);

impl Write for Truncating<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = LINE_CAPACITY - self.0.len();
        let mut end = s.len().min(room);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        // Fits by construction
        let _ = self.0.push_str(&s[..end]);
        Ok(())
    }
}

/// Format a tagged line and hand it to the sink
///
/// Lines longer than [`LINE_CAPACITY`] are cut at the last whole character
/// that fits.
pub fn emit(sink: &mut dyn ReportSink, args: fmt::Arguments<'_>) {
    let mut line = ReportLine::new();
    let mut writer = Truncating(&mut line);
    let _ = writer.write_str(REPORT_TAG);
    let _ = writer.write_fmt(args);
    sink.write_line(&line);
}
