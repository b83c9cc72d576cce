// quali-can/src/report/memory.rs
//
// An in-process status reporter.
//
// This file is part of the Rust 'quali-can' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! In-memory status reporter.
//!
//! Commands are queued by calling [`MemoryReporter::start`] and
//! [`MemoryReporter::stop`], and every status line is kept for inspection.
//! This lets a test play the supervisor from the same process.

use crate::{
    report::{Command, StatusReporter},
    ReportError,
};
use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

#[derive(Debug, Default)]
struct Inner {
    lines: Vec<String>,
    commands: VecDeque<Command>,
    closed: bool,
}

/// A status reporter that keeps everything in memory.
#[derive(Debug)]
pub struct MemoryReporter {
    inner: Mutex<Inner>,
    cond: Condvar,
    poll: Duration,
}

impl Default for MemoryReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryReporter {
    /// Creates a reporter whose waits give up after 50ms.
    pub fn new() -> Self {
        Self::with_poll(Duration::from_millis(50))
    }

    /// Creates a reporter whose waits give up after the given time.
    pub fn with_poll(poll: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            cond: Condvar::new(),
            poll,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, cmd: Command) {
        self.lock().commands.push_back(cmd);
        self.cond.notify_all();
    }

    /// Asks for a test run to start.
    pub fn start(&self) {
        self.push(Command::Start);
    }

    /// Asks for the running test to stop.
    pub fn stop(&self) {
        self.push(Command::Stop);
    }

    /// Closes the channel. Once the queued commands are taken, every wait
    /// fails with [`ReportError::Closed`].
    pub fn close(&self) {
        self.lock().closed = true;
        self.cond.notify_all();
    }

    /// All status lines reported so far.
    pub fn lines(&self) -> Vec<String> {
        self.lock().lines.clone()
    }

    /// The reported lines starting with `ERR:`.
    pub fn errors(&self) -> Vec<String> {
        self.lock()
            .lines
            .iter()
            .filter(|line| line.starts_with("ERR:"))
            .cloned()
            .collect()
    }

    /// Forgets the lines reported so far.
    pub fn clear(&self) {
        self.lock().lines.clear();
    }

    /// Waits for a line matching the predicate to be reported, returning
    /// the first match, or `None` on timeout.
    pub fn wait_for_line<F>(&self, mut pred: F, timeout: Duration) -> Option<String>
    where
        F: FnMut(&str) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if let Some(line) = inner.lines.iter().find(|line| pred(line)) {
                return Some(line.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            inner = self
                .cond
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Takes the wanted command off the queue, dropping any other one
    /// queued ahead of it.
    fn wait_for(&self, wanted: Command) -> Result<(), ReportError> {
        let deadline = Instant::now() + self.poll;
        let mut inner = self.lock();
        loop {
            while let Some(cmd) = inner.commands.pop_front() {
                if cmd == wanted {
                    return Ok(());
                }
            }
            if inner.closed {
                return Err(ReportError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ReportError::Timeout);
            }
            inner = self
                .cond
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl StatusReporter for MemoryReporter {
    fn wait_for_start(&self) -> Result<(), ReportError> {
        self.wait_for(Command::Start)
    }

    fn wait_for_stop(&self) -> Result<(), ReportError> {
        self.wait_for(Command::Stop)
    }

    fn report_status(&self, line: &str) -> Result<(), ReportError> {
        self.lock().lines.push(line.to_string());
        self.cond.notify_all();
        Ok(())
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn test_commands() {
        let reporter = MemoryReporter::with_poll(Duration::from_millis(10));
        assert!(reporter.wait_for_start().unwrap_err().is_timeout());

        // A stale stop doesn't count as a start
        reporter.stop();
        reporter.start();
        assert!(reporter.wait_for_start().is_ok());
        assert!(reporter.wait_for_start().unwrap_err().is_timeout());

        reporter.start();
        reporter.close();
        assert!(reporter.wait_for_start().is_ok());
        assert!(matches!(reporter.wait_for_stop(), Err(ReportError::Closed)));
    }

    #[test]
    fn test_lines() {
        let reporter = MemoryReporter::new();
        reporter.report_status("INF: Rx rate: 0 bit/s (0 messages/sec)").unwrap();
        reporter.report_status("ERR: ALERT_BUS_OFF").unwrap();

        assert_eq!(2, reporter.lines().len());
        assert_eq!(vec!["ERR: ALERT_BUS_OFF".to_string()], reporter.errors());

        reporter.clear();
        assert!(reporter.lines().is_empty());
    }

    #[test]
    fn test_wait_for_line() {
        let reporter = Arc::new(MemoryReporter::new());
        let writer = {
            let reporter = Arc::clone(&reporter);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                reporter.report_status("INF: ready")
            })
        };

        let line = reporter.wait_for_line(|l| l.contains("ready"), Duration::from_secs(5));
        assert_eq!(Some("INF: ready".to_string()), line);
        writer.join().unwrap().unwrap();

        assert!(reporter
            .wait_for_line(|l| l.contains("never"), Duration::from_millis(10))
            .is_none());
    }
}
