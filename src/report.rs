// quali-can/src/report.rs
//
// The status-reporting channel to the test supervisor.
//
// This file is part of the Rust 'quali-can' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Status reporting.
//!
//! A test session talks to its supervisor through a [`StatusReporter`].
//! The supervisor starts and stops test runs, and the session sends back
//! one-line status reports, each prefixed with `ERR:` or `INF:`.

use crate::ReportError;
use std::{fmt, str::FromStr, sync::Arc};

pub mod memory;
pub mod tcp;

/// The transport between a test session and its supervisor.
pub trait StatusReporter: Send + Sync {
    /// Blocks until the supervisor asks for a test run to start.
    ///
    /// Implementations may give up after a while with
    /// [`ReportError::Timeout`], which the caller treats as "not yet".
    /// [`ReportError::Closed`] means no request can ever arrive.
    fn wait_for_start(&self) -> Result<(), ReportError>;

    /// Blocks until the supervisor asks for the running test to stop.
    ///
    /// Timeouts and closure behave as for [`StatusReporter::wait_for_start`].
    fn wait_for_stop(&self) -> Result<(), ReportError>;

    /// Delivers a single status line.
    fn report_status(&self, line: &str) -> Result<(), ReportError>;
}

impl<T: StatusReporter + ?Sized> StatusReporter for Arc<T> {
    fn wait_for_start(&self) -> Result<(), ReportError> {
        (**self).wait_for_start()
    }

    fn wait_for_stop(&self) -> Result<(), ReportError> {
        (**self).wait_for_stop()
    }

    fn report_status(&self, line: &str) -> Result<(), ReportError> {
        (**self).report_status(line)
    }
}

// ===== Status lines =====

/// The class of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// An error or an alert
    Err,
    /// Information, like a rate report
    Inf,
}

impl Severity {
    /// The line prefix, without the separator.
    pub fn prefix(&self) -> &'static str {
        match self {
            Severity::Err => "ERR",
            Severity::Inf => "INF",
        }
    }
}

/// A single status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// The class of the report
    pub severity: Severity,
    /// The text after the prefix
    pub text: String,
}

impl Status {
    /// Creates an error report.
    pub fn err(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Err,
            text: text.into(),
        }
    }

    /// Creates an informational report.
    pub fn inf(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Inf,
            text: text.into(),
        }
    }

    /// Whether this is an error report.
    pub fn is_err(&self) -> bool {
        self.severity == Severity::Err
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.severity.prefix(), self.text)
    }
}

// ===== Supervisor commands =====

/// A request from the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start a test run
    Start,
    /// Stop the running test
    Stop,
}

/// A line from the supervisor that isn't a command.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown command: '{0}'")]
pub struct ParseCommandError(String);

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("start") {
            Ok(Command::Start)
        } else if s.eq_ignore_ascii_case("stop") {
            Ok(Command::Stop)
        } else {
            Err(ParseCommandError(s.to_string()))
        }
    }
}

/////////////////////////////////////////////////////////////////////////////
