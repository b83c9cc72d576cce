// quali-can/src/errors.rs
//
// Error types for the driver, the status reporter and the test session.
//
// This file is part of the Rust 'quali-can' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Errors.
//!
//! Each collaborator has its own error type:
//!
//! - [`DriverError`] for calls into the CAN peripheral driver,
//! - [`ReportError`] for the status reporting channel,
//! - [`SessionError`] for the faults that end a session or abort a run,
//! - [`ConstructionError`] for building frames.
//!
//! Only a failed driver install is fatal to a session. Everything else
//! is reported as a status line and the run goes on.

use std::io;
use thiserror::Error;

// ===== DriverError =====

/// An error from the CAN peripheral driver.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The operation did not complete within its timeout.
    #[error("timed out")]
    Timeout,
    /// The driver has not been installed.
    #[error("driver not installed")]
    NotInstalled,
    /// The driver was already installed.
    #[error("driver already installed")]
    AlreadyInstalled,
    /// The peripheral is not started.
    #[error("driver not running")]
    NotRunning,
    /// The configuration asks for something this driver can't do.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    /// I/O error from the underlying device
    #[error(transparent)]
    Io(#[from] io::Error),
    /// Interface configuration over netlink failed.
    #[error("netlink: {0}")]
    Netlink(String),
}

impl DriverError {
    /// Whether the error is a timeout, and the call may simply be retried.
    pub fn is_timeout(&self) -> bool {
        match self {
            DriverError::Timeout => true,
            DriverError::Io(err) => err.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

// ===== ReportError =====

/// An error from the status reporting channel.
#[derive(Error, Debug)]
pub enum ReportError {
    /// No command arrived within the wait period.
    #[error("timed out waiting for a command")]
    Timeout,
    /// The reporter shut down and will not deliver any more commands.
    #[error("reporter closed")]
    Closed,
    /// Nobody is connected to receive status lines.
    #[error("no supervisor connected")]
    NotConnected,
    /// I/O error on the reporting channel
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ReportError {
    /// Whether the error is the end of a wait period rather than a fault.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ReportError::Timeout)
    }
}

// ===== SessionError =====

/// A fault that ends a test session or aborts a run.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The driver could not be installed. The session cannot run.
    #[error("driver install failed: {0}")]
    Install(#[source] DriverError),
    /// A worker task could not be started.
    #[error("could not start can {task} task")]
    Spawn {
        /// The name of the worker
        task: &'static str,
        /// The OS error from creating the thread
        #[source]
        source: io::Error,
    },
}

// ===== ConstructionError =====

/// Error that occurs when creating CAN frames
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConstructionError {
    /// Trying to create a specific frame type from an incompatible type
    #[error("Incompatible frame type")]
    WrongFrameType,
    /// CAN ID was outside the range of valid IDs
    #[error("CAN ID too large")]
    IDTooLarge,
    /// Larger payload reported than can be held in the frame.
    #[error("Payload is too large")]
    TooMuchData,
}

/////////////////////////////////////////////////////////////////////////////
