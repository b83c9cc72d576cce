// quali-can/src/lib.rs
//
// The main lib file for the CAN transceiver qualification harness.
//
// This file is part of the Rust 'quali-can' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! CAN transceiver qualification harness.
//!
//! The harness loads a CAN bus at full rate through a transceiver under
//! test, verifies that every received frame carries the expected
//! incrementing byte pattern, watches the controller for bus-health
//! alerts, and reports throughput to a remote supervisor once a second.
//!
//! # Test sessions
//!
//! A [`TestSession`] owns one CAN interface. Its control task installs the
//! driver once and then waits for the supervisor to start a run. Each run
//! spawns a set of cooperating workers:
//!
//! - the alert monitor, forwarding bus-health alerts,
//! - one rate reporter per direction,
//! - the receive worker, which starts the peripheral and checks the data,
//! - the transmit worker, unless the session runs in listen-only mode.
//!
//! When the supervisor stops the run, every worker leaves its loop, the
//! peripheral is stopped, and the session goes back to waiting. Calling
//! [`TestHandle::request_stop_restart`] keeps the session from starting
//! any further run.
//!
//! # Collaborators
//!
//! The peripheral is reached through the [`Driver`] trait. On Linux the
//! [`SocketCanDriver`] talks to a SocketCAN interface, configured over
//! netlink when the `netlink` feature is enabled. The supervisor is reached
//! through the [`StatusReporter`] trait; [`TcpReporter`] serves it over a
//! line-based TCP connection.
//!
//! [`MockDriver`] and [`MemoryReporter`] are in-process stand-ins for both,
//! suited to exercising sessions without hardware.
//!
//! # Status lines
//!
//! Everything the harness tells the supervisor is a single text line
//! prefixed `ERR:` or `INF:`, for example:
//!
//! ```text
//! INF: Tx rate: 520000 bit/s (8125 messages/sec)
//! ERR: ALERT_BUS_ERROR
//! ERR: wrong data: expected 0A0A0A0A0A0A0A0A got 0A0A0A0B0A0A0A0A
//! ```

#![deny(
    missing_docs,
    missing_debug_implementations,
    unstable_features,
    unused_import_braces
)]

use std::{mem::size_of, slice};

// Re-export the embedded_can crate so that applications can rely on
// finding the same version we use.
pub use embedded_can::{self, ExtendedId, Frame as EmbeddedFrame, Id, StandardId};

pub mod addr;
pub use addr::CanAddr;

pub mod alert;
pub use alert::Alerts;

pub mod config;
pub use config::{Intervals, SessionConfig};

pub mod counters;
pub use counters::{Counters, Direction, SessionCounters, Snapshot};

pub mod driver;
pub use driver::{
    mock::{DriverCall, MockConfig, MockDriver},
    socketcan::SocketCanDriver,
    Driver, DriverConfig, FilterConfig, GeneralConfig, Mode, TimingConfig,
};

pub mod errors;
pub use errors::{ConstructionError, DriverError, ReportError, SessionError};

pub mod frame;
pub use frame::{CanFrame, IdFlags};

#[cfg(feature = "netlink")]
pub mod nl;
#[cfg(feature = "netlink")]
pub use nl::CanInterface;

pub mod pattern;
pub use pattern::{SequenceChecker, TxPayload, Verdict};

pub mod report;
pub use report::{
    memory::MemoryReporter, tcp::TcpReporter, Command, Severity, Status, StatusReporter,
};

pub mod session;
pub use session::{SessionState, TestHandle, TestSession};

pub mod socket;
pub use socket::{CanFilter, CanSocket, ShouldRetry, SocketOptions};

mod monitor;
mod rate;
mod receive;
mod transmit;

/// A result type for SocketCAN I/O operations.
pub type IoResult<T> = std::io::Result<T>;

/// An I/O error from the SocketCAN layer.
pub type IoError = std::io::Error;

/// The kind of an I/O error.
pub type IoErrorKind = std::io::ErrorKind;

// ===== Byte views of C structs =====

/// Views a plain C struct as its raw bytes.
pub(crate) fn as_bytes<T: Sized>(val: &T) -> &[u8] {
    let sz = size_of::<T>();
    unsafe { slice::from_raw_parts::<'_, u8>(val as *const _ as *const u8, sz) }
}

/// Views a plain C struct as its raw, mutable bytes.
pub(crate) fn as_bytes_mut<T: Sized>(val: &mut T) -> &mut [u8] {
    let sz = size_of::<T>();
    unsafe { slice::from_raw_parts_mut(val as *mut _ as *mut u8, sz) }
}
