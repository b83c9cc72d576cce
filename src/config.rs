// quali-can/src/config.rs
//
// Configuration of a test session.
//
// This file is part of the Rust 'quali-can' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Session configuration.
//!
//! Everything here is fixed when the session is created.

use crate::{driver::DriverConfig, pattern::TxPayload, Id, Mode, StandardId};
use std::time::Duration;

/// The identifier of the test frame unless configured otherwise.
pub const DEFAULT_MSG_ID: u16 = 0x0A3;

/// The timing of the session's loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    /// Period of the rate reports.
    pub rate: Duration,
    /// Pause between alert polls.
    pub alert_poll: Duration,
    /// How long a single alert poll waits for an alert.
    pub alert_wait: Duration,
    /// How long one transmit waits for room in the device queue before the
    /// worker checks for a stop and tries again.
    pub tx_timeout: Duration,
    /// Pause after a failed transmit or a receive fault.
    pub error_backoff: Duration,
    /// How long the receiver waits for a frame before reporting an error.
    pub rx_timeout: Duration,
    /// Pause before each wait for a start request.
    pub restart_poll: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            rate: Duration::from_secs(1),
            alert_poll: Duration::from_millis(500),
            alert_wait: Duration::ZERO,
            tx_timeout: Duration::from_millis(100),
            error_backoff: Duration::from_millis(500),
            rx_timeout: Duration::from_secs(1),
            restart_poll: Duration::from_millis(100),
        }
    }
}

/// The configuration of a test session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// The identifier of the test frame
    pub msg_id: Id,
    /// The driver configuration
    pub driver: DriverConfig,
    /// What the transmit worker sends
    pub payload: TxPayload,
    /// Loop timing
    pub intervals: Intervals,
    /// Stack size of the worker threads; the platform default if unset
    pub worker_stack_size: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            msg_id: default_msg_id(),
            driver: DriverConfig::default(),
            payload: TxPayload::default(),
            intervals: Intervals::default(),
            worker_stack_size: None,
        }
    }
}

impl SessionConfig {
    /// Sets the identifier of the test frame.
    pub fn with_msg_id(mut self, id: impl Into<Id>) -> Self {
        self.msg_id = id.into();
        self
    }

    /// Sets the driver configuration.
    pub fn with_driver(mut self, driver: DriverConfig) -> Self {
        self.driver = driver;
        self
    }

    /// Sets the transmitted payload.
    pub fn with_payload(mut self, payload: TxPayload) -> Self {
        self.payload = payload;
        self
    }

    /// Sets the loop timing.
    pub fn with_intervals(mut self, intervals: Intervals) -> Self {
        self.intervals = intervals;
        self
    }

    /// Sets the stack size of the worker threads, in bytes.
    pub fn with_worker_stack_size(mut self, size: usize) -> Self {
        self.worker_stack_size = Some(size);
        self
    }

    /// Whether the session only listens.
    pub fn is_listen_only(&self) -> bool {
        self.driver.mode() == Mode::ListenOnly
    }
}

fn default_msg_id() -> Id {
    match StandardId::new(DEFAULT_MSG_ID) {
        Some(id) => Id::Standard(id),
        None => Id::Standard(StandardId::ZERO),
    }
}

/////////////////////////////////////////////////////////////////////////////
