// quali-can/src/driver.rs
//
// The CAN peripheral driver interface and its configuration.
//
// This file is part of the Rust 'quali-can' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! CAN peripheral driver adapter.
//!
//! A test session reaches the CAN controller only through the [`Driver`]
//! trait. The driver is installed once with a [`DriverConfig`], then
//! started and stopped around every test run.
//!
//! All operations take `&self`: during a run, the transmit worker, the
//! receive worker and the alert monitor call into the same driver from
//! their own threads.

use crate::{socket::CanFilter, Alerts, CanFrame, DriverError};
use std::{sync::Arc, time::Duration};

pub mod mock;
pub mod socketcan;

// ===== Configuration =====

/// The bit timing of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimingConfig {
    /// Leave the timing as the interface is already configured.
    #[default]
    Preconfigured,
    /// Set the bitrate, in bits/s, and optionally the sample point in
    /// tenths of a percent.
    Bitrate {
        /// Bits per second
        bitrate: u32,
        /// Sample point, 0..1000
        sample_point: Option<u32>,
    },
}

impl TimingConfig {
    /// The timing used by the qualification rig: 1 Mbit/s.
    pub const fn rate_1mbits() -> Self {
        Self::Bitrate {
            bitrate: 1_000_000,
            sample_point: None,
        }
    }

    /// The configured bitrate, if any.
    pub fn bitrate(&self) -> Option<u32> {
        match *self {
            Self::Preconfigured => None,
            Self::Bitrate { bitrate, .. } => Some(bitrate),
        }
    }
}

/// Acceptance filtering of received frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterConfig {
    /// A frame is accepted if it matches any of the filters.
    pub filters: Vec<CanFilter>,
}

impl FilterConfig {
    /// A filter set that accepts every frame.
    pub fn accept_all() -> Self {
        Self {
            filters: vec![CanFilter::accept_all()],
        }
    }

    /// Whether a frame with the given composite ID word passes.
    pub fn accepts(&self, id_word: u32) -> bool {
        self.filters.iter().any(|f| f.matches(id_word))
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self::accept_all()
    }
}

/// The operating mode of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Transmit and receive, expecting acknowledgements.
    #[default]
    Normal,
    /// Transmit without requiring an acknowledgement from another node.
    NoAck,
    /// Receive only. The controller never drives the bus.
    ListenOnly,
}

impl Mode {
    /// Whether the controller may transmit in this mode.
    pub fn can_transmit(&self) -> bool {
        *self != Mode::ListenOnly
    }
}

/// General driver settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GeneralConfig {
    /// The operating mode
    pub mode: Mode,
    /// Bring the link up on start and down on stop.
    pub manage_link: bool,
    /// Automatic bus-off restart delay, in milliseconds. Zero disables
    /// automatic restarts. `None` leaves the interface setting alone.
    pub restart_ms: Option<u32>,
    /// Deliver our own transmitted frames to our receiver, as a virtual
    /// bus without a second node needs.
    pub loopback: bool,
}

/// Everything the driver needs to bring up the controller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DriverConfig {
    /// Bit timing
    pub timing: TimingConfig,
    /// Acceptance filters
    pub filter: FilterConfig,
    /// Mode and link handling
    pub general: GeneralConfig,
}

impl DriverConfig {
    /// Sets the bit timing.
    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Sets the operating mode.
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.general.mode = mode;
        self
    }

    /// Sets the acceptance filters.
    pub fn with_filters(mut self, filters: Vec<CanFilter>) -> Self {
        self.filter = FilterConfig { filters };
        self
    }

    /// The operating mode.
    pub fn mode(&self) -> Mode {
        self.general.mode
    }
}

// ===== Driver =====

/// The CAN peripheral driver.
pub trait Driver: Send + Sync {
    /// Installs the driver with its configuration.
    ///
    /// Called once per session. A failure here is fatal to the session.
    fn install(&self, config: &DriverConfig) -> Result<(), DriverError>;

    /// Starts the peripheral, joining the bus.
    fn start(&self) -> Result<(), DriverError>;

    /// Stops the peripheral, leaving the bus.
    fn stop(&self) -> Result<(), DriverError>;

    /// Queues a frame for transmission.
    ///
    /// With a timeout of `None` this waits for room in the queue for as
    /// long as it takes.
    fn transmit(&self, frame: &CanFrame, timeout: Option<Duration>) -> Result<(), DriverError>;

    /// Receives the next frame.
    ///
    /// Fails with [`DriverError::Timeout`] if no frame arrived in time. With
    /// a timeout of `None` this waits indefinitely.
    fn receive(&self, timeout: Option<Duration>) -> Result<CanFrame, DriverError>;

    /// Selects the alerts that [`Driver::read_alerts`] reports.
    fn configure_alerts(&self, alerts: Alerts) -> Result<(), DriverError>;

    /// Reads the alerts raised since the last call.
    ///
    /// Waits up to `timeout` for the first alert. Returns an empty set if
    /// nothing was raised.
    fn read_alerts(&self, timeout: Duration) -> Alerts;
}

impl<T: Driver + ?Sized> Driver for Arc<T> {
    fn install(&self, config: &DriverConfig) -> Result<(), DriverError> {
        (**self).install(config)
    }

    fn start(&self) -> Result<(), DriverError> {
        (**self).start()
    }

    fn stop(&self) -> Result<(), DriverError> {
        (**self).stop()
    }

    fn transmit(&self, frame: &CanFrame, timeout: Option<Duration>) -> Result<(), DriverError> {
        (**self).transmit(frame, timeout)
    }

    fn receive(&self, timeout: Option<Duration>) -> Result<CanFrame, DriverError> {
        (**self).receive(timeout)
    }

    fn configure_alerts(&self, alerts: Alerts) -> Result<(), DriverError> {
        (**self).configure_alerts(alerts)
    }

    fn read_alerts(&self, timeout: Duration) -> Alerts {
        (**self).read_alerts(timeout)
    }
}

/////////////////////////////////////////////////////////////////////////////
