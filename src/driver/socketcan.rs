// quali-can/src/driver/socketcan.rs
//
// Driver adapter for a Linux SocketCAN interface.
//
// This file is part of the Rust 'quali-can' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! SocketCAN driver.
//!
//! The driver opens three raw sockets on the interface:
//!
//! - a transmit socket, which never receives,
//! - a receive socket, carrying the configured acceptance filters,
//! - an alert socket, which drops all data frames and receives the error
//!   frames for the selected alerts.
//!
//! Bit timing, control modes and link state are set over netlink at
//! install time. That needs the `netlink` feature and, on real hardware,
//! the `CAP_NET_ADMIN` capability.

use crate::{
    driver::{Driver, DriverConfig, Mode, TimingConfig},
    socket::{CanSocket, ShouldRetry, SocketOptions},
    Alerts, CanAddr, CanFrame, DriverError,
};
use log::{debug, info, warn};
use std::{
    sync::{Arc, Mutex, PoisonError, RwLock},
    thread,
    time::{Duration, Instant},
};

#[cfg(feature = "netlink")]
use crate::nl::{CanCtrlMode, CanCtrlModes, CanInterface};

/// How long to back off when the interface queue is full.
const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(1);

/// The sockets of a started peripheral.
#[derive(Debug)]
struct Sockets {
    tx: CanSocket,
    rx: CanSocket,
}

/// The error socket and the alerts it reports.
#[derive(Debug)]
struct AlertWatch {
    sock: CanSocket,
    mask: Alerts,
}

/// A CAN peripheral reached through a SocketCAN network interface.
#[derive(Debug)]
pub struct SocketCanDriver {
    ifname: String,
    config: RwLock<Option<DriverConfig>>,
    sockets: RwLock<Option<Arc<Sockets>>>,
    alerts: Mutex<Option<AlertWatch>>,
}

impl SocketCanDriver {
    /// Creates a driver for the named interface, like "can0" or "vcan0".
    ///
    /// Nothing is opened until the driver is installed and started.
    pub fn new(ifname: impl Into<String>) -> Self {
        Self {
            ifname: ifname.into(),
            config: RwLock::new(None),
            sockets: RwLock::new(None),
            alerts: Mutex::new(None),
        }
    }

    /// The name of the interface.
    pub fn ifname(&self) -> &str {
        &self.ifname
    }

    /// The configuration the driver was installed with.
    fn installed(&self) -> Result<DriverConfig, DriverError> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(DriverError::NotInstalled)
    }

    /// The installed mode, read without copying the whole configuration.
    fn installed_mode(&self) -> Result<Mode, DriverError> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(DriverConfig::mode)
            .ok_or(DriverError::NotInstalled)
    }

    /// The sockets of the running peripheral.
    fn sockets(&self) -> Result<Arc<Sockets>, DriverError> {
        self.sockets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(DriverError::NotRunning)
    }

    /// Whether the configuration asks for changes to the interface itself.
    fn needs_link_config(config: &DriverConfig) -> bool {
        config.timing != TimingConfig::Preconfigured
            || config.general.mode != Mode::Normal
            || config.general.restart_ms.is_some()
    }

    /// Applies bit timing, control modes and restart delay over netlink.
    #[cfg(feature = "netlink")]
    fn configure_link(&self, config: &DriverConfig) -> Result<(), DriverError> {
        if !Self::needs_link_config(config) {
            return Ok(());
        }

        let iface = CanInterface::open(&self.ifname).map_err(std::io::Error::from)?;

        // Parameters can only be changed while the link is down.
        iface.bring_down().map_err(netlink_err)?;

        if let TimingConfig::Bitrate {
            bitrate,
            sample_point,
        } = config.timing
        {
            iface
                .set_bitrate(bitrate, sample_point)
                .map_err(netlink_err)?;
            info!("{}: bitrate set to {} bit/s", self.ifname, bitrate);
        }

        let mode = config.general.mode;
        let mut modes = CanCtrlModes::default();
        modes.add(CanCtrlMode::ListenOnly, mode == Mode::ListenOnly);
        modes.add(CanCtrlMode::PresumeAck, mode == Mode::NoAck);
        iface.set_ctrlmodes(modes).map_err(netlink_err)?;
        debug!("{}: control mode {:?}", self.ifname, mode);

        if let Some(ms) = config.general.restart_ms {
            iface.set_restart_ms(ms).map_err(netlink_err)?;
            debug!("{}: restart-ms {}", self.ifname, ms);
        }

        if !config.general.manage_link {
            iface.bring_up().map_err(netlink_err)?;
        }
        Ok(())
    }

    #[cfg(not(feature = "netlink"))]
    fn configure_link(&self, config: &DriverConfig) -> Result<(), DriverError> {
        if Self::needs_link_config(config) {
            return Err(DriverError::Unsupported(
                "configuring the interface needs the 'netlink' feature",
            ));
        }
        Ok(())
    }

    #[cfg(feature = "netlink")]
    fn set_link(&self, up: bool) -> Result<(), DriverError> {
        let iface = CanInterface::open(&self.ifname).map_err(std::io::Error::from)?;
        let res = if up {
            iface.bring_up()
        } else {
            iface.bring_down()
        };
        res.map_err(netlink_err)
    }

    #[cfg(not(feature = "netlink"))]
    fn set_link(&self, _up: bool) -> Result<(), DriverError> {
        Err(DriverError::Unsupported(
            "managing the link needs the 'netlink' feature",
        ))
    }

    /// Writes a frame, riding out a full interface queue until the
    /// deadline, if any.
    fn write_until(
        sock: &CanSocket,
        frame: &CanFrame,
        deadline: Option<Instant>,
    ) -> Result<(), DriverError> {
        loop {
            let res = match deadline {
                None => sock.write_frame(frame),
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    sock.write_frame_timeout(frame, left)
                }
            };
            match res {
                Ok(()) => return Ok(()),
                Err(err) if is_queue_full(&err) => {
                    if matches!(deadline, Some(d) if Instant::now() >= d) {
                        return Err(DriverError::Timeout);
                    }
                    thread::sleep(QUEUE_FULL_BACKOFF);
                }
                Err(err) if err.kind() == std::io::ErrorKind::TimedOut => {
                    return Err(DriverError::Timeout)
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// SocketCAN reports a full device queue as ENOBUFS rather than blocking.
fn is_queue_full(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENOBUFS) || err.should_retry() && err.kind() != std::io::ErrorKind::TimedOut
}

#[cfg(feature = "netlink")]
fn netlink_err<E: std::fmt::Display>(err: E) -> DriverError {
    DriverError::Netlink(err.to_string())
}

impl Driver for SocketCanDriver {
    fn install(&self, config: &DriverConfig) -> Result<(), DriverError> {
        let mut installed = self.config.write().unwrap_or_else(PoisonError::into_inner);
        if installed.is_some() {
            return Err(DriverError::AlreadyInstalled);
        }

        // Fail early on a missing interface
        CanAddr::from_iface(&self.ifname)?;
        self.configure_link(config)?;

        info!("{}: driver installed", self.ifname);
        *installed = Some(config.clone());
        Ok(())
    }

    fn start(&self) -> Result<(), DriverError> {
        let config = self.installed()?;
        let mut sockets = self.sockets.write().unwrap_or_else(PoisonError::into_inner);
        if sockets.is_some() {
            return Ok(());
        }

        if config.general.manage_link {
            self.set_link(true)?;
        }

        let tx = CanSocket::open(&self.ifname)?;
        tx.set_filter_drop_all()?;
        tx.set_loopback(config.general.loopback)?;

        let rx = CanSocket::open(&self.ifname)?;
        rx.set_filters(&config.filter.filters)?;

        *sockets = Some(Arc::new(Sockets { tx, rx }));
        info!("{}: driver started", self.ifname);
        Ok(())
    }

    fn stop(&self) -> Result<(), DriverError> {
        let config = self.installed()?;
        let sockets = self
            .sockets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if sockets.is_none() {
            return Err(DriverError::NotRunning);
        }
        drop(sockets);

        if config.general.manage_link {
            self.set_link(false)?;
        }
        info!("{}: driver stopped", self.ifname);
        Ok(())
    }

    fn transmit(&self, frame: &CanFrame, timeout: Option<Duration>) -> Result<(), DriverError> {
        if !self.installed_mode()?.can_transmit() {
            return Err(DriverError::Unsupported("transmit in listen-only mode"));
        }
        let sockets = self.sockets()?;
        let deadline = timeout.map(|t| Instant::now() + t);
        Self::write_until(&sockets.tx, frame, deadline)
    }

    fn receive(&self, timeout: Option<Duration>) -> Result<CanFrame, DriverError> {
        let sockets = self.sockets()?;
        let res = match timeout {
            Some(timeout) => sockets.rx.read_frame_timeout(timeout),
            None => sockets.rx.read_frame(),
        };
        res.map_err(|err| match err.kind() {
            std::io::ErrorKind::TimedOut => DriverError::Timeout,
            _ => DriverError::Io(err),
        })
    }

    fn configure_alerts(&self, alerts: Alerts) -> Result<(), DriverError> {
        self.installed_mode()?;

        let sock = CanSocket::open(&self.ifname)?;
        sock.set_filter_drop_all()?;
        sock.set_error_filter(alerts.error_mask())?;

        *self.alerts.lock().unwrap_or_else(PoisonError::into_inner) = Some(AlertWatch {
            sock,
            mask: alerts,
        });
        debug!("{}: watching alerts {}", self.ifname, alerts);
        Ok(())
    }

    fn read_alerts(&self, timeout: Duration) -> Alerts {
        let guard = self.alerts.lock().unwrap_or_else(PoisonError::into_inner);
        let watch = match guard.as_ref() {
            Some(watch) => watch,
            None => return Alerts::empty(),
        };

        let mut alerts = Alerts::empty();
        let mut wait = timeout;
        loop {
            match watch.sock.read_frame_timeout(wait) {
                Ok(frame) => alerts |= Alerts::from_error_frame(&frame),
                Err(err) if err.should_retry() => break,
                Err(err) => {
                    warn!("{}: reading error frames failed: {}", self.ifname, err);
                    break;
                }
            }
            // Drain whatever else is pending without waiting
            wait = Duration::ZERO;
        }
        alerts & watch.mask
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_installed() {
        let driver = SocketCanDriver::new("vcan0");
        assert_eq!("vcan0", driver.ifname());
        assert!(matches!(driver.start(), Err(DriverError::NotInstalled)));
        assert!(matches!(
            driver.configure_alerts(Alerts::MONITORED),
            Err(DriverError::NotInstalled)
        ));
        assert!(driver.read_alerts(Duration::ZERO).is_empty());
    }

    #[test]
    fn test_installed_mode() {
        let driver = SocketCanDriver::new("vcan0");
        let frame = CanFrame::default();
        assert!(matches!(
            driver.transmit(&frame, None),
            Err(DriverError::NotInstalled)
        ));

        *driver.config.write().unwrap() =
            Some(DriverConfig::default().with_mode(Mode::ListenOnly));
        assert_eq!(Mode::ListenOnly, driver.installed_mode().unwrap());
        assert!(matches!(
            driver.transmit(&frame, None),
            Err(DriverError::Unsupported(_))
        ));
    }

    #[test]
    fn test_missing_interface() {
        let driver = SocketCanDriver::new("nonexistent42");
        assert!(matches!(
            driver.install(&DriverConfig::default()),
            Err(DriverError::Io(_))
        ));
    }

    #[test]
    fn test_link_config_needed() {
        let config = DriverConfig::default();
        assert!(!SocketCanDriver::needs_link_config(&config));

        let config = DriverConfig::default().with_timing(TimingConfig::rate_1mbits());
        assert!(SocketCanDriver::needs_link_config(&config));

        let config = DriverConfig::default().with_mode(Mode::ListenOnly);
        assert!(SocketCanDriver::needs_link_config(&config));
    }

    #[test]
    fn test_queue_full() {
        assert!(is_queue_full(&std::io::Error::from_raw_os_error(libc::ENOBUFS)));
        assert!(!is_queue_full(&std::io::Error::from(std::io::ErrorKind::TimedOut)));
        assert!(!is_queue_full(&std::io::Error::from(std::io::ErrorKind::NotFound)));
    }
}
