// quali-can/src/alert.rs
//
// Bus-health alert flags and their decoding from SocketCAN error frames.
//
// This file is part of the Rust 'quali-can' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Bus-health alerts.
//!
//! The controller signals bus-health conditions as a set of alert flags.
//! On SocketCAN the conditions arrive as error frames: the error class is
//! encoded in the bits of the CAN ID, with details in the data bytes.
//!
//! ```text
//! Lost Arbitration   (0x002)
//! Controller Problem (0x004) => data[1]
//! Protocol Violation (0x008)
//! No ACK             (0x020)
//! Bus Off            (0x040)
//! Bus Error          (0x080)
//! Restarted          (0x100)
//! ```
//!
//! See [linux/can/error.h](https://raw.githubusercontent.com/torvalds/linux/master/include/uapi/linux/can/error.h)

use crate::frame::CanFrame;
use bitflags::bitflags;
use std::fmt;

// Error classes, from the ID word of an error frame.
const CAN_ERR_TX_TIMEOUT: u32 = 0x0000_0001;
const CAN_ERR_LOSTARB: u32 = 0x0000_0002;
const CAN_ERR_CRTL: u32 = 0x0000_0004;
const CAN_ERR_PROT: u32 = 0x0000_0008;
const CAN_ERR_ACK: u32 = 0x0000_0020;
const CAN_ERR_BUSOFF: u32 = 0x0000_0040;
const CAN_ERR_BUSERROR: u32 = 0x0000_0080;
const CAN_ERR_RESTARTED: u32 = 0x0000_0100;

// Controller problem details, in data[1].
const CAN_ERR_CRTL_RX_WARNING: u8 = 0x04;
const CAN_ERR_CRTL_TX_WARNING: u8 = 0x08;
const CAN_ERR_CRTL_RX_PASSIVE: u8 = 0x10;
const CAN_ERR_CRTL_TX_PASSIVE: u8 = 0x20;

bitflags! {
    /// A set of bus-health alert conditions.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Alerts: u32 {
        /// Lost arbitration while transmitting.
        const ARB_LOST = 0x0001;
        /// An error counter crossed the error-warning limit.
        const ABOVE_ERR_WARN = 0x0002;
        /// A bit, stuff, CRC or form error occurred on the bus.
        const BUS_ERROR = 0x0004;
        /// A transmission failed.
        const TX_FAILED = 0x0008;
        /// The controller became error-passive.
        const ERR_PASS = 0x0010;
        /// The controller went bus-off.
        const BUS_OFF = 0x0020;
        /// The controller recovered from bus-off.
        const BUS_RECOVERED = 0x0040;
    }
}

impl Alerts {
    /// The alerts that a test run watches.
    pub const MONITORED: Self = Self::ARB_LOST
        .union(Self::ABOVE_ERR_WARN)
        .union(Self::BUS_ERROR)
        .union(Self::TX_FAILED)
        .union(Self::ERR_PASS)
        .union(Self::BUS_OFF);

    /// Decodes the alerts signalled by a SocketCAN error frame.
    ///
    /// Anything but an error frame yields an empty set.
    pub fn from_error_frame(frame: &CanFrame) -> Self {
        use embedded_can::Frame;
        let ctrl = frame.data().get(1).copied().unwrap_or(0);
        Self::from_error_class(frame.error_bits(), ctrl)
    }

    /// Decodes the alerts from the error class bits and the controller
    /// problem byte of an error frame.
    pub fn from_error_class(class: u32, ctrl: u8) -> Self {
        let mut alerts = Self::empty();

        if class & CAN_ERR_LOSTARB != 0 {
            alerts |= Self::ARB_LOST;
        }
        if class & CAN_ERR_CRTL != 0 {
            if ctrl & (CAN_ERR_CRTL_RX_WARNING | CAN_ERR_CRTL_TX_WARNING) != 0 {
                alerts |= Self::ABOVE_ERR_WARN;
            }
            if ctrl & (CAN_ERR_CRTL_RX_PASSIVE | CAN_ERR_CRTL_TX_PASSIVE) != 0 {
                alerts |= Self::ERR_PASS;
            }
        }
        if class & (CAN_ERR_PROT | CAN_ERR_BUSERROR) != 0 {
            alerts |= Self::BUS_ERROR;
        }
        if class & (CAN_ERR_TX_TIMEOUT | CAN_ERR_ACK) != 0 {
            alerts |= Self::TX_FAILED;
        }
        if class & CAN_ERR_BUSOFF != 0 {
            alerts |= Self::BUS_OFF;
        }
        if class & CAN_ERR_RESTARTED != 0 {
            alerts |= Self::BUS_RECOVERED;
        }
        alerts
    }

    /// The SocketCAN error filter that delivers the error frames needed to
    /// detect these alerts.
    pub fn error_mask(&self) -> u32 {
        let mut mask = 0;

        if self.contains(Self::ARB_LOST) {
            mask |= CAN_ERR_LOSTARB;
        }
        if self.intersects(Self::ABOVE_ERR_WARN | Self::ERR_PASS) {
            mask |= CAN_ERR_CRTL;
        }
        if self.contains(Self::BUS_ERROR) {
            mask |= CAN_ERR_PROT | CAN_ERR_BUSERROR;
        }
        if self.contains(Self::TX_FAILED) {
            mask |= CAN_ERR_TX_TIMEOUT | CAN_ERR_ACK;
        }
        if self.contains(Self::BUS_OFF) {
            mask |= CAN_ERR_BUSOFF;
        }
        if self.contains(Self::BUS_RECOVERED) {
            mask |= CAN_ERR_RESTARTED;
        }
        mask
    }

    /// The status labels of the alerts in the set, like "ALERT_BUS_OFF".
    pub fn labels(&self) -> impl Iterator<Item = String> + '_ {
        self.iter_names().map(|(name, _)| format!("ALERT_{}", name))
    }
}

impl fmt::Display for Alerts {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                write!(f, " | ")?;
            }
            write!(f, "{}", name)?;
            first = false;
        }
        Ok(())
    }
}

/////////////////////////////////////////////////////////////////////////////
