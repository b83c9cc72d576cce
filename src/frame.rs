// quali-can/src/frame.rs
//
// Classic CAN 2.0 frames as exchanged with SocketCAN.
//
// This file is part of the Rust 'quali-can' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! CAN bus frames.
//!
//! The harness only deals in classic CAN 2.0 frames with up to 8 bytes of
//! payload. [`CanFrame`] wraps the libc
//! [can_frame](https://docs.rs/libc/latest/libc/struct.can_frame.html) so
//! that it can be written to and read from a raw SocketCAN socket without
//! conversion, and implements the `embedded_can::Frame` trait on top.
//!
//! A frame read from the bus can be a data frame, a remote request, or an
//! error frame generated by the controller. The latter carries no bus
//! traffic; its ID word holds error class bits which the alert monitor
//! decodes (see [`crate::alert`]).

use crate::ConstructionError;
use bitflags::bitflags;
use embedded_can::{ExtendedId, Frame as EmbeddedFrame, Id, StandardId};
use itertools::Itertools;
use libc::{can_frame, canid_t};
use std::{fmt, mem};

pub use libc::{
    CAN_EFF_FLAG, CAN_EFF_MASK, CAN_ERR_FLAG, CAN_ERR_MASK, CAN_MAX_DLEN, CAN_RTR_FLAG,
    CAN_SFF_MASK,
};

bitflags! {
    /// Bit flags in the composite SocketCAN ID word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IdFlags: canid_t {
        /// Indicates frame uses a 29-bit extended ID
        const EFF = CAN_EFF_FLAG;
        /// Indicates a remote request frame.
        const RTR = CAN_RTR_FLAG;
        /// Indicates an error frame.
        const ERR = CAN_ERR_FLAG;
    }
}

/// Gets the canid_t value from an Id
/// If it's an extended ID, the CAN_EFF_FLAG bit is also set.
pub fn id_to_canid_t(id: impl Into<Id>) -> canid_t {
    match id.into() {
        Id::Standard(id) => id.as_raw() as canid_t,
        Id::Extended(id) => id.as_raw() | CAN_EFF_FLAG,
    }
}

/// Creates a CAN ID from a raw integer value.
///
/// If the `id` is <= 0x7FF, it's assumed to be a standard ID, otherwise
/// it is created as an Extended ID. If you require an Extended ID <= 0x7FF,
/// create it explicitly.
pub fn id_from_raw(id: u32) -> Option<Id> {
    let id = match id {
        n if n <= CAN_SFF_MASK => StandardId::new(n as u16)?.into(),
        n => ExtendedId::new(n)?.into(),
    };
    Some(id)
}

/// Gets the raw numeric value of an ID, without any flags.
pub fn id_to_raw(id: Id) -> u32 {
    match id {
        Id::Standard(id) => id.as_raw() as u32,
        Id::Extended(id) => id.as_raw(),
    }
}

/// Creates a default C `can_frame`.
/// This initializes the entire structure to zeros.
#[inline(always)]
pub fn can_frame_default() -> can_frame {
    unsafe { mem::zeroed() }
}

// ===== CanFrame =====

/// A classic CAN 2.0 frame with up to 8 bytes of data.
///
/// This is binary compatible with the `can_frame` from libc, so it can be
/// handed to the kernel as-is.
#[derive(Clone, Copy)]
pub struct CanFrame(can_frame);

impl CanFrame {
    /// Initializes a frame from a composite ID word and payload.
    pub fn init(can_id: canid_t, data: &[u8]) -> Result<Self, ConstructionError> {
        match data.len() {
            n if n <= CAN_MAX_DLEN => {
                let mut frame = can_frame_default();
                frame.can_id = can_id;
                frame.can_dlc = n as u8;
                frame.data[..n].copy_from_slice(data);
                Ok(Self(frame))
            }
            _ => Err(ConstructionError::TooMuchData),
        }
    }

    /// Creates a data frame using a raw, integer CAN ID.
    ///
    /// IDs above 0x7FF become extended IDs.
    pub fn from_raw_id(id: u32, data: &[u8]) -> Result<Self, ConstructionError> {
        let id = id_from_raw(id).ok_or(ConstructionError::IDTooLarge)?;
        Self::init(id_to_canid_t(id), data)
    }

    /// Get the composite SocketCAN ID word, with EFF/RTR/ERR flags
    pub fn id_word(&self) -> canid_t {
        self.0.can_id
    }

    /// Return the actual raw CAN ID (without EFF/RTR/ERR flags)
    pub fn raw_id(&self) -> canid_t {
        let mask = if self.is_extended() {
            CAN_EFF_MASK
        } else {
            CAN_SFF_MASK
        };
        self.id_word() & mask
    }

    /// Returns the EFF/RTR/ERR flags from the ID word
    pub fn id_flags(&self) -> IdFlags {
        IdFlags::from_bits_truncate(self.id_word())
    }

    /// Check if frame is an error message
    pub fn is_error_frame(&self) -> bool {
        self.id_flags().contains(IdFlags::ERR)
    }

    /// The error class bits of an error frame.
    ///
    /// This is zero for anything but an error frame.
    pub fn error_bits(&self) -> u32 {
        if self.is_error_frame() {
            self.id_word() & CAN_ERR_MASK
        } else {
            0
        }
    }

    /// Gets the payload length
    pub fn len(&self) -> usize {
        self.dlc()
    }

    /// Whether the frame carries no payload
    pub fn is_empty(&self) -> bool {
        self.dlc() == 0
    }

    /// Gets the raw bytes of the frame, as sent to the kernel.
    pub fn as_bytes(&self) -> &[u8] {
        crate::as_bytes(&self.0)
    }
}

impl EmbeddedFrame for CanFrame {
    /// Create a new CAN 2.0 data frame
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        Self::init(id_to_canid_t(id), data).ok()
    }

    /// Create a new remote transmission request frame.
    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > CAN_MAX_DLEN {
            return None;
        }
        let mut frame = can_frame_default();
        frame.can_id = id_to_canid_t(id) | CAN_RTR_FLAG;
        frame.can_dlc = dlc as u8;
        Some(Self(frame))
    }

    /// Check if frame uses 29-bit extended ID format.
    fn is_extended(&self) -> bool {
        self.id_flags().contains(IdFlags::EFF)
    }

    /// Check if frame is a remote transmission request.
    fn is_remote_frame(&self) -> bool {
        self.id_flags().contains(IdFlags::RTR)
    }

    /// Return the frame identifier.
    fn id(&self) -> Id {
        // SAFETY: the masks keep the values inside the valid ID ranges.
        if self.is_extended() {
            unsafe { ExtendedId::new_unchecked(self.id_word() & CAN_EFF_MASK) }.into()
        } else {
            unsafe { StandardId::new_unchecked((self.id_word() & CAN_SFF_MASK) as u16) }.into()
        }
    }

    /// Data length
    fn dlc(&self) -> usize {
        self.0.can_dlc as usize
    }

    /// A slice into the actual data. Slice will always be <= 8 bytes in length
    fn data(&self) -> &[u8] {
        if self.is_remote_frame() {
            return &[];
        }
        let n = (self.0.can_dlc as usize).min(CAN_MAX_DLEN);
        &self.0.data[..n]
    }
}

impl Default for CanFrame {
    /// The default frame is a data frame with all fields and data set to
    /// zero.
    fn default() -> Self {
        Self(can_frame_default())
    }
}

impl PartialEq for CanFrame {
    fn eq(&self, other: &Self) -> bool {
        self.id_word() == other.id_word() && self.data() == other.data()
    }
}

impl Eq for CanFrame {}

impl fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CanFrame {{ ")?;
        fmt::UpperHex::fmt(self, f)?;
        write!(f, " }}")
    }
}

impl fmt::UpperHex for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(f, "{:X}#", self.0.can_id)?;
        let mut parts = self.data().iter().map(|v| format!("{:02X}", v));
        write!(f, "{}", parts.join(" "))
    }
}

impl From<can_frame> for CanFrame {
    fn from(frame: can_frame) -> Self {
        Self(frame)
    }
}

impl AsRef<can_frame> for CanFrame {
    fn as_ref(&self) -> &can_frame {
        &self.0
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    const STD_ID: Id = Id::Standard(StandardId::MAX);
    const EXT_ID: Id = Id::Extended(ExtendedId::MAX);

    const DATA: &[u8] = &[0, 1, 2, 3];
    const DATA_LEN: usize = DATA.len();

    #[test]
    fn test_defaults() {
        let frame = CanFrame::default();

        assert_eq!(0, frame.id_word());
        assert_eq!(0, frame.raw_id());
        assert!(frame.id_flags().is_empty());
        assert_eq!(0, frame.dlc());
        assert!(frame.is_empty());
        assert!(frame.data().is_empty());
        assert!(frame.is_data_frame());
        assert!(!frame.is_error_frame());
    }

    #[test]
    fn test_data_frame() {
        let frame = CanFrame::new(STD_ID, DATA).unwrap();
        assert_eq!(STD_ID, frame.id());
        assert_eq!(id_to_raw(STD_ID), frame.raw_id());
        assert!(frame.is_standard());
        assert!(frame.is_data_frame());
        assert!(!frame.is_error_frame());
        assert_eq!(DATA_LEN, frame.len());
        assert_eq!(DATA, frame.data());

        let frame = CanFrame::new(EXT_ID, DATA).unwrap();
        assert_eq!(EXT_ID, frame.id());
        assert_eq!(id_to_raw(EXT_ID), frame.raw_id());
        assert!(frame.is_extended());
        assert!(frame.id_flags().contains(IdFlags::EFF));
        assert_eq!(DATA, frame.data());

        // Should keep Extended flag even if ID <= 0x7FF (standard range)
        let low = Id::Extended(ExtendedId::new(0x7F).unwrap());
        let frame = CanFrame::new(low, DATA).unwrap();
        assert_eq!(low, frame.id());
        assert!(frame.is_extended());
    }

    #[test]
    fn test_raw_id() {
        let frame = CanFrame::from_raw_id(0x0A3, DATA).unwrap();
        assert!(frame.is_standard());
        assert_eq!(0x0A3, frame.raw_id());

        let frame = CanFrame::from_raw_id(0x1234_5678, DATA).unwrap();
        assert!(frame.is_extended());
        assert_eq!(0x1234_5678, frame.raw_id());

        assert_eq!(
            Err(ConstructionError::IDTooLarge),
            CanFrame::from_raw_id(0x2000_0000, DATA)
        );
    }

    #[test]
    fn test_too_much_data() {
        assert!(CanFrame::new(STD_ID, &[0u8; 9]).is_none());
        assert_eq!(
            Err(ConstructionError::TooMuchData),
            CanFrame::init(0x100, &[0u8; 9])
        );
    }

    #[test]
    fn test_remote_frame() {
        let frame = CanFrame::new_remote(STD_ID, DATA_LEN).unwrap();
        assert!(frame.is_remote_frame());
        assert!(frame.id_flags().contains(IdFlags::RTR));
        assert_eq!(DATA_LEN, frame.dlc());
        assert!(frame.data().is_empty());
        assert_eq!(STD_ID, frame.id());

        assert!(CanFrame::new_remote(STD_ID, CAN_MAX_DLEN + 1).is_none());
    }

    #[test]
    fn test_error_frame() {
        let mut raw = can_frame_default();
        raw.can_id = CAN_ERR_FLAG | 0x0040;
        let frame = CanFrame::from(raw);

        assert!(frame.is_error_frame());
        assert_eq!(0x0040, frame.error_bits());

        let frame = CanFrame::new(STD_ID, DATA).unwrap();
        assert_eq!(0, frame.error_bits());
    }

    #[test]
    fn test_hex_format() {
        let frame = CanFrame::from_raw_id(0x0A3, &[1, 2, 0xAB]).unwrap();
        assert_eq!("A3#01 02 AB", format!("{:X}", frame));
        assert_eq!("CanFrame { A3#01 02 AB }", format!("{:?}", frame));
    }

    #[test]
    fn test_as_bytes() {
        let frame = CanFrame::from_raw_id(0x0A3, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let bytes = frame.as_bytes();
        assert_eq!(libc::CAN_MTU, bytes.len());
        assert_eq!(8, bytes[4]);
        assert_eq!(&[1, 2, 3, 4, 5, 6, 7, 8], &bytes[8..]);
    }
}
