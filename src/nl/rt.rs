// quali-can/src/nl/rt.rs
//
// Low-level Netlink SocketCAN data structs, constants, and bindings.
//
// This file is part of the Rust 'quali-can' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Low-level Netlink SocketCAN data structs, constants, and bindings.
//!
//! These are missing from the `libc` and `neli` crates. They mirror the
//! definitions in `linux/can/netlink.h`.

#![allow(non_camel_case_types, missing_docs)]

use neli::{FromBytes, Size, ToBytes};

/// CAN bit-timing parameters
///
/// For further information, please read chapter "8 BIT TIMING
/// REQUIREMENTS" of the "Bosch CAN Specification version 2.0".
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, FromBytes, ToBytes)]
pub struct can_bittiming {
    pub bitrate: u32,      // Bit-rate in bits/second
    pub sample_point: u32, // Sample point in one-tenth of a percent
    pub tq: u32,           // Time quanta (TQ) in nanoseconds
    pub prop_seg: u32,     // Propagation segment in TQs
    pub phase_seg1: u32,   // Phase buffer segment 1 in TQs
    pub phase_seg2: u32,   // Phase buffer segment 2 in TQs
    pub sjw: u32,          // Synchronisation jump width in TQs
    pub brp: u32,          // Bit-rate prescaler
}

impl Size for can_bittiming {
    fn unpadded_size(&self) -> usize {
        std::mem::size_of::<can_bittiming>()
    }
}

/// CAN controller mode
///
/// To set or clear a bit, set the `mask` for that bit, then set or clear
/// the bit in the `flags`.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct can_ctrlmode {
    pub mask: u32,
    pub flags: u32,
}

impl can_ctrlmode {
    /// The wire form of the struct, in native byte order.
    pub fn to_ne_bytes(self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[..4].copy_from_slice(&self.mask.to_ne_bytes());
        buf[4..].copy_from_slice(&self.flags.to_ne_bytes());
        buf
    }
}

pub use neli::consts::rtnl::IflaCan;

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ctrlmode_bytes() {
        let mode = can_ctrlmode { mask: 0x02, flags: 0x02 };
        let bytes = mode.to_ne_bytes();
        assert_eq!(&0x02u32.to_ne_bytes(), &bytes[..4]);
        assert_eq!(&0x02u32.to_ne_bytes(), &bytes[4..]);
    }
}
