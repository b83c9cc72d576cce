// quali-can/src/nl/mod.rs
//
// Netlink configuration of the CAN interface under test.
//
// This file is part of the Rust 'quali-can' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! CAN Netlink access
//!
//! Netlink is how a user-space application queries and sets the
//! parameters of a SocketCAN interface: the bitrate, the control mode
//! bits, the automatic bus-off restart delay, and whether the link is up.
//! The SocketCAN driver uses it to put the interface into the state a test
//! session asks for.
//!
//! The CAN netlink header for the Linux kernel has the definitions of the
//! data structures sent to the kernel:
//!
//! <https://github.com/torvalds/linux/blob/master/include/uapi/linux/can/netlink.h?ts=4>
//!
//! The matching user-space client in _iproute2_ is here:
//!
//! <https://github.com/iproute2/iproute2/blob/main/ip/iplink_can.c?ts=4>

use neli::{
    consts::{
        nl::{NlType, NlmF, NlmFFlags},
        rtnl::{Arphrd, IffFlags, Ifla, IflaInfo, RtAddrFamily, Rtm},
        socket::NlFamily,
    },
    err::NlError,
    nl::{NlPayload, Nlmsghdr},
    rtnl::{Ifinfomsg, Rtattr},
    socket::NlSocketHandle,
    types::{Buffer, RtBuffer},
    ToBytes,
};
use nix::{self, net::if_::if_nametoindex, unistd};
use rt::IflaCan;
use std::{
    fmt::Debug,
    os::raw::{c_int, c_uint},
};

/// Low-level Netlink CAN struct bindings.
mod rt;

pub use rt::can_ctrlmode;

/// A result for Netlink errors.
type NlResult<T> = Result<T, NlError>;

/// CAN bit-timing parameters
pub type CanBitTiming = rt::can_bittiming;

/// The highest bitrate of classic CAN, in Hz.
const MAX_BITRATE: u32 = 1_000_000;

// ===== CanCtrlMode =====

/// CAN control modes
///
/// Note that these correspond to the bit _numbers_ for the control mode bits.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CanCtrlMode {
    /// Loopback mode
    Loopback,
    /// Listen-only mode
    ListenOnly,
    /// Triple sampling mode
    TripleSampling,
    /// One-Shot mode
    OneShot,
    /// Bus-error reporting
    BerrReporting,
    /// CAN FD mode
    Fd,
    /// Ignore missing CAN ACKs
    PresumeAck,
}

impl CanCtrlMode {
    /// Get the mask for the specific control mode
    pub fn mask(&self) -> u32 {
        1u32 << (*self as u32)
    }
}

/// A collection of control mode changes.
///
/// Modes in the mask are set or cleared according to the flags; modes not
/// in the mask are left as they are.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CanCtrlModes(can_ctrlmode);

impl CanCtrlModes {
    /// Adds a mode flag to the existing set of modes.
    pub fn add(&mut self, mode: CanCtrlMode, on: bool) {
        let mask = mode.mask();
        self.0.mask |= mask;
        if on {
            self.0.flags |= mask;
        } else {
            self.0.flags &= !mask;
        }
    }
}

impl From<CanCtrlModes> for can_ctrlmode {
    fn from(mode: CanCtrlModes) -> Self {
        mode.0
    }
}

// ===== CanInterface =====

/// The netlink side of a SocketCAN interface.
///
/// Every setter needs the `CAP_NET_ADMIN` capability, as the root user
/// has.
#[allow(missing_copy_implementations)]
#[derive(Debug)]
pub struct CanInterface {
    if_index: c_uint,
}

impl CanInterface {
    /// Open a CAN interface by name.
    pub fn open(ifname: &str) -> Result<Self, nix::Error> {
        let if_index = if_nametoindex(ifname)?;
        Ok(Self { if_index })
    }

    /// Creates an `Ifinfomsg` for this CAN interface from a buffer
    fn info_msg(&self, buf: RtBuffer<Ifla, Buffer>) -> Ifinfomsg {
        Ifinfomsg::new(
            RtAddrFamily::Unspecified,
            Arphrd::Netrom,
            self.if_index as c_int,
            IffFlags::empty(),
            IffFlags::empty(),
            buf,
        )
    }

    /// Sends a link message to the kernel and waits for the ACK.
    fn send_info_msg(info: Ifinfomsg) -> NlResult<()> {
        let pid = unistd::getpid().as_raw() as u32;
        // No multicast groups; we want no notifications
        let mut sock = NlSocketHandle::connect(NlFamily::Route, Some(pid), &[])?;

        let flags = NlmFFlags::new(&[NlmF::Request, NlmF::Ack]);
        let hdr = Nlmsghdr::new(None, Rtm::Newlink, flags, None, None, NlPayload::Payload(info));
        Self::send_and_read_ack(&mut sock, hdr)
    }

    /// Sends a message down a netlink socket, and checks if an ACK was
    /// properly received.
    fn send_and_read_ack<T, P>(sock: &mut NlSocketHandle, msg: Nlmsghdr<T, P>) -> NlResult<()>
    where
        T: NlType + Debug,
        P: ToBytes + Debug,
    {
        sock.send(msg)?;

        // A netlink error in the response comes back as an Err already.
        if let Some(Nlmsghdr {
            nl_payload: NlPayload::Ack(_),
            ..
        }) = sock.recv()?
        {
            Ok(())
        } else {
            Err(NlError::NoAck)
        }
    }

    /// Bring down this interface.
    pub fn bring_down(&self) -> NlResult<()> {
        let info = Ifinfomsg::down(
            RtAddrFamily::Unspecified,
            Arphrd::Netrom,
            self.if_index as c_int,
            RtBuffer::new(),
        );
        Self::send_info_msg(info)
    }

    /// Bring up this interface
    pub fn bring_up(&self) -> NlResult<()> {
        let info = Ifinfomsg::up(
            RtAddrFamily::Unspecified,
            Arphrd::Netrom,
            self.if_index as c_int,
            RtBuffer::new(),
        );
        Self::send_info_msg(info)
    }

    /// Sets one attribute in the CAN part of the link info.
    fn set_can_param<P>(&self, param_type: IflaCan, param: P) -> NlResult<()>
    where
        P: ToBytes + neli::Size,
    {
        let mut data = Rtattr::new(None, IflaInfo::Data, Buffer::new())?;
        data.add_nested_attribute(&Rtattr::new(None, param_type, param)?)?;

        let mut link_info = Rtattr::new(None, Ifla::Linkinfo, Buffer::new())?;
        link_info.add_nested_attribute(&Rtattr::new(None, IflaInfo::Kind, "can")?)?;
        link_info.add_nested_attribute(&data)?;

        let mut rtattrs = RtBuffer::new();
        rtattrs.push(link_info);
        Self::send_info_msg(self.info_msg(rtattrs))
    }

    /// Set the bitrate and, optionally, sample point of this interface.
    ///
    /// The bitrate can *not* be changed while the interface is up. It is
    /// given in Hz, the sample point in tenths of a percent. The kernel
    /// computes the rest of the bit timing.
    pub fn set_bitrate<P>(&self, bitrate: u32, sample_point: P) -> NlResult<()>
    where
        P: Into<Option<u32>>,
    {
        let timing = bit_timing(bitrate, sample_point.into())?;
        self.set_can_param(IflaCan::BitTiming, timing)
    }

    /// Set or clear a collection of control modes.
    pub fn set_ctrlmodes<M>(&self, ctrlmode: M) -> NlResult<()>
    where
        M: Into<CanCtrlModes>,
    {
        let modes: can_ctrlmode = ctrlmode.into().into();
        self.set_can_param(IflaCan::CtrlMode, &modes.to_ne_bytes()[..])
    }

    /// Set the automatic bus-off restart delay of the interface. Zero
    /// disables automatic restarts.
    pub fn set_restart_ms(&self, restart_ms: u32) -> NlResult<()> {
        self.set_can_param(IflaCan::RestartMs, &restart_ms.to_ne_bytes()[..])
    }
}

/// Checks the bitrate and sample point and builds the timing request.
fn bit_timing(bitrate: u32, sample_point: Option<u32>) -> NlResult<CanBitTiming> {
    let sample_point = sample_point.unwrap_or(0);

    if bitrate == 0 || bitrate > MAX_BITRATE {
        return Err(NlError::Msg(format!(
            "Bitrate must be within 1..={}, received {}",
            MAX_BITRATE, bitrate
        )));
    }
    if sample_point >= 1000 {
        return Err(NlError::Msg(format!(
            "Sample point must be within 0..1000, received {}",
            sample_point
        )));
    }

    Ok(CanBitTiming {
        bitrate,
        sample_point,
        ..CanBitTiming::default()
    })
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ctrlmode_masks() {
        assert_eq!(0x02, CanCtrlMode::ListenOnly.mask());
        assert_eq!(0x40, CanCtrlMode::PresumeAck.mask());
    }

    #[test]
    fn test_ctrlmodes() {
        let mut modes = CanCtrlModes::default();
        modes.add(CanCtrlMode::ListenOnly, true);
        modes.add(CanCtrlMode::PresumeAck, false);
        let raw: can_ctrlmode = modes.into();
        assert_eq!(0x42, raw.mask);
        assert_eq!(0x02, raw.flags);

        modes.add(CanCtrlMode::ListenOnly, false);
        let raw: can_ctrlmode = modes.into();
        assert_eq!(0x00, raw.flags);
    }

    #[test]
    fn test_bit_timing() {
        let timing = bit_timing(500_000, Some(875)).unwrap();
        assert_eq!(500_000, timing.bitrate);
        assert_eq!(875, timing.sample_point);
        assert_eq!(0, timing.brp);

        assert_eq!(0, bit_timing(1_000_000, None).unwrap().sample_point);
        assert!(bit_timing(0, None).is_err());
        assert!(bit_timing(2_000_000, None).is_err());
        assert!(bit_timing(125_000, Some(1000)).is_err());
    }

    #[test]
    fn test_open_unknown() {
        assert!(CanInterface::open("nonexistent42").is_err());
    }
}
