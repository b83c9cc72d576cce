// quali-can/src/socket.rs
//
// Raw SocketCAN sockets for classic CAN 2.0 frames.
//
// This file is part of the Rust 'quali-can' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Raw SocketCAN sockets.
//!
//! The SocketCAN driver opens separate sockets on the interface for
//! transmitting, receiving and watching error frames. Each is a
//! [`CanSocket`], configured through the [`SocketOptions`] trait.

use crate::{
    as_bytes_mut, frame::can_frame_default, CanAddr, CanFrame, IoError, IoErrorKind, IoResult,
};
use libc::{canid_t, socklen_t, AF_CAN, EINPROGRESS};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use socket2::SockAddr;
use std::{
    fmt,
    io::{Read, Write},
    mem,
    os::{
        raw::{c_int, c_void},
        unix::io::{AsFd, AsRawFd, BorrowedFd, RawFd},
    },
    ptr,
    time::Duration,
};

pub use libc::{
    CAN_RAW, CAN_RAW_ERR_FILTER, CAN_RAW_FILTER, CAN_RAW_LOOPBACK, CAN_RAW_RECV_OWN_MSGS,
    SOL_CAN_RAW,
};

/// Check an error return value for timeouts.
///
/// Due to the fact that timeouts are reported as errors, calling `read_frame`
/// on a socket with a timeout that does not receive a frame in time will
/// result in an error being returned. This trait adds a `should_retry` method
/// to `Error` and `Result` to check for this condition.
pub trait ShouldRetry {
    /// Check for timeout
    ///
    /// If `true`, the error is probably due to a timeout.
    fn should_retry(&self) -> bool;
}

impl ShouldRetry for IoError {
    fn should_retry(&self) -> bool {
        match self.kind() {
            // EAGAIN, EINPROGRESS and EWOULDBLOCK are the three possible codes
            // returned when a timeout occurs. the stdlib already maps EAGAIN
            // and EWOULDBLOCK os WouldBlock
            IoErrorKind::WouldBlock | IoErrorKind::TimedOut => true,
            // however, EINPROGRESS is also valid
            IoErrorKind::Other => {
                matches!(self.raw_os_error(), Some(errno) if errno == EINPROGRESS)
            }
            _ => false,
        }
    }
}

impl<E: fmt::Debug> ShouldRetry for IoResult<E> {
    fn should_retry(&self) -> bool {
        match *self {
            Err(ref e) => e.should_retry(),
            _ => false,
        }
    }
}

// ===== Private local helper functions =====

/// Tries to open the CAN socket by the interface number.
fn raw_open_socket(addr: &CanAddr) -> IoResult<socket2::Socket> {
    let af_can = socket2::Domain::from(AF_CAN);
    let can_raw = socket2::Protocol::from(CAN_RAW);

    let sock = socket2::Socket::new_raw(af_can, socket2::Type::RAW, Some(can_raw))?;
    sock.bind(&SockAddr::from(*addr))?;
    Ok(sock)
}

/// Waits for the socket to become ready for the requested events.
///
/// Returns `false` if the timeout expired first. Timeouts are capped at
/// a little over a minute.
fn poll_ready(fd: BorrowedFd<'_>, events: PollFlags, timeout: Duration) -> IoResult<bool> {
    let ms = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
    let mut fds = [PollFd::new(fd, events)];
    Ok(poll(&mut fds, PollTimeout::from(ms))? > 0)
}

// ===== SocketOptions =====

/// Traits for setting CAN socket options.
pub trait SocketOptions: AsRawFd {
    /// Sets an option on the socket.
    ///
    /// The libc `setsockopt` function is set to set various options on a socket.
    /// `set_socket_option` offers a somewhat type-safe wrapper that does not
    /// require messing around with `*const c_void`s.
    ///
    /// Note that the `val` parameter must be specified correctly; if an option
    /// expects an integer, it is advisable to pass in a `c_int`, not the default
    /// of `i32`.
    fn set_socket_option<T>(&self, level: c_int, name: c_int, val: &T) -> IoResult<()> {
        let ret = unsafe {
            libc::setsockopt(
                self.as_raw_fd(),
                level,
                name,
                val as *const _ as *const c_void,
                mem::size_of::<T>() as socklen_t,
            )
        };

        match ret {
            0 => Ok(()),
            _ => Err(IoError::last_os_error()),
        }
    }

    /// Sets a collection of multiple socket options with one call.
    fn set_socket_option_mult<T>(&self, level: c_int, name: c_int, values: &[T]) -> IoResult<()> {
        let ret = if values.is_empty() {
            // can't pass in a ptr to a 0-len slice, pass a null ptr instead
            unsafe { libc::setsockopt(self.as_raw_fd(), level, name, ptr::null(), 0) }
        } else {
            unsafe {
                libc::setsockopt(
                    self.as_raw_fd(),
                    level,
                    name,
                    values.as_ptr().cast(),
                    mem::size_of_val(values) as socklen_t,
                )
            }
        };

        match ret {
            0 => Ok(()),
            _ => Err(IoError::last_os_error()),
        }
    }

    /// Sets CAN ID filters on the socket.
    ///
    /// Only frames matching at least one of the filters are delivered.
    fn set_filters(&self, filters: &[CanFilter]) -> IoResult<()> {
        self.set_socket_option_mult(SOL_CAN_RAW, CAN_RAW_FILTER, filters)
    }

    /// Disable reception of CAN data frames.
    ///
    /// Sets a completely empty filter. Error frames are still delivered if
    /// an error filter is set.
    fn set_filter_drop_all(&self) -> IoResult<()> {
        let filters: &[CanFilter] = &[];
        self.set_socket_option_mult(SOL_CAN_RAW, CAN_RAW_FILTER, filters)
    }

    /// Accept all frames, disabling any kind of filtering.
    fn set_filter_accept_all(&self) -> IoResult<()> {
        self.set_filters(&[CanFilter::accept_all()])
    }

    /// Sets the error mask on the socket.
    ///
    /// By default no error conditions are reported as special error frames
    /// by the socket. A non-empty mask selects the error classes the socket
    /// is notified about.
    fn set_error_filter(&self, mask: u32) -> IoResult<()> {
        self.set_socket_option(SOL_CAN_RAW, CAN_RAW_ERR_FILTER, &mask)
    }

    /// Enable or disable loopback.
    ///
    /// By default, loopback is enabled, causing other applications that open
    /// the same CAN bus to see frames emitted by different applications on
    /// the same system.
    fn set_loopback(&self, enabled: bool) -> IoResult<()> {
        let loopback = c_int::from(enabled);
        self.set_socket_option(SOL_CAN_RAW, CAN_RAW_LOOPBACK, &loopback)
    }

    /// Enable or disable receiving of own frames.
    ///
    /// When loopback is enabled, this settings controls if CAN frames sent
    /// are received back immediately by sender. Default is off.
    fn set_recv_own_msgs(&self, enabled: bool) -> IoResult<()> {
        let recv_own_msgs = c_int::from(enabled);
        self.set_socket_option(SOL_CAN_RAW, CAN_RAW_RECV_OWN_MSGS, &recv_own_msgs)
    }
}

// ===== CanSocket =====

/// A socket for classic CAN 2.0 devices.
///
/// This reads and writes classic CAN 2.0 frames, with up to 8 bytes of data
/// per frame. It wraps a Linux socket descriptor to a raw SocketCAN socket.
///
/// The socket is closed when the object is dropped.
#[derive(Debug)]
pub struct CanSocket(socket2::Socket);

impl CanSocket {
    /// Opens a socket on a named CAN device, such as "can0" or "vcan0".
    pub fn open(ifname: &str) -> IoResult<Self> {
        let addr = CanAddr::from_iface(ifname)?;
        Self::open_addr(&addr)
    }

    /// Opens a CAN socket by address.
    pub fn open_addr(addr: &CanAddr) -> IoResult<Self> {
        raw_open_socket(addr).map(Self)
    }

    /// Gets a shared reference to the underlying socket object
    pub fn as_raw_socket(&self) -> &socket2::Socket {
        &self.0
    }

    /// Change socket to non-blocking mode or back to blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> IoResult<()> {
        self.0.set_nonblocking(nonblocking)
    }

    /// Blocking read of a single frame.
    pub fn read_frame(&self) -> IoResult<CanFrame> {
        let mut frame = can_frame_default();
        self.as_raw_socket().read_exact(as_bytes_mut(&mut frame))?;
        Ok(frame.into())
    }

    /// Blocking read of a single frame, giving up after the timeout with
    /// an error of kind `TimedOut`.
    pub fn read_frame_timeout(&self, timeout: Duration) -> IoResult<CanFrame> {
        match poll_ready(self.as_fd(), PollFlags::POLLIN, timeout)? {
            true => self.read_frame(),
            false => Err(IoErrorKind::TimedOut.into()),
        }
    }

    /// Writes a single frame.
    ///
    /// This blocks while the interface queue is full, unless the socket is
    /// non-blocking.
    pub fn write_frame(&self, frame: &CanFrame) -> IoResult<()> {
        self.as_raw_socket().write_all(frame.as_bytes())
    }

    /// Writes a single frame, giving up with an error of kind `TimedOut` if
    /// the interface queue doesn't drain within the timeout.
    pub fn write_frame_timeout(&self, frame: &CanFrame, timeout: Duration) -> IoResult<()> {
        match poll_ready(self.as_fd(), PollFlags::POLLOUT, timeout)? {
            true => self.write_frame(frame),
            false => Err(IoErrorKind::TimedOut.into()),
        }
    }
}

impl SocketOptions for CanSocket {}

impl AsRawFd for CanSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

impl AsFd for CanSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl Read for CanSocket {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        self.0.read(buf)
    }
}

impl Write for CanSocket {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> IoResult<()> {
        self.0.flush()
    }
}

// ===== CanFilter =====

/// The CAN filter defines which ID's can be accepted on a socket.
///
/// Each filter contains an internal id and mask. Packets are considered to
/// be matched by a filter if `received_id & mask == filter_id & mask` holds
/// true.
///
/// A socket can be given multiple filters, and each one can be inverted
/// ([ref](https://docs.kernel.org/networking/can.html#raw-protocol-sockets-with-can-filters-sock-raw))
#[derive(Copy, Clone)]
#[repr(transparent)]
pub struct CanFilter(libc::can_filter);

impl CanFilter {
    /// Construct a new CAN filter.
    pub fn new(id: canid_t, mask: canid_t) -> Self {
        Self(libc::can_filter {
            can_id: id,
            can_mask: mask,
        })
    }

    /// Construct a new inverted CAN filter.
    pub fn new_inverted(id: canid_t, mask: canid_t) -> Self {
        Self::new(id | libc::CAN_INV_FILTER, mask)
    }

    /// A filter that matches every frame.
    pub fn accept_all() -> Self {
        Self::new(0, 0)
    }

    /// The ID this filter compares against.
    pub fn id(&self) -> canid_t {
        self.0.can_id & !libc::CAN_INV_FILTER
    }

    /// The mask applied before comparing.
    pub fn mask(&self) -> canid_t {
        self.0.can_mask
    }

    /// Whether the filter is inverted.
    pub fn is_inverted(&self) -> bool {
        self.0.can_id & libc::CAN_INV_FILTER != 0
    }

    /// Tests a composite ID word against the filter, the way the kernel
    /// does.
    pub fn matches(&self, id_word: canid_t) -> bool {
        let hit = id_word & self.mask() == self.id() & self.mask();
        hit != self.is_inverted()
    }
}

impl PartialEq for CanFilter {
    fn eq(&self, other: &Self) -> bool {
        self.0.can_id == other.0.can_id && self.0.can_mask == other.0.can_mask
    }
}

impl Eq for CanFilter {}

impl fmt::Debug for CanFilter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "CanFilter {{ id: {:X}, mask: {:X}, inverted: {} }}",
            self.id(),
            self.mask(),
            self.is_inverted()
        )
    }
}

impl From<libc::can_filter> for CanFilter {
    fn from(filt: libc::can_filter) -> Self {
        Self(filt)
    }
}

impl From<(u32, u32)> for CanFilter {
    fn from(filt: (u32, u32)) -> Self {
        CanFilter::new(filt.0, filt.1)
    }
}

impl AsRef<libc::can_filter> for CanFilter {
    fn as_ref(&self) -> &libc::can_filter {
        &self.0
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CAN_EFF_FLAG;

    #[test]
    fn test_should_retry() {
        assert!(IoError::from(IoErrorKind::WouldBlock).should_retry());
        assert!(IoError::from(IoErrorKind::TimedOut).should_retry());
        assert!(!IoError::from(IoErrorKind::NotFound).should_retry());

        let res: IoResult<()> = Ok(());
        assert!(!res.should_retry());
    }

    #[test]
    fn test_filter_matches() {
        let filt = CanFilter::new(0x0A3, 0x7FF);
        assert!(filt.matches(0x0A3));
        assert!(!filt.matches(0x0A4));

        let filt = CanFilter::accept_all();
        assert!(filt.matches(0x0A3));
        assert!(filt.matches(CAN_EFF_FLAG | 0x1234_5678));

        let filt = CanFilter::new_inverted(0x0A3, 0x7FF);
        assert!(filt.is_inverted());
        assert_eq!(0x0A3, filt.id());
        assert!(!filt.matches(0x0A3));
        assert!(filt.matches(0x100));
    }

    #[test]
    fn test_filter_from_tuple() {
        let filt = CanFilter::from((0x100, 0x700));
        assert_eq!(0x100, filt.id());
        assert_eq!(0x700, filt.mask());
        assert!(filt.matches(0x1FF));
        assert!(!filt.matches(0x200));
    }
}
