// quali-can/src/addr.rs
//
// Socket address of a SocketCAN interface.
//
// This file is part of the Rust 'quali-can' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! SocketCAN address type.

use libc::{sa_family_t, sockaddr_can, sockaddr_storage, socklen_t};
use nix::net::if_::if_nametoindex;
use socket2::SockAddr;
use std::{fmt, io, mem, os::raw::c_int};

pub use libc::{AF_CAN, CAN_RAW};

/// CAN socket address.
///
/// The address of a SocketCAN host interface, looked up by name ("can0",
/// "vcan0", ...) or given by its kernel interface index.
///
/// Compatible with the libc `sockaddr_can` struct.
#[derive(Clone, Copy)]
pub struct CanAddr(sockaddr_can);

impl CanAddr {
    /// Creates a CAN socket address for the interface with the given index.
    pub fn new(ifindex: u32) -> Self {
        let mut addr = Self::default();
        addr.0.can_ifindex = ifindex as c_int;
        addr
    }

    /// Looks up the address of an interface by name.
    pub fn from_iface(ifname: &str) -> io::Result<Self> {
        let ifindex = if_nametoindex(ifname)?;
        Ok(Self::new(ifindex))
    }

    /// The kernel index of the interface.
    pub fn ifindex(&self) -> u32 {
        self.0.can_ifindex as u32
    }

    /// Gets the underlying address as a byte slice
    pub fn as_bytes(&self) -> &[u8] {
        crate::as_bytes(&self.0)
    }

    /// Copies the address into a generic `sockaddr_storage`, returning it
    /// with the length of the CAN address inside.
    pub fn into_storage(self) -> (sockaddr_storage, socklen_t) {
        let can_addr = self.as_bytes();
        let len = can_addr.len();

        let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
        crate::as_bytes_mut(&mut storage)[..len].copy_from_slice(can_addr);
        (storage, len as socklen_t)
    }
}

impl Default for CanAddr {
    fn default() -> Self {
        let mut addr: sockaddr_can = unsafe { mem::zeroed() };
        addr.can_family = AF_CAN as sa_family_t;
        Self(addr)
    }
}

impl fmt::Debug for CanAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "CanAddr {{ can_family: {}, can_ifindex: {} }}",
            self.0.can_family, self.0.can_ifindex
        )
    }
}

impl From<CanAddr> for SockAddr {
    fn from(addr: CanAddr) -> Self {
        let (storage, len) = addr.into_storage();
        unsafe { SockAddr::new(storage, len) }
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::as_bytes;
    use std::mem::size_of;

    const IDX: u32 = 42;

    #[test]
    fn test_addr() {
        let addr = CanAddr::new(IDX);
        assert_eq!(IDX, addr.ifindex());
        assert_eq!(size_of::<sockaddr_can>(), addr.as_bytes().len());
    }

    #[test]
    fn test_addr_to_storage() {
        let addr = CanAddr::new(IDX);
        let (storage, len) = addr.into_storage();

        assert_eq!(size_of::<sockaddr_can>() as socklen_t, len);
        assert_eq!(addr.as_bytes(), &as_bytes(&storage)[..len as usize]);
        assert_eq!(AF_CAN as sa_family_t, storage.ss_family);
    }

    #[test]
    fn test_unknown_iface() {
        assert!(CanAddr::from_iface("nonexistent42").is_err());
    }
}
