// quali-can/src/counters.rs
//
// Traffic counters shared between the workers of a test run.
//
// This file is part of the Rust 'quali-can' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Session counters.
//!
//! Each direction has a single writer: the transmit worker counts sent
//! frames, the receive worker counts verified ones. The rate reporters
//! only read, and may see slightly stale values.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

/// The direction of traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Frames sent
    Tx,
    /// Frames received
    Rx,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Direction::Tx => "Tx",
            Direction::Rx => "Rx",
        })
    }
}

/// A point-in-time copy of a counter pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Snapshot {
    /// Messages
    pub msgs: u64,
    /// Payload bytes
    pub bytes: u64,
}

impl Snapshot {
    /// The traffic since an earlier snapshot.
    pub fn delta(&self, earlier: &Snapshot) -> Snapshot {
        Snapshot {
            msgs: self.msgs.saturating_sub(earlier.msgs),
            bytes: self.bytes.saturating_sub(earlier.bytes),
        }
    }
}

/// Message and byte totals for one direction.
#[derive(Debug, Default)]
pub struct Counters {
    msgs: AtomicU64,
    bytes: AtomicU64,
}

impl Counters {
    /// Counts one message carrying `bytes` of payload.
    pub fn record(&self, bytes: usize) {
        self.msgs.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Zeroes both totals.
    pub fn reset(&self) {
        self.msgs.store(0, Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
    }

    /// The message total.
    pub fn msgs(&self) -> u64 {
        self.msgs.load(Ordering::Relaxed)
    }

    /// The byte total.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Copies both totals.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            msgs: self.msgs(),
            bytes: self.bytes(),
        }
    }
}

/// The counters of a session, one pair per direction.
#[derive(Debug, Default)]
pub struct SessionCounters {
    /// Sent traffic
    pub tx: Counters,
    /// Received, verified traffic
    pub rx: Counters,
}

impl SessionCounters {
    /// The counters for one direction.
    pub fn get(&self, dir: Direction) -> &Counters {
        match dir {
            Direction::Tx => &self.tx,
            Direction::Rx => &self.rx,
        }
    }

    /// Zeroes both directions.
    pub fn reset(&self) {
        self.tx.reset();
        self.rx.reset();
    }
}

/////////////////////////////////////////////////////////////////////////////
