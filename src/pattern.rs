// quali-can/src/pattern.rs
//
// Test payloads and verification of the received byte stream.
//
// This file is part of the Rust 'quali-can' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Test data patterns.
//!
//! Every test frame carries 8 data bytes. The receiver expects each frame
//! to repeat a single counter byte eight times, `{i, i, i, i, i, i, i, i}`,
//! with `i` going up by one (mod 256) from frame to frame.

use std::fmt;

/// The data length of every test frame.
pub const TEST_DLC: usize = 8;

/// The fixed payload sent by default.
pub const FIXED_PAYLOAD: [u8; TEST_DLC] = [1, 2, 3, 4, 5, 6, 7, 8];

/// The payload the receiver expects for the counter value `i`.
pub const fn counter_payload(i: u8) -> [u8; TEST_DLC] {
    [i; TEST_DLC]
}

/// The payload the transmit worker sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxPayload {
    /// Always `{1, 2, 3, 4, 5, 6, 7, 8}`
    #[default]
    Fixed,
    /// `{i; 8}`, with `i` counting the frames sent so far, so a receiver on
    /// the same bus sees a valid sequence.
    Counter,
}

impl TxPayload {
    /// The payload of the frame following `sent` successful sends.
    pub fn payload(&self, sent: u64) -> [u8; TEST_DLC] {
        match self {
            TxPayload::Fixed => FIXED_PAYLOAD,
            TxPayload::Counter => counter_payload(sent as u8),
        }
    }
}

// ===== Receive verification =====

/// The outcome of checking one received payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The payload was the expected one.
    Ok,
    /// The checker was out of sync and adopted the payload's first byte as
    /// the new baseline. Not counted as a received frame.
    Resynced {
        /// The adopted counter value
        baseline: u8,
    },
    /// The payload isn't 8 bytes long.
    LengthMismatch {
        /// The received length
        len: usize,
    },
    /// The payload differs from the expected one.
    WrongData {
        /// What was expected
        expected: [u8; TEST_DLC],
        /// What arrived
        got: Vec<u8>,
    },
}

impl Verdict {
    /// Whether the frame counts as a good reception.
    pub fn is_ok(&self) -> bool {
        *self == Verdict::Ok
    }

    /// Whether this is a data-integrity failure worth reporting.
    pub fn is_error(&self) -> bool {
        matches!(self, Verdict::LengthMismatch { .. } | Verdict::WrongData { .. })
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Verdict::Ok => f.write_str("ok"),
            Verdict::Resynced { baseline } => write!(f, "resynced at {:02X}", baseline),
            Verdict::LengthMismatch { len } => write!(f, "wrong data length: {}", len),
            Verdict::WrongData { expected, got } => write!(
                f,
                "wrong data: expected {} got {}",
                hex::encode_upper(expected),
                hex::encode_upper(got)
            ),
        }
    }
}

/// Tracks the expected counter of the received byte stream.
///
/// A fresh checker expects `{0; 8}` first. After any failure it loses
/// sync, and the next well-formed frame sets the new baseline.
#[derive(Debug, Clone, Default)]
pub struct SequenceChecker {
    expected: u8,
    resync: bool,
}

impl SequenceChecker {
    /// Creates a checker expecting a counter of zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// The counter value expected next.
    pub fn expected(&self) -> u8 {
        self.expected
    }

    /// Whether the next frame will set the baseline.
    pub fn needs_resync(&self) -> bool {
        self.resync
    }

    /// Marks the stream as out of sync, for instance after a receive
    /// error.
    pub fn lose_sync(&mut self) {
        self.resync = true;
    }

    /// Checks one received payload.
    pub fn check(&mut self, data: &[u8]) -> Verdict {
        if data.len() != TEST_DLC {
            self.resync = true;
            return Verdict::LengthMismatch { len: data.len() };
        }

        if self.resync {
            let baseline = data[0];
            self.expected = baseline.wrapping_add(1);
            self.resync = false;
            return Verdict::Resynced { baseline };
        }

        let expected = counter_payload(self.expected);
        if data != expected {
            self.resync = true;
            return Verdict::WrongData {
                expected,
                got: data.to_vec(),
            };
        }

        self.expected = self.expected.wrapping_add(1);
        Verdict::Ok
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_payload() {
        assert_eq!(FIXED_PAYLOAD, TxPayload::default().payload(42));
        assert_eq!([0u8; 8], TxPayload::Counter.payload(0));
        assert_eq!([0x2Au8; 8], TxPayload::Counter.payload(42));
        assert_eq!([0u8; 8], TxPayload::Counter.payload(256));
    }

    #[test]
    fn test_in_order() {
        let mut checker = SequenceChecker::new();
        for i in 0..600u32 {
            let data = counter_payload(i as u8);
            assert_eq!(Verdict::Ok, checker.check(&data));
        }
        assert_eq!(88, checker.expected());
    }

    #[test]
    fn test_length_then_resync() {
        let mut checker = SequenceChecker::new();
        assert_eq!(Verdict::Ok, checker.check(&[0; 8]));

        assert_eq!(Verdict::LengthMismatch { len: 3 }, checker.check(&[1, 1, 1]));
        assert!(checker.needs_resync());

        assert_eq!(Verdict::Resynced { baseline: 0x70 }, checker.check(&[0x70; 8]));
        assert_eq!(Verdict::Ok, checker.check(&[0x71; 8]));
        assert_eq!(Verdict::Ok, checker.check(&[0x72; 8]));
    }

    #[test]
    fn test_wrong_data() {
        let mut checker = SequenceChecker::new();
        let verdict = checker.check(&FIXED_PAYLOAD);
        assert!(verdict.is_error());
        assert_eq!(
            "wrong data: expected 0000000000000000 got 0102030405060708",
            verdict.to_string()
        );

        // The next frame sets the baseline, whatever it holds
        assert!(matches!(checker.check(&FIXED_PAYLOAD), Verdict::Resynced { baseline: 1 }));
        assert!(checker.check(&FIXED_PAYLOAD).is_error());
    }

    #[test]
    fn test_lost_sync() {
        let mut checker = SequenceChecker::new();
        checker.lose_sync();
        assert_eq!(Verdict::Resynced { baseline: 0xFF }, checker.check(&[0xFF; 8]));
        assert_eq!(Verdict::Ok, checker.check(&[0x00; 8]));
    }
}
