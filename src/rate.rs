// quali-can/src/rate.rs
//
// The rate reporters of a test run.
//
// This file is part of the Rust 'quali-can' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

use crate::{
    counters::{Direction, Snapshot},
    driver::Driver,
    report::Status,
    StatusReporter, TestSession,
};
use log::debug;
use std::time::Duration;

/// Runs the rate reporter for one direction.
pub(crate) fn run<D, R>(session: &TestSession<D, R>, dir: Direction)
where
    D: Driver,
    R: StatusReporter,
{
    let counters = session.counters().get(dir);
    let interval = session.config().intervals.rate;
    let mut last = counters.snapshot();

    while !session.is_stopping() {
        if !session.pause(interval) {
            break;
        }
        let now = counters.snapshot();
        session.report(Status::inf(rate_line(dir, &now.delta(&last), interval)));
        last = now;
    }
    debug!("{} rate task stopped", dir);
}

/// Formats a rate report, normalised to one second.
fn rate_line(dir: Direction, delta: &Snapshot, interval: Duration) -> String {
    let secs = interval.as_secs_f64();
    let (bits, msgs) = if secs > 0.0 {
        ((delta.bytes * 8) as f64 / secs, delta.msgs as f64 / secs)
    } else {
        (0.0, 0.0)
    };
    format!(
        "{} rate: {} bit/s ({} messages/sec)",
        dir,
        bits.round() as u64,
        msgs.round() as u64
    )
}

/////////////////////////////////////////////////////////////////////////////
