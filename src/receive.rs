// quali-can/src/receive.rs
//
// The receive worker of a test run.
//
// This file is part of the Rust 'quali-can' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Receive worker.
//!
//! Owns the peripheral for the run: it starts the driver, checks every
//! received frame against the expected byte pattern, and stops the driver
//! once the transmit worker is done with it.

use crate::{
    driver::Driver,
    pattern::{SequenceChecker, Verdict},
    report::Status,
    EmbeddedFrame, StatusReporter, TestSession,
};
use log::{debug, info, warn};
use std::{
    sync::mpsc::{Receiver, SyncSender},
    thread,
};

/// Runs the receive worker.
pub(crate) fn run<D, R>(session: &TestSession<D, R>, started: SyncSender<()>, stopped: Receiver<()>)
where
    D: Driver,
    R: StatusReporter,
{
    let driver = session.driver();
    let intervals = session.config().intervals;

    info!("Started can receive task");
    if let Err(err) = driver.start() {
        // Dropping `started` releases the transmit worker
        session.report(Status::err(format!("could not start driver: {}", err)));
        return;
    }
    info!("Driver started");

    // No transmit worker in listen-only mode
    let _ = started.send(());
    drop(started);

    let mut checker = SequenceChecker::new();
    while !session.is_stopping() {
        let frame = match driver.receive(Some(intervals.rx_timeout)) {
            Ok(frame) => frame,
            Err(err) => {
                checker.lose_sync();
                if err.is_timeout() && session.is_stopping() {
                    break;
                }
                session.report(Status::err(format!("Receive Error: {}", err)));
                if !err.is_timeout() {
                    thread::sleep(intervals.error_backoff);
                }
                continue;
            }
        };

        match checker.check(frame.data()) {
            Verdict::Ok => session.counters().rx.record(frame.dlc()),
            Verdict::Resynced { baseline } => {
                debug!("Resynchronised at 0x{:02X}", baseline);
            }
            verdict => session.report(Status::err(verdict.to_string())),
        }
    }

    // Returns at once if there's no transmit worker
    let _ = stopped.recv();

    match driver.stop() {
        Ok(()) => info!("Driver stopped"),
        Err(err) => warn!("Stopping the driver failed: {}", err),
    }
}
