// quali-can/src/transmit.rs
//
// The transmit worker of a test run.
//
// This file is part of the Rust 'quali-can' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Transmit worker.
//!
//! Loads the bus with the test frame for as long as the run lasts.

use crate::{
    driver::Driver, report::Status, CanFrame, EmbeddedFrame, Id, StatusReporter, TestSession,
};
use itertools::Itertools;
use log::{debug, error, info};
use std::{
    sync::mpsc::{Receiver, SyncSender},
    thread,
};

/// Runs the transmit worker.
///
/// Nothing is sent before the receive worker signals, through `started`,
/// that the peripheral is up. If that never happens the signal is dropped
/// and the worker returns at once. On the way out, `stopped` tells the
/// receive worker the peripheral may be stopped.
pub(crate) fn run<D, R>(session: &TestSession<D, R>, started: Receiver<()>, stopped: SyncSender<()>)
where
    D: Driver,
    R: StatusReporter,
{
    if started.recv().is_err() {
        info!("Driver not started, transmit task exiting");
        return;
    }

    let config = session.config();
    log_frame_details(config.msg_id, &config.payload.payload(0));

    let mut sent: u64 = 0;
    while !session.is_stopping() {
        let data = config.payload.payload(sent);
        let frame = match CanFrame::new(config.msg_id, &data) {
            Some(frame) => frame,
            None => {
                error!("Can't build the test frame");
                break;
            }
        };

        match session.driver().transmit(&frame, Some(config.intervals.tx_timeout)) {
            Ok(()) => {
                sent += 1;
                session.counters().tx.record(data.len());
            }
            // Still queued behind unacknowledged frames
            Err(err) if err.is_timeout() => {}
            Err(err) => {
                session.report(Status::err(format!("Transmit Error: {}", err)));
                thread::sleep(config.intervals.error_backoff);
            }
        }
    }

    // The receive worker is gone if it quit on its own
    let _ = stopped.send(());
    info!("Transmit task stopped after {} frames", sent);
}

fn log_frame_details(id: Id, data: &[u8]) {
    info!("Message Details:");
    match id {
        Id::Standard(id) => {
            info!("Message is in Standard Format");
            info!("ID is 0x{:03X}", id.as_raw());
        }
        Id::Extended(id) => {
            info!("Message is in Extended Format");
            info!("ID is 0x{:08X}", id.as_raw());
        }
    }
    debug!("Data bytes: {:02X}", data.iter().format(" "));
}
