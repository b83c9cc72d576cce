// quali-can/src/monitor.rs
//
// The alert monitor of a test run.
//
// This file is part of the Rust 'quali-can' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Alert monitor.
//!
//! Forwards every bus-health alert of the controller to the supervisor,
//! one line per alert and poll. Alerts that persist are reported again on
//! the next poll.

use crate::{driver::Driver, report::Status, Alerts, StatusReporter, TestSession};
use log::{debug, info, warn};

/// Runs the alert monitor.
pub(crate) fn run<D, R>(session: &TestSession<D, R>)
where
    D: Driver,
    R: StatusReporter,
{
    let driver = session.driver();
    let intervals = session.config().intervals;

    if let Err(err) = driver.configure_alerts(Alerts::MONITORED) {
        warn!("Failed to reconfigure alerts: {}", err);
        return;
    }
    info!("Alerts reconfigured");

    while !session.is_stopping() {
        let alerts = driver.read_alerts(intervals.alert_wait);
        if !alerts.is_empty() {
            debug!("CAN alerts: {}", alerts);
        }
        for label in alerts.labels() {
            session.report(Status::err(label));
        }

        if !session.pause(intervals.alert_poll) {
            break;
        }
    }
    debug!("Alert task stopped");
}
