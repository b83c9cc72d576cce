// quali-can/src/driver/mock.rs
//
// An in-process driver for exercising test sessions without hardware.
//
// This file is part of the Rust 'quali-can' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Mock CAN driver.
//!
//! The mock keeps a receive queue that tests fill with
//! [`MockDriver::push_frame`], or that fills itself from transmitted frames
//! in loopback mode. Every call is recorded, so tests can check the order
//! in which a session drives the peripheral.

use crate::{
    driver::{Driver, DriverConfig},
    Alerts, CanFrame, DriverError,
};
use log::debug;
use std::{
    collections::VecDeque,
    io,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, Instant},
};

/// Frames the receive queue holds before a transmit has to wait.
const QUEUE_DEPTH: usize = 1024;

/// How long a looped-back frame waits for room in a full receive queue
/// before it is lost.
const OVERRUN_WAIT: Duration = Duration::from_millis(100);

/// A call made into the mock, in the order it was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    /// `install`
    Install,
    /// `start`
    Start,
    /// `stop`
    Stop,
    /// `transmit` with the frame, whether or not it succeeded
    Transmit(CanFrame),
    /// `configure_alerts` with the requested set
    ConfigureAlerts(Alerts),
}

/// Behaviour of the mock.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockConfig {
    /// Put every transmitted frame on the receive queue.
    pub loopback: bool,
    /// Time one successful transmit takes.
    pub frame_time: Duration,
    /// Fail `install`.
    pub fail_install: bool,
    /// Fail `start`.
    pub fail_start: bool,
    /// Fail every n-th transmit attempt.
    pub fail_transmit_every: Option<u32>,
    /// Fail `configure_alerts`.
    pub fail_alerts: bool,
    /// No node acknowledges: every transmit waits until it times out.
    pub no_ack: bool,
}

impl MockConfig {
    /// Echoes transmitted frames back to the receiver.
    pub fn loopback(mut self) -> Self {
        self.loopback = true;
        self
    }

    /// Sets the time a successful transmit takes.
    pub fn frame_time(mut self, frame_time: Duration) -> Self {
        self.frame_time = frame_time;
        self
    }

    /// Makes `install` fail.
    pub fn fail_install(mut self) -> Self {
        self.fail_install = true;
        self
    }

    /// Makes `start` fail.
    pub fn fail_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Makes every n-th transmit attempt fail. Two fails every other one.
    pub fn fail_transmit_every(mut self, n: u32) -> Self {
        self.fail_transmit_every = Some(n.max(1));
        self
    }

    /// Makes `configure_alerts` fail.
    pub fn fail_alerts(mut self) -> Self {
        self.fail_alerts = true;
        self
    }

    /// Leaves every transmitted frame unacknowledged.
    pub fn no_ack(mut self) -> Self {
        self.no_ack = true;
        self
    }
}

#[derive(Debug, Default)]
struct State {
    config: Option<DriverConfig>,
    running: bool,
    rx_queue: VecDeque<CanFrame>,
    calls: Vec<DriverCall>,
    tx_attempts: u64,
    tx_sent: u64,
    alert_mask: Alerts,
    pending_alerts: Alerts,
}

/// A scripted CAN peripheral.
#[derive(Debug, Default)]
pub struct MockDriver {
    config: MockConfig,
    state: Mutex<State>,
    cond: Condvar,
}

impl MockDriver {
    /// Creates a mock with default behaviour: no loopback, no failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock with the given behaviour.
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a frame for the receiver, as if it arrived from the bus.
    pub fn push_frame(&self, frame: CanFrame) {
        self.lock().rx_queue.push_back(frame);
        self.cond.notify_all();
    }

    /// Queues a number of frames for the receiver.
    pub fn push_frames<I>(&self, frames: I)
    where
        I: IntoIterator<Item = CanFrame>,
    {
        self.lock().rx_queue.extend(frames);
        self.cond.notify_all();
    }

    /// Raises bus alerts for the next `read_alerts`.
    pub fn raise_alerts(&self, alerts: Alerts) {
        self.lock().pending_alerts |= alerts;
        self.cond.notify_all();
    }

    /// Frames waiting for the receiver.
    pub fn queued(&self) -> usize {
        self.lock().rx_queue.len()
    }

    /// All calls made so far.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.lock().calls.clone()
    }

    /// The number of frames transmitted successfully.
    pub fn transmitted(&self) -> u64 {
        self.lock().tx_sent
    }

    /// The number of transmit attempts, failed ones included.
    pub fn transmit_attempts(&self) -> u64 {
        self.lock().tx_attempts
    }

    /// Whether the peripheral is started.
    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Waits on the condition until `done` holds or the deadline passes.
    /// Returns the guard and whether `done` holds.
    fn wait_until<'a, F>(
        &self,
        mut state: MutexGuard<'a, State>,
        deadline: Option<Instant>,
        mut done: F,
    ) -> (MutexGuard<'a, State>, bool)
    where
        F: FnMut(&State) -> bool,
    {
        while !done(&*state) {
            state = match deadline {
                None => self.cond.wait(state).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return (state, false);
                    }
                    self.cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
        (state, true)
    }
}

impl Driver for MockDriver {
    fn install(&self, config: &DriverConfig) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.calls.push(DriverCall::Install);
        if self.config.fail_install {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such device").into());
        }
        if state.config.is_some() {
            return Err(DriverError::AlreadyInstalled);
        }
        state.config = Some(config.clone());
        Ok(())
    }

    fn start(&self) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.calls.push(DriverCall::Start);
        if state.config.is_none() {
            return Err(DriverError::NotInstalled);
        }
        if self.config.fail_start {
            return Err(io::Error::new(io::ErrorKind::Other, "controller did not start").into());
        }
        state.running = true;
        self.cond.notify_all();
        Ok(())
    }

    fn stop(&self) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.calls.push(DriverCall::Stop);
        if !state.running {
            return Err(DriverError::NotRunning);
        }
        state.running = false;
        self.cond.notify_all();
        Ok(())
    }

    fn transmit(&self, frame: &CanFrame, timeout: Option<Duration>) -> Result<(), DriverError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();
        state.calls.push(DriverCall::Transmit(*frame));

        let config = state.config.clone().ok_or(DriverError::NotInstalled)?;
        if !config.mode().can_transmit() {
            return Err(DriverError::Unsupported("transmit in listen-only mode"));
        }
        if !state.running {
            return Err(DriverError::NotRunning);
        }

        state.tx_attempts += 1;
        if let Some(n) = self.config.fail_transmit_every {
            if state.tx_attempts % u64::from(n) == 0 {
                debug!("mock: failing transmit #{}", state.tx_attempts);
                return Err(io::Error::new(io::ErrorKind::Other, "transmit failed").into());
            }
        }

        if self.config.no_ack {
            let (guard, _) = self.wait_until(state, deadline, |st| !st.running);
            return match guard.running {
                true => Err(DriverError::Timeout),
                false => Err(DriverError::NotRunning),
            };
        }

        let mut loopback = self.config.loopback && config.filter.accepts(frame.id_word());
        if loopback {
            // A stalled receiver overruns the queue instead of blocking the
            // sender forever.
            let overrun = Instant::now() + OVERRUN_WAIT;
            let wait_until = match deadline {
                Some(deadline) if deadline < overrun => deadline,
                _ => overrun,
            };
            let (guard, ready) = self.wait_until(state, Some(wait_until), |st| {
                !st.running || st.rx_queue.len() < QUEUE_DEPTH
            });
            state = guard;
            if !ready {
                if wait_until != overrun {
                    return Err(DriverError::Timeout);
                }
                debug!("mock: receive queue overrun");
                loopback = false;
            }
            if !state.running {
                return Err(DriverError::NotRunning);
            }
        }
        drop(state);

        if !self.config.frame_time.is_zero() {
            thread::sleep(self.config.frame_time);
        }

        let mut state = self.lock();
        state.tx_sent += 1;
        if loopback {
            state.rx_queue.push_back(*frame);
            self.cond.notify_all();
        }
        Ok(())
    }

    fn receive(&self, timeout: Option<Duration>) -> Result<CanFrame, DriverError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let state = self.lock();
        if !state.running {
            return Err(DriverError::NotRunning);
        }

        let (mut state, ready) = self.wait_until(state, deadline, |st| {
            !st.running || !st.rx_queue.is_empty()
        });
        if !ready {
            return Err(DriverError::Timeout);
        }
        match state.rx_queue.pop_front() {
            Some(frame) => {
                self.cond.notify_all();
                Ok(frame)
            }
            None => Err(DriverError::NotRunning),
        }
    }

    fn configure_alerts(&self, alerts: Alerts) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.calls.push(DriverCall::ConfigureAlerts(alerts));
        if self.config.fail_alerts {
            return Err(DriverError::Unsupported("alerts"));
        }
        state.alert_mask = alerts;
        Ok(())
    }

    fn read_alerts(&self, timeout: Duration) -> Alerts {
        let deadline = Instant::now() + timeout;
        let state = self.lock();
        let (mut state, _) = self.wait_until(state, Some(deadline), |st| {
            st.pending_alerts.intersects(st.alert_mask)
        });
        let alerts = state.pending_alerts & state.alert_mask;
        state.pending_alerts.remove(alerts);
        alerts
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{driver::Mode, EmbeddedFrame, StandardId};

    fn frame(b: u8) -> CanFrame {
        let id = StandardId::new(0x0A3).unwrap();
        CanFrame::new(id, &[b; 8]).unwrap()
    }

    fn running(config: MockConfig) -> MockDriver {
        let driver = MockDriver::with_config(config);
        driver.install(&DriverConfig::default()).unwrap();
        driver.start().unwrap();
        driver
    }

    #[test]
    fn test_lifecycle() {
        let driver = MockDriver::new();
        assert!(matches!(driver.start(), Err(DriverError::NotInstalled)));
        driver.install(&DriverConfig::default()).unwrap();
        assert!(matches!(
            driver.install(&DriverConfig::default()),
            Err(DriverError::AlreadyInstalled)
        ));
        driver.start().unwrap();
        assert!(driver.is_running());
        driver.stop().unwrap();
        assert!(matches!(driver.stop(), Err(DriverError::NotRunning)));

        assert_eq!(
            vec![
                DriverCall::Start,
                DriverCall::Install,
                DriverCall::Install,
                DriverCall::Start,
                DriverCall::Stop,
                DriverCall::Stop,
            ],
            driver.calls()
        );
    }

    #[test]
    fn test_receive_queue() {
        let driver = running(MockConfig::default());
        driver.push_frames([frame(1), frame(2)]);

        assert_eq!(frame(1), driver.receive(None).unwrap());
        assert_eq!(frame(2), driver.receive(Some(Duration::ZERO)).unwrap());
        assert!(driver
            .receive(Some(Duration::from_millis(10)))
            .unwrap_err()
            .is_timeout());
    }

    #[test]
    fn test_loopback() {
        let driver = running(MockConfig::default().loopback());
        driver.transmit(&frame(7), None).unwrap();
        assert_eq!(1, driver.transmitted());
        assert_eq!(frame(7), driver.receive(Some(Duration::ZERO)).unwrap());
    }

    #[test]
    fn test_transmit_failures() {
        let driver = running(MockConfig::default().fail_transmit_every(2));
        let results: Vec<bool> = (0..6)
            .map(|_| driver.transmit(&frame(0), None).is_ok())
            .collect();
        assert_eq!(vec![true, false, true, false, true, false], results);
        assert_eq!(3, driver.transmitted());
        assert_eq!(6, driver.transmit_attempts());
    }

    #[test]
    fn test_no_ack() {
        let driver = running(MockConfig::default().no_ack());
        assert!(driver
            .transmit(&frame(1), Some(Duration::from_millis(10)))
            .unwrap_err()
            .is_timeout());
        assert_eq!(0, driver.transmitted());

        driver.stop().unwrap();
        assert!(matches!(
            driver.transmit(&frame(1), None),
            Err(DriverError::NotRunning)
        ));
    }

    #[test]
    fn test_listen_only() {
        let driver = MockDriver::new();
        driver
            .install(&DriverConfig::default().with_mode(Mode::ListenOnly))
            .unwrap();
        driver.start().unwrap();
        assert!(matches!(
            driver.transmit(&frame(0), None),
            Err(DriverError::Unsupported(_))
        ));
    }

    #[test]
    fn test_alerts() {
        let driver = running(MockConfig::default());
        driver.raise_alerts(Alerts::BUS_OFF);
        // Nothing is reported until the mask is set
        assert!(driver.read_alerts(Duration::ZERO).is_empty());

        driver.configure_alerts(Alerts::MONITORED).unwrap();
        driver.raise_alerts(Alerts::BUS_RECOVERED);
        assert_eq!(Alerts::BUS_OFF, driver.read_alerts(Duration::ZERO));
        assert!(driver.read_alerts(Duration::from_millis(5)).is_empty());
    }

    #[test]
    fn test_stop_wakes_receiver() {
        let driver = std::sync::Arc::new(running(MockConfig::default()));
        let rx = {
            let driver = driver.clone();
            thread::spawn(move || driver.receive(None))
        };
        thread::sleep(Duration::from_millis(20));
        driver.stop().unwrap();
        assert!(matches!(rx.join().unwrap(), Err(DriverError::NotRunning)));
    }
}
