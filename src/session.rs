// quali-can/src/session.rs
//
// The test session and its control task.
//
// This file is part of the Rust 'quali-can' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Test sessions.
//!
//! A [`TestSession`] is created once per CAN interface and lives for the
//! rest of the process. Its control task installs the driver, then runs
//! one test after another as the supervisor asks for them:
//!
//! ```text
//! Uninstalled -> Idle -> Running -> Idle -> ... -> Stopped
//! ```
//!
//! Each run gets a fresh set of workers and fresh start/stop signals. The
//! control task joins all workers of a run before it waits for the next
//! start, so there is never more than one generation of workers.

use crate::{
    counters::{Direction, SessionCounters},
    driver::Driver,
    monitor, rate, receive,
    report::{Status, StatusReporter},
    transmit, ReportError, SessionConfig, SessionError,
};
use log::{debug, error, info, warn};
use std::{
    fmt, io,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc, Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

/// The state of a test session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The driver is not installed yet.
    Uninstalled,
    /// Waiting for the supervisor to start a run.
    Idle,
    /// A test run is in progress.
    Running,
    /// The session is over. No further run will start.
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            SessionState::Uninstalled => "uninstalled",
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
        })
    }
}

/// The public control surface of a test session.
pub trait TestHandle: Send + Sync {
    /// Keeps the session from starting any further run.
    ///
    /// A run in progress goes on until the supervisor stops it.
    fn request_stop_restart(&self);
}

/// A worker thread of the current run.
type Worker = (&'static str, JoinHandle<()>);

/// A CAN transceiver test session.
#[derive(Debug)]
pub struct TestSession<D, R> {
    driver: D,
    reporter: R,
    config: SessionConfig,
    stop_test: AtomicBool,
    stop_restart: AtomicBool,
    counters: SessionCounters,
    state: Mutex<SessionState>,
    state_changed: Condvar,
    runs: AtomicU64,
}

impl<D, R> TestSession<D, R>
where
    D: Driver + 'static,
    R: StatusReporter + 'static,
{
    /// Creates a session. Nothing happens until the control task runs,
    /// through [`TestSession::run`] or [`TestSession::spawn`].
    pub fn new(driver: D, reporter: R, config: SessionConfig) -> Arc<Self> {
        Arc::new(Self {
            driver,
            reporter,
            config,
            stop_test: AtomicBool::new(false),
            stop_restart: AtomicBool::new(false),
            counters: SessionCounters::default(),
            state: Mutex::new(SessionState::Uninstalled),
            state_changed: Condvar::new(),
            runs: AtomicU64::new(0),
        })
    }

    /// Runs the control task on a new thread.
    pub fn spawn(self: &Arc<Self>) -> io::Result<JoinHandle<Result<(), SessionError>>> {
        let session = Arc::clone(self);
        thread::Builder::new()
            .name("can_test_control".into())
            .spawn(move || session.run())
    }

    /// Runs the control task on the calling thread.
    ///
    /// Returns once the session is stopped, either because a stop-restart
    /// was requested or because the reporter closed. Fails only if the
    /// driver could not be installed.
    pub fn run(self: &Arc<Self>) -> Result<(), SessionError> {
        if let Err(err) = self.driver.install(&self.config.driver) {
            let err = SessionError::Install(err);
            error!("{}", err);
            self.report(Status::err(err.to_string()));
            self.set_state(SessionState::Stopped);
            return Err(err);
        }
        info!("Driver installed");
        self.set_state(SessionState::Idle);

        let mut announced = false;
        while !self.stop_restart.load(Ordering::SeqCst) {
            if !announced {
                info!("Wait for start...");
                announced = true;
            }
            thread::sleep(self.config.intervals.restart_poll);

            match self.reporter.wait_for_start() {
                Ok(()) => {}
                Err(ReportError::Timeout) => continue,
                Err(ReportError::Closed) => {
                    info!("Status reporter closed");
                    break;
                }
                Err(err) => {
                    warn!("Waiting for start failed: {}", err);
                    continue;
                }
            }

            if self.stop_restart.load(Ordering::SeqCst) {
                info!("Start ignored, no restart requested");
                break;
            }
            self.run_test();
            announced = false;
        }

        info!("Test session stopped");
        self.set_state(SessionState::Stopped);
        Ok(())
    }

    /// A single test run, from spawning the workers to joining them.
    fn run_test(self: &Arc<Self>) {
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.reset();
        self.stop_test.store(false, Ordering::SeqCst);

        let mut workers = Vec::with_capacity(5);
        if let Err(err) = self.spawn_workers(&mut workers) {
            error!("{}", err);
            self.report(Status::err(format!("{}!", err)));
            self.set_stop_test();
            join(workers);
            return;
        }

        info!("Test run {} started", run);
        self.set_state(SessionState::Running);

        info!("Wait for stop...");
        loop {
            match self.reporter.wait_for_stop() {
                Ok(()) => break,
                Err(ReportError::Timeout) => {}
                Err(ReportError::Closed) => {
                    info!("Status reporter closed");
                    break;
                }
                Err(err) => {
                    warn!("Waiting for stop failed: {}", err);
                    thread::sleep(self.config.intervals.restart_poll);
                }
            }
        }

        self.set_stop_test();
        join(workers);
        info!(
            "Test run {} stopped: {} frames sent, {} received",
            run,
            self.counters.tx.msgs(),
            self.counters.rx.msgs()
        );
        self.set_state(SessionState::Idle);
    }

    /// Spawns the workers of a run, in start order. The start and stop
    /// signals go to the receive and transmit workers, so a worker that
    /// never starts drops its ends.
    fn spawn_workers(self: &Arc<Self>, workers: &mut Vec<Worker>) -> Result<(), SessionError> {
        let (started_tx, started_rx) = mpsc::sync_channel(1);
        let (stopped_tx, stopped_rx) = mpsc::sync_channel(1);
        let transmits = !self.config.is_listen_only();
        let stack = self.config.worker_stack_size;

        let session = Arc::clone(self);
        spawn_worker(workers, "alert", stack, move || monitor::run(&*session))?;

        let session = Arc::clone(self);
        spawn_worker(workers, "rx_report", stack, move || rate::run(&*session, Direction::Rx))?;

        if transmits {
            let session = Arc::clone(self);
            spawn_worker(workers, "tx_report", stack, move || {
                rate::run(&*session, Direction::Tx)
            })?;
        }

        let session = Arc::clone(self);
        spawn_worker(workers, "receive", stack, move || {
            receive::run(&*session, started_tx, stopped_rx)
        })?;

        if transmits {
            let session = Arc::clone(self);
            spawn_worker(workers, "transmit", stack, move || {
                transmit::run(&*session, started_rx, stopped_tx)
            })?;
        }
        Ok(())
    }
}

fn spawn_worker<F>(
    workers: &mut Vec<Worker>,
    task: &'static str,
    stack_size: Option<usize>,
    f: F,
) -> Result<(), SessionError>
where
    F: FnOnce() + Send + 'static,
{
    let mut builder = thread::Builder::new().name(format!("can_{}", task));
    if let Some(size) = stack_size {
        builder = builder.stack_size(size);
    }
    let handle = builder
        .spawn(f)
        .map_err(|source| SessionError::Spawn { task, source })?;
    debug!("Started can {} task", task);
    workers.push((task, handle));
    Ok(())
}

fn join(workers: Vec<Worker>) {
    for (task, handle) in workers {
        if handle.join().is_err() {
            error!("can {} task panicked", task);
        }
    }
}

impl<D, R> TestSession<D, R>
where
    D: Driver,
    R: StatusReporter,
{
    /// The peripheral driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// The status reporter.
    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// The session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The traffic counters of the current or last run.
    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    /// The number of runs started so far.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    /// Whether the current run is being stopped.
    pub fn is_stopping(&self) -> bool {
        self.stop_test.load(Ordering::SeqCst)
    }

    /// The current state.
    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    /// Waits for the session to reach a state. Returns whether it did
    /// within the timeout.
    pub fn wait_for_state(&self, state: SessionState, timeout: Duration) -> bool {
        let guard = self.lock_state();
        let (guard, _) = self
            .state_changed
            .wait_timeout_while(guard, timeout, |st| *st != state)
            .unwrap_or_else(PoisonError::into_inner);
        *guard == state
    }

    /// Sends a status line to the supervisor, logging it as well.
    ///
    /// Delivery failures are logged and otherwise ignored.
    pub fn report(&self, status: Status) {
        let line = status.to_string();
        if status.is_err() {
            warn!("{}", line);
        } else {
            info!("{}", line);
        }

        match self.reporter.report_status(&line) {
            Ok(()) => {}
            Err(ReportError::NotConnected) => debug!("No supervisor for: {}", line),
            Err(err) => warn!("Failed to report status: {}", err),
        }
    }

    /// Sleeps for the duration, waking early if the run is stopped.
    /// Returns `false` if the run is stopping.
    pub(crate) fn pause(&self, dur: Duration) -> bool {
        let guard = self.lock_state();
        let _unused = self
            .state_changed
            .wait_timeout_while(guard, dur, |_| !self.is_stopping())
            .unwrap_or_else(PoisonError::into_inner);
        !self.is_stopping()
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        let mut guard = self.lock_state();
        if *guard != state {
            debug!("Session {} -> {}", *guard, state);
            *guard = state;
        }
        self.state_changed.notify_all();
    }

    /// Tells the workers to leave their loops, waking any that pause.
    fn set_stop_test(&self) {
        let _guard = self.lock_state();
        self.stop_test.store(true, Ordering::SeqCst);
        self.state_changed.notify_all();
    }
}

impl<D, R> TestHandle for TestSession<D, R>
where
    D: Driver,
    R: StatusReporter,
{
    fn request_stop_restart(&self) {
        info!("Stop-restart requested");
        self.stop_restart.store(true, Ordering::SeqCst);
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryReporter, MockDriver};

    #[test]
    fn test_initial_state() {
        let session = TestSession::new(
            MockDriver::new(),
            MemoryReporter::new(),
            SessionConfig::default(),
        );
        assert_eq!(SessionState::Uninstalled, session.state());
        assert_eq!(0, session.runs());
        assert!(!session.is_stopping());
        assert!(!session.wait_for_state(SessionState::Idle, Duration::from_millis(1)));
    }

    #[test]
    fn test_pause() {
        let session = TestSession::new(
            MockDriver::new(),
            MemoryReporter::new(),
            SessionConfig::default(),
        );
        assert!(session.pause(Duration::from_millis(1)));

        session.set_stop_test();
        let start = std::time::Instant::now();
        assert!(!session.pause(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_report() {
        let reporter = Arc::new(MemoryReporter::new());
        let session = TestSession::new(
            MockDriver::new(),
            Arc::clone(&reporter),
            SessionConfig::default(),
        );
        session.report(Status::err("ALERT_BUS_OFF"));
        assert_eq!(vec!["ERR: ALERT_BUS_OFF".to_string()], reporter.lines());
    }
}
