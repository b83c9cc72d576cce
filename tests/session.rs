// Full test sessions against the mock driver and the in-memory reporter.

use quali_can::{
    driver::mock::MockConfig, Alerts, CanFrame, DriverCall, DriverConfig, EmbeddedFrame,
    Intervals, MemoryReporter, MockDriver, Mode, SessionConfig, SessionError, SessionState,
    StandardId, TestHandle, TestSession, TxPayload,
};
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

type Session = TestSession<Arc<MockDriver>, Arc<MemoryReporter>>;

const TIMEOUT: Duration = Duration::from_secs(5);

fn fast_intervals() -> Intervals {
    Intervals {
        rate: Duration::from_millis(100),
        alert_poll: Duration::from_millis(20),
        alert_wait: Duration::ZERO,
        tx_timeout: Duration::from_millis(20),
        error_backoff: Duration::from_millis(20),
        rx_timeout: Duration::from_millis(200),
        restart_poll: Duration::from_millis(5),
    }
}

fn listen_only() -> SessionConfig {
    SessionConfig::default()
        .with_intervals(fast_intervals())
        .with_driver(DriverConfig::default().with_mode(Mode::ListenOnly))
}

fn frame(data: &[u8]) -> CanFrame {
    let id = StandardId::new(0x0A3).unwrap();
    CanFrame::new(id, data).unwrap()
}

fn counter_frames(range: std::ops::Range<u32>) -> Vec<CanFrame> {
    range.map(|i| frame(&[i as u8; 8])).collect()
}

/// Polls the condition until it holds or the time is up.
fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut f: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    f()
}

/// A running session, with the supervisor side at hand.
struct Harness {
    driver: Arc<MockDriver>,
    reporter: Arc<MemoryReporter>,
    session: Arc<Session>,
    control: JoinHandle<Result<(), SessionError>>,
}

impl Harness {
    fn new(driver: MockDriver, config: SessionConfig) -> Self {
        let driver = Arc::new(driver);
        let reporter = Arc::new(MemoryReporter::with_poll(Duration::from_millis(20)));
        let session = TestSession::new(Arc::clone(&driver), Arc::clone(&reporter), config);
        let control = session.spawn().unwrap();
        assert!(session.wait_for_state(SessionState::Idle, TIMEOUT));

        Self {
            driver,
            reporter,
            session,
            control,
        }
    }

    fn start_run(&self) {
        self.reporter.start();
        assert!(self.session.wait_for_state(SessionState::Running, TIMEOUT));
    }

    fn stop_run(&self) {
        self.reporter.stop();
        assert!(self.session.wait_for_state(SessionState::Idle, TIMEOUT));
    }

    fn shutdown(self) -> Result<(), SessionError> {
        self.session.request_stop_restart();
        assert!(self.session.wait_for_state(SessionState::Stopped, TIMEOUT));
        self.control.join().unwrap()
    }

    fn count_lines(&self, prefix: &str) -> usize {
        self.reporter
            .lines()
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }
}

// ===== Lifecycle =====

#[test]
fn install_failure_ends_session() {
    let driver = Arc::new(MockDriver::with_config(MockConfig::default().fail_install()));
    let reporter = Arc::new(MemoryReporter::new());
    let session = TestSession::new(
        Arc::clone(&driver),
        Arc::clone(&reporter),
        SessionConfig::default(),
    );

    let res = session.run();
    assert!(matches!(res, Err(SessionError::Install(_))));
    assert_eq!(SessionState::Stopped, session.state());

    let lines = reporter.lines();
    assert_eq!(1, lines.len());
    assert!(lines[0].starts_with("ERR: driver install failed:"));
    assert_eq!(vec![DriverCall::Install], driver.calls());
}

#[test]
fn stop_restart_while_idle() {
    let h = Harness::new(MockDriver::new(), listen_only());

    h.session.request_stop_restart();
    assert!(h.session.wait_for_state(SessionState::Stopped, TIMEOUT));

    // Too late, nobody is listening any more
    h.reporter.start();
    thread::sleep(Duration::from_millis(50));

    assert_eq!(0, h.session.runs());
    assert_eq!(vec![DriverCall::Install], h.driver.calls());
    assert!(h.control.join().unwrap().is_ok());
}

#[test]
fn closed_reporter_stops_run() {
    let h = Harness::new(MockDriver::new(), listen_only());
    h.start_run();

    h.reporter.close();
    assert!(h.session.wait_for_state(SessionState::Stopped, TIMEOUT));
    assert!(h.control.join().unwrap().is_ok());

    assert!(!h.driver.is_running());
    assert_eq!(Some(&DriverCall::Stop), h.driver.calls().last());
}

#[test]
fn workers_exit_promptly() {
    let config = SessionConfig::default()
        .with_payload(TxPayload::Counter)
        .with_intervals(Intervals {
            restart_poll: Duration::from_millis(5),
            ..Intervals::default()
        });
    let mock = MockConfig::default()
        .loopback()
        .frame_time(Duration::from_micros(100));
    let h = Harness::new(MockDriver::with_config(mock), config);
    h.start_run();
    thread::sleep(Duration::from_millis(100));

    let t = Instant::now();
    h.stop_run();
    // The receive timeout is the longest wait that can't be cut short
    assert!(t.elapsed() < Duration::from_secs(2));
    assert!(!h.driver.is_running());

    h.shutdown().unwrap();
}

#[test]
fn worker_spawn_failure_returns_to_idle() {
    // No thread can get a stack this size
    let config = SessionConfig::default()
        .with_intervals(fast_intervals())
        .with_worker_stack_size(usize::MAX / 2);
    let h = Harness::new(MockDriver::new(), config);

    h.reporter.start();
    let line = h
        .reporter
        .wait_for_line(|l| l.starts_with("ERR: could not start"), TIMEOUT)
        .unwrap();
    assert_eq!("ERR: could not start can alert task!", line);
    assert!(wait_until(TIMEOUT, || h.session.is_stopping()));
    assert_eq!(SessionState::Idle, h.session.state());

    // The control loop still takes the next start
    h.reporter.start();
    assert!(wait_until(TIMEOUT, || h.session.runs() == 2));
    assert!(wait_until(TIMEOUT, || h.count_lines("ERR: could not start") == 2));
    assert_eq!(SessionState::Idle, h.session.state());

    assert_eq!(vec![DriverCall::Install], h.driver.calls());
    h.shutdown().unwrap();
}

// ===== Handshake =====

#[test]
fn transmit_only_after_driver_start() {
    let config = SessionConfig::default().with_intervals(fast_intervals());
    let mock = MockConfig::default().frame_time(Duration::from_micros(100));
    let h = Harness::new(MockDriver::with_config(mock), config);

    h.start_run();
    assert!(wait_until(TIMEOUT, || h.driver.transmitted() > 10));
    h.stop_run();

    let calls = h.driver.calls();
    let start = calls.iter().position(|c| *c == DriverCall::Start).unwrap();
    let first_tx = calls
        .iter()
        .position(|c| matches!(c, DriverCall::Transmit(_)))
        .unwrap();
    let last_tx = calls
        .iter()
        .rposition(|c| matches!(c, DriverCall::Transmit(_)))
        .unwrap();
    let stop = calls.iter().rposition(|c| *c == DriverCall::Stop).unwrap();

    assert!(start < first_tx);
    assert!(last_tx < stop);
    assert!(calls.contains(&DriverCall::ConfigureAlerts(Alerts::MONITORED)));

    // The default payload is the fixed 1..8 sequence
    if let DriverCall::Transmit(frame) = &calls[first_tx] {
        assert_eq!(&[1, 2, 3, 4, 5, 6, 7, 8], frame.data());
        assert_eq!(0x0A3, frame.raw_id());
    }

    h.shutdown().unwrap();
}

#[test]
fn driver_start_failure() {
    let config = SessionConfig::default().with_intervals(fast_intervals());
    let h = Harness::new(MockDriver::with_config(MockConfig::default().fail_start()), config);

    h.start_run();
    assert!(h
        .reporter
        .wait_for_line(|l| l.starts_with("ERR: could not start driver:"), TIMEOUT)
        .is_some());
    h.stop_run();

    // The transmit worker was released without sending
    assert_eq!(0, h.driver.transmit_attempts());
    assert_eq!(0, h.session.counters().tx.msgs());

    h.shutdown().unwrap();
}

// ===== Receive verification =====

#[test]
fn in_order_stream() {
    let h = Harness::new(MockDriver::new(), listen_only());
    h.driver.push_frames(counter_frames(0..300));

    h.start_run();
    assert!(wait_until(TIMEOUT, || h.session.counters().rx.msgs() == 300));
    h.stop_run();

    assert_eq!(300, h.session.counters().rx.msgs());
    assert_eq!(2400, h.session.counters().rx.bytes());
    assert_eq!(0, h.count_lines("ERR: wrong data"));

    // Listen-only: no transmit worker, no tx rate
    assert_eq!(0, h.driver.transmit_attempts());
    assert_eq!(0, h.count_lines("INF: Tx rate"));

    h.shutdown().unwrap();
}

#[test]
fn length_error_then_resync() {
    let h = Harness::new(MockDriver::new(), listen_only());
    h.driver.push_frames(counter_frames(0..2));
    h.driver.push_frame(frame(&[1, 1, 1]));
    h.driver.push_frames(counter_frames(0x70..0x74));

    h.start_run();
    assert!(wait_until(TIMEOUT, || h.driver.queued() == 0));
    // Two good frames, then 0x70 is the new baseline and 0x71..0x73 count
    assert!(wait_until(TIMEOUT, || h.session.counters().rx.msgs() == 5));
    h.stop_run();

    assert_eq!(5, h.session.counters().rx.msgs());
    assert_eq!(1, h.count_lines("ERR: wrong data length: 3"));
    assert_eq!(0, h.count_lines("ERR: wrong data:"));

    h.shutdown().unwrap();
}

#[test]
fn wrong_data_reported() {
    let h = Harness::new(MockDriver::new(), listen_only());
    h.driver.push_frames(counter_frames(0..3));
    h.driver.push_frame(frame(&[9, 9, 9, 9, 9, 9, 9, 8]));
    h.driver.push_frames(counter_frames(20..23));

    h.start_run();
    assert!(wait_until(TIMEOUT, || h.session.counters().rx.msgs() == 5));
    h.stop_run();

    assert_eq!(
        1,
        h.count_lines("ERR: wrong data: expected 0303030303030303 got 0909090909090908")
    );
    assert_eq!(5, h.session.counters().rx.msgs());

    h.shutdown().unwrap();
}

#[test]
fn counters_reset_each_run() {
    let h = Harness::new(MockDriver::new(), listen_only());

    h.driver.push_frames(counter_frames(0..5));
    h.start_run();
    assert!(wait_until(TIMEOUT, || h.session.counters().rx.msgs() == 5));
    h.stop_run();

    // A new run expects the counter to start over at zero
    h.driver.push_frames(counter_frames(0..3));
    h.start_run();
    assert!(wait_until(TIMEOUT, || h.driver.queued() == 0));
    assert!(wait_until(TIMEOUT, || h.session.counters().rx.msgs() == 3));
    h.stop_run();

    assert_eq!(3, h.session.counters().rx.msgs());
    assert_eq!(2, h.session.runs());
    assert_eq!(0, h.count_lines("ERR: wrong data"));

    h.shutdown().unwrap();
}

// ===== Transmit =====

#[test]
fn alternating_transmit_failures() {
    let config = SessionConfig::default().with_intervals(fast_intervals());
    let mock = MockConfig::default().fail_transmit_every(2);
    let h = Harness::new(MockDriver::with_config(mock), config);

    h.start_run();
    assert!(wait_until(TIMEOUT, || h.driver.transmit_attempts() >= 10));
    h.stop_run();

    let attempts = h.driver.transmit_attempts();
    let sent = h.driver.transmitted();
    assert_eq!(attempts / 2, attempts - sent);

    assert_eq!(sent, h.session.counters().tx.msgs());
    assert_eq!(8 * sent, h.session.counters().tx.bytes());
    assert_eq!((attempts - sent) as usize, h.count_lines("ERR: Transmit Error:"));

    h.shutdown().unwrap();
}

#[test]
fn unacknowledged_frames_dont_block_stop() {
    let config = SessionConfig::default().with_intervals(fast_intervals());
    let h = Harness::new(MockDriver::with_config(MockConfig::default().no_ack()), config);

    h.start_run();
    assert!(wait_until(TIMEOUT, || h.driver.calls().len() > 5));

    let t = Instant::now();
    h.stop_run();
    assert!(t.elapsed() < Duration::from_secs(2));
    assert!(!h.driver.is_running());

    // Waiting on the bus is not a transmit error
    assert_eq!(0, h.driver.transmitted());
    assert_eq!(0, h.session.counters().tx.msgs());
    assert_eq!(0, h.count_lines("ERR: Transmit Error:"));

    h.shutdown().unwrap();
}

#[test]
fn loopback_end_to_end() {
    let config = SessionConfig::default()
        .with_payload(TxPayload::Counter)
        .with_intervals(Intervals {
            rx_timeout: Duration::from_secs(1),
            ..fast_intervals()
        });
    let mock = MockConfig::default()
        .loopback()
        .frame_time(Duration::from_micros(200));
    let h = Harness::new(MockDriver::with_config(mock), config);

    h.start_run();
    let nonzero = |dir: &'static str| {
        move |l: &str| l.starts_with(dir) && !l.contains(" 0 bit/s")
    };
    assert!(h.reporter.wait_for_line(nonzero("INF: Tx rate:"), TIMEOUT).is_some());
    assert!(h.reporter.wait_for_line(nonzero("INF: Rx rate:"), TIMEOUT).is_some());
    h.stop_run();

    assert_eq!(0, h.count_lines("ERR: wrong data"));

    let tx = h.session.counters().tx.msgs();
    let rx = h.session.counters().rx.msgs();
    assert!(rx > 0);
    assert!(rx <= tx);
    // Frames still queued at the stop are lost
    assert!(tx - rx <= h.driver.queued() as u64 + 8);

    h.shutdown().unwrap();
}

// ===== Alerts =====

#[test]
fn alerts_reported() {
    let h = Harness::new(MockDriver::new(), listen_only());
    h.driver
        .raise_alerts(Alerts::BUS_OFF | Alerts::ARB_LOST | Alerts::BUS_RECOVERED);

    h.start_run();
    assert!(h
        .reporter
        .wait_for_line(|l| l == "ERR: ALERT_BUS_OFF", TIMEOUT)
        .is_some());
    assert!(h
        .reporter
        .wait_for_line(|l| l == "ERR: ALERT_ARB_LOST", TIMEOUT)
        .is_some());
    h.stop_run();

    assert_eq!(0, h.count_lines("ERR: ALERT_BUS_RECOVERED"));
    h.shutdown().unwrap();
}

#[test]
fn alert_config_failure_is_not_fatal() {
    let h = Harness::new(
        MockDriver::with_config(MockConfig::default().fail_alerts()),
        listen_only(),
    );
    h.driver.push_frames(counter_frames(0..4));

    h.start_run();
    assert!(wait_until(TIMEOUT, || h.session.counters().rx.msgs() == 4));
    h.stop_run();

    h.shutdown().unwrap();
}
