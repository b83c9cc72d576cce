// quali-can/src/report/tcp.rs
//
// A line-based TCP channel to the test supervisor.
//
// This file is part of the Rust 'quali-can' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! TCP status reporter.
//!
//! The reporter listens on a TCP port. Any number of supervisors may
//! connect. Each one can send `start` and `stop` lines, and each one gets
//! every status line, terminated by a newline.
//!
//! ```text
//! $ nc localhost 10002
//! start
//! INF: Rx rate: 0 bit/s (0 messages/sec)
//! INF: Tx rate: 1017856 bit/s (7952 messages/sec)
//! stop
//! ```
//!
//! A supervisor that stops reading is dropped once a status line has
//! waited longer than the write timeout, so it can't hold up the run.

use crate::{
    report::{Command, StatusReporter},
    ReportError,
};
use log::{debug, info, warn};
use std::{
    io::{self, BufRead, BufReader, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

/// The default time a wait gives up after.
pub const DEFAULT_POLL: Duration = Duration::from_millis(500);

/// How long a status line may wait on a supervisor's socket.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// The connected supervisors and the write timeout they get.
#[derive(Debug)]
struct Supervisors {
    streams: Mutex<Vec<TcpStream>>,
    write_timeout: Mutex<Duration>,
}

impl Supervisors {
    fn streams(&self) -> MutexGuard<'_, Vec<TcpStream>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_timeout(&self) -> Duration {
        *self
            .write_timeout
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

type Clients = Arc<Supervisors>;

/// A status reporter serving supervisors over TCP.
#[derive(Debug)]
pub struct TcpReporter {
    local_addr: SocketAddr,
    clients: Clients,
    commands: Mutex<Receiver<Command>>,
    poll: Duration,
}

impl TcpReporter {
    /// Listens on the address and starts accepting supervisors in the
    /// background.
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let clients = Arc::new(Supervisors {
            streams: Mutex::new(Vec::new()),
            write_timeout: Mutex::new(DEFAULT_WRITE_TIMEOUT),
        });
        let (cmd_tx, cmd_rx) = mpsc::channel();

        {
            let clients = Arc::clone(&clients);
            thread::Builder::new()
                .name("status_accept".into())
                .spawn(move || accept(listener, clients, cmd_tx))?;
        }

        info!("Status reporter listening on {}", local_addr);
        Ok(Self {
            local_addr,
            clients,
            commands: Mutex::new(cmd_rx),
            poll: DEFAULT_POLL,
        })
    }

    /// Sets how long a wait blocks before giving up with a timeout.
    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Sets how long a status line may wait on a supervisor that isn't
    /// reading before that supervisor is dropped.
    pub fn with_write_timeout(self, timeout: Duration) -> Self {
        // A zero timeout is rejected by the socket
        let timeout = timeout.max(Duration::from_millis(1));
        *self
            .clients
            .write_timeout
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = timeout;

        for stream in self.clients.streams().iter() {
            if let Err(err) = stream.set_write_timeout(Some(timeout)) {
                warn!("Can't set the write timeout: {}", err);
            }
        }
        self
    }

    /// The address the reporter listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The number of connected supervisors.
    pub fn clients(&self) -> usize {
        self.clients.streams().len()
    }

    /// Waits for the wanted command, skipping any other one.
    fn wait_for(&self, wanted: Command) -> Result<(), ReportError> {
        let deadline = Instant::now() + self.poll;
        let commands = self.commands.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match commands.recv_timeout(left) {
                Ok(cmd) if cmd == wanted => return Ok(()),
                Ok(cmd) => debug!("Ignoring {:?} while waiting for {:?}", cmd, wanted),
                Err(RecvTimeoutError::Timeout) => return Err(ReportError::Timeout),
                Err(RecvTimeoutError::Disconnected) => return Err(ReportError::Closed),
            }
        }
    }
}

impl StatusReporter for TcpReporter {
    fn wait_for_start(&self) -> Result<(), ReportError> {
        self.wait_for(Command::Start)
    }

    fn wait_for_stop(&self) -> Result<(), ReportError> {
        self.wait_for(Command::Stop)
    }

    fn report_status(&self, line: &str) -> Result<(), ReportError> {
        let mut clients = self.clients.streams();
        if clients.is_empty() {
            return Err(ReportError::NotConnected);
        }

        let mut msg = Vec::with_capacity(line.len() + 1);
        msg.extend_from_slice(line.as_bytes());
        msg.push(b'\n');

        let mut last_err = None;
        clients.retain_mut(|client| match client.write_all(&msg) {
            Ok(()) => true,
            Err(err) => {
                info!("Dropping supervisor {:?}: {}", client.peer_addr().ok(), err);
                // Also ends the reader thread on the cloned handle
                let _ = client.shutdown(Shutdown::Both);
                last_err = Some(err);
                false
            }
        });

        match (clients.is_empty(), last_err) {
            (true, Some(err)) => Err(ReportError::Io(err)),
            _ => Ok(()),
        }
    }
}

/// Accepts supervisors until the listener fails.
fn accept(listener: TcpListener, clients: Clients, commands: Sender<Command>) {
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                warn!("Accepting a supervisor failed: {}", err);
                continue;
            }
        };

        let peer = stream.peer_addr().ok();
        if let Err(err) = stream.set_write_timeout(Some(clients.write_timeout())) {
            warn!("Can't set the write timeout for {:?}: {}", peer, err);
            continue;
        }

        let reader = match stream.try_clone() {
            Ok(reader) => reader,
            Err(err) => {
                warn!("Can't read from supervisor {:?}: {}", peer, err);
                continue;
            }
        };

        let commands = commands.clone();
        let res = thread::Builder::new()
            .name("status_client".into())
            .spawn(move || read_commands(reader, commands));

        match res {
            Ok(_) => {
                info!("Supervisor connected from {:?}", peer);
                clients.streams().push(stream);
            }
            Err(err) => warn!("Can't serve supervisor {:?}: {}", peer, err),
        }
    }
}

/// Forwards the commands of one supervisor until it disconnects.
fn read_commands(stream: TcpStream, commands: Sender<Command>) {
    let peer = stream.peer_addr().ok();

    for line in BufReader::new(stream).lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                debug!("Reading from supervisor {:?} failed: {}", peer, err);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<Command>() {
            Ok(cmd) => {
                debug!("Supervisor {:?}: {:?}", peer, cmd);
                if commands.send(cmd).is_err() {
                    break;
                }
            }
            Err(err) => warn!("Supervisor {:?}: {}", peer, err),
        }
    }
    info!("Supervisor {:?} disconnected", peer);
}

/////////////////////////////////////////////////////////////////////////////
