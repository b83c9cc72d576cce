// quali-can/src/bin/quali-can.rs
//
// The command-line harness for CAN transceiver qualification.
//
// This file is part of the Rust 'quali-can' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! CLI harness that runs a CAN transceiver test session on a SocketCAN
//! interface, controlled by a supervisor over TCP.
//!
//! ```text
//! $ quali-can can0 --bitrate 1000000 --port 10002
//! ```
//!
//! The supervisor connects to the port, sends `start` and `stop` lines,
//! and reads back the `ERR:`/`INF:` status lines.

use anyhow::{anyhow, Context, Result};
use clap::{arg, value_parser, ArgAction, ArgMatches, Command};
use quali_can::{
    DriverConfig, ExtendedId, GeneralConfig, Id, Mode, SessionConfig, SocketCanDriver,
    StandardId, TcpReporter, TestHandle, TestSession, TimingConfig, TxPayload,
};
use std::{
    process,
    sync::atomic::{AtomicBool, Ordering},
};
use tracing_subscriber::EnvFilter;

// Make the app version the same as the package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

// --------------------------------------------------------------------------

/// Parses a CAN identifier in hex, with or without a "0x" prefix.
fn parse_hex_id(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|err| format!("invalid hex id '{}': {}", s, err))
}

/// Whether a `SetTrue` flag was given.
fn flag(opts: &ArgMatches, name: &str) -> bool {
    opts.get_one::<bool>(name).copied().unwrap_or(false)
}

/// Builds the message identifier from the options.
fn msg_id(opts: &ArgMatches) -> Result<Id> {
    let raw = *opts.get_one::<u32>("id").unwrap_or(&0x0A3);

    if flag(opts, "extended") {
        ExtendedId::new(raw)
            .map(Id::Extended)
            .ok_or_else(|| anyhow!("Extended ID out of range: 0x{:X}", raw))
    } else {
        u16::try_from(raw)
            .ok()
            .and_then(StandardId::new)
            .map(Id::Standard)
            .ok_or_else(|| anyhow!("Standard ID out of range: 0x{:X}", raw))
    }
}

/// Builds the session configuration from the options.
fn session_config(opts: &ArgMatches) -> Result<SessionConfig> {
    let timing = match opts.get_one::<u32>("bitrate") {
        Some(&bitrate) => TimingConfig::Bitrate {
            bitrate,
            sample_point: opts.get_one::<u32>("sample-point").copied(),
        },
        None => TimingConfig::Preconfigured,
    };

    let mode = match (flag(opts, "listen-only"), flag(opts, "no-ack")) {
        (true, true) => return Err(anyhow!("Can't be both listen-only and no-ack")),
        (true, false) => Mode::ListenOnly,
        (false, true) => Mode::NoAck,
        (false, false) => Mode::Normal,
    };

    let driver = DriverConfig {
        timing,
        general: GeneralConfig {
            mode,
            manage_link: flag(opts, "manage-link"),
            restart_ms: opts.get_one::<u32>("restart-ms").copied(),
            loopback: flag(opts, "loopback"),
        },
        ..DriverConfig::default()
    };

    let payload = match flag(opts, "counter-payload") {
        true => TxPayload::Counter,
        false => TxPayload::Fixed,
    };

    Ok(SessionConfig::default()
        .with_msg_id(msg_id(opts)?)
        .with_driver(driver)
        .with_payload(payload))
}

fn init_logging(verbose: bool) {
    let default = if verbose { "quali_can=debug" } else { "quali_can=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(opts: &ArgMatches) -> Result<()> {
    let iface_name = opts
        .get_one::<String>("iface")
        .ok_or_else(|| anyhow!("Need to specify a CAN interface"))?;
    let port = *opts.get_one::<u16>("port").unwrap_or(&10002);

    let config = session_config(opts)?;
    let driver = SocketCanDriver::new(iface_name.as_str());
    let reporter = TcpReporter::bind(("0.0.0.0", port))
        .with_context(|| format!("Can't listen on port {}", port))?;

    let session = TestSession::new(driver, reporter, config);

    let interrupted = AtomicBool::new(false);
    let handle = session.clone();
    ctrlc::set_handler(move || {
        if interrupted.swap(true, Ordering::SeqCst) {
            process::exit(1);
        }
        eprintln!("No further test will start. Press Ctrl-C again to quit.");
        handle.request_stop_restart();
    })?;

    let control = session.spawn().context("Can't start the test control task")?;
    control
        .join()
        .map_err(|_| anyhow!("The test control task panicked"))??;
    Ok(())
}

// --------------------------------------------------------------------------

fn main() {
    let opts = Command::new("quali-can")
        .version(VERSION)
        .about("CAN transceiver qualification harness for SocketCAN interfaces")
        .disable_help_flag(true)
        .arg(
            arg!(--help "Print help information")
                .short('?')
                .action(ArgAction::Help)
                .global(true),
        )
        .arg(
            arg!(<iface> "The CAN interface to test, like 'can0', 'vcan0', etc")
                .required(true)
                .index(1),
        )
        .arg(
            arg!(-b --bitrate <bitrate> "Set the bit rate of the interface (in Hz)")
                .required(false)
                .value_parser(value_parser!(u32)),
        )
        .arg(
            arg!(--"sample-point" <sp> "The sample point, in tenths of a percent")
                .required(false)
                .value_parser(value_parser!(u32)),
        )
        .arg(
            arg!(-i --id <id> "The ID of the test frame, in hex")
                .required(false)
                .default_value("0A3")
                .value_parser(parse_hex_id),
        )
        .arg(
            arg!(-e --extended "Send the test frame with an extended ID")
                .action(ArgAction::SetTrue),
        )
        .arg(
            arg!(-l --"listen-only" "Only receive, never drive the bus")
                .action(ArgAction::SetTrue),
        )
        .arg(
            arg!(--"no-ack" "Transmit without requiring an acknowledgement")
                .action(ArgAction::SetTrue),
        )
        .arg(
            arg!(-c --"counter-payload" "Send an incrementing counter instead of 1..8")
                .action(ArgAction::SetTrue),
        )
        .arg(
            arg!(--"manage-link" "Bring the link up and down around each run")
                .action(ArgAction::SetTrue),
        )
        .arg(
            arg!(--loopback "Let the receiver see our own frames, e.g. on vcan")
                .action(ArgAction::SetTrue),
        )
        .arg(
            arg!(--"restart-ms" <ms> "The bus-off restart delay, 0 to disable")
                .required(false)
                .value_parser(value_parser!(u32)),
        )
        .arg(
            arg!(-p --port <port> "The TCP port for the supervisor")
                .required(false)
                .default_value("10002")
                .value_parser(value_parser!(u16)),
        )
        .arg(arg!(-v --verbose "Verbose output").action(ArgAction::SetTrue))
        .get_matches();

    init_logging(flag(&opts, "verbose"));

    if let Err(err) = run(&opts) {
        eprintln!("{:#}", err);
        process::exit(1);
    }
}
