//! ggkbdd - a generic gaming keyboard daemon
//!
//! # Architecture
//!
//! ```text
//! /dev/input/eventN ──► InputSource ──► Engine ──► VirtualKeyboard ──► kernel
//!                        (evdev)      (mode/macro    (uinput)
//!                                      state machine)
//! ```
//!
//! While macro mode is off every event passes through untouched. Releasing
//! the configured mode key grabs the keyboard and switches to macro mode:
//! configured keys are replayed as macro sequences through the uinput
//! device, everything else is swallowed by the grab. Releasing the mode
//! key again, or ESC, returns to pass-through.

mod config;
mod daemon;
mod engine;
mod input;
mod output;

use anyhow::{bail, Result};
use config::Config;
use daemon::Daemon;
use log::{debug, info};
use std::path::PathBuf;

fn print_help() {
    println!(
        r#"ggkbdd {} - a generic gaming keyboard daemon

USAGE:
    ggkbdd [OPTIONS] <DEVICE>...

ARGS:
    <DEVICE>...        Path to the keyboard device, e.g. /dev/input/event0

OPTIONS:
    -h, --help         Print this help message
    -V, --version      Print version information
    -v, --verbose      Show debugging information
    --config <PATH>    Path to config file (default: ~/.config/ggkbddrc)

CONFIG FILE:
    [General]
    ModeKey = CAPSLOCK

    [Macros]
    S = A B
    X = +A -A

    Key names are the kernel names without the KEY_ prefix. A bare token
    taps the key, +NAME presses only, -NAME releases only."#,
        env!("CARGO_PKG_VERSION")
    );
}

struct Args {
    devices: Vec<PathBuf>,
    config_path: PathBuf,
    verbose: bool,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut devices = Vec::new();
    let mut config_path = None;
    let mut verbose = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--verbose" | "-v" => verbose = true,
            "--config" => {
                let Some(value) = iter.next() else {
                    bail!("--config requires a path");
                };
                config_path = Some(PathBuf::from(value));
            }
            other => {
                if let Some(value) = other.strip_prefix("--config=") {
                    config_path = Some(PathBuf::from(value));
                } else if other.starts_with('-') {
                    bail!("unknown option {other}");
                } else {
                    devices.push(PathBuf::from(other));
                }
            }
        }
    }

    if devices.is_empty() {
        bail!("no device path given, see --help");
    }

    Ok(Args {
        devices,
        config_path: config_path.unwrap_or_else(Config::default_path),
        verbose,
    })
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("ggkbdd {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let args = parse_args(&args)?;

    env_logger::Builder::from_env(
        env_logger::Env::default()
            .default_filter_or(if args.verbose { "debug" } else { "info" }),
    )
    .init();

    debug!("using config {}", args.config_path.display());
    let config = Config::load(&args.config_path)?;

    // Install before any device is grabbed so an interrupt always reaches
    // the run loop's flag check and the grabs are released on the way out.
    daemon::setup_signal_handlers();

    let mut daemon = Daemon::new(&args.devices, config)?;
    daemon.run()?;

    info!("ggkbdd terminated");
    Ok(())
}
