//! Daemon run loop
//!
//! Owns one worker per keyboard device and multiplexes them with poll(2),
//! so the process sleeps until a device has events. SIGINT/SIGTERM set a
//! flag observed on every wakeup; dropping the workers releases any held
//! grab on the way out.

mod keyboard;

pub use keyboard::Keyboard;

use crate::config::Config;
use anyhow::{bail, Result};
use log::{error, info};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use std::os::fd::BorrowedFd;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Global flag for shutdown requested via signal (SIGINT/SIGTERM)
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Poll timeout so the shutdown flag is observed even on an idle keyboard.
const POLL_TIMEOUT_MS: libc::c_int = 500;

/// Check if shutdown was requested (SIGINT or SIGTERM)
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

extern "C" fn shutdown_signal_handler(_signo: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

/// Set up signal handlers for clean shutdown (call once at startup).
pub fn setup_signal_handlers() {
    unsafe {
        libc::signal(
            libc::SIGINT,
            shutdown_signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGTERM,
            shutdown_signal_handler as *const () as libc::sighandler_t,
        );
    }
}

pub struct Daemon {
    keyboards: Vec<Keyboard>,
}

impl Daemon {
    /// Open every device and its paired virtual output. Any failure here
    /// aborts startup before the run loop begins.
    pub fn new(paths: &[PathBuf], config: Config) -> Result<Self> {
        let macros = Rc::new(config.macros);
        let mut keyboards = Vec::with_capacity(paths.len());
        for path in paths {
            keyboards.push(Keyboard::new(path, config.mode_key, Rc::clone(&macros))?);
        }
        Ok(Self { keyboards })
    }

    /// Process events until a termination signal arrives or every device
    /// is gone. Each ready device drains its queue to completion before
    /// the loop advances, so events stay in per-device arrival order and
    /// macro emissions from different devices never interleave.
    pub fn run(&mut self) -> Result<()> {
        info!("ggkbdd running on {} device(s)", self.keyboards.len());

        while !shutdown_requested() {
            let borrowed: Vec<BorrowedFd> = self
                .keyboards
                .iter()
                .map(|k| unsafe { BorrowedFd::borrow_raw(k.fd()) })
                .collect();
            let mut fds: Vec<PollFd> = borrowed
                .iter()
                .map(|fd| PollFd::new(fd, PollFlags::POLLIN))
                .collect();

            match poll(&mut fds, POLL_TIMEOUT_MS) {
                Ok(0) => continue,
                Ok(_) => {}
                // Interrupted by a signal; the flag is checked on the next pass.
                Err(Errno::EINTR) => continue,
                Err(e) => bail!("poll failed: {e}"),
            }

            // POLLERR/POLLHUP also count as ready: dispatching surfaces
            // the device error so the worker can be dropped.
            let ready: Vec<bool> = fds
                .iter()
                .map(|fd| fd.revents().is_some_and(|r| !r.is_empty()))
                .collect();
            drop(fds);

            let mut index = 0;
            self.keyboards.retain_mut(|keyboard| {
                let is_ready = ready[index];
                index += 1;
                if !is_ready {
                    return true;
                }
                match keyboard.dispatch() {
                    Ok(()) => true,
                    Err(e) => {
                        error!("dropping {}: {e:#}", keyboard.path().display());
                        false
                    }
                }
            });

            if self.keyboards.is_empty() {
                bail!("no usable devices remain");
            }
        }

        info!("terminating");
        Ok(())
    }
}
