//! Physical keyboard input
//!
//! Wraps one evdev device node: a non-blocking key event stream for the
//! daemon's poll loop, exclusive grab while macro mode is held, and LED
//! access for the mode feedback pattern.

use evdev::{AttributeSet, AttributeSetRef, Device, EventType, InputEvent, InputEventKind, Key, LedType};
use log::{debug, info};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A single key state transition from the physical device.
///
/// The kernel's auto-repeat events (value 2) count as presses; only
/// value 0 is a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    /// true = press, false = release
    pub press: bool,
}

/// Device access failures. `Permission` is fatal at startup, `Grab` is a
/// recoverable conflict with another client holding the device.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("failed to open {}: permission denied", .path.display())]
    Permission { path: PathBuf, source: io::Error },
    #[error("failed to grab {}: {}", .path.display(), .source)]
    Grab { path: PathBuf, source: io::Error },
    #[error("device error on {}: {}", .path.display(), .source)]
    Io { path: PathBuf, source: io::Error },
}

/// One opened keyboard device node
pub struct InputSource {
    device: Device,
    path: PathBuf,
    grabbed: bool,
}

impl InputSource {
    /// Open the device node and set its fd non-blocking so the daemon can
    /// multiplex several devices with poll(2).
    pub fn open(path: &Path) -> Result<Self, AccessError> {
        let device = Device::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::PermissionDenied => AccessError::Permission {
                path: path.to_path_buf(),
                source: e,
            },
            _ => AccessError::Io {
                path: path.to_path_buf(),
                source: e,
            },
        })?;

        set_nonblocking(device.as_raw_fd()).map_err(|e| AccessError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        info!(
            "{}: {}",
            path.display(),
            device.name().unwrap_or("unnamed device")
        );

        Ok(Self {
            device,
            path: path.to_path_buf(),
            grabbed: false,
        })
    }

    /// Drain every pending event into `out`, keeping key events only.
    /// Synchronization markers and other event classes are dropped here.
    /// An empty queue is not an error.
    pub fn next_events(&mut self, out: &mut Vec<KeyEvent>) -> Result<(), AccessError> {
        loop {
            match self.device.fetch_events() {
                Ok(events) => {
                    for ev in events {
                        if let InputEventKind::Key(key) = ev.kind() {
                            out.push(KeyEvent {
                                key,
                                press: ev.value() != 0,
                            });
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => {
                    return Err(AccessError::Io {
                        path: self.path.clone(),
                        source: e,
                    })
                }
            }
        }
    }

    /// Take exclusive access to the device. While held, no other consumer
    /// (including the window system) observes its events. No-op if the
    /// grab is already held.
    pub fn grab(&mut self) -> Result<(), AccessError> {
        if self.grabbed {
            return Ok(());
        }
        self.device.grab().map_err(|e| AccessError::Grab {
            path: self.path.clone(),
            source: e,
        })?;
        self.grabbed = true;
        debug!("{}: grabbed", self.path.display());
        Ok(())
    }

    /// Release exclusive access. No-op if not held.
    pub fn ungrab(&mut self) -> Result<(), AccessError> {
        if !self.grabbed {
            return Ok(());
        }
        self.device.ungrab().map_err(|e| AccessError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        self.grabbed = false;
        debug!("{}: grab released", self.path.display());
        Ok(())
    }

    /// Current LED state, for saving before the feedback pattern runs.
    pub fn led_state(&mut self) -> io::Result<AttributeSet<LedType>> {
        self.device.get_led_state()
    }

    /// Write LED states to the device. Cosmetic only.
    pub fn set_leds(&mut self, states: &[(LedType, bool)]) -> io::Result<()> {
        let events: Vec<InputEvent> = states
            .iter()
            .map(|&(led, on)| InputEvent::new(EventType::LED, led.0, i32::from(on)))
            .collect();
        self.device.send_events(&events)
    }

    /// Raw fd for the daemon's poll set.
    pub fn fd(&self) -> RawFd {
        self.device.as_raw_fd()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> Option<&str> {
        self.device.name()
    }

    pub fn supported_keys(&self) -> Option<&AttributeSetRef<Key>> {
        self.device.supported_keys()
    }
}

impl Drop for InputSource {
    fn drop(&mut self) {
        // Leave the device usable for the rest of the system.
        if self.grabbed {
            let _ = self.device.ungrab();
            debug!("{}: grab released on close", self.path.display());
        }
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL)?;
    let mut flags = OFlag::from_bits_truncate(flags);
    flags.insert(OFlag::O_NONBLOCK);
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}
