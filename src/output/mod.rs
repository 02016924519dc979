//! Virtual output keyboard
//!
//! One uinput device per physical keyboard, used to replay macro
//! sequences. Each action goes out as one key event followed by one
//! SYN_REPORT marker, and consecutive events are spaced 8 ms apart:
//! consumers coalesce or drop rapid identical key codes arriving inside
//! one timeslice.

use crate::config::{MacroAction, MacroTable};
use crate::input::InputSource;
use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, AttributeSetRef, EventType, InputEvent, Key};
use log::debug;
use std::io;
use std::thread;
use std::time::Duration;

/// Pause between successive output events.
const KEY_DELAY: Duration = Duration::from_millis(8);

pub struct VirtualKeyboard {
    device: VirtualDevice,
}

impl VirtualKeyboard {
    /// Create the uinput device paired with `source`, advertising every
    /// key the physical device supports plus every macro target, so all
    /// configured sequences are emittable.
    pub fn new(source: &InputSource, macros: &MacroTable) -> io::Result<Self> {
        let name = format!("ggkbdd {}", source.name().unwrap_or("keyboard"));
        let keys = capability_set(source.supported_keys(), macros);
        let device = VirtualDeviceBuilder::new()?
            .name(&name)
            .with_keys(&keys)?
            .build()?;
        debug!("created virtual device \"{name}\"");
        Ok(Self { device })
    }

    /// Replay one macro sequence in order. Returns only after the whole
    /// sequence is written; the worker processes no further input until
    /// then, so two emissions can never interleave.
    pub fn replay(&mut self, sequence: &[MacroAction]) -> io::Result<()> {
        for action in sequence {
            // emit() appends the SYN_REPORT framing after the event
            self.device.emit(&[key_event(action)])?;
            thread::sleep(KEY_DELAY);
        }
        Ok(())
    }
}

fn key_event(action: &MacroAction) -> InputEvent {
    InputEvent::new(
        EventType::KEY,
        action.key.code(),
        i32::from(action.press),
    )
}

fn capability_set(
    source_keys: Option<&AttributeSetRef<Key>>,
    macros: &MacroTable,
) -> AttributeSet<Key> {
    let mut keys = AttributeSet::new();
    if let Some(supported) = source_keys {
        for key in supported.iter() {
            keys.insert(key);
        }
    }
    for sequence in macros.values() {
        for action in sequence {
            keys.insert(action.key);
        }
    }
    keys
}
