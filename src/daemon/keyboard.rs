//! Per-device worker
//!
//! Ties one physical keyboard to its engine and virtual output device.
//! Applies the engine's decisions: grabbing and releasing the device on
//! mode toggles, replaying macro sequences, and running the LED feedback
//! pattern.

use crate::config::MacroTable;
use crate::engine::{Action, Engine};
use crate::input::{InputSource, KeyEvent};
use crate::output::VirtualKeyboard;
use anyhow::{Context, Result};
use evdev::{Key, LedType};
use log::{debug, error, warn};
use std::io;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

/// LEDs used for the mode feedback pattern, in marquee order.
const FEEDBACK_LEDS: [LedType; 3] = [
    LedType::LED_NUML,
    LedType::LED_CAPSL,
    LedType::LED_SCROLLL,
];

const FLASH_DELAY: Duration = Duration::from_millis(150);
const MARQUEE_DELAY: Duration = Duration::from_millis(100);

pub struct Keyboard {
    input: InputSource,
    output: VirtualKeyboard,
    engine: Engine,
    /// LED values saved when entering macro mode, restored on exit
    saved_leds: Vec<(LedType, bool)>,
    /// Scratch buffer reused across dispatches
    pending: Vec<KeyEvent>,
}

impl Keyboard {
    /// Open the device node and create its paired virtual output device.
    pub fn new(path: &Path, mode_key: Key, macros: Rc<MacroTable>) -> Result<Self> {
        let input = InputSource::open(path)?;
        let output = VirtualKeyboard::new(&input, &macros).with_context(|| {
            format!("failed to create uinput device for {}", path.display())
        })?;
        Ok(Self {
            input,
            output,
            engine: Engine::new(mode_key, macros),
            saved_leds: Vec::new(),
            pending: Vec::new(),
        })
    }

    /// Drain and process every pending event, strictly in arrival order.
    /// A macro replay completes before the next event is looked at.
    pub fn dispatch(&mut self) -> Result<()> {
        let mut events = std::mem::take(&mut self.pending);
        events.clear();
        self.input.next_events(&mut events)?;
        for event in &events {
            self.apply(*event);
        }
        self.pending = events;
        Ok(())
    }

    fn apply(&mut self, event: KeyEvent) {
        match self.engine.handle(event) {
            // Forwarding takes no work while the device is not grabbed,
            // and the grab already withholds suppressed events.
            Action::Forward | Action::Suppress => {}
            Action::EnterMacroMode => self.enter_macro_mode(),
            Action::LeaveMacroMode => self.leave_macro_mode(),
            Action::Emit(sequence) => {
                if let Err(e) = self.output.replay(sequence) {
                    warn!("{}: macro replay failed: {e}", self.input.path().display());
                }
            }
        }
    }

    fn enter_macro_mode(&mut self) {
        match self.input.grab() {
            Ok(()) => {
                debug!("{}: macro mode enabled", self.input.path().display());
                self.led_feedback(true);
            }
            Err(e) => {
                // Another client holds the device. Stay in pass-through;
                // the next mode toggle retries.
                error!("{e}");
                self.engine.revert_to_pass_through();
            }
        }
    }

    fn leave_macro_mode(&mut self) {
        if let Err(e) = self.input.ungrab() {
            // The device is likely gone; the next dispatch will notice.
            warn!("{e}");
            return;
        }
        debug!("{}: macro mode disabled", self.input.path().display());
        self.led_feedback(false);
    }

    fn led_feedback(&mut self, enable: bool) {
        if let Err(e) = self.led_pattern(enable) {
            debug!("{}: LED feedback skipped: {e}", self.input.path().display());
        }
    }

    /// Flash all three lock LEDs, run a short marquee (left-to-right when
    /// entering, right-to-left when leaving), then settle: all-on while
    /// macro mode is held, the saved pre-entry state after leaving.
    fn led_pattern(&mut self, enable: bool) -> io::Result<()> {
        let mut leds = FEEDBACK_LEDS;

        // Save the current state, in the hope that nothing changes it
        // until we toggle back. Not perfect but good enough.
        if enable {
            let state = self.input.led_state()?;
            self.saved_leds = leds.iter().map(|&led| (led, state.contains(led))).collect();
        }

        // flash once
        self.input.set_leds(&leds.map(|led| (led, false)))?;
        thread::sleep(FLASH_DELAY);
        self.input.set_leds(&leds.map(|led| (led, true)))?;
        thread::sleep(FLASH_DELAY);

        // marquee direction
        if enable {
            self.input.set_leds(&leds.map(|led| (led, false)))?;
        } else {
            leds.reverse();
            self.input.set_leds(&leds.map(|led| (led, true)))?;
        }
        thread::sleep(MARQUEE_DELAY);
        for led in leds {
            self.input.set_leds(&[(led, enable)])?;
            thread::sleep(MARQUEE_DELAY);
        }

        if !enable {
            let saved = std::mem::take(&mut self.saved_leds);
            self.input.set_leds(&saved)?;
        }
        Ok(())
    }

    pub fn fd(&self) -> RawFd {
        self.input.fd()
    }

    pub fn path(&self) -> &Path {
        self.input.path()
    }
}
