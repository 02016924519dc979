//! Mode/macro state machine
//!
//! One engine per device decides, event by event, whether a key passes
//! through untouched or is replaced by a configured macro sequence.
//! Toggles are release-triggered (toggling on a press would grab the
//! device before the release arrives and leave the rest of the stack
//! believing the key is held down); macro dispatch is press-triggered.
//! The engine itself is pure: grabbing and emitting are the caller's job,
//! communicated through [`Action`].

use crate::config::{MacroAction, MacroTable};
use crate::input::KeyEvent;
use evdev::Key;
use log::debug;
use std::rc::Rc;

/// Releasing this key always leaves macro mode. Not configurable.
pub const ESCAPE_KEY: Key = Key::KEY_ESC;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Device is not grabbed, every event reaches the system untouched.
    PassThrough,
    /// Device is grabbed, presses are resolved against the macro table.
    MacroMode,
}

/// What the device worker must do with one incoming event.
#[derive(Debug, PartialEq, Eq)]
pub enum Action<'a> {
    /// Let the event through untouched. While the device is not grabbed
    /// this takes no work, the kernel already delivers it downstream.
    Forward,
    /// Swallow the event. While the device is grabbed this too takes no
    /// work, the grab already withholds it.
    Suppress,
    /// The engine entered macro mode, the worker must grab the device.
    EnterMacroMode,
    /// The engine left macro mode, the worker must release the grab.
    LeaveMacroMode,
    /// Replace the press with this sequence on the virtual device.
    Emit(&'a [MacroAction]),
}

/// Per-device mode/macro state machine
pub struct Engine {
    state: EngineState,
    mode_key: Key,
    macros: Rc<MacroTable>,
}

impl Engine {
    pub fn new(mode_key: Key, macros: Rc<MacroTable>) -> Self {
        Self {
            state: EngineState::PassThrough,
            mode_key,
            macros,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Decide what to do with one key event.
    ///
    /// Transitions are edge-triggered, so `EnterMacroMode`/`LeaveMacroMode`
    /// is returned exactly once per toggle and the grab can never be taken
    /// or released twice in a row.
    pub fn handle(&mut self, event: KeyEvent) -> Action<'_> {
        if !event.press {
            // Escape is checked first and exclusively: it only ever exits
            // macro mode, even if the config maps it as a macro trigger.
            if event.key == ESCAPE_KEY {
                return if self.state == EngineState::MacroMode {
                    self.state = EngineState::PassThrough;
                    Action::LeaveMacroMode
                } else {
                    Action::Suppress
                };
            }
            if event.key == self.mode_key {
                return match self.state {
                    EngineState::PassThrough => {
                        self.state = EngineState::MacroMode;
                        Action::EnterMacroMode
                    }
                    EngineState::MacroMode => {
                        self.state = EngineState::PassThrough;
                        Action::LeaveMacroMode
                    }
                };
            }
            return match self.state {
                EngineState::PassThrough => Action::Forward,
                EngineState::MacroMode => Action::Suppress,
            };
        }

        match self.state {
            EngineState::PassThrough => Action::Forward,
            EngineState::MacroMode => match self.macros.get(&event.key) {
                Some(sequence) => Action::Emit(sequence),
                None => {
                    debug!("unbound key {:?}", event.key);
                    Action::Suppress
                }
            },
        }
    }

    /// Back out a transition into macro mode whose grab failed, so the
    /// mode state stays consistent with the device and a later toggle
    /// retries the grab.
    pub fn revert_to_pass_through(&mut self) {
        self.state = EngineState::PassThrough;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MODE_KEY: Key = Key::KEY_CAPSLOCK;

    fn press(key: Key) -> KeyEvent {
        KeyEvent { key, press: true }
    }

    fn release(key: Key) -> KeyEvent {
        KeyEvent { key, press: false }
    }

    fn table() -> Rc<MacroTable> {
        let mut macros = HashMap::new();
        macros.insert(
            Key::KEY_S,
            vec![
                MacroAction { key: Key::KEY_A, press: true },
                MacroAction { key: Key::KEY_A, press: false },
                MacroAction { key: Key::KEY_B, press: true },
                MacroAction { key: Key::KEY_B, press: false },
            ],
        );
        Rc::new(macros)
    }

    fn engine() -> Engine {
        Engine::new(MODE_KEY, table())
    }

    fn enter_macro_mode(engine: &mut Engine) {
        assert_eq!(engine.handle(release(MODE_KEY)), Action::EnterMacroMode);
    }

    #[test]
    fn test_pass_through_identity() {
        let mut engine = engine();
        for key in [Key::KEY_A, Key::KEY_S, Key::KEY_LEFTSHIFT] {
            assert_eq!(engine.handle(press(key)), Action::Forward);
            assert_eq!(engine.handle(release(key)), Action::Forward);
        }
        assert_eq!(engine.state(), EngineState::PassThrough);
    }

    #[test]
    fn test_mode_key_release_toggles() {
        let mut engine = engine();
        assert_eq!(engine.handle(release(MODE_KEY)), Action::EnterMacroMode);
        assert_eq!(engine.state(), EngineState::MacroMode);
        assert_eq!(engine.handle(release(MODE_KEY)), Action::LeaveMacroMode);
        assert_eq!(engine.state(), EngineState::PassThrough);
    }

    #[test]
    fn test_mode_key_press_does_not_toggle() {
        let mut engine = engine();
        assert_eq!(engine.handle(press(MODE_KEY)), Action::Forward);
        assert_eq!(engine.state(), EngineState::PassThrough);
    }

    #[test]
    fn test_toggle_is_edge_triggered() {
        // Two full toggles yield exactly one grab and one ungrab each,
        // never a doubled grab.
        let mut engine = engine();
        let mut grabs = 0;
        let mut ungrabs = 0;
        for _ in 0..2 {
            match engine.handle(release(MODE_KEY)) {
                Action::EnterMacroMode => grabs += 1,
                Action::LeaveMacroMode => ungrabs += 1,
                other => panic!("unexpected action {other:?}"),
            }
        }
        assert_eq!((grabs, ungrabs), (1, 1));
        assert_eq!(engine.state(), EngineState::PassThrough);
    }

    #[test]
    fn test_bound_press_emits_sequence() {
        let mut engine = engine();
        enter_macro_mode(&mut engine);
        match engine.handle(press(Key::KEY_S)) {
            Action::Emit(seq) => {
                let expected = [
                    (Key::KEY_A, true),
                    (Key::KEY_A, false),
                    (Key::KEY_B, true),
                    (Key::KEY_B, false),
                ];
                assert_eq!(seq.len(), expected.len());
                for (action, (key, press)) in seq.iter().zip(expected) {
                    assert_eq!((action.key, action.press), (key, press));
                }
            }
            other => panic!("expected macro emission, got {other:?}"),
        }
    }

    #[test]
    fn test_unbound_press_is_suppressed() {
        let mut engine = engine();
        enter_macro_mode(&mut engine);
        assert_eq!(engine.handle(press(Key::KEY_Q)), Action::Suppress);
        assert_eq!(engine.state(), EngineState::MacroMode);
    }

    #[test]
    fn test_releases_suppressed_in_macro_mode() {
        let mut engine = engine();
        enter_macro_mode(&mut engine);
        assert_eq!(engine.handle(release(Key::KEY_S)), Action::Suppress);
        assert_eq!(engine.handle(release(Key::KEY_Q)), Action::Suppress);
    }

    #[test]
    fn test_escape_release_exits_macro_mode() {
        let mut engine = engine();
        enter_macro_mode(&mut engine);
        assert_eq!(engine.handle(release(ESCAPE_KEY)), Action::LeaveMacroMode);
        assert_eq!(engine.state(), EngineState::PassThrough);
    }

    #[test]
    fn test_escape_release_in_pass_through_is_noop() {
        let mut engine = engine();
        assert_eq!(engine.handle(release(ESCAPE_KEY)), Action::Suppress);
        assert_eq!(engine.state(), EngineState::PassThrough);
    }

    #[test]
    fn test_escape_press_never_enters_macro_mode() {
        let mut engine = engine();
        assert_eq!(engine.handle(press(ESCAPE_KEY)), Action::Forward);
        assert_eq!(engine.state(), EngineState::PassThrough);
    }

    #[test]
    fn test_repeat_press_retriggers_macro() {
        // Kernel auto-repeat arrives as another press and replays the
        // macro, matching a held macro key on a real keyboard.
        let mut engine = engine();
        enter_macro_mode(&mut engine);
        assert!(matches!(engine.handle(press(Key::KEY_S)), Action::Emit(_)));
        assert!(matches!(engine.handle(press(Key::KEY_S)), Action::Emit(_)));
    }

    #[test]
    fn test_revert_after_failed_grab() {
        let mut engine = engine();
        enter_macro_mode(&mut engine);
        engine.revert_to_pass_through();
        assert_eq!(engine.state(), EngineState::PassThrough);
        // The next toggle retries the transition.
        assert_eq!(engine.handle(release(MODE_KEY)), Action::EnterMacroMode);
    }

    #[test]
    fn test_end_to_end_scenario() {
        // press+release CAPSLOCK, press S, release S, press+release CAPSLOCK
        let mut engine = engine();
        assert_eq!(engine.handle(press(MODE_KEY)), Action::Forward);
        assert_eq!(engine.handle(release(MODE_KEY)), Action::EnterMacroMode);
        assert!(matches!(engine.handle(press(Key::KEY_S)), Action::Emit(_)));
        assert_eq!(engine.handle(release(Key::KEY_S)), Action::Suppress);
        assert_eq!(engine.handle(press(MODE_KEY)), Action::Suppress);
        assert_eq!(engine.handle(release(MODE_KEY)), Action::LeaveMacroMode);
        assert_eq!(engine.state(), EngineState::PassThrough);
    }
}
