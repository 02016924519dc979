//! Configuration file management
//!
//! Loads the ini-style config file and builds the macro table.
//! Default config path: ~/.config/ggkbddrc
//!
//! ```ini
//! [General]
//! ModeKey = CAPSLOCK
//!
//! [Macros]
//! S = A B
//! X = +A -A
//! ```
//!
//! Key names are the kernel names without the `KEY_` prefix and are
//! case-sensitive. A macro value is a space-separated token list: `NAME`
//! taps the key (press then release), `+NAME` presses only, `-NAME`
//! releases only. All names are resolved once at load time.

use evdev::Key;
use ini::Ini;
use log::debug;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// One atomic output step of a macro.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacroAction {
    pub key: Key,
    /// true = press, false = release
    pub press: bool,
}

/// Trigger key -> replacement sequence. Built once, never mutated.
pub type MacroTable = HashMap<Key, Vec<MacroAction>>;

/// Errors raised while loading the config file. All of them are fatal
/// before any device is opened.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing config file {}", .0.display())]
    MissingFile(PathBuf),
    #[error("failed to read {}: {}", .path.display(), .source)]
    Read {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },
    #[error("config section [{0}] is missing")]
    MissingSection(&'static str),
    #[error("missing entry ModeKey in [General]")]
    MissingModeKey,
    #[error("unable to map key {0}")]
    UnknownKey(String),
    #[error("macro for {0} has no actions")]
    EmptyMacro(String),
    #[error("ModeKey must not be ESC, ESC always leaves macro mode")]
    EscAsModeKey,
}

/// Loaded daemon settings
#[derive(Debug, Clone)]
pub struct Config {
    /// Key whose release toggles macro mode
    pub mode_key: Key,
    /// Macro table consumed read-only by the engines
    pub macros: MacroTable,
}

impl Config {
    /// Load and validate the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::MissingFile(path.to_path_buf()));
        }
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config = Self::from_ini(&ini)?;
        debug!(
            "config loaded from {}: mode key {:?}, {} macro(s)",
            path.display(),
            config.mode_key,
            config.macros.len()
        );
        Ok(config)
    }

    /// Default config path when --config is not given.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("ggkbddrc"))
            .unwrap_or_else(|| PathBuf::from("ggkbddrc"))
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let general = ini
            .section(Some("General"))
            .ok_or(ConfigError::MissingSection("General"))?;
        let entry = general.get("ModeKey").ok_or(ConfigError::MissingModeKey)?;
        let mode_key = resolve_key(entry)?;
        if mode_key == Key::KEY_ESC {
            return Err(ConfigError::EscAsModeKey);
        }

        let section = ini
            .section(Some("Macros"))
            .ok_or(ConfigError::MissingSection("Macros"))?;
        let mut macros = MacroTable::new();
        for (name, value) in section.iter() {
            let trigger = resolve_key(name)?;
            macros.insert(trigger, parse_macro(name, value)?);
        }

        Ok(Self { mode_key, macros })
    }
}

/// Resolve a config key name ("CAPSLOCK") to its kernel key code.
/// Resolution is eager, nothing is looked up at event-processing time.
pub fn resolve_key(name: &str) -> Result<Key, ConfigError> {
    Key::from_str(&format!("KEY_{name}")).map_err(|_| ConfigError::UnknownKey(name.to_string()))
}

/// Parse one macro value ("A +B -B") into its action sequence.
fn parse_macro(trigger: &str, value: &str) -> Result<Vec<MacroAction>, ConfigError> {
    let mut actions = Vec::new();
    for token in value.split_whitespace() {
        let (name, press, release) = if let Some(rest) = token.strip_prefix('+') {
            (rest, true, false)
        } else if let Some(rest) = token.strip_prefix('-') {
            (rest, false, true)
        } else {
            (token, true, true)
        };
        let key = resolve_key(name)?;
        if press {
            actions.push(MacroAction { key, press: true });
        }
        if release {
            actions.push(MacroAction { key, press: false });
        }
    }
    if actions.is_empty() {
        return Err(ConfigError::EmptyMacro(trigger.to_string()));
    }
    Ok(actions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_str(content: &str) -> Result<Config, ConfigError> {
        let ini = Ini::load_from_str(content).expect("test config must parse");
        Config::from_ini(&ini)
    }

    #[test]
    fn test_resolve_key() {
        assert_eq!(resolve_key("A").unwrap(), Key::KEY_A);
        assert_eq!(resolve_key("CAPSLOCK").unwrap(), Key::KEY_CAPSLOCK);
        assert!(matches!(
            resolve_key("NOTAKEY"),
            Err(ConfigError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_key_names_are_case_sensitive() {
        assert!(resolve_key("capslock").is_err());
    }

    #[test]
    fn test_tap_token_expands_to_press_release() {
        let config = load_str("[General]\nModeKey = CAPSLOCK\n\n[Macros]\nS = A B\n").unwrap();
        assert_eq!(config.mode_key, Key::KEY_CAPSLOCK);
        let seq = &config.macros[&Key::KEY_S];
        assert_eq!(
            seq.as_slice(),
            &[
                MacroAction { key: Key::KEY_A, press: true },
                MacroAction { key: Key::KEY_A, press: false },
                MacroAction { key: Key::KEY_B, press: true },
                MacroAction { key: Key::KEY_B, press: false },
            ]
        );
    }

    #[test]
    fn test_prefixed_tokens_split_press_and_release() {
        let config = load_str("[General]\nModeKey = CAPSLOCK\n\n[Macros]\nX = +A -A\n").unwrap();
        let seq = &config.macros[&Key::KEY_X];
        assert_eq!(
            seq.as_slice(),
            &[
                MacroAction { key: Key::KEY_A, press: true },
                MacroAction { key: Key::KEY_A, press: false },
            ]
        );
    }

    #[test]
    fn test_lone_press_token() {
        let config = load_str("[General]\nModeKey = CAPSLOCK\n\n[Macros]\nX = +A\n").unwrap();
        let seq = &config.macros[&Key::KEY_X];
        assert_eq!(seq.as_slice(), &[MacroAction { key: Key::KEY_A, press: true }]);
    }

    #[test]
    fn test_doubled_spaces_do_not_add_actions() {
        let config = load_str("[General]\nModeKey = CAPSLOCK\n\n[Macros]\nS = A  B\n").unwrap();
        assert_eq!(config.macros[&Key::KEY_S].len(), 4);
    }

    #[test]
    fn test_unresolvable_names_fail() {
        assert!(matches!(
            load_str("[General]\nModeKey = BOGUS\n\n[Macros]\nS = A\n"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            load_str("[General]\nModeKey = CAPSLOCK\n\n[Macros]\nBOGUS = A\n"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            load_str("[General]\nModeKey = CAPSLOCK\n\n[Macros]\nS = BOGUS\n"),
            Err(ConfigError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_missing_sections_fail() {
        assert!(matches!(
            load_str("[Macros]\nS = A\n"),
            Err(ConfigError::MissingSection("General"))
        ));
        assert!(matches!(
            load_str("[General]\nModeKey = CAPSLOCK\n"),
            Err(ConfigError::MissingSection("Macros"))
        ));
    }

    #[test]
    fn test_missing_mode_key_fails() {
        assert!(matches!(
            load_str("[General]\n\n[Macros]\nS = A\n"),
            Err(ConfigError::MissingModeKey)
        ));
    }

    #[test]
    fn test_esc_mode_key_rejected() {
        assert!(matches!(
            load_str("[General]\nModeKey = ESC\n\n[Macros]\nS = A\n"),
            Err(ConfigError::EscAsModeKey)
        ));
    }

    #[test]
    fn test_empty_macro_value_fails() {
        assert!(matches!(
            load_str("[General]\nModeKey = CAPSLOCK\n\n[Macros]\nS =\n"),
            Err(ConfigError::EmptyMacro(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Path::new("/nonexistent/ggkbddrc")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile(_)));
    }
}
