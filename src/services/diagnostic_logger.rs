//! Diagnostic-aware logging.
//!
//! `init_logging` installs the `env_logger` backend once at startup. Components
//! never read a global debug flag; each one receives a `Diagnostics` handle at
//! construction that carries the configured verbosity and forwards to `log`.
//! When debug is off, only WARN and ERROR lines are emitted.

use log::{Level, LevelFilter};
use std::fmt::Display;
use std::sync::{Arc, Mutex};

/// Initialize the logging system.
/// Call this once at application startup.
pub fn init_logging(debug: bool) {
    let _ = env_logger::Builder::new()
        .filter_level(level_for(debug))
        .parse_default_env()
        .format_timestamp_millis()
        .format_module_path(true)
        .try_init();
}

fn level_for(debug: bool) -> LevelFilter {
    if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    }
}

/// Logger handle injected into every watch component.
#[derive(Clone)]
pub struct Diagnostics {
    level: LevelFilter,
    captured: Option<Arc<Mutex<Vec<String>>>>,
}

impl Diagnostics {
    pub fn new(level: LevelFilter) -> Self {
        Self {
            level,
            captured: None,
        }
    }

    pub fn from_debug_flag(debug: bool) -> Self {
        Self::new(level_for(debug))
    }

    /// Keeps every emitted line in memory as well, for inspection.
    pub fn capturing(level: LevelFilter) -> Self {
        Self {
            level,
            captured: Some(Arc::new(Mutex::new(Vec::new()))),
        }
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    pub fn enabled(&self, level: Level) -> bool {
        level <= self.level
    }

    pub fn log(&self, level: Level, tag: &str, message: impl Display) {
        if !self.enabled(level) {
            return;
        }
        let line = format!("[{}] {}", tag, message);
        if let Some(captured) = &self.captured {
            if let Ok(mut lines) = captured.lock() {
                lines.push(line.clone());
            }
        }
        log::log!(level, "{}", line);
    }

    pub fn debug(&self, tag: &str, message: impl Display) {
        self.log(Level::Debug, tag, message);
    }

    pub fn info(&self, tag: &str, message: impl Display) {
        self.log(Level::Info, tag, message);
    }

    pub fn warn(&self, tag: &str, message: impl Display) {
        self.log(Level::Warn, tag, message);
    }

    pub fn captured_lines(&self) -> Vec<String> {
        self.captured
            .as_ref()
            .and_then(|c| c.lock().ok().map(|lines| lines.clone()))
            .unwrap_or_default()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(LevelFilter::Warn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_lines_hidden_when_diagnostics_off() {
        let diagnostics = Diagnostics::capturing(LevelFilter::Warn);
        diagnostics.debug("LIVENESS", "probe via api");
        diagnostics.warn("SESSION", "browser launch failed");
        assert_eq!(
            diagnostics.captured_lines(),
            vec!["[SESSION] browser launch failed".to_string()]
        );
    }

    #[test]
    fn test_debug_flag_maps_to_level() {
        assert_eq!(Diagnostics::from_debug_flag(true).level(), LevelFilter::Debug);
        assert_eq!(Diagnostics::from_debug_flag(false).level(), LevelFilter::Warn);
        assert!(Diagnostics::from_debug_flag(true).enabled(Level::Info));
    }
}
