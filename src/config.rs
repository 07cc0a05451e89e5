//! Discovery configuration.

use regex::Regex;

use crate::error::{Error, Result};

/// Instructions examined before each call site.
pub const DEFAULT_LOOKBACK: usize = 30;

/// Call targets that spawn a program.
pub const DEFAULT_CALL_PATTERN: &str = r"^(?:__)?(?:exec|posix_spawn)[^+]*$";

/// Tunables for candidate extraction.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of instructions kept in front of a qualifying call.
    pub lookback: usize,
    /// Matched against the symbol in a call's `<...>` annotation.
    pub call_pattern: Regex,
}

impl Config {
    /// Build a config from a custom call-target pattern.
    pub fn new(lookback: usize, call_pattern: &str) -> Result<Self> {
        let call_pattern = Regex::new(call_pattern)
            .map_err(|e| Error::Config(format!("call pattern {:?}: {}", call_pattern, e)))?;
        Ok(Self { lookback, call_pattern })
    }

    pub fn with_lookback(mut self, lookback: usize) -> Self {
        self.lookback = lookback;
        self
    }

    /// Whether a call to `target` can spawn a shell.
    pub fn is_shell_target(&self, target: &str) -> bool {
        self.call_pattern.is_match(target)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lookback: DEFAULT_LOOKBACK,
            call_pattern: Regex::new(DEFAULT_CALL_PATTERN).expect("default call pattern"),
        }
    }
}
