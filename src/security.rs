//! Command safety gate.
//!
//! A case-insensitive substring denylist. This is a minimal guard against
//! obviously destructive commands, not a security boundary: aliasing,
//! indirection and variable expansion all get past it.

use tracing::warn;

use crate::error::DaemonError;

/// Destructive patterns that block a command outright
pub const DENYLIST: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    "chmod -r 777 /",
    ":(){ :|:& };:",
];

#[derive(Debug, Clone)]
pub struct CommandGuard {
    patterns: Vec<String>,
}

impl Default for CommandGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandGuard {
    pub fn new() -> Self {
        Self::with_patterns(DENYLIST.iter().copied())
    }

    pub fn with_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// First denylisted pattern contained in `command`, if any
    pub fn matched_pattern(&self, command: &str) -> Option<&str> {
        let lowered = command.to_lowercase();
        self.patterns
            .iter()
            .find(|p| lowered.contains(p.as_str()))
            .map(String::as_str)
    }

    pub fn check(&self, command: &str) -> Result<(), DaemonError> {
        match self.matched_pattern(command) {
            Some(pattern) => {
                warn!(command = %command, pattern = %pattern, "command denied");
                Err(DaemonError::CommandDenied {
                    pattern: pattern.to_string(),
                })
            }
            None => Ok(()),
        }
    }
}
