//! Action/terminal log.
//!
//! Two bounded in-memory rings (terminal lines and action records), each
//! mirrored to an unbounded NDJSON journal on disk. Oldest entries are
//! evicted first once a ring is full.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use tracing::warn;

use crate::fanout::Fanout;
use crate::journal::Journal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Command,
    Stdout,
    Stderr,
    Error,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub text: String,
    pub kind: LineKind,
    pub timestamp: DateTime<Utc>,
}

/// How an attempted command ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Ran to completion. `None` when the process was killed by a signal.
    Exited {
        #[serde(rename = "exitCode")]
        exit_code: Option<i32>,
    },
    /// Blocked by the safety gate, never started
    Denied { pattern: String },
    TimedOut {
        #[serde(rename = "afterSecs")]
        after_secs: u64,
    },
    /// Could not be started or waited on
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    #[serde(flatten)]
    pub outcome: ActionOutcome,
    pub timestamp: DateTime<Utc>,
}

impl ActionRecord {
    pub fn new(command: &str, outcome: ActionOutcome) -> Self {
        Self {
            command: command.to_string(),
            stdout: String::new(),
            stderr: String::new(),
            outcome,
            timestamp: Utc::now(),
        }
    }

    pub fn is_denied(&self) -> bool {
        matches!(self.outcome, ActionOutcome::Denied { .. })
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.outcome {
            ActionOutcome::Exited { exit_code } => exit_code,
            _ => None,
        }
    }
}

pub struct TerminalLog {
    lines: VecDeque<LogLine>,
    capacity: usize,
    actions: VecDeque<ActionRecord>,
    action_capacity: usize,
    line_journal: Journal,
    action_journal: Journal,
    subscribers: Fanout<LogLine>,
}

impl TerminalLog {
    pub fn new(
        capacity: usize,
        action_capacity: usize,
        line_path: impl Into<PathBuf>,
        action_path: impl Into<PathBuf>,
    ) -> Self {
        let capacity = capacity.max(1);
        let action_capacity = action_capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
            actions: VecDeque::with_capacity(action_capacity),
            action_capacity,
            line_journal: Journal::new(line_path),
            action_journal: Journal::new(action_path),
            subscribers: Fanout::new(),
        }
    }

    pub fn subscribers(&mut self) -> &mut Fanout<LogLine> {
        &mut self.subscribers
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Append a line. Never fails: journal and subscriber errors are logged.
    pub fn push(&mut self, kind: LineKind, text: impl Into<String>) -> LogLine {
        let line = LogLine {
            text: text.into(),
            kind,
            timestamp: Utc::now(),
        };

        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.clone());

        if let Err(e) = self.line_journal.append(&line) {
            warn!(path = %self.line_journal.path().display(), error = %e, "failed to journal terminal line");
        }
        self.subscribers.publish(&line);
        line
    }

    /// The `n` most recent lines, oldest first
    pub fn recent(&self, n: usize) -> Vec<LogLine> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }

    pub fn record_action(&mut self, record: ActionRecord) {
        if self.actions.len() == self.action_capacity {
            self.actions.pop_front();
        }
        if let Err(e) = self.action_journal.append(&record) {
            warn!(path = %self.action_journal.path().display(), error = %e, "failed to journal action");
        }
        self.actions.push_back(record);
    }

    /// The `n` most recent action records, oldest first
    pub fn recent_actions(&self, n: usize) -> Vec<ActionRecord> {
        let skip = self.actions.len().saturating_sub(n);
        self.actions.iter().skip(skip).cloned().collect()
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }
}
