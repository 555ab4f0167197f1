//! Thought stream: numbered, timestamped narration of the agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::error::Result;
use crate::fanout::Fanout;
use crate::journal::Journal;
use crate::soul::SoulStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thought {
    pub sequence_number: u64,
    pub text: String,
    pub zone: String,
    pub presence: u8,
    pub emotional_state: String,
    pub timestamp: DateTime<Utc>,
}

pub struct ThoughtStream {
    journal: Journal,
    subscribers: Fanout<Thought>,
}

impl ThoughtStream {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            journal: Journal::new(path),
            subscribers: Fanout::new(),
        }
    }

    pub fn subscribers(&mut self) -> &mut Fanout<Thought> {
        &mut self.subscribers
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Emit a thought. The sequence number is the soul's `thoughtCount` after
    /// it has been incremented and persisted.
    ///
    /// Only a state persistence failure is returned; journal and subscriber
    /// failures are logged.
    pub fn emit(&mut self, soul: &mut SoulStore, text: &str, zone: Option<&str>) -> Result<Thought> {
        let sequence_number = soul.record_thought()?;
        let state = soul.state();
        let thought = Thought {
            sequence_number,
            text: text.to_string(),
            zone: zone.unwrap_or(&state.current_zone).to_string(),
            presence: state.presence,
            emotional_state: state.emotional_state.clone(),
            timestamp: Utc::now(),
        };

        if let Err(e) = self.journal.append(&thought) {
            warn!(path = %self.journal.path().display(), error = %e, "failed to journal thought");
        }
        self.subscribers.publish(&thought);

        info!(number = sequence_number, text = %preview(text, 50), "thought");
        Ok(thought)
    }
}

/// First `max` characters of `text`, with an ellipsis if cut
pub fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
