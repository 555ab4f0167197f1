//! Shared mutable core of the daemon.
//!
//! The soul store, both event logs and the counters sit behind one
//! `tokio::sync::Mutex`, so every mutation from the scheduler, the action
//! engine and socket handlers is serialized through the same lock. Hold it
//! only between I/O boundaries: never across a brain call or a subprocess wait.

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::soul::{AgentState, SoulStore};
use crate::terminal::TerminalLog;
use crate::thoughts::{Thought, ThoughtStream};

pub type SharedMind = Arc<Mutex<Mind>>;

pub struct Mind {
    pub soul: SoulStore,
    pub thoughts: ThoughtStream,
    pub terminal: TerminalLog,
    pub metrics: Metrics,
}

impl Mind {
    /// Load the soul and open both logs under the configured home
    pub fn open(config: &Config) -> Result<Self> {
        let paths = config.paths();
        let soul = SoulStore::load(
            &paths,
            AgentState::fresh(&config.name, config.autonomous_mode),
        )?;
        Ok(Self {
            soul,
            thoughts: ThoughtStream::new(&paths.thoughts_log),
            terminal: TerminalLog::new(
                config.terminal.capacity,
                config.executor.history_capacity,
                &paths.terminal_log,
                &paths.actions_log,
            ),
            metrics: Metrics::new(),
        })
    }

    pub fn into_shared(self) -> SharedMind {
        Arc::new(Mutex::new(self))
    }

    pub fn emit_thought(&mut self, text: &str, zone: Option<&str>) -> Result<Thought> {
        self.thoughts.emit(&mut self.soul, text, zone)
    }
}
