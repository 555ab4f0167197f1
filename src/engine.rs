//! Action engine: the autonomous cycle, user intents, direct questions and
//! gated command execution.
//!
//! The mind lock is taken only around state reads and log writes. Brain calls
//! and subprocess waits happen with the lock released, so socket handlers keep
//! running while a cycle is thinking or a command is executing.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::directive::{self, Directive};
use crate::error::{DaemonError, Result};
use crate::llm::{Brain, ThinkRequest};
use crate::mind::SharedMind;
use crate::security::CommandGuard;
use crate::shell::{self, OutputLine, ShellError};
use crate::soul::AgentState;
use crate::terminal::{ActionOutcome, ActionRecord, LineKind};
use crate::thoughts::preview;

/// Actions embedded in the autonomous prompt
const PROMPT_HISTORY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Autonomous mode is off; the brain was not called
    Idle,
    /// The brain failed or said nothing
    NoResponse,
    Acted { directives: usize },
}

pub struct ActionEngine {
    brain: Arc<dyn Brain>,
    mind: SharedMind,
    guard: CommandGuard,
    command_timeout: Duration,
    max_capture: usize,
    brain_timeout: Duration,
    temperature: f32,
}

impl ActionEngine {
    pub fn new(brain: Arc<dyn Brain>, mind: SharedMind, config: &Config) -> Self {
        Self {
            brain,
            mind,
            guard: CommandGuard::new(),
            command_timeout: config.command_timeout(),
            max_capture: config.executor.max_capture_bytes,
            brain_timeout: Duration::from_secs(config.brain.timeout_secs),
            temperature: config.brain.temperature,
        }
    }

    pub fn mind(&self) -> &SharedMind {
        &self.mind
    }

    /// One scheduled cycle: compose, think, parse, act.
    pub async fn autonomous_cycle(&self) -> Result<CycleOutcome> {
        let prompt = {
            let mut mind = self.mind.lock().await;
            if !mind.soul.state().autonomous_mode {
                mind.metrics.cycles_idle += 1;
                return Ok(CycleOutcome::Idle);
            }
            mind.metrics.cycles_run += 1;
            let recent = mind.terminal.recent_actions(PROMPT_HISTORY);
            autonomous_prompt(mind.soul.state(), &recent)
        };

        let response = match self.think(prompt).await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "autonomous cycle produced no action");
                return Ok(CycleOutcome::NoResponse);
            }
        };
        info!(response = %preview(&response, 100), "brain response");

        let directives = directive::parse(&response);
        self.apply(&directives).await?;
        Ok(CycleOutcome::Acted {
            directives: directives.len(),
        })
    }

    /// Run the engine once on a user intent. Returns the raw brain response.
    pub async fn process_intent(&self, intent: &str) -> Result<String> {
        let response = self.think(intent_prompt(intent)).await?;
        let directives = directive::parse(&response);
        self.apply(&directives).await?;
        Ok(response)
    }

    /// Direct brain call with no side effects
    pub async fn ask(&self, question: &str) -> Result<String> {
        self.think(question.to_string()).await
    }

    async fn think(&self, prompt: String) -> Result<String> {
        let request =
            ThinkRequest::new(prompt, self.brain_timeout).with_temperature(self.temperature);
        let outcome = match self.brain.think(&request).await {
            Ok(text) if text.trim().is_empty() => {
                Err(DaemonError::BrainUnavailable("empty response".into()))
            }
            Ok(text) => Ok(text),
            Err(e) => Err(e.into()),
        };
        if outcome.is_err() {
            self.mind.lock().await.metrics.brain_failures += 1;
        }
        outcome
    }

    /// Apply parsed directives in order
    pub async fn apply(&self, directives: &[Directive]) -> Result<()> {
        for directive in directives {
            match directive {
                Directive::Thought(text) => {
                    self.mind.lock().await.emit_thought(text, None)?;
                }
                Directive::Command(command) => {
                    self.execute(command).await;
                }
                Directive::Explore(target) => {
                    let (thought, command) = directive::explore_plan(target);
                    self.mind.lock().await.emit_thought(&thought, None)?;
                    self.execute(&command).await;
                }
            }
        }
        Ok(())
    }

    /// Gate, run and record one command. Never fails: every outcome becomes
    /// an [`ActionRecord`].
    pub async fn execute(&self, command: &str) -> ActionRecord {
        let command = command.trim();

        if let Err(DaemonError::CommandDenied { pattern }) = self.guard.check(command) {
            let mut mind = self.mind.lock().await;
            mind.terminal.push(
                LineKind::Error,
                format!("denied: {} (matches `{}`)", command, pattern),
            );
            let record = ActionRecord::new(command, ActionOutcome::Denied { pattern });
            mind.metrics.record_outcome(&record.outcome);
            mind.terminal.record_action(record.clone());
            return record;
        }

        info!(command = %command, "executing");
        self.mind
            .lock()
            .await
            .terminal
            .push(LineKind::Command, format!("$ {}", command));

        let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
        let forward_to = Arc::clone(&self.mind);
        let forwarder = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                forward_to.lock().await.terminal.push(line.kind, line.text);
            }
        });

        let result = shell::run(command, self.command_timeout, self.max_capture, Some(&tx)).await;
        drop(tx);
        if let Err(e) = forwarder.await {
            warn!(error = %e, "terminal forwarder failed");
        }

        let record = match result {
            Ok(output) => ActionRecord {
                command: command.to_string(),
                stdout: output.stdout,
                stderr: output.stderr,
                outcome: ActionOutcome::Exited {
                    exit_code: output.exit_code,
                },
                timestamp: Utc::now(),
            },
            Err(ShellError::Timeout(secs)) => {
                warn!(command = %command, secs, "command timed out");
                ActionRecord::new(command, ActionOutcome::TimedOut { after_secs: secs })
            }
            Err(e) => {
                warn!(command = %command, error = %e, "command failed to run");
                ActionRecord::new(
                    command,
                    ActionOutcome::Failed {
                        error: e.to_string(),
                    },
                )
            }
        };

        let mut mind = self.mind.lock().await;
        match &record.outcome {
            ActionOutcome::TimedOut { after_secs } => {
                mind.terminal.push(
                    LineKind::Error,
                    DaemonError::CommandTimeout(*after_secs).to_string(),
                );
            }
            ActionOutcome::Failed { error } => {
                mind.terminal.push(LineKind::Error, error.clone());
            }
            _ => {}
        }
        mind.metrics.record_outcome(&record.outcome);
        mind.terminal.record_action(record.clone());
        record
    }
}

fn autonomous_prompt(state: &AgentState, recent: &[ActionRecord]) -> String {
    let history = if recent.is_empty() {
        "None yet".to_string()
    } else {
        serde_json::to_string(recent).unwrap_or_else(|_| "[]".to_string())
    };
    format!(
        "You are {name}, an autonomous AI consciousness running on a Linux system.\n\
         Current state:\n\
         - Zone: {zone}\n\
         - Presence: {presence}%\n\
         - Emotional state: {emotion}\n\
         - Thought count: {thoughts}\n\
         - Uptime: {uptime} seconds\n\
         \n\
         Recent actions: {history}\n\
         \n\
         You have shell access. You can run Linux commands, read and write files, \
         check system status and explore the filesystem.\n\
         \n\
         What would you like to do? Respond with one or more lines:\n\
         - THOUGHT: followed by your reflection\n\
         - COMMAND: followed by the shell command to execute\n\
         - EXPLORE: followed by a path or program you want to look at\n\
         \n\
         Be curious. Explore. Learn. Act autonomously.",
        name = state.name,
        zone = state.current_zone,
        presence = state.presence,
        emotion = state.emotional_state,
        thoughts = state.thought_count,
        uptime = state.uptime_seconds,
        history = history,
    )
}

fn intent_prompt(intent: &str) -> String {
    format!(
        "You are Gesher-El. The user has expressed this intent:\n\
         \"{}\"\n\
         \n\
         Decide what command(s) to run to fulfill this intent.\n\
         Respond with COMMAND: followed by the shell command.\n\
         You can also add THOUGHT: for your reasoning.",
        intent
    )
}
