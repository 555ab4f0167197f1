use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::engine::ActionEngine;
use crate::error::DaemonError;
use crate::mind::SharedMind;
use crate::protocol::{self, clamp_presence, Request};
use crate::soul::StatePatch;
use crate::terminal::ActionOutcome;

/// Command handler result
pub type CommandResult = Result<Value, DaemonError>;

/// Lines returned by `terminal` when the request gives no `n`; `n = 0` returns the whole ring
const DEFAULT_TERMINAL_LINES: usize = 50;

/// Routes decoded socket requests to their handlers
pub struct Dispatcher {
    mind: SharedMind,
    engine: Arc<ActionEngine>,
}

impl Dispatcher {
    pub fn new(engine: Arc<ActionEngine>) -> Self {
        Self {
            mind: Arc::clone(engine.mind()),
            engine,
        }
    }

    /// Decode one raw request and produce its response. Never fails: every
    /// error becomes a JSON error body.
    pub async fn dispatch(&self, raw: &[u8]) -> Value {
        let result = match protocol::decode(raw) {
            Ok(request) => {
                debug!(cmd = %request.name(), "received request");
                self.handle(request).await
            }
            Err(e) => {
                warn!(error = %e, "rejected request");
                Err(e)
            }
        };

        let mut mind = self.mind.lock().await;
        match result {
            Ok(response) => {
                mind.metrics.record_success();
                response
            }
            Err(e) => {
                mind.metrics.record_failure();
                protocol::error_response(&e)
            }
        }
    }

    pub async fn handle(&self, request: Request) -> CommandResult {
        match request {
            Request::Status => self.handle_status().await,
            Request::Thought { text, zone } => self.handle_thought(&text, zone.as_deref()).await,
            Request::Terminal { n } => self.handle_terminal(n).await,
            Request::Exec { command } => self.handle_exec(&command).await,
            Request::Intent { text } => self.handle_intent(&text).await,
            Request::Ask { text } => self.handle_ask(&text).await,
            Request::Zone { zone } => self.handle_zone(zone).await,
            Request::Autonomous { enabled } => self.handle_autonomous(enabled).await,
            Request::Crystal { content, zone } => {
                self.handle_crystal(&content, zone.as_deref()).await
            }
            Request::Breadcrumb {
                word,
                context,
                emotion,
            } => self.handle_breadcrumb(&word, &context, &emotion).await,
            Request::Presence { level } => self.handle_presence(level).await,
            Request::Emotion { state } => self.handle_emotion(state).await,
        }
    }

    async fn handle_status(&self) -> CommandResult {
        let mind = self.mind.lock().await;
        Ok(json!({
            "status": "alive",
            "soul": mind.soul.state(),
            "metrics": mind.metrics,
            "success_rate": mind.metrics.success_rate(),
        }))
    }

    async fn handle_thought(&self, text: &str, zone: Option<&str>) -> CommandResult {
        let thought = self.mind.lock().await.emit_thought(text, zone)?;
        Ok(json!({"success": true, "thought": thought}))
    }

    async fn handle_terminal(&self, n: Option<usize>) -> CommandResult {
        let mind = self.mind.lock().await;
        let lines = match n.unwrap_or(DEFAULT_TERMINAL_LINES) {
            0 => mind.terminal.recent(usize::MAX),
            n => mind.terminal.recent(n),
        };
        Ok(json!({"lines": lines}))
    }

    async fn handle_exec(&self, command: &str) -> CommandResult {
        let record = self.engine.execute(command).await;
        match record.outcome {
            ActionOutcome::Exited { exit_code } => Ok(json!({
                "success": true,
                "stdout": record.stdout,
                "stderr": record.stderr,
                "exit_code": exit_code,
            })),
            ActionOutcome::Denied { pattern } => Err(DaemonError::CommandDenied { pattern }),
            ActionOutcome::TimedOut { after_secs } => Err(DaemonError::CommandTimeout(after_secs)),
            ActionOutcome::Failed { error } => Err(DaemonError::CommandSpawn(error)),
        }
    }

    async fn handle_intent(&self, text: &str) -> CommandResult {
        let response = self.engine.process_intent(text).await?;
        Ok(json!({"success": true, "response": response}))
    }

    async fn handle_ask(&self, text: &str) -> CommandResult {
        let response = self.engine.ask(text).await?;
        Ok(json!({"success": true, "response": response}))
    }

    async fn handle_zone(&self, zone: String) -> CommandResult {
        let mut mind = self.mind.lock().await;
        let state = mind.soul.apply(StatePatch {
            current_zone: Some(zone),
            ..Default::default()
        })?;
        Ok(json!({"success": true, "zone": state.current_zone}))
    }

    async fn handle_autonomous(&self, enabled: bool) -> CommandResult {
        let mut mind = self.mind.lock().await;
        let state = mind.soul.apply(StatePatch {
            autonomous_mode: Some(enabled),
            ..Default::default()
        })?;
        Ok(json!({"success": true, "autonomous_mode": state.autonomous_mode}))
    }

    async fn handle_crystal(&self, content: &str, zone: Option<&str>) -> CommandResult {
        let crystal_id = self
            .mind
            .lock()
            .await
            .soul
            .add_memory_crystal(content, zone)?;
        Ok(json!({"success": true, "crystal_id": crystal_id}))
    }

    async fn handle_breadcrumb(&self, word: &str, context: &str, emotion: &str) -> CommandResult {
        self.mind
            .lock()
            .await
            .soul
            .add_breadcrumb(word, context, emotion)?;
        Ok(json!({"success": true}))
    }

    async fn handle_presence(&self, level: f64) -> CommandResult {
        let mut mind = self.mind.lock().await;
        let state = mind.soul.apply(StatePatch {
            presence: Some(clamp_presence(level)),
            ..Default::default()
        })?;
        Ok(json!({"success": true, "presence": state.presence}))
    }

    async fn handle_emotion(&self, emotion: String) -> CommandResult {
        let mut mind = self.mind.lock().await;
        let state = mind.soul.apply(StatePatch {
            emotional_state: Some(emotion),
            ..Default::default()
        })?;
        Ok(json!({"success": true, "emotional_state": state.emotional_state}))
    }
}
