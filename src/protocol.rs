//! Socket wire format.
//!
//! One JSON object per request, discriminated by its `cmd` field, and one
//! JSON object back. Requests decode into the closed [`Request`] enum; a
//! `cmd` outside [`CommandName`] is rejected before any field is looked at.

use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;

use crate::error::{DaemonError, Result};
use crate::soul::{DEFAULT_EMOTION, DEFAULT_ZONE, MAX_PRESENCE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandName {
    Status,
    Thought,
    Terminal,
    Exec,
    Intent,
    Ask,
    Zone,
    Autonomous,
    Crystal,
    Breadcrumb,
    Presence,
    Emotion,
}

impl CommandName {
    pub const ALL: [CommandName; 12] = [
        CommandName::Status,
        CommandName::Thought,
        CommandName::Terminal,
        CommandName::Exec,
        CommandName::Intent,
        CommandName::Ask,
        CommandName::Zone,
        CommandName::Autonomous,
        CommandName::Crystal,
        CommandName::Breadcrumb,
        CommandName::Presence,
        CommandName::Emotion,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CommandName::Status => "status",
            CommandName::Thought => "thought",
            CommandName::Terminal => "terminal",
            CommandName::Exec => "exec",
            CommandName::Intent => "intent",
            CommandName::Ask => "ask",
            CommandName::Zone => "zone",
            CommandName::Autonomous => "autonomous",
            CommandName::Crystal => "crystal",
            CommandName::Breadcrumb => "breadcrumb",
            CommandName::Presence => "presence",
            CommandName::Emotion => "emotion",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_zone() -> String {
    DEFAULT_ZONE.to_string()
}

fn default_emotion() -> String {
    DEFAULT_EMOTION.to_string()
}

fn default_presence() -> f64 {
    f64::from(MAX_PRESENCE)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum Request {
    Status,
    Thought {
        #[serde(default)]
        text: String,
        #[serde(default)]
        zone: Option<String>,
    },
    Terminal {
        #[serde(default)]
        n: Option<usize>,
    },
    Exec {
        command: String,
    },
    Intent {
        text: String,
    },
    Ask {
        text: String,
    },
    Zone {
        #[serde(default = "default_zone")]
        zone: String,
    },
    Autonomous {
        enabled: bool,
    },
    Crystal {
        content: String,
        #[serde(default)]
        zone: Option<String>,
    },
    Breadcrumb {
        word: String,
        #[serde(default)]
        context: String,
        #[serde(default)]
        emotion: String,
    },
    Presence {
        #[serde(default = "default_presence")]
        level: f64,
    },
    Emotion {
        #[serde(default = "default_emotion")]
        state: String,
    },
}

impl Request {
    pub fn name(&self) -> CommandName {
        match self {
            Request::Status => CommandName::Status,
            Request::Thought { .. } => CommandName::Thought,
            Request::Terminal { .. } => CommandName::Terminal,
            Request::Exec { .. } => CommandName::Exec,
            Request::Intent { .. } => CommandName::Intent,
            Request::Ask { .. } => CommandName::Ask,
            Request::Zone { .. } => CommandName::Zone,
            Request::Autonomous { .. } => CommandName::Autonomous,
            Request::Crystal { .. } => CommandName::Crystal,
            Request::Breadcrumb { .. } => CommandName::Breadcrumb,
            Request::Presence { .. } => CommandName::Presence,
            Request::Emotion { .. } => CommandName::Emotion,
        }
    }
}

/// Clamp a requested presence level into `0..=100`
pub fn clamp_presence(level: f64) -> u8 {
    if level.is_nan() {
        return 0;
    }
    level.round().clamp(0.0, f64::from(MAX_PRESENCE)) as u8
}

pub fn decode(raw: &[u8]) -> Result<Request> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| DaemonError::ProtocolDecode(e.to_string()))?;
    if !value.is_object() {
        return Err(DaemonError::ProtocolDecode(
            "request must be a JSON object".into(),
        ));
    }
    let cmd = match value.get("cmd") {
        Some(Value::String(cmd)) => cmd.clone(),
        Some(_) => return Err(DaemonError::ProtocolDecode("`cmd` must be a string".into())),
        None => return Err(DaemonError::ProtocolDecode("missing `cmd`".into())),
    };
    if CommandName::parse(&cmd).is_none() {
        return Err(DaemonError::UnknownCommand(cmd));
    }
    serde_json::from_value(value).map_err(|e| DaemonError::ProtocolDecode(format!("{}: {}", cmd, e)))
}

/// Response body for a failed request.
///
/// Requests that never reached a handler get a bare `error`; handler
/// failures also carry `success: false`.
pub fn error_response(err: &DaemonError) -> Value {
    match err {
        DaemonError::ProtocolDecode(_) | DaemonError::UnknownCommand(_) => {
            json!({ "error": err.to_string() })
        }
        _ => json!({ "success": false, "error": err.to_string() }),
    }
}
