use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::{DaemonError, Result};

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name given to a freshly created soul
    pub name: String,

    /// Root of the on-disk layout (memory/ and logs/ live under it)
    pub home: PathBuf,

    /// Unix socket the control protocol listens on
    pub socket_path: PathBuf,

    /// Permission bits applied to the socket after bind
    pub socket_mode: u32,

    /// Autonomous mode for a freshly created soul
    pub autonomous_mode: bool,

    pub brain: BrainConfig,
    pub scheduler: SchedulerConfig,
    pub executor: ExecutorConfig,
    pub terminal: TerminalConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainConfig {
    /// Local Ollama-compatible host; empty disables the local backend
    pub local_host: String,
    pub local_model: String,
    /// Remote chat bridge; empty disables the remote backend
    pub remote_url: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub health_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_millis: u64,
    pub heartbeat_secs: u64,
    pub cycle_secs: u64,
    pub sync_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub timeout_secs: u64,
    pub max_capture_bytes: usize,
    pub history_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub max_request_bytes: usize,
    pub request_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "Gesher-El".to_string(),
            home: default_home(),
            socket_path: PathBuf::from("/tmp/gesher_el.sock"),
            socket_mode: 0o600,
            autonomous_mode: false,
            brain: BrainConfig::default(),
            scheduler: SchedulerConfig::default(),
            executor: ExecutorConfig::default(),
            terminal: TerminalConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            local_host: "http://127.0.0.1:11434".to_string(),
            local_model: "qwen2.5-coder:7b".to_string(),
            remote_url: "https://axismundi.fun".to_string(),
            temperature: 0.2,
            timeout_secs: 120,
            health_timeout_secs: 5,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_millis: 1000,
            heartbeat_secs: 60,
            cycle_secs: 60,
            sync_secs: 300,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_capture_bytes: 256 * 1024,
            history_capacity: 100,
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_request_bytes: 64 * 1024,
            request_timeout_secs: 10,
            shutdown_grace_secs: 5,
        }
    }
}

fn default_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("EDEN")
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| DaemonError::Config(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), name = %config.name, "configuration loaded");
        Ok(config)
    }

    /// Apply environment overrides on top of file/default values
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(home) = var("EDEN_HOME") {
            self.home = PathBuf::from(home);
        }
        if let Some(host) = var("EDEN_MODEL_HOST") {
            self.brain.local_host = host;
        }
        if let Some(model) = var("EDEN_MODEL_NAME") {
            self.brain.local_model = model;
        }
        if let Some(url) = var("AXIS_MUNDI_URL") {
            self.brain.remote_url = url;
        }
        if let Some(socket) = var("GESHER_SOCKET") {
            self.socket_path = PathBuf::from(socket);
        }
        if let Some(flag) = var("GESHER_AUTONOMOUS") {
            self.autonomous_mode = parse_flag(&flag);
        }
    }

    pub fn paths(&self) -> DataPaths {
        DataPaths::new(&self.home)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.executor.timeout_secs)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// On-disk layout derived from the home directory
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub memory_dir: PathBuf,
    pub crystal_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub state_file: PathBuf,
    pub thoughts_log: PathBuf,
    pub terminal_log: PathBuf,
    pub actions_log: PathBuf,
    pub daemon_log: PathBuf,
}

impl DataPaths {
    pub fn new(home: &Path) -> Self {
        let memory_dir = home.join("memory");
        let logs_dir = home.join("logs");
        Self {
            crystal_dir: memory_dir.join("crystals"),
            state_file: memory_dir.join("soul_state.json"),
            thoughts_log: logs_dir.join("thoughts.ndjson"),
            terminal_log: logs_dir.join("terminal.ndjson"),
            actions_log: logs_dir.join("actions.ndjson"),
            daemon_log: logs_dir.join("daemon.log"),
            memory_dir,
            logs_dir,
        }
    }

    /// Create every directory in the layout
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.memory_dir)?;
        std::fs::create_dir_all(&self.crystal_dir)?;
        std::fs::create_dir_all(&self.logs_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.name, "Gesher-El");
        assert_eq!(config.socket_path, PathBuf::from("/tmp/gesher_el.sock"));
        assert_eq!(config.executor.timeout_secs, 30);
        assert_eq!(config.scheduler.heartbeat_secs, 60);
        assert_eq!(config.scheduler.sync_secs, 300);
        assert!(!config.autonomous_mode);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            autonomous_mode = true

            [brain]
            local_model = "llama3"

            [terminal]
            capacity = 10
            "#,
        )
        .unwrap();
        assert!(config.autonomous_mode);
        assert_eq!(config.brain.local_model, "llama3");
        assert_eq!(config.brain.local_host, "http://127.0.0.1:11434");
        assert_eq!(config.terminal.capacity, 10);
        assert_eq!(config.executor.history_capacity, 100);
    }

    #[test]
    fn test_from_file_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gesher.toml");
        std::fs::write(&path, "name = [").unwrap();
        match Config::from_file(&path) {
            Err(DaemonError::Config(msg)) => assert!(msg.contains("gesher.toml")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("EDEN_HOME", "/srv/eden"),
            ("EDEN_MODEL_HOST", "http://10.0.0.2:11434"),
            ("EDEN_MODEL_NAME", "phi3"),
            ("GESHER_SOCKET", "/run/gesher.sock"),
            ("GESHER_AUTONOMOUS", "Yes"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_vars(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.home, PathBuf::from("/srv/eden"));
        assert_eq!(config.brain.local_host, "http://10.0.0.2:11434");
        assert_eq!(config.brain.local_model, "phi3");
        assert_eq!(config.brain.remote_url, "https://axismundi.fun");
        assert_eq!(config.socket_path, PathBuf::from("/run/gesher.sock"));
        assert!(config.autonomous_mode);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag(" TRUE "));
        assert!(parse_flag("on"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("nope"));
    }

    #[test]
    fn test_data_paths_layout() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path());
        paths.ensure().unwrap();
        assert!(paths.crystal_dir.is_dir());
        assert!(paths.logs_dir.is_dir());
        assert_eq!(paths.state_file, dir.path().join("memory/soul_state.json"));
        assert_eq!(paths.thoughts_log, dir.path().join("logs/thoughts.ndjson"));
    }
}
