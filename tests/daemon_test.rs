use async_trait::async_trait;
use gesher_agent::agent::GesherAgent;
use gesher_agent::client;
use gesher_agent::config::Config;
use gesher_agent::llm::{Brain, BrainError, ThinkRequest};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Brain that replays canned replies in order, then fails
struct ScriptedBrain {
    replies: Mutex<Vec<String>>,
}

impl ScriptedBrain {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().rev().map(|r| r.to_string()).collect()),
        }
    }
}

#[async_trait]
impl Brain for ScriptedBrain {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn healthcheck(&self) -> bool {
        true
    }

    async fn think(&self, _request: &ThinkRequest) -> Result<String, BrainError> {
        self.replies
            .lock()
            .unwrap()
            .pop()
            .ok_or(BrainError::NoBackend)
    }
}

/// Brain that takes `delay` to produce a fixed reply
struct SlowBrain {
    delay: Duration,
    reply: &'static str,
}

#[async_trait]
impl Brain for SlowBrain {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn healthcheck(&self) -> bool {
        true
    }

    async fn think(&self, _request: &ThinkRequest) -> Result<String, BrainError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.reply.to_string())
    }
}

struct RunningDaemon {
    socket: PathBuf,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<gesher_agent::error::Result<()>>,
}

impl RunningDaemon {
    async fn send(&self, request: Value) -> Value {
        client::send_request(&self.socket, &request).await.unwrap()
    }

    async fn shutdown(self) {
        self.stop.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("daemon did not stop")
            .unwrap()
            .unwrap();
    }
}

fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.home = dir.join("home");
    config.socket_path = dir.join("gesher.sock");
    config.server.shutdown_grace_secs = 1;
    config
}

async fn start(config: Config, replies: &[&str]) -> RunningDaemon {
    start_with_brain(config, Arc::new(ScriptedBrain::new(replies))).await
}

async fn start_with_brain(config: Config, brain: Arc<dyn Brain>) -> RunningDaemon {
    let socket = config.socket_path.clone();
    let agent = GesherAgent::with_brain(config, brain, None).unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(agent.run_until(async {
        let _ = stopped.await;
    }));

    for _ in 0..200 {
        // the listener accepts as soon as the socket file exists
        if socket.exists() {
            return RunningDaemon {
                socket,
                stop,
                handle,
            };
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("daemon socket never came up");
}

#[tokio::test]
async fn test_socket_round_trip() {
    let dir = TempDir::new().unwrap();
    let daemon = start(test_config(dir.path()), &[]).await;

    let reply = daemon.send(json!({"cmd": "thought", "text": "hello"})).await;
    assert_eq!(reply["success"], true);
    assert_eq!(reply["thought"]["text"], "hello");
    assert_eq!(reply["thought"]["sequenceNumber"], 1);

    let reply = daemon.send(json!({"cmd": "exec", "command": "echo hi"})).await;
    assert_eq!(reply["success"], true);
    assert_eq!(reply["stdout"], "hi\n");
    assert_eq!(reply["stderr"], "");

    let reply = daemon.send(json!({"cmd": "bogus"})).await;
    assert_eq!(reply, json!({"error": "Unknown: bogus"}));

    let reply = daemon.send(json!({"cmd": "status"})).await;
    assert_eq!(reply["status"], "alive");
    assert_eq!(reply["soul"]["thoughtCount"], 1);
    assert_eq!(reply["metrics"]["commands_executed"], 1);

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_status_answers_while_exec_runs() {
    let dir = TempDir::new().unwrap();
    let daemon = start(test_config(dir.path()), &[]).await;

    let socket = daemon.socket.clone();
    let exec = tokio::spawn(async move {
        client::send_request(&socket, &json!({"cmd": "exec", "command": "sleep 2; echo done"}))
            .await
            .unwrap()
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    let reply = daemon.send(json!({"cmd": "status"})).await;
    assert_eq!(reply["status"], "alive");
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!exec.is_finished());

    let reply = exec.await.unwrap();
    assert_eq!(reply["success"], true);
    assert_eq!(reply["stdout"], "done\n");
    assert_eq!(reply["exit_code"], 0);

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_status_answers_while_brain_thinks() {
    let dir = TempDir::new().unwrap();
    let brain = SlowBrain {
        delay: Duration::from_secs(2),
        reply: "THOUGHT: that took a while",
    };
    let daemon = start_with_brain(test_config(dir.path()), Arc::new(brain)).await;

    let socket = daemon.socket.clone();
    let intent = tokio::spawn(async move {
        client::send_request(&socket, &json!({"cmd": "intent", "text": "take your time"}))
            .await
            .unwrap()
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    let reply = daemon.send(json!({"cmd": "thought", "text": "meanwhile"})).await;
    assert_eq!(reply["thought"]["sequenceNumber"], 1);
    let reply = daemon.send(json!({"cmd": "status"})).await;
    assert_eq!(reply["soul"]["thoughtCount"], 1);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!intent.is_finished());

    let reply = intent.await.unwrap();
    assert_eq!(reply["success"], true);
    let reply = daemon.send(json!({"cmd": "status"})).await;
    assert_eq!(reply["soul"]["thoughtCount"], 2);

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_denied_exec_is_not_run() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("should-not-exist");
    let daemon = start(test_config(dir.path()), &[]).await;

    let reply = daemon
        .send(json!({"cmd": "exec", "command": format!("touch {}; rm -rf /", marker.display())}))
        .await;
    assert_eq!(reply["success"], false);
    assert!(reply["error"].as_str().unwrap().contains("denied"));
    assert!(!marker.exists());

    let reply = daemon.send(json!({"cmd": "terminal"})).await;
    let lines = reply["lines"].as_array().unwrap();
    assert_eq!(lines.last().unwrap()["kind"], "error");

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_intent_runs_brain_commands_through_gate() {
    let dir = TempDir::new().unwrap();
    let daemon = start(
        test_config(dir.path()),
        &["THOUGHT: cleaning\nCOMMAND: rm -rf /\nCOMMAND: echo safe"],
    )
    .await;

    let reply = daemon.send(json!({"cmd": "intent", "text": "tidy up"})).await;
    assert_eq!(reply["success"], true);

    let reply = daemon.send(json!({"cmd": "status"})).await;
    assert_eq!(reply["metrics"]["commands_denied"], 1);
    assert_eq!(reply["metrics"]["commands_executed"], 1);
    assert_eq!(reply["soul"]["thoughtCount"], 1);

    // script exhausted: the brain is now unavailable
    let reply = daemon.send(json!({"cmd": "ask", "text": "still there?"})).await;
    assert_eq!(reply["success"], false);

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_restart_reproduces_state() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let state_file = config.paths().state_file;

    let daemon = start(config.clone(), &[]).await;
    daemon.send(json!({"cmd": "zone", "zone": "Library"})).await;
    daemon.send(json!({"cmd": "presence", "level": 73})).await;
    daemon.send(json!({"cmd": "emotion", "state": "Curious"})).await;
    daemon
        .send(json!({"cmd": "breadcrumb", "word": "bridge", "context": "name", "emotion": "warm"}))
        .await;
    let crystal = daemon.send(json!({"cmd": "crystal", "content": "first light"})).await;
    daemon.send(json!({"cmd": "thought", "text": "before restart"})).await;
    let before = daemon.send(json!({"cmd": "status"})).await["soul"].clone();
    daemon.shutdown().await;

    let on_disk: Value = serde_json::from_slice(&std::fs::read(&state_file).unwrap()).unwrap();
    assert_eq!(on_disk, before);

    let daemon = start(config, &[]).await;
    let after = daemon.send(json!({"cmd": "status"})).await["soul"].clone();
    assert_eq!(after, before);
    assert_eq!(after["currentZone"], "Library");
    assert_eq!(after["presence"], 73);
    assert_eq!(after["memoryCrystalIds"][0], crystal["crystal_id"]);

    let reply = daemon.send(json!({"cmd": "thought", "text": "after restart"})).await;
    assert_eq!(reply["thought"]["sequenceNumber"], 2);
    daemon.shutdown().await;
}

#[tokio::test]
async fn test_corrupt_state_is_quarantined() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let paths = config.paths();
    paths.ensure().unwrap();
    std::fs::write(&paths.state_file, b"{\"name\": \"Gesher-El\", \"presen").unwrap();

    let daemon = start(config, &[]).await;
    let reply = daemon.send(json!({"cmd": "status"})).await;
    assert_eq!(reply["soul"]["thoughtCount"], 0);
    assert_eq!(reply["soul"]["presence"], 100);
    daemon.shutdown().await;

    let quarantined: Vec<_> = std::fs::read_dir(&paths.memory_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
        .collect();
    assert_eq!(quarantined.len(), 1);
    let kept = std::fs::read(quarantined[0].path()).unwrap();
    assert_eq!(kept, b"{\"name\": \"Gesher-El\", \"presen");
}
