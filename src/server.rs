//! Unix socket RPC server.
//!
//! One request per connection: the server reads until it holds one complete
//! JSON value (or the client half-closes, or the size cap is hit), writes a
//! single JSON response and closes. Each connection runs in its own task, so
//! a slow or panicking handler never stalls the accept loop.

use serde::de::IgnoredAny;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::commands::Dispatcher;
use crate::config::ServerConfig;
use crate::error::{DaemonError, Result};
use crate::protocol;

const READ_CHUNK: usize = 4096;

pub struct SocketServer {
    listener: UnixListener,
    path: PathBuf,
    dispatcher: Arc<Dispatcher>,
    config: ServerConfig,
}

impl SocketServer {
    /// Bind the socket, replacing a stale socket file and restricting its mode
    pub fn bind(
        path: &Path,
        mode: u32,
        dispatcher: Arc<Dispatcher>,
        config: ServerConfig,
    ) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let listener = UnixListener::bind(path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
        }

        info!(path = %path.display(), mode = %format!("{:o}", mode), "socket listening");
        Ok(Self {
            listener,
            path: path.to_path_buf(),
            dispatcher,
            config,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serve until `shutdown` flips to true, then drain in-flight connections
    /// for up to the grace period and remove the socket file.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut connections = JoinSet::new();
        let request_timeout = Duration::from_secs(self.config.request_timeout_secs);
        let max_bytes = self.config.max_request_bytes;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let dispatcher = Arc::clone(&self.dispatcher);
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, &dispatcher, max_bytes, request_timeout).await {
                                debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "socket accept error"),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "connection task failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        drop(self.listener);
        let grace = Duration::from_secs(self.config.shutdown_grace_secs);
        let drained = tokio::time::timeout(grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = connections.len(), "aborting in-flight connections");
            connections.abort_all();
        }

        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove socket file");
            }
        }
        info!("socket server stopped");
    }
}

async fn handle_connection(
    mut stream: UnixStream,
    dispatcher: &Dispatcher,
    max_bytes: usize,
    request_timeout: Duration,
) -> Result<()> {
    let response = match tokio::time::timeout(request_timeout, read_request(&mut stream, max_bytes)).await {
        Ok(Ok(raw)) => dispatcher.dispatch(&raw).await,
        Ok(Err(e)) => {
            warn!(error = %e, "rejected request");
            protocol::error_response(&e)
        }
        Err(_) => {
            warn!(timeout_secs = request_timeout.as_secs(), "request read timed out");
            protocol::error_response(&DaemonError::ProtocolDecode(
                "timed out waiting for request".into(),
            ))
        }
    };
    write_response(&mut stream, &response).await
}

/// Read until the buffer holds one complete JSON value, EOF, or `max_bytes`
async fn read_request(stream: &mut UnixStream, max_bytes: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(buf);
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > max_bytes {
            return Err(DaemonError::ProtocolDecode(format!(
                "request exceeds {} bytes",
                max_bytes
            )));
        }
        if holds_complete_value(&buf) {
            return Ok(buf);
        }
    }
}

fn holds_complete_value(buf: &[u8]) -> bool {
    matches!(
        serde_json::Deserializer::from_slice(buf)
            .into_iter::<IgnoredAny>()
            .next(),
        Some(Ok(_))
    )
}

async fn write_response(stream: &mut UnixStream, response: &Value) -> Result<()> {
    let bytes = serde_json::to_vec(response)?;
    stream.write_all(&bytes).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client;
    use crate::config::Config;
    use crate::engine::ActionEngine;
    use crate::llm::MockBrain;
    use crate::mind::Mind;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    fn dispatcher(dir: &TempDir) -> Arc<Dispatcher> {
        let mut config = Config::default();
        config.home = dir.path().join("home");
        let mind = Mind::open(&config).unwrap().into_shared();
        let engine = ActionEngine::new(Arc::new(MockBrain::new()), mind, &config);
        Arc::new(Dispatcher::new(Arc::new(engine)))
    }

    fn server_config() -> ServerConfig {
        ServerConfig {
            max_request_bytes: 1024,
            request_timeout_secs: 2,
            shutdown_grace_secs: 1,
        }
    }

    #[test]
    fn test_holds_complete_value() {
        assert!(holds_complete_value(br#"{"cmd":"status"}"#));
        assert!(holds_complete_value(b"{\"cmd\":\"status\"}\n"));
        assert!(!holds_complete_value(br#"{"cmd":"sta"#));
        assert!(!holds_complete_value(b""));
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket_and_sets_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gesher.sock");
        std::fs::write(&path, b"stale").unwrap();

        let server = SocketServer::bind(&path, 0o600, dispatcher(&dir), server_config()).unwrap();
        assert_eq!(server.path(), path.as_path());

        use std::os::unix::fs::{FileTypeExt, PermissionsExt};
        let meta = std::fs::metadata(&path).unwrap();
        assert!(meta.file_type().is_socket());
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_serves_requests_and_survives_bad_ones() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gesher.sock");
        let server = SocketServer::bind(&path, 0o600, dispatcher(&dir), server_config()).unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(server.run(rx));

        let reply = client::send_raw(&path, b"{oops").await.unwrap();
        let reply: Value = serde_json::from_slice(&reply).unwrap();
        assert!(reply["error"].as_str().unwrap().starts_with("invalid request"));

        let oversized = vec![b' '; 2048];
        let reply = client::send_raw(&path, &oversized).await.unwrap();
        let reply: Value = serde_json::from_slice(&reply).unwrap();
        assert!(reply["error"].as_str().unwrap().contains("exceeds"));

        let reply = client::send_request(&path, &json!({"cmd": "status"})).await.unwrap();
        assert_eq!(reply["status"], "alive");

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_request_without_half_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gesher.sock");
        let server = SocketServer::bind(&path, 0o600, dispatcher(&dir), server_config()).unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(server.run(rx));

        // client keeps its write side open; the server must still answer
        let mut stream = UnixStream::connect(&path).await.unwrap();
        stream.write_all(br#"{"cmd":"status"}"#).await.unwrap();
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        let reply: Value = serde_json::from_slice(&reply).unwrap();
        assert_eq!(reply["status"], "alive");

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
