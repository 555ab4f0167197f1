//! One-shot socket client.

use serde_json::Value;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::error::Result;

/// Send raw bytes, half-close, and return everything the daemon wrote back
pub async fn send_raw(path: &Path, request: &[u8]) -> Result<Vec<u8>> {
    let mut stream = UnixStream::connect(path).await?;
    stream.write_all(request).await?;
    stream.shutdown().await?;

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await?;
    Ok(reply)
}

pub async fn send_request(path: &Path, request: &Value) -> Result<Value> {
    let reply = send_raw(path, &serde_json::to_vec(request)?).await?;
    Ok(serde_json::from_slice(&reply)?)
}
