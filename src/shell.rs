//! Bounded shell execution.
//!
//! Commands run through `sh -c` as a tokio child process, so the event loop
//! keeps serving while they run. Output is streamed line by line to an
//! optional channel and captured up to a byte cap per stream. The wall-clock
//! timeout covers the process and both pipes; on expiry the child is killed.

use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::terminal::LineKind;

const TRUNCATED_MARKER: &str = "\n... [output truncated]";

#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("command timed out after {0}s")]
    Timeout(u64),
    #[error("failed to spawn shell: {0}")]
    Spawn(io::Error),
    #[error("io error while running command: {0}")]
    Io(io::Error),
}

/// One line of live output, without its trailing newline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub kind: LineKind,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
}

pub async fn run(
    command: &str,
    timeout: Duration,
    max_capture: usize,
    lines: Option<&mpsc::UnboundedSender<OutputLine>>,
) -> Result<ShellOutput, ShellError> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(ShellError::Spawn)?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ShellError::Io(io::Error::new(io::ErrorKind::Other, "stdout not piped")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ShellError::Io(io::Error::new(io::ErrorKind::Other, "stderr not piped")))?;

    let finished = tokio::time::timeout(timeout, async {
        let (out, err, status) = tokio::join!(
            capture(stdout, LineKind::Stdout, max_capture, lines),
            capture(stderr, LineKind::Stderr, max_capture, lines),
            child.wait(),
        );
        Ok::<_, io::Error>((out?, err?, status?))
    })
    .await;

    match finished {
        Ok(Ok((stdout, stderr, status))) => {
            debug!(command = %command, code = ?status.code(), "command finished");
            Ok(ShellOutput {
                stdout,
                stderr,
                exit_code: status.code(),
            })
        }
        Ok(Err(e)) => Err(ShellError::Io(e)),
        Err(_) => {
            if let Err(e) = child.kill().await {
                warn!(command = %command, error = %e, "failed to kill timed out command");
            }
            Err(ShellError::Timeout(timeout.as_secs()))
        }
    }
}

/// Read a pipe to EOF, forwarding each line and keeping at most `max` bytes
async fn capture<R>(
    stream: R,
    kind: LineKind,
    max: usize,
    lines: Option<&mpsc::UnboundedSender<OutputLine>>,
) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut captured = String::new();
    let mut truncated = false;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let chunk = String::from_utf8_lossy(&buf);

        if let Some(tx) = lines {
            // receiver gone just means nobody is watching
            let _ = tx.send(OutputLine {
                kind,
                text: chunk.trim_end_matches(['\n', '\r']).to_string(),
            });
        }

        let room = max.saturating_sub(captured.len());
        if chunk.len() <= room {
            captured.push_str(&chunk);
        } else {
            let mut cut = room;
            while !chunk.is_char_boundary(cut) {
                cut -= 1;
            }
            captured.push_str(&chunk[..cut]);
            truncated = true;
        }
    }

    if truncated {
        captured.push_str(TRUNCATED_MARKER);
    }
    Ok(captured)
}
