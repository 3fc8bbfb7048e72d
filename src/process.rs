//! External command execution.
//!
//! Every collaborator this crate talks to (the container runtime CLI, the
//! scheduler's `create_work`) is an external program. [`run`] is the one
//! place where those programs are spawned: output is captured, bounded in
//! size and time, and a non-zero exit becomes [`Error::ProcessFailure`]
//! carrying the combined output so callers can inspect or report it.

use crate::constants::MAX_OUTPUT_SIZE;
use crate::error::{Error, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Renders a command for logs and error messages.
pub fn describe(cmd: &Command) -> String {
    let std_cmd = cmd.as_std();
    let mut line = std_cmd.get_program().to_string_lossy().into_owned();
    for arg in std_cmd.get_args() {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

/// Runs a command to completion and returns its trimmed combined output.
///
/// Stdout and stderr are read into one buffer in the order the chunks
/// arrive, so failure output reads like a terminal transcript.
///
/// The child is killed if the returned future is dropped, so an
/// interrupted pipeline never leaves a runtime export running behind it.
///
/// # Errors
///
/// - [`Error::ProcessSpawn`] if the program cannot be started
/// - [`Error::Timeout`] if it does not finish within `limit`
/// - [`Error::ProcessFailure`] if it exits non-zero
pub async fn run(cmd: &mut Command, limit: Duration) -> Result<String> {
    let line = describe(cmd);
    debug!("exec: {}", line);

    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| Error::ProcessSpawn {
        command: line.clone(),
        reason: e.to_string(),
    })?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (status, mut combined) = timeout(limit, async {
        let combined = read_interleaved(stdout, stderr).await?;
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((status, combined))
    })
    .await
    .map_err(|_| Error::Timeout {
        operation: line.clone(),
        duration: limit,
    })??;

    if combined.len() > MAX_OUTPUT_SIZE {
        combined.truncate(MAX_OUTPUT_SIZE);
        warn!("output of '{}' truncated to {} bytes", line, MAX_OUTPUT_SIZE);
    }
    let text = String::from_utf8_lossy(&combined).trim().to_string();

    if !status.success() {
        return Err(Error::ProcessFailure {
            command: line,
            status: status.to_string(),
            output: text,
        });
    }

    Ok(text)
}

/// Drains both pipes into one buffer, chunk by chunk in arrival order.
///
/// Stops appending past [`MAX_OUTPUT_SIZE`] but keeps draining, so the
/// child never blocks on a full pipe.
async fn read_interleaved(
    mut stdout: Option<ChildStdout>,
    mut stderr: Option<ChildStderr>,
) -> std::io::Result<Vec<u8>> {
    let mut combined = Vec::new();
    let mut out_buf = [0u8; 8192];
    let mut err_buf = [0u8; 8192];

    while stdout.is_some() || stderr.is_some() {
        let (n, from_stdout) = tokio::select! {
            n = read_chunk(&mut stdout, &mut out_buf) => (n?, true),
            n = read_chunk(&mut stderr, &mut err_buf) => (n?, false),
        };
        let chunk = if from_stdout { &out_buf[..n] } else { &err_buf[..n] };
        if n == 0 {
            if from_stdout {
                stdout = None;
            } else {
                stderr = None;
            }
        } else if combined.len() <= MAX_OUTPUT_SIZE {
            combined.extend_from_slice(chunk);
        }
    }
    Ok(combined)
}

/// Reads one chunk from an open pipe; never completes for a closed one.
async fn read_chunk<R: AsyncRead + Unpin>(
    pipe: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match pipe {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}
