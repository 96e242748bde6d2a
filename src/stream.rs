//! Cancellable streaming through child-process stdio.
//!
//! Tar archives and live logs move through docker as raw byte streams.
//! These helpers spawn the child with the executor's environment, copy
//! bytes between its stdio and caller-supplied reader/writer halves, and
//! kill the child when the cancellation token fires. Streams carry no
//! timeout; cancellation is the only bound.

use crate::command::CommandExecutor;
use crate::error::{Error, Result};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;

/// Copy the child's stdout into `writer` until EOF, then reap the child.
///
/// # Errors
///
/// `External` when the child exits non-zero (stderr is the message),
/// `Canceled` when the token fires mid-stream.
pub(crate) async fn stream_stdout<W>(
    executor: &CommandExecutor,
    args: &[String],
    writer: &mut W,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let op = CommandExecutor::op_path(args);
    if executor.cancellation().is_cancelled() {
        return Err(Error::canceled(op));
    }

    let mut command = executor.base_command(args);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = spawn(command, &op)?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::internal(op.clone(), "failed to capture stdout"))?;
    let stderr_task = drain_stderr(&mut child);

    let copy_and_wait = async {
        tokio::io::copy(&mut stdout, writer)
            .await
            .map_err(|e| Error::internal(op.clone(), format!("stream copy failed: {e}")).with_source(e))?;
        writer
            .flush()
            .await
            .map_err(|e| Error::internal(op.clone(), format!("stream flush failed: {e}")).with_source(e))?;
        child
            .wait()
            .await
            .map_err(|e| Error::external(op.clone(), format!("failed to wait for docker: {e}")).with_source(e))
    };
    tokio::pin!(copy_and_wait);

    let status = tokio::select! {
        () = executor.cancellation().cancelled() => {
            return Err(Error::canceled(op.clone()));
        }
        status = &mut copy_and_wait => status?,
    };

    check_status(status, stderr_task.await.unwrap_or_default(), &op)
}

/// Copy `reader` into the child's stdin, close it, then reap the child.
///
/// # Errors
///
/// `External` when the child exits non-zero (stderr is the message),
/// `Canceled` when the token fires mid-stream.
pub(crate) async fn stream_stdin<R>(
    executor: &CommandExecutor,
    args: &[String],
    reader: &mut R,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let op = CommandExecutor::op_path(args);
    if executor.cancellation().is_cancelled() {
        return Err(Error::canceled(op));
    }

    let mut command = executor.base_command(args);
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let mut child = spawn(command, &op)?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::internal(op.clone(), "failed to capture stdin"))?;
    let stderr_task = drain_stderr(&mut child);

    let copy_and_wait = async {
        tokio::io::copy(reader, &mut stdin)
            .await
            .map_err(|e| Error::internal(op.clone(), format!("stream copy failed: {e}")).with_source(e))?;
        stdin
            .shutdown()
            .await
            .map_err(|e| Error::internal(op.clone(), format!("stdin close failed: {e}")).with_source(e))?;
        // Closing stdin signals EOF; the child finishes extraction then exits.
        drop(stdin);
        child
            .wait()
            .await
            .map_err(|e| Error::external(op.clone(), format!("failed to wait for docker: {e}")).with_source(e))
    };
    tokio::pin!(copy_and_wait);

    let status = tokio::select! {
        () = executor.cancellation().cancelled() => {
            return Err(Error::canceled(op.clone()));
        }
        status = &mut copy_and_wait => status?,
    };

    check_status(status, stderr_task.await.unwrap_or_default(), &op)
}

fn spawn(mut command: tokio::process::Command, op: &str) -> Result<Child> {
    command.spawn().map_err(|e| {
        Error::external(op.to_string(), format!("failed to spawn docker: {e}")).with_source(e)
    })
}

/// Drain stderr on a separate task so a chatty child cannot deadlock the
/// stdio pipes.
fn drain_stderr(child: &mut Child) -> tokio::task::JoinHandle<String> {
    let stderr = child.stderr.take();
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).to_string()
    })
}

fn check_status(status: std::process::ExitStatus, stderr: String, op: &str) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    let exit_code = status.code().unwrap_or(-1);
    let message = if stderr.trim().is_empty() {
        format!("exited with status {exit_code}")
    } else {
        stderr
    };
    Err(Error::external(op.to_string(), message))
}
