//! External process invocation with captured output and cooperative
//! cancellation.
//!
//! The child's stdout and stderr are captured and combined; a non-zero exit
//! surfaces the full output to the caller. Cancellation is checked between
//! wait polls and a cancelled child is force-terminated.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::super::error::{Error, Result};

/// How often the cancellation token is checked while the child runs.
const WAIT_POLL: Duration = Duration::from_millis(500);

/// Invoke an external tool, wait for it to exit, and return its combined
/// stdout/stderr. A non-zero exit is fatal and carries the captured output.
pub async fn invoke(
    program: &Path,
    args: &[String],
    working_dir: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<String> {
    let command_line = format!("{} {}", program.display(), args.join(" "));
    log::debug!("Invoking: {command_line}");

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = working_dir {
        command.current_dir(dir);
    }

    let mut child = command.spawn().map_err(|e| {
        Error::GenericError(format!("failed to spawn '{}': {e}", program.display()))
    })?;

    // Drain pipes concurrently so a chatty child cannot deadlock on a full
    // pipe buffer while we poll for exit.
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let drain = tokio::spawn(async move {
        let mut out = Vec::new();
        let mut err = Vec::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut out).await;
        }
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut err).await;
        }
        (out, err)
    });

    let status = loop {
        tokio::select! {
            status = child.wait() => {
                break status.map_err(|e| {
                    Error::GenericError(format!("waiting for '{}': {e}", program.display()))
                })?;
            }
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(Error::Cancelled);
            }
            _ = tokio::time::sleep(WAIT_POLL) => {}
        }
    };

    let (out, err) = drain
        .await
        .map_err(|e| Error::GenericError(format!("output capture task panicked: {e}")))?;
    let mut output = String::from_utf8_lossy(&out).into_owned();
    let err = String::from_utf8_lossy(&err);
    if !err.trim().is_empty() {
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(err.trim_end());
    }
    let output = output.trim().to_string();

    if !status.success() {
        return Err(Error::ProcessFailed {
            command: command_line,
            output,
        });
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sh() -> PathBuf {
        PathBuf::from("/bin/sh")
    }

    #[tokio::test]
    async fn captures_combined_output() {
        let out = invoke(
            &sh(),
            &["-c".into(), "echo one; echo two 1>&2".into()],
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(out.contains("one"));
        assert!(out.contains("two"));
    }

    #[tokio::test]
    async fn nonzero_exit_surfaces_output() {
        let err = invoke(
            &sh(),
            &["-c".into(), "echo broken 1>&2; exit 3".into()],
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        match err {
            Error::ProcessFailed { output, .. } => assert!(output.contains("broken")),
            other => panic!("expected ProcessFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_child_is_terminated() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = invoke(
            &sh(),
            &["-c".into(), "sleep 30".into()],
            None,
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
