//! External command execution with timeouts.
//!
//! The async helpers are used by stages that run on the runtime. The blocking
//! helper is for code already on the blocking pool (rasterization and OCR).

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

use invoq_core::{Error, Result};

/// Run a command with a timeout, returning stdout as a string.
pub async fn run_cmd_with_timeout(cmd: &mut Command, timeout_secs: u64) -> Result<String> {
    let output = tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output())
        .await
        .map_err(|_| {
            Error::Internal(format!(
                "External command timed out after {}s",
                timeout_secs
            ))
        })?
        .map_err(|e| Error::Internal(format!("Failed to execute command: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Internal(format!(
            "Command failed (exit {}): {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run a command that may output to files rather than stdout.
pub async fn run_cmd_status(cmd: &mut Command, timeout_secs: u64) -> Result<()> {
    run_cmd_with_timeout(cmd, timeout_secs).await.map(|_| ())
}

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Blocking variant of [`run_cmd_with_timeout`]. Returns raw stdout.
///
/// Output goes to scratch files instead of pipes so a chatty child cannot
/// block on a full pipe while we poll for exit. The child is killed when the
/// timeout expires.
pub fn run_blocking_with_timeout(
    cmd: &mut std::process::Command,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let mut stdout = tempfile::tempfile()
        .map_err(|e| Error::Internal(format!("Failed to create temp file: {}", e)))?;
    let mut stderr = tempfile::tempfile()
        .map_err(|e| Error::Internal(format!("Failed to create temp file: {}", e)))?;

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::from(clone_file(&stdout)?))
        .stderr(Stdio::from(clone_file(&stderr)?))
        .spawn()
        .map_err(|e| Error::Internal(format!("Failed to execute command: {}", e)))?;

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Internal(format!(
                    "External command timed out after {}s",
                    timeout.as_secs()
                )));
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(e) => {
                return Err(Error::Internal(format!("Failed to wait for command: {}", e)));
            }
        }
    };

    if !status.success() {
        let stderr = read_all(&mut stderr)?;
        return Err(Error::Internal(format!(
            "Command failed (exit {}): {}",
            status,
            String::from_utf8_lossy(&stderr).trim()
        )));
    }

    read_all(&mut stdout)
}

fn clone_file(file: &File) -> Result<File> {
    file.try_clone()
        .map_err(|e| Error::Internal(format!("Failed to clone file handle: {}", e)))
}

fn read_all(file: &mut File) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(0))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let result =
            run_cmd_with_timeout(&mut Command::new("invoq-definitely-not-a-binary"), 5).await;
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Failed to execute command"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdout_captured() {
        let out = run_cmd_with_timeout(Command::new("echo").arg("hello"), 5)
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_blocking_stdout_captured() {
        let out = run_blocking_with_timeout(
            std::process::Command::new("echo").arg("page"),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(String::from_utf8_lossy(&out).trim(), "page");
    }

    #[cfg(unix)]
    #[test]
    fn test_blocking_nonzero_exit() {
        let err = run_blocking_with_timeout(
            std::process::Command::new("sh").args(["-c", "echo boom >&2; exit 3"]),
            Duration::from_secs(5),
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Command failed"), "{msg}");
        assert!(msg.contains("boom"), "{msg}");
    }

    #[cfg(unix)]
    #[test]
    fn test_blocking_timeout_kills_child() {
        let err = run_blocking_with_timeout(
            std::process::Command::new("sleep").arg("10"),
            Duration::from_millis(100),
        )
        .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
