use anyhow::{Context, Result};
use reconcile::{ToolOutput, TIMEOUT_SIGNATURE};
use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

/// Run a command, capturing stdout and stderr interleaved, with a deadline
///
/// Pipes are drained on background threads so a chatty child can never fill
/// a pipe and deadlock against `try_wait`. On timeout the child is killed
/// and the output is replaced by a synthetic timeout message that the retry
/// classifier recognizes; the child is otherwise always waited on.
pub fn run_combined(
    cmd: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<ToolOutput> {
    let mut child = spawn(cmd, args, cwd)?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    match wait_with_deadline(&mut child, timeout)? {
        Some(status) => {
            let mut combined = join_reader(stdout)?;
            let err = join_reader(stderr)?;
            if !combined.is_empty() && !err.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&err);
            Ok(ToolOutput {
                success: status.success(),
                timed_out: false,
                combined,
            })
        }
        None => {
            let _ = child.kill();
            let _ = child.wait();
            Ok(ToolOutput {
                success: false,
                timed_out: true,
                combined: format!(
                    "{TIMEOUT_SIGNATURE} within {} seconds: {cmd} {}",
                    timeout.as_secs(),
                    args.join(" ")
                ),
            })
        }
    }
}

/// Run a command and capture stdout only (for JSON queries)
///
/// stderr is kept separate so provider CLI warnings cannot corrupt the
/// JSON. Non-zero exit or timeout is an error; discovery treats those as
/// an empty listing.
pub fn run_capture(cmd: &str, args: &[&str], timeout: Duration) -> Result<String> {
    let mut child = spawn(cmd, args, None)?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    match wait_with_deadline(&mut child, timeout)? {
        Some(status) => {
            let out = join_reader(stdout)?;
            let err = join_reader(stderr)?;
            if status.success() {
                Ok(out)
            } else {
                anyhow::bail!("Command failed: {}", err.trim())
            }
        }
        None => {
            let _ = child.kill();
            let _ = child.wait();
            anyhow::bail!(
                "{TIMEOUT_SIGNATURE} within {} seconds: {cmd}",
                timeout.as_secs()
            )
        }
    }
}

/// Check if a command exists
pub fn command_exists(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn spawn(cmd: &str, args: &[&str], cwd: Option<&Path>) -> Result<Child> {
    let mut command = Command::new(cmd);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    command
        .spawn()
        .with_context(|| format!("Failed to execute: {cmd} {}", args.join(" ")))
}

fn wait_with_deadline(
    child: &mut Child,
    timeout: Duration,
) -> Result<Option<std::process::ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().context("Failed to poll child process")? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

enum Pipe {
    Out(ChildStdout),
    Err(ChildStderr),
}

impl Read for Pipe {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Out(p) => p.read(buf),
            Self::Err(p) => p.read(buf),
        }
    }
}

impl From<ChildStdout> for Pipe {
    fn from(p: ChildStdout) -> Self {
        Self::Out(p)
    }
}

impl From<ChildStderr> for Pipe {
    fn from(p: ChildStderr) -> Self {
        Self::Err(p)
    }
}

fn drain(pipe: Option<impl Into<Pipe>>) -> Option<std::thread::JoinHandle<String>> {
    let mut pipe = pipe?.into();
    Some(std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = pipe.read_to_string(&mut buf);
        buf
    }))
}

fn join_reader(handle: Option<std::thread::JoinHandle<String>>) -> Result<String> {
    match handle {
        Some(handle) => handle
            .join()
            .map_err(|_| anyhow::anyhow!("output reader thread panicked")),
        None => Ok(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_combined_captures_both_streams() {
        let out = run_combined(
            "sh",
            &["-c", "echo out; echo err >&2"],
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(out.success);
        assert!(out.combined.contains("out"));
        assert!(out.combined.contains("err"));
    }

    #[test]
    fn test_run_combined_reports_failure() {
        let out = run_combined("sh", &["-c", "exit 3"], None, Duration::from_secs(5)).unwrap();
        assert!(!out.success);
        assert!(!out.timed_out);
    }

    #[test]
    fn test_run_combined_timeout_is_synthetic_retryable() {
        let out = run_combined("sleep", &["5"], None, Duration::from_millis(100)).unwrap();
        assert!(!out.success);
        assert!(out.timed_out);
        assert!(out.combined.contains(TIMEOUT_SIGNATURE));
    }

    #[test]
    fn test_run_capture_stdout_only() {
        let out = run_capture(
            "sh",
            &["-c", "echo '{\"ok\":true}'; echo noise >&2"],
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(out.trim(), "{\"ok\":true}");
    }

    #[test]
    fn test_run_capture_failure_carries_stderr() {
        let err = run_capture(
            "sh",
            &["-c", "echo broken >&2; exit 1"],
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("broken"));
    }

    #[test]
    fn test_command_exists() {
        assert!(command_exists("sh"));
        assert!(!command_exists("definitely-not-a-real-binary"));
    }
}
