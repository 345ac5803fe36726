//! Diagnostic command execution
//!
//! Every probe, backup, flash and recovery action reaches the system through a
//! `DiagnosticSource`. The shell implementation enforces a timeout and kills the
//! child when it expires.

use crate::error::{Error, Result};
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Captured result of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (-1 when terminated by a signal)
    pub exit_code: i32,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Get a formatted summary of the command result
    pub fn summary(&self) -> String {
        let status = if self.success() { "success" } else { "failed" };
        format!("{} (exit {})", status, self.exit_code)
    }
}

/// Something that can run a named diagnostic command
pub trait DiagnosticSource: Send + Sync {
    /// Run `command`, giving up after `timeout`
    fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput>;
}

/// Runs commands through `sh -c` on the host
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellSource;

impl DiagnosticSource for ShellSource {
    fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        tracing::debug!(command, "executing command");

        let mut child = Command::new("sh")
            .args(["-c", command])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::ProbeExecutionError {
                command: command.to_string(),
                message: e.to_string(),
            })?;

        // Drain pipes on their own threads so a chatty command cannot fill the
        // pipe buffer and stall before the timeout check sees it exit.
        let stdout_reader = child.stdout.take().map(drain);
        let stderr_reader = child.stderr.take().map(drain);

        let start = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if start.elapsed() > timeout {
                        let _ = child.kill();
                        // Reap the zombie
                        let _ = child.wait();
                        tracing::error!(command, seconds = timeout.as_secs(), "command timed out");
                        return Err(Error::ProbeTimeout {
                            command: command.to_string(),
                            seconds: timeout.as_secs(),
                        });
                    }
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    return Err(Error::ProbeExecutionError {
                        command: command.to_string(),
                        message: format!("Failed to wait on process: {}", e),
                    });
                }
            }
        };

        let output = CommandOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: stdout_reader.map(join_reader).unwrap_or_default(),
            stderr: stderr_reader.map(join_reader).unwrap_or_default(),
        };

        tracing::debug!(command, exit_code = output.exit_code, "command finished");
        if !output.stderr.is_empty() {
            tracing::debug!(command, stderr = %output.stderr.trim_end(), "command stderr");
        }

        Ok(output)
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

/// Substitute `{name}` placeholders in a command template
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{}}}", name), value)
    })
}
