//! External command capability.
//!
//! The backup operation only sees [`CommandRunner`]; the daemon plugs in
//! [`ProcessRunner`], tests plug in recording fakes.

use crate::utils::ExitOutcome;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{info, warn};

/// A program and its arguments, executed without further shell parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Run a full command line through `/bin/sh -c`
    pub fn shell(line: impl Into<String>) -> Self {
        Self::new("/bin/sh", vec!["-c".to_string(), line.into()])
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {:?}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Exit status and captured standard error of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit: ExitOutcome,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit.success()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim_end().to_string()
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync + 'static {
    /// Run `spec` to completion. `Err` means the command could not be started.
    async fn execute(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput>;
}

/// Lines of stderr kept for the error value; the log sees all of them.
const STDERR_TAIL_LINES: usize = 20;

/// Longest stderr line before it is cut and logged anyway.
const STDERR_MAX_LINE: usize = 4096;

/// Splits stderr into lines on `\n` or `\r` (progress meters), logs each
/// line and keeps the last few for the error message.
struct StderrCapture<'a> {
    program: &'a str,
    partial: Vec<u8>,
    tail: VecDeque<String>,
}

impl<'a> StderrCapture<'a> {
    fn new(program: &'a str) -> Self {
        Self {
            program,
            partial: Vec::new(),
            tail: VecDeque::with_capacity(STDERR_TAIL_LINES),
        }
    }

    fn feed(&mut self, chunk: &[u8]) {
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                self.flush_line();
            } else {
                self.partial.push(byte);
                if self.partial.len() >= STDERR_MAX_LINE {
                    self.flush_line();
                }
            }
        }
    }

    fn flush_line(&mut self) {
        if self.partial.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();

        info!(program = %self.program, "{}", line);
        if self.tail.len() == STDERR_TAIL_LINES {
            self.tail.pop_front();
        }
        self.tail.push_back(line);
    }

    fn finish(mut self) -> Vec<u8> {
        self.flush_line();
        let mut out = Vec::new();
        for line in self.tail {
            out.extend_from_slice(line.as_bytes());
            out.push(b'\n');
        }
        out
    }
}

/// Kills the child's whole process group unless disarmed.
///
/// `/bin/sh -c` leaves grandchildren (`docker exec`, `pg_basebackup`, ...)
/// behind when only the shell is killed, so a timed out or abandoned run
/// signals the group the child leads.
struct ProcessGroupGuard {
    leader: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(leader: Option<u32>) -> Self {
        Self { leader }
    }

    fn disarm(&mut self) {
        self.leader = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        let Some(leader) = self.leader.take() else {
            return;
        };

        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            match killpg(Pid::from_raw(leader as i32), Signal::SIGKILL) {
                Ok(()) => warn!("Killed process group {} of unfinished command", leader),
                Err(Errno::ESRCH) => {}
                Err(e) => warn!("Failed to kill process group {}: {}", leader, e),
            }
        }

        #[cfg(not(unix))]
        let _ = leader;
    }
}

/// Runs commands as child processes.
///
/// stdout is inherited; stderr is forwarded to the log line by line while
/// the child runs and its tail is returned. The child leads its own process
/// group, and dropping the future before the child exits kills that group.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn execute(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn()?;
        let mut group = ProcessGroupGuard::new(child.id());

        let mut capture = StderrCapture::new(&spec.program);
        if let Some(mut stderr) = child.stderr.take() {
            let mut buf = [0u8; 4096];
            loop {
                let n = stderr.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                capture.feed(&buf[..n]);
            }
        }

        let status = child.wait().await?;
        group.disarm();

        Ok(CommandOutput {
            exit: ExitOutcome(status.code()),
            stderr: capture.finish(),
        })
    }
}
