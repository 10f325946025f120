//! Child process helpers: bounded one-shot commands and warm engine processes.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::EngineKind;
use crate::io::config::OrchestratorConfig;

/// Output of a bounded one-shot command.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

/// Run `cmd` with no stdin, killing it after `timeout`.
///
/// Both pipes are drained on reader threads while the child runs; at most
/// `output_limit_bytes` of each are kept.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs()))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().context("spawn command")?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_handle = thread::spawn(move || read_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_limited(stderr, output_limit_bytes));

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            child.kill().context("kill command")?;
            (child.wait().context("wait command after kill")?, true)
        }
    };

    let stdout = stdout_handle
        .join()
        .map_err(|_| anyhow!("stdout reader panicked"))??;
    let stderr = stderr_handle
        .join()
        .map_err(|_| anyhow!("stderr reader panicked"))??;
    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

/// Read `reader` to the end, keeping the first `limit` bytes.
fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<Vec<u8>> {
    let mut kept = Vec::new();
    reader
        .by_ref()
        .take(limit as u64)
        .read_to_end(&mut kept)
        .context("read output")?;
    std::io::copy(&mut reader, &mut std::io::sink()).context("drain output")?;
    Ok(kept)
}

/// First line of `<program> --version`, or `None` if the binary is missing or fails.
pub fn probe_version(program: &str, timeout: Duration) -> Option<String> {
    let mut cmd = Command::new(program);
    cmd.arg("--version");
    let output = match run_command_with_timeout(cmd, timeout, 4096) {
        Ok(output) => output,
        Err(err) => {
            debug!(program, err = %format!("{err:#}"), "version probe failed");
            return None;
        }
    };
    if output.timed_out || !output.status.success() {
        debug!(
            program,
            timed_out = output.timed_out,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "version probe failed"
        );
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Why a frame could not be exchanged with a warm process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// No frame arrived within the allotted time.
    Timeout,
    /// The process exited or closed its pipes.
    Closed(String),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::Timeout => f.write_str("timed out waiting for engine"),
            ChannelError::Closed(reason) => write!(f, "engine channel closed: {reason}"),
        }
    }
}

/// Bidirectional line channel to a long-lived engine process.
pub trait EngineProcess: Send {
    /// Write one frame (without trailing newline).
    fn send(&mut self, frame: &str) -> Result<(), ChannelError>;
    /// Wait up to `timeout` for the next frame.
    fn recv(&mut self, timeout: Duration) -> Result<String, ChannelError>;
    /// Stop the process. Must be idempotent.
    fn terminate(&mut self);
}

/// Factory for warm engine processes.
pub trait Spawn: Send + Sync {
    fn spawn(&self, engine: EngineKind) -> Result<Box<dyn EngineProcess>>;
}

/// Spawns the configured engine binaries as child processes.
#[derive(Debug, Clone)]
pub struct CommandSpawner {
    codex: (String, Vec<String>),
    gemini: (String, Vec<String>),
    workdir: PathBuf,
    grace: Duration,
}

impl CommandSpawner {
    pub fn from_config(cfg: &OrchestratorConfig, workdir: impl Into<PathBuf>) -> Self {
        let mut gemini_args = cfg.gemini.args.clone();
        // ACP has no per-prompt model selection; the model is fixed at spawn.
        if let Some(model) = &cfg.gemini.model {
            gemini_args.extend(["--model".to_string(), model.clone()]);
        }
        Self {
            codex: (cfg.codex.command.clone(), cfg.codex.args.clone()),
            gemini: (cfg.gemini.command.clone(), gemini_args),
            workdir: workdir.into(),
            grace: Duration::from_secs(2),
        }
    }
}

impl Spawn for CommandSpawner {
    #[instrument(skip(self), fields(workdir = %self.workdir.display()))]
    fn spawn(&self, engine: EngineKind) -> Result<Box<dyn EngineProcess>> {
        let (program, args) = match engine {
            EngineKind::Codex => &self.codex,
            EngineKind::Gemini => &self.gemini,
        };
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        let process = ChildProcess::spawn(cmd, engine, self.grace)
            .with_context(|| format!("spawn {engine} ({program})"))?;
        Ok(Box::new(process))
    }
}

/// A child process speaking newline-delimited frames on stdin/stdout.
///
/// Stdout lines are forwarded through a channel by a reader thread so reads can
/// time out. Stderr is drained into debug tracing.
pub struct ChildProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Receiver<String>,
    engine: EngineKind,
    grace: Duration,
    terminated: bool,
}

impl ChildProcess {
    pub fn spawn(mut cmd: Command, engine: EngineKind, grace: Duration) -> Result<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn().context("spawn engine process")?;
        let stdin = child.stdin.take().ok_or_else(|| anyhow!("stdin was not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?;

        let (tx, lines) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                debug!(engine = %engine, stderr = %line, "engine stderr");
            }
        });
        debug!(engine = %engine, pid = child.id(), "engine process started");

        Ok(Self {
            child,
            stdin: Some(stdin),
            lines,
            engine,
            grace,
            terminated: false,
        })
    }
}

impl EngineProcess for ChildProcess {
    fn send(&mut self, frame: &str) -> Result<(), ChannelError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ChannelError::Closed("stdin already closed".to_string()))?;
        writeln!(stdin, "{frame}")
            .and_then(|()| stdin.flush())
            .map_err(|err| ChannelError::Closed(err.to_string()))
    }

    fn recv(&mut self, timeout: Duration) -> Result<String, ChannelError> {
        match self.lines.recv_timeout(timeout) {
            Ok(line) => Ok(line),
            Err(RecvTimeoutError::Timeout) => Err(ChannelError::Timeout),
            Err(RecvTimeoutError::Disconnected) => {
                let status = self.child.try_wait().ok().flatten();
                Err(ChannelError::Closed(match status {
                    Some(status) => format!("process exited with {status}"),
                    None => "stdout closed".to_string(),
                }))
            }
        }
    }

    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        // Closing stdin asks well-behaved servers to exit.
        drop(self.stdin.take());
        match self.child.wait_timeout(self.grace) {
            Ok(Some(status)) => {
                debug!(engine = %self.engine, %status, "engine process exited");
            }
            _ => {
                warn!(engine = %self.engine, "engine process did not exit, killing");
                if let Err(err) = self.child.kill() {
                    warn!(engine = %self.engine, err = %err, "failed to kill engine process");
                }
                let _ = self.child.wait();
            }
        }
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn timed_out_command_is_killed() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("exec sleep 5");
        let output = run_command_with_timeout(cmd, Duration::from_millis(100), 1024).expect("run");
        assert!(output.timed_out);
    }

    #[test]
    fn output_is_bounded() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("printf 'abcdefgh'");
        let output = run_command_with_timeout(cmd, Duration::from_secs(5), 3).expect("run");
        assert_eq!(output.stdout, b"abc");
        assert!(output.status.success());
    }

    #[test]
    fn missing_binary_has_no_version() {
        assert_eq!(
            probe_version("definitely-not-an-engine-binary", Duration::from_secs(1)),
            None
        );
    }

    #[test]
    fn child_process_echoes_frames() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("while read line; do echo \"$line\"; done");
        let mut process =
            ChildProcess::spawn(cmd, EngineKind::Codex, Duration::from_secs(1)).expect("spawn");
        process.send("{\"ping\":1}").expect("send");
        assert_eq!(
            process.recv(Duration::from_secs(5)).expect("recv"),
            "{\"ping\":1}"
        );
        assert_eq!(
            process.recv(Duration::from_millis(50)),
            Err(ChannelError::Timeout)
        );
        process.terminate();
        process.terminate();
    }
}
