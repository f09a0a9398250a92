// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Supervised external-process execution.
//
// Every scanner tool is driven through `CommandRunner`. The runner spawns
// the program with an argument vector (never a shell string), enforces a
// wall-clock limit, and reports one of the `CommandError` outcomes. On a
// timeout the child is killed and reaped before the error is returned, so
// nothing keeps writing into a pipe or file after the caller has moved on.
//
// There is no retry here. A failed command is terminal for the scan that
// issued it.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

use scan2form_core::error::CommandError;

/// One command line to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Overrides the runner's default limit when set.
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// The argument that follows `flag`, e.g. the path after `-o`.
    pub fn arg_after(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Executes external commands on behalf of the scanner engines.
#[async_trait]
pub trait CommandRunner: Send + Sync + std::fmt::Debug {
    /// Run to completion and return captured standard output.
    async fn run(&self, invocation: &Invocation) -> Result<String, CommandError>;

    /// Run to completion, streaming standard output into `destination`
    /// instead of buffering it in memory.
    async fn run_to_file(
        &self,
        invocation: &Invocation,
        destination: &Path,
    ) -> Result<(), CommandError>;
}

/// `CommandRunner` backed by real operating-system processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    default_timeout: Duration,
}

impl ProcessRunner {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    fn limit(&self, invocation: &Invocation) -> Duration {
        invocation.timeout.unwrap_or(self.default_timeout)
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<String, CommandError> {
        let limit = self.limit(invocation);
        let started = Instant::now();
        let mut child = spawn(invocation)?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let outcome = tokio::time::timeout(limit, async {
            tokio::join!(read_pipe(stdout), read_pipe(stderr), child.wait())
        })
        .await;

        let Ok((stdout, stderr, status)) = outcome else {
            return Err(terminate(&mut child, invocation, limit).await);
        };

        let output_error = |source| CommandError::Output {
            command: invocation.program.clone(),
            source,
        };
        let status = status.map_err(output_error)?;
        check_status(invocation, status, stderr.unwrap_or_default(), started)?;
        stdout.map_err(output_error)
    }

    async fn run_to_file(
        &self,
        invocation: &Invocation,
        destination: &Path,
    ) -> Result<(), CommandError> {
        let limit = self.limit(invocation);
        let output_error = |source| CommandError::Output {
            command: invocation.program.clone(),
            source,
        };

        let mut file = File::create(destination).await.map_err(output_error)?;
        let started = Instant::now();
        let mut child = spawn(invocation)?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let outcome = tokio::time::timeout(limit, async {
            tokio::join!(
                pipe_to_file(stdout, &mut file),
                read_pipe(stderr),
                child.wait()
            )
        })
        .await;

        let Ok((copied, stderr, status)) = outcome else {
            return Err(terminate(&mut child, invocation, limit).await);
        };

        let status = status.map_err(output_error)?;
        check_status(invocation, status, stderr.unwrap_or_default(), started)?;
        let bytes = copied.map_err(output_error)?;
        debug!(command = %invocation.program, bytes, path = %destination.display(), "command output written");
        Ok(())
    }
}

fn spawn(invocation: &Invocation) -> Result<Child, CommandError> {
    debug!(command = %invocation, "spawning command");
    Command::new(&invocation.program)
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| CommandError::Spawn {
            command: invocation.program.clone(),
            source,
        })
}

/// Kill a child that overran its limit and wait for it to be reaped.
async fn terminate(child: &mut Child, invocation: &Invocation, limit: Duration) -> CommandError {
    warn!(
        command = %invocation.program,
        timeout_ms = limit.as_millis() as u64,
        "command timed out; killing it"
    );
    if let Err(e) = child.kill().await {
        warn!(command = %invocation.program, error = %e, "failed to kill timed-out command");
    }
    CommandError::Timeout {
        command: invocation.program.clone(),
        timeout: limit,
    }
}

fn check_status(
    invocation: &Invocation,
    status: ExitStatus,
    stderr: String,
    started: Instant,
) -> Result<(), CommandError> {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if status.success() {
        debug!(command = %invocation.program, elapsed_ms, "command finished");
        return Ok(());
    }

    let code = status.code();
    debug!(command = %invocation.program, elapsed_ms, code = ?code, "command failed");

    let stderr = stderr.trim();
    let stderr = if !stderr.is_empty() {
        stderr.to_owned()
    } else {
        match code {
            Some(code) => format!("command failed with code {code}"),
            None => "command terminated by a signal".to_owned(),
        }
    };

    Err(CommandError::Failed {
        command: invocation.program.clone(),
        status: code,
        stderr,
    })
}

async fn read_pipe<R>(pipe: Option<R>) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

async fn pipe_to_file(pipe: Option<ChildStdout>, file: &mut File) -> std::io::Result<u64> {
    let Some(mut pipe) = pipe else {
        return Ok(0);
    };
    let copied = tokio::io::copy(&mut pipe, file).await?;
    file.flush().await?;
    Ok(copied)
}
