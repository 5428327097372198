// src/core/tracer/channel.rs
use std::process::Stdio;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{TestPathError, Result};

/// Line-oriented request/response stream to a tracing subprocess
#[async_trait]
pub trait DebuggerChannel: Send {
    /// Send one command line
    async fn send(&mut self, command: &str) -> Result<()>;

    /// Next output line, `None` once the output is closed
    async fn next_line(&mut self) -> Result<Option<String>>;

    /// Force the subprocess down
    async fn kill(&mut self) -> Result<()>;
}

/// Subprocess whose stdout and stderr are merged into one line stream
pub struct ProcessChannel {
    program: String,
    child: Child,
    stdin: Option<ChildStdin>,
    lines: mpsc::UnboundedReceiver<String>,
}

impl ProcessChannel {
    pub fn spawn(program: &str, args: &[String]) -> Result<Self> {
        debug!("Spawning {} {}", program, args.join(" "));
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TestPathError::Toolchain(format!("could not start '{}': {}", program, e)))?;

        let (tx, lines) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx));
        }

        Ok(Self {
            program: program.to_string(),
            stdin: child.stdin.take(),
            child,
            lines,
        })
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).is_err() {
            break;
        }
    }
}

#[async_trait]
impl DebuggerChannel for ProcessChannel {
    async fn send(&mut self, command: &str) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            TestPathError::TracerProtocol(format!("{} does not accept input", self.program))
        })?;
        trace!("> {}", command);
        stdin.write_all(command.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn next_line(&mut self) -> Result<Option<String>> {
        let line = self.lines.recv().await;
        if let Some(line) = &line {
            trace!("< {}", line);
        }
        Ok(line)
    }

    async fn kill(&mut self) -> Result<()> {
        self.stdin = None;
        match self.child.kill().await {
            Ok(()) => Ok(()),
            // already exited
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Replays a fixed transcript, optionally pacing each line
#[cfg(test)]
pub(crate) struct ScriptedChannel {
    lines: std::collections::VecDeque<String>,
    delay: Option<std::time::Duration>,
    pub sent: Vec<String>,
    pub killed: bool,
}

#[cfg(test)]
impl ScriptedChannel {
    pub fn new<S: AsRef<str>>(transcript: &[S]) -> Self {
        Self {
            lines: transcript.iter().map(|l| l.as_ref().to_string()).collect(),
            delay: None,
            sent: vec![],
            killed: false,
        }
    }

    pub fn paced(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[cfg(test)]
#[async_trait]
impl DebuggerChannel for ScriptedChannel {
    async fn send(&mut self, command: &str) -> Result<()> {
        self.sent.push(command.to_string());
        Ok(())
    }

    async fn next_line(&mut self) -> Result<Option<String>> {
        if self.killed {
            return Ok(None);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.lines.pop_front())
    }

    async fn kill(&mut self) -> Result<()> {
        self.killed = true;
        Ok(())
    }
}
