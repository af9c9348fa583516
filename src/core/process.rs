//! External process execution behind a swappable runner.
//!
//! Every phase of an install shells out (catalog fetch, `ssh`, `scp`). The
//! pipeline only talks to [`CommandRunner`], so tests can script outcomes
//! without touching the network.

use std::fmt;
use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// A program invocation. Environment values are never displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
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

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, _) in &self.env {
            write!(f, "{key}=*** ")?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Collected result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Best human-readable reason for a failed run.
    pub fn failure_reason(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.code {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and collect both streams.
    async fn run(&self, spec: &CommandSpec) -> io::Result<ProcessOutput>;

    /// Run to completion, forwarding each stderr line through `lines` as it
    /// arrives. The returned output still carries the full stderr text.
    async fn run_streaming(
        &self,
        spec: &CommandSpec,
        lines: UnboundedSender<String>,
    ) -> io::Result<ProcessOutput>;
}

/// Production runner backed by `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> io::Result<ProcessOutput> {
        debug!("Running: {}", spec);
        let output = spec.to_command().output().await?;
        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn run_streaming(
        &self,
        spec: &CommandSpec,
        lines: UnboundedSender<String>,
    ) -> io::Result<ProcessOutput> {
        debug!("Running (streaming): {}", spec);
        let mut child = spec.to_command().spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("failed to capture stderr"))?;

        let stdout_task = tokio::spawn(async move {
            let mut reader = stdout;
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).await.map(|_| buf)
        });

        let stderr_text = forward_lines(stderr, &lines).await?;
        drop(lines);

        let status = child.wait().await?;
        let stdout_bytes = stdout_task
            .await
            .map_err(io::Error::other)?
            .unwrap_or_default();

        Ok(ProcessOutput {
            code: status.code(),
            stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
            stderr: stderr_text,
        })
    }
}

/// Split `reader` on `\r` or `\n`, sending every non-empty line. Transfer
/// tools redraw their progress line with bare carriage returns.
async fn forward_lines<R>(mut reader: R, lines: &UnboundedSender<String>) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut collected = String::new();
    let mut line_buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        for byte in &chunk[..read] {
            match byte {
                b'\r' | b'\n' => flush_line(&mut line_buf, &mut collected, lines),
                other => line_buf.push(*other),
            }
        }
    }
    flush_line(&mut line_buf, &mut collected, lines);

    Ok(collected)
}

fn flush_line(line_buf: &mut Vec<u8>, collected: &mut String, lines: &UnboundedSender<String>) {
    if line_buf.is_empty() {
        return;
    }
    let line = String::from_utf8_lossy(line_buf).to_string();
    line_buf.clear();
    collected.push_str(&line);
    collected.push('\n');
    // The receiver may have gone away; the collected text is still returned.
    let _ = lines.send(line);
}
