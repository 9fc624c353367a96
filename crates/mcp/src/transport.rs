//! MCP transport layer.
//!
//! A transport is a pair of halves that move newline-delimited JSON-RPC
//! messages: one sends, one receives. The halves are driven from different
//! tasks, so the client can write requests while a reader waits for replies.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::McpError;
use crate::launch::LaunchCommand;

/// Receiving half of a transport.
#[async_trait]
pub trait McpReceiver: Send {
    /// Read the next JSON-RPC message line.
    /// Returns `None` when the transport is closed.
    async fn receive(&mut self) -> Result<Option<String>, McpError>;
}

/// Sending half of a transport.
#[async_trait]
pub trait McpSender: Send {
    /// Write one JSON-RPC message line.
    async fn send(&mut self, message: &str) -> Result<(), McpError>;
}

/// A duplex message channel to one server, plus the process behind it.
pub struct McpTransport {
    pub sender: Box<dyn McpSender>,
    pub receiver: Box<dyn McpReceiver>,
    process: Option<Child>,
}

impl McpTransport {
    pub fn new(sender: Box<dyn McpSender>, receiver: Box<dyn McpReceiver>) -> Self {
        Self {
            sender,
            receiver,
            process: None,
        }
    }

    /// Start a server process and talk to it over its stdin/stdout.
    /// Its stderr is forwarded to the debug log.
    pub fn spawn(launch: &LaunchCommand) -> Result<Self, McpError> {
        let mut command = Command::new(&launch.program);
        command
            .args(&launch.args)
            .env_clear()
            .envs(&launch.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &launch.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|source| McpError::Spawn {
            command: launch.program.clone(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::ServerUnavailable("no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::ServerUnavailable("no stdout".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            let program = launch.program.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %program, "{line}");
                }
            });
        }

        Ok(Self {
            sender: Box::new(LineSender::new(stdin)),
            receiver: Box::new(LineReceiver::new(stdout)),
            process: Some(child),
        })
    }

    /// Two in-memory transports wired to each other.
    ///
    /// Messages sent on one transport are received by the other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_b) = mpsc::channel(32);
        let (tx_b, rx_a) = mpsc::channel(32);
        (
            Self::new(Box::new(ChannelSender(tx_a)), Box::new(ChannelReceiver(rx_a))),
            Self::new(Box::new(ChannelSender(tx_b)), Box::new(ChannelReceiver(rx_b))),
        )
    }

    pub fn into_parts(self) -> (Box<dyn McpSender>, Box<dyn McpReceiver>, Option<Child>) {
        (self.sender, self.receiver, self.process)
    }
}

/// Newline-delimited JSON over any byte sink.
pub struct LineSender<W> {
    writer: W,
}

impl<W> LineSender<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> McpSender for LineSender<W> {
    async fn send(&mut self, message: &str) -> Result<(), McpError> {
        self.writer.write_all(message.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Newline-delimited JSON from any byte source. Blank lines are skipped.
pub struct LineReceiver<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> LineReceiver<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> McpReceiver for LineReceiver<R> {
    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
    }
}

struct ChannelSender(mpsc::Sender<String>);

#[async_trait]
impl McpSender for ChannelSender {
    async fn send(&mut self, message: &str) -> Result<(), McpError> {
        self.0
            .send(message.to_string())
            .await
            .map_err(|e| McpError::Transport(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e)))
    }
}

struct ChannelReceiver(mpsc::Receiver<String>);

#[async_trait]
impl McpReceiver for ChannelReceiver {
    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        Ok(self.0.recv().await)
    }
}
