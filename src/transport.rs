//! Subprocess transport for one language server
//!
//! Owns the child process and the background tasks that do all blocking I/O:
//! one task reads stdout chunks into an inbound queue, one task drains an
//! outbound queue into stdin (flushing per write), one task forwards stderr
//! lines to the log. The pump side of the manager only ever touches the
//! queues, so it never blocks on the subprocess.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;

use crate::error::{LspmError, Result};

const READ_CHUNK: usize = 8 * 1024;

/// Result of draining the inbound queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drained {
    /// Whatever was buffered (possibly nothing); the reader is still alive
    Open(Vec<u8>),
    /// Reader ended and the queue is empty: the process is gone
    Closed,
}

/// Handle to one running language server process
pub struct Transport {
    /// Language name, for logging
    name: String,
    child: Option<Child>,
    outbound_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    inbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl Transport {
    /// Spawn the server process and its background I/O tasks
    pub fn spawn(
        name: &str,
        command: &str,
        args: &[String],
        working_dir: &Path,
        env: &HashMap<String, String>,
    ) -> Result<Self> {
        tracing::info!(server = %name, %command, ?args, "spawning language server");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| LspmError::Spawn {
            command: command.to_string(),
            reason: e.to_string(),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| LspmError::Spawn {
            command: command.to_string(),
            reason: "failed to get stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| LspmError::Spawn {
            command: command.to_string(),
            reason: "failed to get stdout".into(),
        })?;
        let stderr = child.stderr.take();

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let reader_name = name.to_string();
        let reader = tokio::spawn(async move {
            Self::reader_loop(stdout, inbound_tx, &reader_name).await;
        });

        let writer_name = name.to_string();
        let writer = tokio::spawn(async move {
            Self::writer_loop(stdin, outbound_rx, &writer_name).await;
        });

        let stderr_task = stderr.map(|stderr| {
            let stderr_name = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %stderr_name, "stderr: {}", line);
                }
            })
        });

        Ok(Self {
            name: name.to_string(),
            child: Some(child),
            outbound_tx: Some(outbound_tx),
            inbound_rx,
            reader: Some(reader),
            writer: Some(writer),
            stderr_task,
        })
    }

    /// Reader loop - pushes stdout chunks into the inbound queue
    async fn reader_loop(
        mut stdout: ChildStdout,
        tx: mpsc::UnboundedSender<Vec<u8>>,
        name: &str,
    ) {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match stdout.read(&mut buf).await {
                Ok(0) => {
                    tracing::debug!(server = %name, "reader: EOF");
                    break;
                }
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(server = %name, "reader error: {}", e);
                    break;
                }
            }
        }
        // tx drops here; the pump observes Drained::Closed once drained
    }

    /// Writer loop - writes queued frames to stdin
    async fn writer_loop(
        mut stdin: ChildStdin,
        mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
        name: &str,
    ) {
        while let Some(data) = rx.recv().await {
            if let Err(e) = stdin.write_all(&data).await {
                tracing::error!(server = %name, "writer error: {}", e);
                break;
            }
            if let Err(e) = stdin.flush().await {
                tracing::error!(server = %name, "flush error: {}", e);
                break;
            }
        }
        tracing::debug!(server = %name, "writer loop ended");
    }

    /// Enqueue bytes for the writer; returns immediately
    pub fn write(&self, bytes: Vec<u8>) -> Result<()> {
        self.outbound_tx
            .as_ref()
            .ok_or(LspmError::ChannelClosed)?
            .send(bytes)
            .map_err(|_| LspmError::ChannelClosed)
    }

    /// Drain everything the reader has buffered, without blocking
    pub fn read(&mut self) -> Drained {
        let mut buf = Vec::new();
        loop {
            match self.inbound_rx.try_recv() {
                Ok(chunk) => buf.extend_from_slice(&chunk),
                Err(TryRecvError::Empty) => return Drained::Open(buf),
                Err(TryRecvError::Disconnected) => {
                    return if buf.is_empty() {
                        Drained::Closed
                    } else {
                        Drained::Open(buf)
                    };
                }
            }
        }
    }

    /// Terminate the process and join both background loops
    pub async fn stop(&mut self) {
        tracing::debug!(server = %self.name, "stopping transport");

        // Closing the outbound channel ends the writer loop
        self.outbound_tx = None;

        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }

        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.await;
        }
        if let Some(stderr_task) = self.stderr_task.take() {
            stderr_task.abort();
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        // Best-effort cleanup - can't do async in Drop
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
    }
}
