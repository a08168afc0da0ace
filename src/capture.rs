use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

const READ_CHUNK_BYTES: usize = 64 * 1024;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("capture command is empty")]
    EmptyCommand,

    #[error("failed to start capture command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("capture command `{0}` has no output stream")]
    NoOutput(String),
}

/// A source of recorded media, opened once per session.
#[async_trait]
pub trait CaptureDevice: Send {
    fn mime_type(&self) -> &str;

    async fn open(&mut self) -> Result<(), CaptureError>;

    /// Waits for the next buffered fragment. Returns `None` once the stream
    /// has ended. Must be cancel safe.
    async fn next_fragment(&mut self) -> Option<Vec<u8>>;

    /// Stops capturing, releases the device and returns whatever was still
    /// buffered. Calling it on a closed device returns nothing.
    async fn close(&mut self) -> Vec<u8>;
}

/// Records by running an external command that writes encoded media to
/// stdout, e.g. `ffmpeg ... pipe:1`.
pub struct CommandCapture {
    command: String,
    mime_type: String,
    child: Option<Child>,
    fragments: Option<mpsc::Receiver<Vec<u8>>>,
}

impl CommandCapture {
    pub fn new(command: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            mime_type: mime_type.into(),
            child: None,
            fragments: None,
        }
    }

    async fn shutdown(child: &mut Child) {
        // ffmpeg finalizes its output when it reads `q` on stdin.
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(b"q").await;
            drop(stdin);
        }

        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(%status, "capture command exited"),
            Ok(Err(err)) => tracing::warn!(error = %err, "failed to wait for capture command"),
            Err(_) => {
                tracing::warn!("capture command ignored shutdown request, killing it");
                if let Err(err) = child.kill().await {
                    tracing::warn!(error = %err, "failed to kill capture command");
                }
            }
        }
    }
}

#[async_trait]
impl CaptureDevice for CommandCapture {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    async fn open(&mut self) -> Result<(), CaptureError> {
        let mut parts = self.command.split_whitespace();
        let program = parts.next().ok_or(CaptureError::EmptyCommand)?;

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CaptureError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        let Some(mut stdout) = child.stdout.take() else {
            let _ = child.kill().await;
            return Err(CaptureError::NoOutput(self.command.clone()));
        };

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut buf = vec![0u8; READ_CHUNK_BYTES];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "capture stream read failed");
                        break;
                    }
                }
            }
        });

        tracing::info!(command = %self.command, "capture started");
        self.child = Some(child);
        self.fragments = Some(rx);
        Ok(())
    }

    async fn next_fragment(&mut self) -> Option<Vec<u8>> {
        match self.fragments.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    async fn close(&mut self) -> Vec<u8> {
        let Some(mut child) = self.child.take() else {
            return Vec::new();
        };

        let mut trailing = Vec::new();
        let mut rx = self.fragments.take();
        // Drain while the command shuts down so the reader never blocks on a
        // full channel.
        let drain = async {
            if let Some(rx) = rx.as_mut() {
                while let Some(chunk) = rx.recv().await {
                    trailing.extend(chunk);
                }
            }
        };
        tokio::join!(Self::shutdown(&mut child), drain);

        tracing::info!(trailing_bytes = trailing.len(), "capture stopped");
        trailing
    }
}
