//! Runtime process supervision
//!
//! Spawns `<runtime> --debug-port=<port> <program>`, relays everything the
//! process writes to stdout/stderr, and reports its exit exactly once.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::common::config::Config;
use crate::common::{Error, Result};

use super::RuntimeInput;

/// How long to wait for the output pipes to drain once the process is gone
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Handle to a supervised runtime process
#[derive(Debug)]
pub struct RuntimeProcess {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl RuntimeProcess {
    /// OS process id, if the platform reported one
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the process to die
    ///
    /// Idempotent: killing a process that was already killed or has exited
    /// on its own does nothing.
    pub fn kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            tracing::debug!(pid = ?self.pid, "Killing runtime process");
            let _ = tx.send(());
        }
    }
}

/// Check the program and start the runtime on it
#[tracing::instrument(skip(config, inbox), fields(program = %program.display()))]
pub async fn launch(
    config: &Config,
    program: &Path,
    port: u16,
    inbox: mpsc::UnboundedSender<RuntimeInput>,
) -> Result<RuntimeProcess> {
    if !tokio::fs::try_exists(program).await.unwrap_or(false) {
        return Err(Error::ProgramNotFound(program.to_path_buf()));
    }

    let runtime = config.resolve_runtime()?;
    tracing::info!(runtime = %runtime.display(), port, "Spawning Nyx runtime");

    let mut child = Command::new(&runtime)
        .arg(format!("--debug-port={port}"))
        .arg(program)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            Error::RuntimeSpawnFailed(format!("Failed to start {}: {}", runtime.display(), e))
        })?;

    let pid = child.id();
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(forward_output(stdout, "stdout", inbox.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(forward_output(stderr, "stderr", inbox.clone()));
    }

    let (kill_tx, mut kill_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            // Fires on an explicit kill and when the handle is dropped
            _ = &mut kill_rx => {
                let _ = child.start_kill();
                child.wait().await
            }
        };

        // Let trailing output reach the client before the exit does
        for reader in readers {
            let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader).await;
        }

        let code = status.ok().and_then(|s| s.code());
        tracing::info!(?code, "Nyx runtime exited");
        let _ = inbox.send(RuntimeInput::ProcessExited { code });
    });

    Ok(RuntimeProcess {
        pid,
        kill_tx: Some(kill_tx),
    })
}

/// Relay a pipe as output notifications until EOF
fn forward_output<R>(
    mut pipe: R,
    category: &'static str,
    inbox: mpsc::UnboundedSender<RuntimeInput>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        let mut decoder = Utf8Chunks::default();

        loop {
            match pipe.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let text = decoder.push(&buf[..n]);
                    if !text.is_empty() {
                        let input = RuntimeInput::ProcessOutput { category, text };
                        if inbox.send(input).is_err() {
                            break;
                        }
                    }
                }
            }
        }

        let rest = decoder.finish();
        if !rest.is_empty() {
            let _ = inbox.send(RuntimeInput::ProcessOutput { category, text: rest });
        }
    })
}

/// Decodes a byte stream as UTF-8 without splitting characters across chunks
#[derive(Debug, Default)]
struct Utf8Chunks {
    partial: Vec<u8>,
}

impl Utf8Chunks {
    fn push(&mut self, chunk: &[u8]) -> String {
        self.partial.extend_from_slice(chunk);

        let keep = match std::str::from_utf8(&self.partial) {
            Ok(_) => 0,
            // An incomplete sequence at the very end waits for more bytes
            Err(e) if e.error_len().is_none() => self.partial.len() - e.valid_up_to(),
            Err(_) => 0,
        };

        let split = self.partial.len() - keep;
        let text = String::from_utf8_lossy(&self.partial[..split]).into_owned();
        self.partial.drain(..split);
        text
    }

    fn finish(self) -> String {
        String::from_utf8_lossy(&self.partial).into_owned()
    }
}
