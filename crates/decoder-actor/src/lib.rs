use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

const BASE_ARGS: [&str; 4] = ["-F", "json", "-M", "time:iso:usec"];
const DEFAULT_STOP_GRACE_MS: u64 = 2_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    pub binary: String,
    /// Free-form protocol selection flags, split on whitespace.
    pub protocol_params: String,
    /// Free-form tuning flags, split on whitespace and appended last.
    pub advanced_params: String,
    /// How long the process gets to exit after SIGTERM before it is killed.
    pub stop_grace_ms: u64,
}

impl DecoderConfig {
    pub fn command_args(&self) -> Vec<String> {
        BASE_ARGS
            .iter()
            .map(|arg| arg.to_string())
            .chain(self.protocol_params.split_whitespace().map(str::to_string))
            .chain(self.advanced_params.split_whitespace().map(str::to_string))
            .collect()
    }

    pub fn command_line(&self) -> String {
        let mut parts = vec![self.binary.clone()];
        parts.extend(self.command_args());
        parts.join(" ")
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            binary: "rtl_433".to_string(),
            protocol_params: String::new(),
            advanced_params: String::new(),
            stop_grace_ms: DEFAULT_STOP_GRACE_MS,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("failed to spawn decoder {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("decoder stdout was not captured")]
    MissingStdout,
    #[error("decoder io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a decoder run ended without an error.
#[derive(Debug)]
pub enum DecoderExit {
    /// Shutdown was requested; the process was killed.
    Shutdown,
    /// The process closed its stdout and exited on its own.
    StreamClosed(ExitStatus),
    /// Nobody is consuming lines anymore; the process was killed.
    ChannelClosed,
}

/// Owns one decoder process and forwards its output lines, in order.
pub struct DecoderActor {
    config: DecoderConfig,
    sender: mpsc::Sender<String>,
    shutdown: watch::Receiver<bool>,
}

impl DecoderActor {
    pub fn new(
        config: DecoderConfig,
        sender: mpsc::Sender<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            sender,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<DecoderExit, DecoderError> {
        if *self.shutdown.borrow() {
            return Ok(DecoderExit::Shutdown);
        }

        info!(command = %self.config.command_line(), "starting decoder process");
        let mut child = Command::new(&self.config.binary)
            .args(self.config.command_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DecoderError::Spawn {
                binary: self.config.binary.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or(DecoderError::MissingStdout)?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(stderr));
        }
        // Split on raw bytes so one undecodable line does not end the stream.
        let mut lines = BufReader::new(stdout).split(b'\n');
        let grace = Duration::from_millis(self.config.stop_grace_ms);

        loop {
            tokio::select! {
                segment = lines.next_segment() => {
                    let Some(bytes) = segment? else {
                        let status = child.wait().await?;
                        info!(%status, "decoder process exited");
                        return Ok(DecoderExit::StreamClosed(status));
                    };

                    let line = match String::from_utf8(bytes) {
                        Ok(line) => line,
                        Err(err) => {
                            warn!(
                                line = %String::from_utf8_lossy(err.as_bytes()),
                                "decoder emitted invalid UTF-8, dropping line"
                            );
                            continue;
                        }
                    };
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if self.sender.send(trimmed.to_string()).await.is_err() {
                        warn!("line consumer closed, stopping decoder");
                        terminate(&mut child, grace).await?;
                        return Ok(DecoderExit::ChannelClosed);
                    }
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        info!("terminating decoder process");
                        terminate(&mut child, grace).await?;
                        return Ok(DecoderExit::Shutdown);
                    }
                }
            }
        }
    }
}

/// SIGTERM first so the decoder can release the SDR dongle, SIGKILL once
/// `grace` runs out.
async fn terminate(child: &mut Child, grace: Duration) -> Result<(), DecoderError> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        match send_sigterm(pid) {
            Ok(()) => match timeout(grace, child.wait()).await {
                Ok(status) => {
                    let status = status?;
                    debug!(%status, "decoder process stopped after SIGTERM");
                    return Ok(());
                }
                Err(_) => warn!(
                    grace_ms = grace.as_millis() as u64,
                    "decoder ignored SIGTERM, killing"
                ),
            },
            Err(err) => debug!(error = %err, "decoder SIGTERM failed"),
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    if let Err(err) = child.start_kill() {
        // Already exited; reaping below still applies.
        debug!(error = %err, "decoder kill failed");
    }
    let status = child.wait().await?;
    debug!(%status, "decoder process reaped");
    Ok(())
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> nix::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = i32::try_from(pid).map_err(|_| nix::errno::Errno::EINVAL)?;
    kill(Pid::from_raw(pid), Signal::SIGTERM)
}

async fn log_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(line = %line, "decoder stderr"),
            Ok(None) => break,
            Err(err) => {
                debug!(error = %err, "decoder stderr read failed");
                break;
            }
        }
    }
}
