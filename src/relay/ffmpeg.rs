//! FFmpeg relay engine.

use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::engine::{EngineEvent, ProcessControl, RelayEngine, RelayHandle, truncate_tail};
use super::profile::RelayProfile;
use crate::provision::mask_stream_key;

/// Relays a local file to an RTMP destination with the ffmpeg CLI.
pub struct FfmpegEngine {
    binary: String,
    diagnostics_limit: usize,
}

impl FfmpegEngine {
    pub fn new(binary: impl Into<String>, diagnostics_limit: usize) -> Self {
        Self {
            binary: binary.into(),
            diagnostics_limit,
        }
    }

    /// First line of `ffmpeg -version`, or `None` when the binary is missing.
    pub fn detect_version(&self) -> Option<String> {
        std::process::Command::new(&self.binary)
            .arg("-version")
            .output()
            .ok()
            .and_then(|output| {
                String::from_utf8(output.stdout)
                    .ok()
                    .and_then(|s| s.lines().next().map(|l| l.to_string()))
            })
    }

    /// Build ffmpeg command arguments.
    fn build_args(input: &Path, destination: &str, profile: &RelayProfile) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-nostats".to_string(),
            // Machine-readable progress on stdout; stderr is left for diagnostics.
            "-progress".to_string(),
            "pipe:1".to_string(),
            // Read at native frame rate so the output behaves like a live feed.
            "-re".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
        ];
        args.extend(profile.output_args());
        args.extend(["-f".to_string(), "flv".to_string(), destination.to_string()]);
        args
    }

    /// Extract the timemark from a `-progress` line (`out_time=00:00:05.120000`).
    fn parse_timemark(line: &str) -> Option<String> {
        let value = line.strip_prefix("out_time=")?.trim();
        // ffmpeg reports a negative placeholder before the first packet.
        if value.is_empty() || value.starts_with('-') || value == "N/A" {
            return None;
        }
        Some(value.to_string())
    }
}

/// Bounded buffer of the most recent stderr lines.
struct DiagnosticsTail {
    lines: VecDeque<String>,
    bytes: usize,
    limit: usize,
}

impl DiagnosticsTail {
    fn new(limit: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            bytes: 0,
            limit,
        }
    }

    fn push(&mut self, line: &str) {
        let line = truncate_tail(line, self.limit);
        self.bytes += line.len() + 1;
        self.lines.push_back(line);
        while self.bytes > self.limit {
            match self.lines.pop_front() {
                Some(old) => self.bytes -= old.len() + 1,
                None => break,
            }
        }
    }

    fn into_string(self) -> String {
        Vec::from(self.lines).join("\n")
    }
}

struct FfmpegControl {
    pid: Option<u32>,
    kill: CancellationToken,
}

impl ProcessControl for FfmpegControl {
    fn interrupt(&self) -> io::Result<()> {
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            if let Some(pid) = self.pid {
                match kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
                    // Already exited; the waiter will report it.
                    Ok(()) | Err(Errno::ESRCH) => {}
                    Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
                }
            }
            Ok(())
        }

        #[cfg(not(unix))]
        {
            self.kill.cancel();
            Ok(())
        }
    }

    fn kill(&self) {
        self.kill.cancel();
    }
}

#[async_trait]
impl RelayEngine for FfmpegEngine {
    async fn start(
        &self,
        input: &Path,
        destination: &str,
        profile: &RelayProfile,
    ) -> io::Result<RelayHandle> {
        let args = Self::build_args(input, destination, profile);
        let command = format!(
            "{} {}",
            self.binary,
            mask_stream_key(&args.join(" "), destination)
        );
        debug!(profile = %profile.name, "Spawning {}", command);

        let mut child = Command::new(&self.binary)
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("failed to capture ffmpeg stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("failed to capture ffmpeg stderr"))?;

        let (tx, rx) = mpsc::channel(64);
        let kill = CancellationToken::new();
        let pid = child.id();

        // Capacity is 64 and nothing has been sent yet, so this cannot block.
        let _ = tx.send(EngineEvent::Started { command }).await;

        let progress_tx = tx.clone();
        let progress_reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(timemark) = Self::parse_timemark(&line) {
                    let _ = progress_tx.send(EngineEvent::Progress { timemark }).await;
                }
            }
        });

        let limit = self.diagnostics_limit;
        let diagnostics_reader = tokio::spawn(async move {
            let mut tail = DiagnosticsTail::new(limit);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                trace!("ffmpeg: {}", line);
                tail.push(&line);
            }
            tail.into_string()
        });

        let waiter_kill = kill.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = waiter_kill.cancelled() => {
                    warn!("Killing ffmpeg (pid {:?})", pid);
                    let _ = child.start_kill();
                    child.wait().await
                }
            };

            let _ = progress_reader.await;
            let diagnostics = diagnostics_reader.await.unwrap_or_default();

            let event = match status {
                Ok(exit) if exit.success() => EngineEvent::Ended,
                Ok(exit) => EngineEvent::Failed {
                    code: exit.code(),
                    diagnostics,
                },
                Err(e) => EngineEvent::Failed {
                    code: None,
                    diagnostics: format!("failed to wait for ffmpeg: {e}"),
                },
            };
            let _ = tx.send(event).await;
        });

        Ok(RelayHandle {
            events: rx,
            control: Box::new(FfmpegControl { pid, kill }),
        })
    }
}
