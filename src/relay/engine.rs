//! The seam between the orchestrator and whatever actually pushes media.

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::profile::RelayProfile;

/// Lifecycle signal emitted by a running relay subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The subprocess was spawned. `command` is safe to log (stream key masked).
    Started { command: String },
    /// Periodic position report, `HH:MM:SS.micros`.
    Progress { timemark: String },
    /// Clean exit. Sent only after the subprocess has been reaped.
    Ended,
    /// Non-zero exit or wait error. Sent only after the subprocess has been reaped.
    Failed {
        code: Option<i32>,
        diagnostics: String,
    },
}

/// Signals a live subprocess.
pub trait ProcessControl: Send + Sync {
    /// Ask the subprocess to finish gracefully (SIGINT for ffmpeg).
    fn interrupt(&self) -> std::io::Result<()>;

    /// Forcefully terminate. The engine still reaps the child and emits a terminal event.
    fn kill(&self);
}

/// A started relay: its event stream plus a way to stop it.
pub struct RelayHandle {
    pub events: mpsc::Receiver<EngineEvent>,
    pub control: Box<dyn ProcessControl>,
}

/// Starts one relay subprocess per call.
#[async_trait]
pub trait RelayEngine: Send + Sync {
    async fn start(
        &self,
        input: &Path,
        destination: &str,
        profile: &RelayProfile,
    ) -> std::io::Result<RelayHandle>;
}

/// Keep at most `limit` bytes from the end of `text`, on a char boundary.
///
/// Engines print the actual cause of a failure last, so the tail is what matters.
pub fn truncate_tail(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
