use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::engine::{EngineEvent, RelayEngine, RelayHandle, truncate_tail};
use super::profile::RelayProfile;

/// Terminal result of one relay attempt. Never changes once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Succeeded,
    Failed { reason: String },
    TimedOut,
    /// The job was cancelled while the attempt was live.
    Cancelled,
}

impl AttemptOutcome {
    /// Short description for status reporting.
    pub fn describe(&self) -> String {
        match self {
            AttemptOutcome::Succeeded => "succeeded".to_string(),
            AttemptOutcome::Failed { reason } => format!("failed: {reason}"),
            AttemptOutcome::TimedOut => "timed out".to_string(),
            AttemptOutcome::Cancelled => "cancelled".to_string(),
        }
    }
}

/// Why the runner is stopping a live subprocess.
#[derive(Debug, Clone, Copy)]
enum StopReason {
    TimedOut,
    Cancelled,
}

impl StopReason {
    fn outcome(self) -> AttemptOutcome {
        match self {
            StopReason::TimedOut => AttemptOutcome::TimedOut,
            StopReason::Cancelled => AttemptOutcome::Cancelled,
        }
    }
}

/// Runs exactly one engine subprocess per call and always waits for it to be reaped.
pub struct RelayRunner {
    engine: Arc<dyn RelayEngine>,
    grace: Duration,
    diagnostics_limit: usize,
}

impl RelayRunner {
    pub fn new(engine: Arc<dyn RelayEngine>, grace: Duration, diagnostics_limit: usize) -> Self {
        Self {
            engine,
            grace,
            diagnostics_limit,
        }
    }

    /// Relay `input` to `destination` with `profile`.
    ///
    /// Lifecycle events are forwarded to `on_event` as they arrive. On timeout
    /// or cancellation the subprocess is interrupted, then killed if it is still
    /// alive after the grace period. Returns only once the engine has reported
    /// the subprocess's exit or dropped its event stream.
    pub async fn run(
        &self,
        input: &Path,
        destination: &str,
        profile: &RelayProfile,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
        on_event: &mut (dyn FnMut(&EngineEvent) + Send),
    ) -> AttemptOutcome {
        let mut handle = match self.engine.start(input, destination, profile).await {
            Ok(handle) => handle,
            Err(e) => {
                return AttemptOutcome::Failed {
                    reason: format!("failed to start relay engine: {e}"),
                };
            }
        };

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut stop: Option<StopReason> = None;
        let mut kill_at: Option<Instant> = None;
        let mut killed = false;

        // The cancel may have landed while the subprocess was starting.
        if cancel.is_cancelled() {
            stop = Some(StopReason::Cancelled);
            kill_at = Some(self.interrupt(&handle));
        }

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled(), if stop.is_none() => {
                    info!(profile = %profile.name, "Relay cancelled, interrupting subprocess");
                    stop = Some(StopReason::Cancelled);
                    kill_at = Some(self.interrupt(&handle));
                    continue;
                }
                _ = until(deadline), if stop.is_none() => {
                    warn!(profile = %profile.name, "Relay attempt timed out, interrupting subprocess");
                    stop = Some(StopReason::TimedOut);
                    kill_at = Some(self.interrupt(&handle));
                    continue;
                }
                _ = until(kill_at), if !killed => {
                    warn!(profile = %profile.name, "Subprocess ignored interrupt for {:?}, killing", self.grace);
                    handle.control.kill();
                    killed = true;
                    continue;
                }
                // After a kill only the engine's exit report ends the attempt.
                event = handle.events.recv() => event,
            };

            let Some(event) = event else {
                // The engine dropped its sender without a terminal event.
                return stop.map(StopReason::outcome).unwrap_or(AttemptOutcome::Failed {
                    reason: "relay engine event stream closed unexpectedly".to_string(),
                });
            };

            on_event(&event);

            match event {
                EngineEvent::Started { command } => debug!("Relay started: {}", command),
                EngineEvent::Progress { .. } => {}
                EngineEvent::Ended => {
                    return stop.map(StopReason::outcome).unwrap_or(AttemptOutcome::Succeeded);
                }
                EngineEvent::Failed { code, diagnostics } => {
                    if let Some(reason) = stop {
                        return reason.outcome();
                    }
                    let diagnostics = truncate_tail(diagnostics.trim(), self.diagnostics_limit);
                    return AttemptOutcome::Failed {
                        reason: match code {
                            Some(code) => format!("exit code {code}: {diagnostics}"),
                            None => diagnostics,
                        },
                    };
                }
            }
        }
    }

    /// Send the graceful interrupt and return when the forceful kill is due.
    fn interrupt(&self, handle: &RelayHandle) -> Instant {
        if let Err(e) = handle.control.interrupt() {
            warn!("Failed to interrupt subprocess: {}", e);
        }
        Instant::now() + self.grace
    }
}

/// Resolves at `deadline`, or never when there is none.
async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}
