use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::fallback::FallbackPolicy;
use crate::registry::JobRegistry;
use crate::relay::{AttemptOutcome, EngineEvent, RelayProfile, RelayRunner};
use crate::staging::StagingManager;
use crate::state_machine::{Event, Job, JobSnapshot, StateMachine, Termination, Transition};

const DEADLINE_EXCEEDED: &str = "job deadline exceeded";

/// Drives one job through the state machine, performing each transition's
/// side effect. One source and at most one subprocess at a time.
pub struct JobSequencer {
    pub staging: Arc<StagingManager>,
    pub runner: Arc<RelayRunner>,
    pub policy: FallbackPolicy,
    pub registry: Arc<JobRegistry>,
    /// Per-attempt limit; `None` lets an attempt run as long as the source lasts.
    pub attempt_timeout: Option<Duration>,
}

impl JobSequencer {
    /// Run `job` to a terminal state and return its final snapshot.
    ///
    /// `cancel` is checked after every suspension point. Scratch space is
    /// removed on every exit path.
    pub async fn run(&self, mut job: Job, cancel: CancellationToken) -> JobSnapshot {
        let deadline = job
            .deadline
            .map(|at| Instant::now() + (at - Utc::now()).to_std().unwrap_or_default());

        info!(job_id = %job.id, sources = job.sources.len(), "Job started: {}", job.title);
        let mut transition = self.step(&mut job, Event::Admitted);

        loop {
            let event = match transition {
                Transition::Stage { index } => match interruption(&cancel, deadline) {
                    Some(event) => event,
                    None => self.stage(&job, index, &cancel, deadline).await,
                },
                Transition::Relay {
                    index,
                    attempt,
                    profile,
                } => match interruption(&cancel, deadline) {
                    Some(event) => event,
                    None => {
                        if attempt > 0 {
                            warn!(
                                job_id = %job.id,
                                index,
                                attempt,
                                "Retrying source with profile {}",
                                profile.name
                            );
                        }
                        self.relay(&mut job, index, &profile, &cancel, deadline).await
                    }
                },
                Transition::Release { index } => self.release(&job, index).await,
                Transition::Cleanup => {
                    if let Err(e) = self.staging.cleanup_job(&job.id).await {
                        error!(job_id = %job.id, "Failed to remove scratch directory: {}", e);
                    }
                    Event::CleanedUp
                }
                Transition::Complete(how) => {
                    if how == Termination::Completed
                        && let Err(e) = self.staging.cleanup_job(&job.id).await
                    {
                        error!(job_id = %job.id, "Failed to remove scratch directory: {}", e);
                    }
                    log_finish(&job, how);
                    break;
                }
            };
            transition = self.step(&mut job, event);
        }

        JobSnapshot::from_job(&job)
    }

    /// Apply one event and publish the resulting snapshot.
    fn step(&self, job: &mut Job, event: Event) -> Transition {
        let transition = StateMachine::next(job, &self.policy, event);
        self.registry.publish(JobSnapshot::from_job(job));
        transition
    }

    async fn stage(
        &self,
        job: &Job,
        index: usize,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Event {
        let uri = &job.sources[index].uri;
        info!(job_id = %job.id, index, "Staging {}", uri);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Event::CancelRequested(None),
            _ = until(deadline) => Event::CancelRequested(Some(DEADLINE_EXCEEDED.to_string())),
            result = self.staging.stage(&job.id, index, uri) => match result {
                Ok(path) => Event::Staged(path),
                Err(e) if e.is_fatal() => Event::Fatal(e.to_string()),
                Err(e) => {
                    warn!(job_id = %job.id, index, "Staging failed: {}", e);
                    Event::StagingFailed(e.to_string())
                }
            },
        }
    }

    async fn relay(
        &self,
        job: &mut Job,
        index: usize,
        profile: &RelayProfile,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Event {
        let Some(path) = job.sources[index].staged.clone() else {
            return Event::Fatal(format!("source {index} is not staged"));
        };
        let destination = job.destination.clone();
        info!(job_id = %job.id, index, profile = %profile.name, "Relaying source {}", job.sources[index].uri);

        // The runner only knows one token; the deadline trips a child of it.
        let attempt_cancel = cancel.child_token();
        let timer = deadline.map(|at| {
            let token = attempt_cancel.clone();
            tokio::spawn(async move {
                sleep_until(at).await;
                token.cancel();
            })
        });

        let registry = &self.registry;
        let mut on_event = |event: &EngineEvent| {
            if let EngineEvent::Progress { timemark } = event {
                job.progress = Some(timemark.clone());
                registry.publish(JobSnapshot::from_job(job));
            }
        };
        let outcome = self
            .runner
            .run(
                &path,
                &destination,
                profile,
                self.attempt_timeout,
                &attempt_cancel,
                &mut on_event,
            )
            .await;

        if let Some(timer) = timer {
            timer.abort();
        }
        job.progress = None;

        match outcome {
            AttemptOutcome::Cancelled if !cancel.is_cancelled() => {
                Event::CancelRequested(Some(DEADLINE_EXCEEDED.to_string()))
            }
            AttemptOutcome::Succeeded => {
                info!(job_id = %job.id, index, "Source relayed");
                Event::Relayed(outcome)
            }
            AttemptOutcome::Failed { .. } | AttemptOutcome::TimedOut => {
                warn!(job_id = %job.id, index, "Relay attempt {}", outcome.describe());
                Event::Relayed(outcome)
            }
            AttemptOutcome::Cancelled => Event::Relayed(outcome),
        }
    }

    async fn release(&self, job: &Job, index: usize) -> Event {
        if let Some(ref path) = job.sources[index].staged
            && let Err(e) = self.staging.unstage(path).await
        {
            return Event::Fatal(format!("failed to remove {}: {e}", path.display()));
        }
        if job.sources[index].abandoned {
            warn!(job_id = %job.id, index, "Source abandoned after {} attempts", job.sources[index].attempts);
        }
        Event::Released
    }
}

/// A pending cancel or an expired deadline, checked before starting new work.
fn interruption(cancel: &CancellationToken, deadline: Option<Instant>) -> Option<Event> {
    if cancel.is_cancelled() {
        return Some(Event::CancelRequested(None));
    }
    if deadline.is_some_and(|at| Instant::now() >= at) {
        return Some(Event::CancelRequested(Some(DEADLINE_EXCEEDED.to_string())));
    }
    None
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

fn log_finish(job: &Job, how: Termination) {
    match how {
        Termination::Completed => info!(
            job_id = %job.id,
            successes = job.successes,
            abandoned = job.abandoned_count(),
            "Job completed"
        ),
        Termination::Cancelled => info!(job_id = %job.id, index = job.index, "Job cancelled"),
        Termination::Abandoned => error!(
            job_id = %job.id,
            "Job abandoned: {}",
            job.last_error.as_deref().unwrap_or("unknown error")
        ),
    }
}
