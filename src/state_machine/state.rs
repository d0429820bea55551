use std::fmt;
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::job::Job;
use crate::fallback::{Decision, FallbackPolicy};
use crate::relay::{AttemptOutcome, RelayProfile};

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Every source was relayed or abandoned. Zero successes is still `Completed`.
    Completed,
    Cancelled,
    /// A fatal error stopped the job.
    Abandoned,
}

/// States of the job sequencer.
///
/// Each job flows through: VALIDATING → STAGING(i) → RELAYING(i, attempt) → …
/// → TERMINATED, with CANCELLING reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum State {
    Validating,
    Staging { index: usize },
    Relaying { index: usize, attempt: u32 },
    Cancelling,
    Terminated { how: Termination },
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Terminated { .. })
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Validating => write!(f, "VALIDATING"),
            State::Staging { index } => write!(f, "STAGING({index})"),
            State::Relaying { index, attempt } => write!(f, "RELAYING({index}, {attempt})"),
            State::Cancelling => write!(f, "CANCELLING"),
            State::Terminated { how } => write!(f, "TERMINATED({how:?})"),
        }
    }
}

/// Inputs to the state machine, produced by the sequencer's side effects.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The job was admitted to the registry.
    Admitted,
    /// The current source is available locally.
    Staged(PathBuf),
    /// Downloading the current source failed (counts as an attempt).
    StagingFailed(String),
    /// A relay attempt for the current source finished.
    Relayed(AttemptOutcome),
    /// The current source's staged file has been removed.
    Released,
    /// External cancel or overall deadline.
    CancelRequested(Option<String>),
    /// Unrecoverable error; the job is abandoned after cleanup.
    Fatal(String),
    /// The scratch directory has been removed.
    CleanedUp,
}

/// The side effect the sequencer must perform next.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Download source `index`.
    Stage { index: usize },
    /// Run one relay attempt for source `index`.
    Relay {
        index: usize,
        attempt: u32,
        profile: RelayProfile,
    },
    /// Remove the staged file for source `index`, then report `Released`.
    Release { index: usize },
    /// Stop everything and remove the scratch directory, then report `CleanedUp`.
    Cleanup,
    /// The job has reached a terminal state.
    Complete(Termination),
}

/// Drives a `Job` through the state machine.
pub struct StateMachine;

impl StateMachine {
    /// Apply `event` to `job` and return the side effect to perform next.
    ///
    /// The function is total: an event that makes no sense in the current
    /// state is treated as a fatal error rather than ignored.
    pub fn next(job: &mut Job, policy: &FallbackPolicy, event: Event) -> Transition {
        if let State::Terminated { how } = job.state {
            return Transition::Complete(how);
        }

        let (next_state, transition) = match (job.state, event) {
            (State::Cancelling, Event::CleanedUp) => {
                let how = job.pending_termination.unwrap_or(Termination::Cancelled);
                (State::Terminated { how }, Transition::Complete(how))
            }
            // Cleanup is already under way.
            (State::Cancelling, _) => (State::Cancelling, Transition::Cleanup),

            (_, Event::CancelRequested(reason)) => {
                job.pending_termination = Some(Termination::Cancelled);
                if reason.is_some() {
                    job.last_error = reason;
                }
                (State::Cancelling, Transition::Cleanup)
            }
            (_, Event::Fatal(reason)) => Self::fatal(job, reason),
            (_, Event::Relayed(AttemptOutcome::Cancelled)) => {
                job.pending_termination = Some(Termination::Cancelled);
                (State::Cancelling, Transition::Cleanup)
            }

            (State::Validating, Event::Admitted) => {
                if job.sources.is_empty() {
                    (
                        State::Terminated {
                            how: Termination::Completed,
                        },
                        Transition::Complete(Termination::Completed),
                    )
                } else {
                    (State::Staging { index: 0 }, Transition::Stage { index: 0 })
                }
            }

            (State::Staging { index }, Event::Staged(path)) => {
                let entry = &mut job.sources[index];
                entry.staged = Some(path);
                let attempt = entry.attempts;
                match policy.profile(attempt) {
                    Some(profile) => (
                        State::Relaying { index, attempt },
                        Transition::Relay {
                            index,
                            attempt,
                            profile: profile.clone(),
                        },
                    ),
                    None => Self::abandon_current(job, index),
                }
            }
            (State::Staging { index }, Event::StagingFailed(reason)) => {
                Self::after_failure(job, policy, index, AttemptOutcome::Failed { reason })
            }

            (State::Relaying { index, .. }, Event::Relayed(AttemptOutcome::Succeeded)) => {
                let entry = &mut job.sources[index];
                entry.attempts += 1;
                entry.relayed = true;
                job.successes += 1;
                (job.state, Transition::Release { index })
            }
            (State::Relaying { index, .. }, Event::Relayed(outcome)) => {
                Self::after_failure(job, policy, index, outcome)
            }

            (State::Staging { index } | State::Relaying { index, .. }, Event::Released) => {
                job.sources[index].staged = None;
                let next = index + 1;
                // Past the last source the index equals the source count.
                job.index = next;
                if next < job.sources.len() {
                    (State::Staging { index: next }, Transition::Stage { index: next })
                } else {
                    (
                        State::Terminated {
                            how: Termination::Completed,
                        },
                        Transition::Complete(Termination::Completed),
                    )
                }
            }

            (state, event) => Self::fatal(job, format!("unexpected {event:?} in state {state}")),
        };

        if next_state != job.state {
            job.state_history.push(job.state);
            job.state = next_state;
        }
        if next_state.is_terminal() {
            job.finished_at = Some(Utc::now());
            job.progress = None;
        }
        job.updated_at = Utc::now();

        transition
    }

    /// Record a failed attempt and consult the fallback policy.
    fn after_failure(
        job: &mut Job,
        policy: &FallbackPolicy,
        index: usize,
        outcome: AttemptOutcome,
    ) -> (State, Transition) {
        let entry = &mut job.sources[index];
        entry.attempts += 1;
        let reason = outcome.describe();
        entry.last_failure = Some(reason.clone());
        job.last_error = Some(format!("source {index}: {reason}"));

        match policy.next(&job.sources[index], &outcome) {
            Decision::RetryWithProfile(profile) => {
                let attempt = job.sources[index].attempts;
                if job.sources[index].staged.is_some() {
                    (
                        State::Relaying { index, attempt },
                        Transition::Relay {
                            index,
                            attempt,
                            profile,
                        },
                    )
                } else {
                    // Staging failed; fetch again before the degraded attempt.
                    (State::Staging { index }, Transition::Stage { index })
                }
            }
            Decision::Abandon => Self::abandon_current(job, index),
        }
    }

    fn abandon_current(job: &mut Job, index: usize) -> (State, Transition) {
        job.sources[index].abandoned = true;
        (job.state, Transition::Release { index })
    }

    fn fatal(job: &mut Job, reason: String) -> (State, Transition) {
        job.pending_termination = Some(Termination::Abandoned);
        job.last_error = Some(reason);
        (State::Cancelling, Transition::Cleanup)
    }
}
