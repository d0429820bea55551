//! Process-wide table of jobs, for status queries and cancellation.
//!
//! Only the sequencer of a job publishes its snapshots; everyone else reads
//! clones. Cancellation goes through the job's token and is observed by the
//! sequencer at its next suspension point.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{RelayError, Result};
use crate::state_machine::JobSnapshot;

struct Entry {
    snapshot: JobSnapshot,
    cancel: CancellationToken,
    /// When the job reached a terminal state.
    finished: Option<Instant>,
}

impl Entry {
    fn is_live(&self) -> bool {
        !self.snapshot.is_terminal()
    }
}

pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Entry>>,
    /// How long terminal jobs stay readable.
    retain: Duration,
    changed: Notify,
}

impl JobRegistry {
    pub fn new(retain: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            retain,
            changed: Notify::new(),
        }
    }

    /// Admit a job. Its sequencer must watch `cancel`.
    ///
    /// Refused while another live job feeds the same destination.
    pub fn create(&self, snapshot: JobSnapshot, cancel: CancellationToken) -> Result<()> {
        {
            let mut jobs = self.jobs.write();
            if !snapshot.is_terminal()
                && let Some(holder) = jobs
                    .values()
                    .find(|e| e.is_live() && e.snapshot.destination == snapshot.destination)
            {
                return Err(RelayError::DestinationBusy {
                    destination: snapshot.destination,
                    job_id: holder.snapshot.job_id.clone(),
                });
            }
            let finished = snapshot.is_terminal().then(Instant::now);
            jobs.insert(
                snapshot.job_id.clone(),
                Entry {
                    snapshot,
                    cancel,
                    finished,
                },
            );
        }
        self.changed.notify_waiters();
        Ok(())
    }

    /// Replace the job's snapshot. Called by the job's sequencer only.
    pub fn publish(&self, snapshot: JobSnapshot) {
        {
            let mut jobs = self.jobs.write();
            let Some(entry) = jobs.get_mut(&snapshot.job_id) else {
                return;
            };
            // Terminal snapshots are final.
            if entry.snapshot.is_terminal() {
                return;
            }
            if snapshot.is_terminal() {
                entry.finished = Some(Instant::now());
            }
            entry.snapshot = snapshot;
        }
        self.changed.notify_waiters();
    }

    pub fn get(&self, job_id: &str) -> Result<JobSnapshot> {
        self.prune();
        self.jobs
            .read()
            .get(job_id)
            .map(|e| e.snapshot.clone())
            .ok_or_else(|| RelayError::JobNotFound(job_id.to_string()))
    }

    /// Request cancellation. Returns `true` when the job was live and had not
    /// already been asked to stop.
    pub fn cancel(&self, job_id: &str) -> Result<bool> {
        self.prune();
        let jobs = self.jobs.read();
        let entry = jobs
            .get(job_id)
            .ok_or_else(|| RelayError::JobNotFound(job_id.to_string()))?;
        Ok(Self::trigger(entry))
    }

    /// Request cancellation of every live job; returns how many were newly cancelled.
    pub fn cancel_all(&self) -> usize {
        self.prune();
        self.jobs.read().values().filter(|e| Self::trigger(e)).count()
    }

    fn trigger(entry: &Entry) -> bool {
        if !entry.is_live() || entry.cancel.is_cancelled() {
            return false;
        }
        debug!(job_id = %entry.snapshot.job_id, "Cancellation requested");
        entry.cancel.cancel();
        true
    }

    pub fn list_active(&self) -> Vec<JobSnapshot> {
        self.list(true)
    }

    /// Live jobs plus terminal ones still within the retention period.
    pub fn list_all(&self) -> Vec<JobSnapshot> {
        self.list(false)
    }

    fn list(&self, live_only: bool) -> Vec<JobSnapshot> {
        self.prune();
        let mut out: Vec<JobSnapshot> = self
            .jobs
            .read()
            .values()
            .filter(|e| !live_only || e.is_live())
            .map(|e| e.snapshot.clone())
            .collect();
        out.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        out
    }

    /// Wait until no job is live. Returns `false` if `timeout` elapsed first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let idle = async {
            loop {
                let notified = self.changed.notified();
                if !self.jobs.read().values().any(Entry::is_live) {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, idle).await.is_ok()
    }

    fn prune(&self) {
        let retain = self.retain;
        self.jobs
            .write()
            .retain(|_, e| e.finished.is_none_or(|at| at.elapsed() < retain));
    }
}
