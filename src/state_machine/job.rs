use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::{State, Termination};

/// One URI within a job's sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    pub uri: String,
    /// Verdict of the accessibility probe at admission.
    pub reachable: bool,
    /// Set only while an attempt for this entry is in flight or just finished.
    pub staged: Option<PathBuf>,
    /// Finished attempts, including staging failures.
    pub attempts: u32,
    pub last_failure: Option<String>,
    pub relayed: bool,
    pub abandoned: bool,
}

impl SourceEntry {
    /// An entry for a source that passed validation.
    pub fn new(uri: String) -> Self {
        Self {
            uri,
            reachable: true,
            staged: None,
            attempts: 0,
            last_failure: None,
            relayed: false,
            abandoned: false,
        }
    }
}

/// One relay run over an ordered list of sources to one destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub title: String,
    pub sources: Vec<SourceEntry>,
    /// Full ingest URI including the stream key. Never serialized.
    #[serde(skip)]
    pub destination: String,
    /// Provider-side id (broadcast id, or the destination name for static URLs).
    pub external_id: String,
    /// Index of the source being processed; never decreases.
    pub index: usize,
    pub state: State,
    pub state_history: Vec<State>,
    pub successes: u32,
    pub last_error: Option<String>,
    /// Latest engine timemark for the live attempt.
    pub progress: Option<String>,
    /// How the job ends once `Cancelling` cleanup is done.
    pub pending_termination: Option<Termination>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        title: String,
        sources: Vec<String>,
        destination: String,
        external_id: String,
        deadline: Option<chrono::Duration>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title,
            sources: sources.into_iter().map(SourceEntry::new).collect(),
            destination,
            external_id,
            index: 0,
            state: State::Validating,
            state_history: Vec::new(),
            successes: 0,
            last_error: None,
            progress: None,
            pending_termination: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
            deadline: deadline.map(|d| now + d),
        }
    }

    pub fn abandoned_count(&self) -> usize {
        self.sources.iter().filter(|s| s.abandoned).count()
    }
}

/// Read-only view of a job published to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub title: String,
    pub destination: String,
    pub current_source_index: usize,
    pub source_count: usize,
    pub state: State,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub successes: u32,
    pub abandoned: usize,
    pub progress: Option<String>,
}

impl JobSnapshot {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            title: job.title.clone(),
            destination: job.external_id.clone(),
            current_source_index: job.index,
            source_count: job.sources.len(),
            state: job.state,
            started_at: job.created_at,
            finished_at: job.finished_at,
            last_error: job.last_error.clone(),
            successes: job.successes,
            abandoned: job.abandoned_count(),
            progress: job.progress.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
