use thiserror::Error;

use crate::probe::Rejected;
use crate::youtube::ProvisionError;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("No valid sources ({} rejected)", rejected.len())]
    NoValidSources { rejected: Vec<Rejected> },

    #[error("Endpoint provisioning failed: {0}")]
    EndpointProvisionFailed(String),

    #[error("Destination '{destination}' is in use by job {job_id}")]
    DestinationBusy { destination: String, job_id: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl From<ProvisionError> for RelayError {
    fn from(err: ProvisionError) -> Self {
        RelayError::EndpointProvisionFailed(err.to_string())
    }
}

pub type Result<T, E = RelayError> = std::result::Result<T, E>;

/// Why a source could not be staged locally.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("download timed out after {0}s")]
    Timeout(u64),

    #[error("source exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    #[error("download failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("source returned status {0}")]
    Status(u16),

    #[error("scratch directory unusable: {0}")]
    Scratch(std::io::Error),

    #[error("scratch IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StagingError {
    /// Errors that mean the scratch area itself is unusable, which no retry can fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StagingError::Scratch(_))
    }
}
