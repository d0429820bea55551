use crate::relay::{AttemptOutcome, RelayProfile};
use crate::state_machine::SourceEntry;

/// What to do with a source after an attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    RetryWithProfile(RelayProfile),
    Abandon,
}

/// Ordered list of profiles to try per source; one attempt per profile.
///
/// Decisions key on the structured outcome and the entry's attempt count,
/// never on diagnostic text.
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    profiles: Vec<RelayProfile>,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self::new(crate::relay::default_profiles())
    }
}

impl FallbackPolicy {
    /// `profiles` must not be empty; config validation enforces this.
    pub fn new(profiles: Vec<RelayProfile>) -> Self {
        Self { profiles }
    }

    /// Profile for the given attempt ordinal (0 = primary).
    pub fn profile(&self, ordinal: u32) -> Option<&RelayProfile> {
        self.profiles.get(ordinal as usize)
    }

    pub fn max_attempts(&self) -> u32 {
        self.profiles.len() as u32
    }

    /// Decide after a finished attempt. `entry.attempts` already counts it.
    pub fn next(&self, entry: &SourceEntry, outcome: &AttemptOutcome) -> Decision {
        match outcome {
            AttemptOutcome::Failed { .. } | AttemptOutcome::TimedOut => {
                match self.profile(entry.attempts) {
                    Some(profile) => Decision::RetryWithProfile(profile.clone()),
                    None => Decision::Abandon,
                }
            }
            // Never retried: success moves on, cancellation ends the job.
            AttemptOutcome::Succeeded | AttemptOutcome::Cancelled => Decision::Abandon,
        }
    }
}
