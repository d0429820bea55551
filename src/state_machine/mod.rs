mod job;
mod state;

pub use job::{Job, JobSnapshot, SourceEntry};
pub use state::{Event, State, StateMachine, Termination, Transition};
