pub mod engine;
pub mod ffmpeg;
pub mod profile;
pub mod runner;

pub use engine::{EngineEvent, ProcessControl, RelayEngine, RelayHandle};
pub use ffmpeg::FfmpegEngine;
pub use profile::{RelayProfile, default_profiles};
pub use runner::{AttemptOutcome, RelayRunner};
