//! Desktop audio: Symphonia probing and, with the `audio-output` feature,
//! a rodio playback adapter.

mod probe;

#[cfg(feature = "audio-output")]
mod output;

pub use probe::{probe_file, ProbeSummary};

#[cfg(feature = "audio-output")]
pub use output::RodioPlaybackAdapter;
