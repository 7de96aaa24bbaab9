//! Container probing with Symphonia.
//!
//! A cached file counts as playable only if Symphonia can find a decodable
//! audio track in it. The same pass reads the stream duration.

use bridge_traits::error::{BridgeError, Result};
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

/// Result of a successful probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeSummary {
    pub duration: Option<Duration>,
    pub sample_rate: Option<u32>,
}

/// Open `path`, detect its container and make sure a decoder can be built for
/// its default audio track.
///
/// Blocking; call from `spawn_blocking`.
pub fn probe_file(path: &Path) -> Result<ProbeSummary> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| BridgeError::Decode(format!("Failed to probe format: {}", e)))?;

    let reader = probed.format;
    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| BridgeError::Decode("No supported audio tracks".to_string()))?;

    symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| BridgeError::Decode(format!("Unsupported codec: {}", e)))?;

    let params = &track.codec_params;
    let duration = match (params.time_base, params.n_frames) {
        (Some(time_base), Some(n_frames)) => {
            let time = time_base.calc_time(n_frames);
            Some(Duration::from_secs_f64(time.seconds as f64 + time.frac))
        }
        _ => None,
    };

    debug!(path = ?path, duration = ?duration, "Probed audio file");

    Ok(ProbeSummary {
        duration,
        sample_rate: params.sample_rate,
    })
}
