use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::format::PREFERRED_CAPTURE_FORMATS;

/// Configuration for a recording session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// How often `elapsed_ms` is republished while recording
    pub tick_interval: Duration,

    /// Hard per-turn ceiling; reaching it finalizes the recording
    pub max_turn: Duration,

    /// How often the capture device flushes buffered audio
    pub timeslice: Duration,

    /// Capture encodings in descending order of preference
    pub preferred_formats: Vec<String>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(200),
            max_turn: Duration::from_secs(20),
            timeslice: Duration::from_millis(250),
            preferred_formats: PREFERRED_CAPTURE_FORMATS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}
