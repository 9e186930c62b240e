/*!
# Recorder Configuration
*/

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable naming the trace output directory.
pub const OUTPUT_DIR_VAR: &str = "LOOPTRACE_OUTPUT_DIRECTORY";

/// Environment variable bounding in-memory trace storage, in bytes.
pub const MAX_MEM_VAR: &str = "LOOPTRACE_MAX_MEM_USAGE";

/// Environment variable bounding recording wall time, in seconds.
pub const TIMEOUT_VAR: &str = "LOOPTRACE_TIMEOUT";

/// Tunables of a [`TraceRecorder`](super::TraceRecorder).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Directory the trace files are written into.
    pub output_dir: PathBuf,
    /// Approximate in-memory bytes of recorded trace data that trigger an
    /// automatic dump while a loop is running.
    pub max_memory_bytes: u64,
    /// Sliding window length of every pattern compressor.
    pub window_len: usize,
    /// How many recent groups each dedup pass compares against.
    pub dedup_depth: usize,
    /// Wall-clock budget for recording. Once exceeded, further events are
    /// counted but not recorded. `None` disables the cutoff.
    pub timeout: Option<Duration>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            max_memory_bytes: 1024 * 1024 * 1024, // 1 GiB
            window_len: 50,
            dedup_depth: 32,
            timeout: Some(Duration::from_secs(10800)), // 3 hours
        }
    }
}

impl RecorderConfig {
    /// Defaults overridden by `LOOPTRACE_OUTPUT_DIRECTORY`,
    /// `LOOPTRACE_MAX_MEM_USAGE` and `LOOPTRACE_TIMEOUT` where set.
    /// Unparsable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var(OUTPUT_DIR_VAR) {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(bytes) = std::env::var(MAX_MEM_VAR)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.max_memory_bytes = bytes;
        }
        if let Some(secs) = std::env::var(TIMEOUT_VAR)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.timeout = Some(Duration::from_secs(secs));
        }
        config
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_max_memory_bytes(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}
