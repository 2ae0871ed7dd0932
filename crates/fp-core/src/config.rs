//! Configuration types.
//!
//! The top-level [`Config`] is deserialized from JSON. Every section defaults
//! sensibly so an empty `{}` file is valid. Non-fatal issues are reported by
//! [`Config::validate`]; misordered buffer thresholds are rejected by
//! [`Config::check`] and can never be silently clamped.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

/// Default cache budget in bytes (100 MB).
pub const DEFAULT_CACHE_CAPACITY_BYTES: u64 = 1000 * 1024 * 100;

/// Default preview cap; previews never buffer or play longer than this.
pub const DEFAULT_MAX_BUFFER_MS: u32 = 4000;

/// Default watchdog polling interval.
pub const DEFAULT_WATCHDOG_INTERVAL_MS: u64 = 300;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub buffer: BufferConfig,
    pub session: SessionConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::configuration(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Reject structurally invalid configuration.
    pub fn check(&self) -> Result<()> {
        self.buffer.check()?;
        if self.session.watchdog_interval_ms == 0 {
            return Err(Error::configuration(
                "session.watchdog_interval_ms must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.cache.capacity_bytes == 0 {
            warnings.push("cache.capacity_bytes is 0; every fetch will bypass the cache".into());
        }

        if self.cache.user_agent.trim().is_empty() {
            warnings.push("cache.user_agent is empty".into());
        }

        if self.buffer.max_buffer_ms > 10_000 {
            warnings.push(format!(
                "buffer.max_buffer_ms is {} ms; previews usually cap at a few seconds",
                self.buffer.max_buffer_ms
            ));
        }

        if self.session.watchdog_interval_ms > u64::from(self.buffer.max_buffer_ms) {
            warnings.push(
                "session.watchdog_interval_ms exceeds the preview cap; previews will overrun".into(),
            );
        }

        warnings
    }

    /// Length of one preview: playback stops once the position reaches it.
    pub fn preview_cap(&self) -> Duration {
        Duration::from_millis(u64::from(self.buffer.max_buffer_ms))
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Content cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub capacity_bytes: u64,
    pub user_agent: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data/media"),
            capacity_bytes: DEFAULT_CACHE_CAPACITY_BYTES,
            user_agent: concat!("feedpreview/", env!("CARGO_PKG_VERSION")).into(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Buffer thresholds shared by every buffer policy.
///
/// Only `max_buffer_ms` drives the preview policy; the remaining durations
/// are honoured by the long-form policy and are validated for both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub min_buffer_ms: u32,
    pub max_buffer_ms: u32,
    pub buffer_for_playback_ms: u32,
    pub buffer_for_playback_after_rebuffer_ms: u32,
    /// Fixed byte budget; `None` derives it from the selected tracks.
    pub target_buffer_bytes: Option<usize>,
    pub prioritize_time_over_size_thresholds: bool,
    pub back_buffer_duration_ms: u32,
    pub retain_back_buffer_from_keyframe: bool,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            min_buffer_ms: 2500,
            max_buffer_ms: DEFAULT_MAX_BUFFER_MS,
            buffer_for_playback_ms: 2500,
            buffer_for_playback_after_rebuffer_ms: 2500,
            target_buffer_bytes: None,
            prioritize_time_over_size_thresholds: false,
            back_buffer_duration_ms: 0,
            retain_back_buffer_from_keyframe: false,
        }
    }
}

impl BufferConfig {
    /// Preview-tuned thresholds with the given cap.
    pub fn preview(max_buffer_ms: u32) -> Self {
        let floor = max_buffer_ms.min(2500);
        Self {
            min_buffer_ms: floor,
            max_buffer_ms,
            buffer_for_playback_ms: floor,
            buffer_for_playback_after_rebuffer_ms: floor,
            ..Self::default()
        }
    }

    /// Check threshold ordering.
    pub fn check(&self) -> Result<()> {
        assert_greater_or_equal(
            self.min_buffer_ms,
            self.buffer_for_playback_ms,
            "minBufferMs",
            "bufferForPlaybackMs",
        )?;
        assert_greater_or_equal(
            self.min_buffer_ms,
            self.buffer_for_playback_after_rebuffer_ms,
            "minBufferMs",
            "bufferForPlaybackAfterRebufferMs",
        )?;
        assert_greater_or_equal(self.max_buffer_ms, self.min_buffer_ms, "maxBufferMs", "minBufferMs")?;
        if self.max_buffer_ms == 0 {
            return Err(Error::configuration("maxBufferMs must be greater than 0"));
        }
        Ok(())
    }
}

fn assert_greater_or_equal(value1: u32, value2: u32, name1: &str, name2: &str) -> Result<()> {
    if value1 >= value2 {
        Ok(())
    } else {
        Err(Error::configuration(format!(
            "{name1} cannot be less than {name2} ({value1} < {value2})"
        )))
    }
}

/// Playback session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub watchdog_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            watchdog_interval_ms: DEFAULT_WATCHDOG_INTERVAL_MS,
        }
    }
}

impl SessionConfig {
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }
}
