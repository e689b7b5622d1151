//! Engine tunables.
//!
//! Defaults match the behaviour the capture engine was tuned against on the supported chat
//! sites. A TOML file may override any subset; a few knobs can also be set through the
//! environment (`TURNTRACK_*`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};
use crate::identity::utf16_len;

const ENV_POLL_INTERVAL_MS: &str = "TURNTRACK_POLL_INTERVAL_MS";
const ENV_PENDING_TIMEOUT_MS: &str = "TURNTRACK_PENDING_TIMEOUT_MS";
const ENV_BULK_LOAD_STEPS: &str = "TURNTRACK_BULK_LOAD_STEPS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Period of the capture timer.
    pub poll_interval_ms: u64,
    /// Delay before the first capture after attaching.
    pub initial_capture_delay_ms: u64,
    /// Period of the URL-change check.
    pub url_check_interval_ms: u64,
    /// Quiet time after the last scroll event before the trailing position re-check.
    pub scroll_settle_ms: u64,
    /// How long a user turn may wait for a response before it is forgotten.
    pub pending_timeout_ms: u64,
    /// Shorter content is treated as placeholder noise. Lengths here count UTF-16 code units.
    pub min_content_chars: usize,
    /// Longer content is treated as noise as well.
    pub max_content_chars: usize,
    pub summary_chars: usize,
    /// Prefix length, in code units, used by the locator's content fallback.
    pub locate_prefix_chars: usize,
    pub position: PositionConfig,
    pub bulk_load: BulkLoadConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            initial_capture_delay_ms: 500,
            url_check_interval_ms: 1000,
            scroll_settle_ms: 100,
            pending_timeout_ms: 5000,
            min_content_chars: 5,
            max_content_chars: 10_000,
            summary_chars: 60,
            locate_prefix_chars: 50,
            position: PositionConfig::default(),
            bulk_load: BulkLoadConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    /// Height of the band below the viewport top in which a node scores by its offset alone.
    pub top_bias_px: f64,
    /// Added to the absolute offset of every node outside the band.
    pub off_band_penalty: f64,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            top_bias_px: 120.0,
            off_band_penalty: 500.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkLoadConfig {
    pub steps: u32,
    pub step_pause_ms: u64,
    /// Wait after the jumps to the top and to the bottom.
    pub settle_ms: u64,
}

impl Default for BulkLoadConfig {
    fn default() -> Self {
        Self {
            steps: 8,
            step_pause_ms: 200,
            settle_ms: 300,
        }
    }
}

impl EngineConfig {
    /// Resolve the effective config: explicit file, else the per-user config file when it
    /// exists, else defaults; environment overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| TrackerError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(ms) = env_u64(ENV_POLL_INTERVAL_MS) {
            self.poll_interval_ms = ms;
        }
        if let Some(ms) = env_u64(ENV_PENDING_TIMEOUT_MS) {
            self.pending_timeout_ms = ms;
        }
        if let Some(steps) = env_u64(ENV_BULK_LOAD_STEPS) {
            self.bulk_load.steps = u32::try_from(steps).unwrap_or(u32::MAX).max(1);
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn initial_capture_delay(&self) -> Duration {
        Duration::from_millis(self.initial_capture_delay_ms)
    }

    pub fn url_check_interval(&self) -> Duration {
        Duration::from_millis(self.url_check_interval_ms)
    }

    pub fn scroll_settle(&self) -> Duration {
        Duration::from_millis(self.scroll_settle_ms)
    }

    pub fn pending_timeout(&self) -> Duration {
        Duration::from_millis(self.pending_timeout_ms)
    }

    /// Noise filter applied to every extracted message text.
    pub fn accepts_content(&self, content: &str) -> bool {
        let len = utf16_len(content);
        len >= self.min_content_chars && len <= self.max_content_chars
    }
}

impl BulkLoadConfig {
    pub fn step_pause(&self) -> Duration {
        Duration::from_millis(self.step_pause_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

fn env_u64(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "ignoring malformed config override");
            None
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "chat-turn-tracker", "chat-turn-tracker")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}
