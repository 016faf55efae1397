use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LinearTvConfig {
    pub paths: PathsSection,
    pub transcoder: TranscoderSection,
    #[serde(default)]
    pub tuning: TuningSection,
}

impl LinearTvConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    /// Output directory for one channel, under the HLS root.
    pub fn channel_dir(&self, channel_id: &str) -> PathBuf {
        self.resolve_path(&self.paths.hls_output_dir).join(channel_id)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.resolve_path(&self.paths.catalog_file)
    }

    pub fn ad_path(&self) -> PathBuf {
        self.resolve_path(&self.paths.ad_file)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub hls_output_dir: String,
    pub catalog_file: String,
    pub ad_file: String,
    pub logs_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscoderSection {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub log_level: String,
    pub segment_seconds: u32,
    pub window_segments: u32,
    pub watermark: String,
}

/// Every delay and deadline of the playback engine. Defaults follow the
/// production values; tests shrink them through this section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TuningSection {
    pub readiness_poll_ms: u64,
    pub readiness_deadline_secs: u64,
    pub preload_deadline_secs: u64,
    pub ad_stabilize_secs: u64,
    pub transition_delay_secs: u64,
    pub settle_after_kill_secs: u64,
    pub preload_lag_secs: u64,
    pub play_next_retry_secs: u64,
    pub preload_wait_secs: u64,
    pub ad_restart_secs: u64,
    pub ad_restart_failure_secs: u64,
    pub publish_attempts: u32,
    pub publish_retry_ms: u64,
    pub republish_secs: u64,
    pub probe_timeout_secs: u64,
    pub fallback_duration_mins: u64,
    pub schedule_rows: usize,
    pub schedule_gap_secs: i64,
}

impl Default for TuningSection {
    fn default() -> Self {
        Self {
            readiness_poll_ms: 500,
            readiness_deadline_secs: 20,
            preload_deadline_secs: 25,
            ad_stabilize_secs: 3,
            transition_delay_secs: 2,
            settle_after_kill_secs: 2,
            preload_lag_secs: 10,
            play_next_retry_secs: 5,
            preload_wait_secs: 3,
            ad_restart_secs: 1,
            ad_restart_failure_secs: 5,
            publish_attempts: 3,
            publish_retry_ms: 500,
            republish_secs: 2,
            probe_timeout_secs: 10,
            fallback_duration_mins: 90,
            schedule_rows: 10,
            schedule_gap_secs: 1,
        }
    }
}

impl TuningSection {
    pub fn readiness_poll(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_ms)
    }

    pub fn readiness_deadline(&self) -> Duration {
        Duration::from_secs(self.readiness_deadline_secs)
    }

    pub fn preload_deadline(&self) -> Duration {
        Duration::from_secs(self.preload_deadline_secs)
    }

    pub fn ad_stabilize(&self) -> Duration {
        Duration::from_secs(self.ad_stabilize_secs)
    }

    pub fn transition_delay(&self) -> Duration {
        Duration::from_secs(self.transition_delay_secs)
    }

    pub fn settle_after_kill(&self) -> Duration {
        Duration::from_secs(self.settle_after_kill_secs)
    }

    pub fn preload_lag(&self) -> Duration {
        Duration::from_secs(self.preload_lag_secs)
    }

    pub fn play_next_retry(&self) -> Duration {
        Duration::from_secs(self.play_next_retry_secs)
    }

    /// Short recheck while a preload is already warming the next slot.
    pub fn preload_wait(&self) -> Duration {
        Duration::from_secs(self.preload_wait_secs)
    }

    pub fn ad_restart(&self, failed: bool) -> Duration {
        if failed {
            Duration::from_secs(self.ad_restart_failure_secs)
        } else {
            Duration::from_secs(self.ad_restart_secs)
        }
    }

    pub fn publish_retry(&self) -> Duration {
        Duration::from_millis(self.publish_retry_ms)
    }

    pub fn republish_interval(&self) -> Duration {
        Duration::from_secs(self.republish_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn fallback_duration(&self) -> Duration {
        Duration::from_secs(self.fallback_duration_mins * 60)
    }
}

pub fn load_lineartv_config<P: AsRef<Path>>(path: P) -> Result<LinearTvConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
