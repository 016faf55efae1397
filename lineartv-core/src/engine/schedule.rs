use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::catalog::{CurrentMovie, Movie, ScheduleRow};

use super::process::CommandExecutor;

/// Display timezone for schedule rows: West Africa Time, fixed UTC+1.
const WAT_OFFSET_SECS: i32 = 3600;

fn wat() -> FixedOffset {
    FixedOffset::east_opt(WAT_OFFSET_SECS).expect("static offset")
}

pub fn format_wat(at: DateTime<Utc>) -> String {
    at.with_timezone(&wat()).format("%H:%M").to_string()
}

/// Duration lookup for a media file. `None` means the probe failed; the
/// projector substitutes its fallback.
#[async_trait::async_trait]
pub trait DurationProber: Send + Sync {
    async fn probe(&self, path: &Path) -> Option<Duration>;
}

/// ffprobe-backed prober with a hard per-file timeout.
pub struct FfprobeProber {
    ffprobe: PathBuf,
    timeout: Duration,
    executor: Arc<dyn CommandExecutor>,
}

impl FfprobeProber {
    pub fn new(
        ffprobe: impl Into<PathBuf>,
        probe_timeout: Duration,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            ffprobe: ffprobe.into(),
            timeout: probe_timeout,
            executor,
        }
    }
}

#[async_trait::async_trait]
impl DurationProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> Option<Duration> {
        let mut command = Command::new(&self.ffprobe);
        command
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg(path);
        let output = match timeout(self.timeout, self.executor.run(&mut command)).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                warn!(path = %path.display(), error = %err, "ffprobe failed to run");
                return None;
            }
            Err(_) => {
                warn!(path = %path.display(), "ffprobe timed out");
                return None;
            }
        };
        if !output.status.success() {
            warn!(
                path = %path.display(),
                status = output.status.code(),
                "ffprobe returned error"
            );
            return None;
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let seconds = stdout.trim().parse::<f64>().ok()?;
        if seconds.is_finite() && seconds > 0.0 {
            Some(Duration::from_secs_f64(seconds))
        } else {
            None
        }
    }
}

/// Derives the forward-looking schedule from the queue: the current entry
/// first, then up to `max_upcoming` rows, each starting one gap after the
/// previous end. Probed durations are cached per path; failed probes fall
/// back to a fixed runtime so scheduling never blocks playback.
pub struct ScheduleProjector {
    prober: Arc<dyn DurationProber>,
    fallback: Duration,
    max_upcoming: usize,
    gap: chrono::Duration,
    cache: Mutex<HashMap<PathBuf, Duration>>,
}

impl ScheduleProjector {
    pub fn new(
        prober: Arc<dyn DurationProber>,
        fallback: Duration,
        max_upcoming: usize,
        gap_secs: i64,
    ) -> Self {
        Self {
            prober,
            fallback,
            max_upcoming,
            gap: chrono::Duration::seconds(gap_secs),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Cached duration of a media file, falling back when the probe fails.
    pub async fn movie_duration(&self, path: &Path) -> Duration {
        if let Some(cached) = self.cache.lock().unwrap().get(path) {
            return *cached;
        }
        let duration = match self.prober.probe(path).await {
            Some(value) => value,
            None => {
                debug!(path = %path.display(), "using fallback duration");
                self.fallback
            }
        };
        self.cache
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), duration);
        duration
    }

    pub async fn project(
        &self,
        current: Option<&CurrentMovie>,
        queue: &[Movie],
    ) -> Vec<ScheduleRow> {
        let mut rows = Vec::with_capacity(queue.len().min(self.max_upcoming) + 1);
        let mut cursor = match current {
            Some(current) => {
                rows.push(ScheduleRow {
                    title: current.title.clone(),
                    start_time: format_wat(current.started_at),
                    end_time: format_wat(current.ends_at),
                    current: true,
                });
                current.ends_at
            }
            None => Utc::now() - self.gap,
        };
        for movie in queue.iter().take(self.max_upcoming) {
            let start = cursor + self.gap;
            let duration = self.movie_duration(&movie.file_path).await;
            let end = start
                + chrono::Duration::from_std(duration).unwrap_or_else(|_| {
                    chrono::Duration::seconds(self.fallback.as_secs() as i64)
                });
            rows.push(ScheduleRow {
                title: movie.title.clone(),
                start_time: format_wat(start),
                end_time: format_wat(end),
                current: false,
            });
            cursor = end;
        }
        rows
    }
}
