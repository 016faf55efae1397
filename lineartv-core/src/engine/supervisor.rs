use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::sync::{mpsc::UnboundedSender, oneshot};
use tracing::{debug, info, warn};

use super::process::SpawnExecutor;
use super::readiness::{slot_is_playable, ReadinessDetector};
use super::slot::Slot;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("input missing or unreadable: {path}")]
    InputMissing { path: PathBuf },
    #[error("failed to spawn transcoder: {source}")]
    Spawn { source: std::io::Error },
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Exit code reserved for children that never started or stopped responding.
pub const EXIT_NOT_STARTED: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeRole {
    Ad,
    Movie,
}

#[derive(Debug, Clone)]
pub struct TranscodeSpec {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub slot: Slot,
    pub title: String,
    pub role: TranscodeRole,
}

/// Lifecycle notifications delivered into the channel mailbox. Generation
/// numbers let the controller discard events from retired children.
#[derive(Debug)]
pub enum TranscodeEvent {
    Ready { slot: Slot, generation: u64 },
    ReadinessTimeout { slot: Slot, generation: u64 },
    Exited { slot: Slot, generation: u64, code: i32 },
}

/// A running transcoder child. `kill` terminates it immediately; dropping
/// the handle does the same, so an abandoned slot never leaks a process.
#[derive(Debug)]
pub struct TranscoderHandle {
    slot: Slot,
    role: TranscodeRole,
    title: String,
    generation: u64,
    kill: Option<oneshot::Sender<()>>,
}

impl TranscoderHandle {
    pub fn slot(&self) -> Slot {
        self.slot
    }

    pub fn role(&self) -> TranscodeRole {
        self.role
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Hard kill. The rolling output is disposable, so there is no drain.
    pub fn kill(mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

/// Spawns and monitors one transcoder child per slot: verifies the input,
/// builds the HLS invocation, drains stderr, attaches the readiness
/// detector and reports `Ready` at most once plus `Exited` exactly once.
pub struct TranscoderSupervisor {
    ffmpeg: PathBuf,
    log_level: String,
    segment_seconds: u32,
    window_segments: u32,
    watermark: String,
    readiness_poll: Duration,
    readiness_deadline: Duration,
    spawner: Arc<dyn SpawnExecutor>,
}

impl TranscoderSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ffmpeg: impl Into<PathBuf>,
        log_level: impl Into<String>,
        segment_seconds: u32,
        window_segments: u32,
        watermark: impl Into<String>,
        readiness_poll: Duration,
        readiness_deadline: Duration,
        spawner: Arc<dyn SpawnExecutor>,
    ) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            log_level: log_level.into(),
            segment_seconds,
            window_segments,
            watermark: watermark.into(),
            readiness_poll,
            readiness_deadline,
            spawner,
        }
    }

    pub fn launch(
        &self,
        spec: &TranscodeSpec,
        generation: u64,
        events: UnboundedSender<TranscodeEvent>,
    ) -> SupervisorResult<TranscoderHandle> {
        let readable = std::fs::metadata(&spec.input)
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !readable {
            return Err(SupervisorError::InputMissing {
                path: spec.input.clone(),
            });
        }

        let mut command = Command::new(&self.ffmpeg);
        for arg in self.build_args(spec) {
            command.arg(arg);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = self
            .spawner
            .spawn(&mut command)
            .map_err(|source| SupervisorError::Spawn { source })?;

        info!(
            slot = %spec.slot,
            title = %spec.title,
            input = %spec.input.display(),
            looped = spec.role == TranscodeRole::Ad,
            "transcoder started"
        );

        let stderr = child.stderr.take();
        tokio::spawn(drain_stderr(stderr, spec.slot));

        let ready_sent = Arc::new(AtomicBool::new(false));
        let detector = ReadinessDetector::new(
            &spec.output_dir,
            spec.slot,
            self.readiness_poll,
            self.readiness_deadline,
        );
        let readiness_task = tokio::spawn({
            let events = events.clone();
            let ready_sent = Arc::clone(&ready_sent);
            let slot = spec.slot;
            async move {
                if detector.wait_playable().await {
                    // send is synchronous on an unbounded channel, so an
                    // abort cannot separate the flag from the event
                    if !ready_sent.swap(true, Ordering::SeqCst) {
                        let _ = events.send(TranscodeEvent::Ready { slot, generation });
                    }
                } else {
                    let _ = events.send(TranscodeEvent::ReadinessTimeout { slot, generation });
                }
            }
        });

        let (kill_tx, mut kill_rx) = oneshot::channel();
        let slot = spec.slot;
        let output_dir = spec.output_dir.clone();
        tokio::spawn(async move {
            let code = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => status.code().unwrap_or(1),
                    Err(err) => {
                        warn!(slot = %slot, error = %err, "failed to reap transcoder");
                        EXIT_NOT_STARTED
                    }
                },
                _ = &mut kill_rx => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    1
                }
            };
            readiness_task.abort();
            // A clip can finish transcoding before the detector's next poll;
            // its finished output on disk still counts as ready.
            if code == 0
                && !ready_sent.swap(true, Ordering::SeqCst)
                && slot_is_playable(&output_dir, slot)
            {
                let _ = events.send(TranscodeEvent::Ready { slot, generation });
            }
            debug!(slot = %slot, code, "transcoder exited");
            let _ = events.send(TranscodeEvent::Exited {
                slot,
                generation,
                code,
            });
        });

        Ok(TranscoderHandle {
            slot: spec.slot,
            role: spec.role,
            title: spec.title.clone(),
            generation,
            kill: Some(kill_tx),
        })
    }

    fn build_args(&self, spec: &TranscodeSpec) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            self.log_level.clone(),
            "-re".to_string(),
        ];
        if spec.role == TranscodeRole::Ad {
            args.push("-stream_loop".to_string());
            args.push("-1".to_string());
        }
        args.push("-i".to_string());
        args.push(spec.input.to_string_lossy().to_string());

        let mut filter = format!(
            "drawtext=text='{}':x=w-tw-16:y=16:fontsize=28:fontcolor=white@0.8",
            drawtext_escape(&self.watermark)
        );
        if spec.role == TranscodeRole::Movie {
            filter.push_str(&format!(
                ",drawtext=text='{}':x=16:y=h-th-16:fontsize=24:fontcolor=white@0.7",
                drawtext_escape(&spec.title)
            ));
        }
        args.push("-vf".to_string());
        args.push(filter);

        args.extend(
            [
                "-c:v",
                "libx264",
                "-preset",
                "veryfast",
                "-profile:v",
                "high",
                "-pix_fmt",
                "yuv420p",
                "-c:a",
                "aac",
                "-ar",
                "48000",
                "-ac",
                "2",
                "-f",
                "hls",
            ]
            .iter()
            .map(|value| value.to_string()),
        );
        args.push("-hls_time".to_string());
        args.push(self.segment_seconds.to_string());
        args.push("-hls_list_size".to_string());
        args.push(self.window_segments.to_string());
        args.push("-hls_flags".to_string());
        args.push("delete_segments".to_string());
        args.push("-hls_segment_filename".to_string());
        args.push(
            spec.output_dir
                .join(spec.slot.segment_template())
                .to_string_lossy()
                .to_string(),
        );
        args.push("-master_pl_name".to_string());
        args.push(spec.slot.master_playlist());
        args.push(
            spec.output_dir
                .join(spec.slot.stream_playlist())
                .to_string_lossy()
                .to_string(),
        );
        args
    }
}

async fn drain_stderr(stderr: Option<ChildStderr>, slot: Slot) {
    let Some(stderr) = stderr else {
        return;
    };
    let mut lines = BufReader::new(stderr).lines();
    let mut frames_seen: u64 = 0;
    while let Ok(Some(line)) = lines.next_line().await {
        if line.starts_with("frame=") {
            frames_seen += 1;
            if frames_seen % 100 == 1 {
                debug!(slot = %slot, progress = %line, "transcoder progress");
            }
        } else if line.to_ascii_lowercase().contains("error") {
            warn!(slot = %slot, line = %line, "transcoder stderr");
        }
    }
}

fn drawtext_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            ':' => escaped.push_str("\\:"),
            '\'' => escaped.push_str("\\\\\\'"),
            '%' => escaped.push_str("\\%"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
