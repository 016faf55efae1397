pub mod process;
pub mod publisher;
pub mod readiness;
pub mod schedule;
pub mod slot;
pub mod supervisor;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::catalog::{CatalogError, CatalogStore, CurrentMovie, Movie, ScheduleRow};
use crate::config::{LinearTvConfig, TuningSection};

use self::process::{CommandExecutor, SpawnExecutor};
use self::publisher::SlotPublisher;
use self::readiness::slot_is_playable;
use self::schedule::{FfprobeProber, ScheduleProjector};
use self::slot::Slot;
use self::supervisor::{
    TranscodeEvent, TranscodeRole, TranscodeSpec, TranscoderHandle, TranscoderSupervisor,
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("channel engine has shut down")]
    ChannelGone,
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Snapshot returned to external callers.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub name: String,
    pub current_movie: Option<String>,
    pub is_playing: bool,
    pub playing_ad: bool,
    pub queue_length: usize,
    pub preload_ready: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueRow {
    pub position: usize,
    pub title: String,
    pub added_by: String,
}

/// In-memory runtime state of one channel. The two slots always partition
/// {A, B}; the transition methods below are the only writers, so the
/// structural invariants can be checked after every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRuntime {
    pub active_slot: Slot,
    pub next_slot: Slot,
    pub is_playing: bool,
    pub playing_ad: bool,
    pub preload_ready: bool,
    pub is_preloading: bool,
}

impl Default for ChannelRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRuntime {
    pub fn new() -> Self {
        Self {
            active_slot: Slot::A,
            next_slot: Slot::B,
            is_playing: false,
            playing_ad: false,
            preload_ready: false,
            is_preloading: false,
        }
    }

    pub fn begin_preload(&mut self) {
        self.is_preloading = true;
        self.preload_ready = false;
    }

    pub fn preload_became_ready(&mut self) {
        self.is_preloading = false;
        self.preload_ready = true;
    }

    pub fn preload_failed(&mut self) {
        self.is_preloading = false;
        self.preload_ready = false;
    }

    /// The atomic slot swap at a transition: the warmed slot becomes
    /// active, playback flags flip to movie mode, readiness is consumed.
    pub fn swap_for_playback(&mut self) {
        std::mem::swap(&mut self.active_slot, &mut self.next_slot);
        self.is_playing = true;
        self.playing_ad = false;
        self.preload_ready = false;
        self.is_preloading = false;
    }

    pub fn enter_ad(&mut self) {
        self.is_playing = true;
        self.playing_ad = true;
    }

    pub fn stopped(&mut self) {
        self.is_playing = false;
        self.playing_ad = false;
    }

    /// Structural invariants that must hold at every observable point.
    pub fn invariants_hold(&self) -> bool {
        let parity = self.active_slot != self.next_slot
            && (self.active_slot == Slot::A || self.active_slot == Slot::B);
        let flags = (!self.playing_ad || self.is_playing)
            && !(self.preload_ready && self.is_preloading);
        parity && flags
    }
}

#[derive(Debug)]
pub enum ChannelCommand {
    Enqueue(Movie),
    PlayNext,
    Status(oneshot::Sender<ChannelStatus>),
    Queue(oneshot::Sender<Vec<QueueRow>>),
    Schedule(oneshot::Sender<Vec<ScheduleRow>>),
    Shutdown,
}

/// Everything the controller task reacts to, unified so one select drains
/// all three mailboxes.
enum Mailbox {
    Command(Option<ChannelCommand>),
    Transcode(TranscodeEvent),
    Tick(Tick),
}

/// Self-addressed timers. Every delayed step of the state machine arrives
/// back through the mailbox so per-channel mutations stay serialized.
#[derive(Debug)]
enum Tick {
    StartPreload,
    RetryPlayNext,
    RetryAd,
    PublishAd { generation: u64 },
    PreloadDeadline { generation: u64 },
    MovieEnded { generation: u64 },
    PruneSlot { slot: Slot },
    Republish { generation: u64 },
}

/// Caller-side handle to a running channel engine.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    tx: mpsc::Sender<ChannelCommand>,
}

impl ChannelHandle {
    pub async fn enqueue(&self, movie: Movie) -> EngineResult<()> {
        self.tx
            .send(ChannelCommand::Enqueue(movie))
            .await
            .map_err(|_| EngineError::ChannelGone)
    }

    pub async fn play_next(&self) -> EngineResult<()> {
        self.tx
            .send(ChannelCommand::PlayNext)
            .await
            .map_err(|_| EngineError::ChannelGone)
    }

    pub async fn status(&self) -> EngineResult<ChannelStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ChannelCommand::Status(reply))
            .await
            .map_err(|_| EngineError::ChannelGone)?;
        rx.await.map_err(|_| EngineError::ChannelGone)
    }

    pub async fn queue(&self) -> EngineResult<Vec<QueueRow>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ChannelCommand::Queue(reply))
            .await
            .map_err(|_| EngineError::ChannelGone)?;
        rx.await.map_err(|_| EngineError::ChannelGone)
    }

    pub async fn schedule(&self) -> EngineResult<Vec<ScheduleRow>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ChannelCommand::Schedule(reply))
            .await
            .map_err(|_| EngineError::ChannelGone)?;
        rx.await.map_err(|_| EngineError::ChannelGone)
    }

    pub async fn shutdown(&self) -> EngineResult<()> {
        self.tx
            .send(ChannelCommand::Shutdown)
            .await
            .map_err(|_| EngineError::ChannelGone)
    }
}

/// The per-channel controller: one task owning all runtime state, driven by
/// commands, transcoder lifecycle events and self-addressed ticks.
pub struct ChannelEngine {
    id: String,
    name: String,
    dir: PathBuf,
    ad_path: PathBuf,
    catalog: Arc<CatalogStore>,
    supervisor: TranscoderSupervisor,
    publisher: SlotPublisher,
    projector: ScheduleProjector,
    tuning: TuningSection,
    runtime: ChannelRuntime,
    current: Option<TranscoderHandle>,
    preload: Option<TranscoderHandle>,
    current_gen: Option<u64>,
    preload_gen: Option<u64>,
    current_title: Option<String>,
    pending_play: bool,
    generations: u64,
    commands: mpsc::Receiver<ChannelCommand>,
    transcode_rx: mpsc::UnboundedReceiver<TranscodeEvent>,
    transcode_tx: mpsc::UnboundedSender<TranscodeEvent>,
    tick_rx: mpsc::UnboundedReceiver<Tick>,
    tick_tx: mpsc::UnboundedSender<Tick>,
}

impl ChannelEngine {
    /// Wipes and recreates the channel's output directory, then starts the
    /// controller task. Fails only when the output directory is unwritable.
    pub fn launch(
        id: &str,
        name: &str,
        config: &LinearTvConfig,
        catalog: Arc<CatalogStore>,
        spawner: Arc<dyn SpawnExecutor>,
        executor: Arc<dyn CommandExecutor>,
    ) -> EngineResult<ChannelHandle> {
        let dir = config.channel_dir(id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(EngineError::Io {
                    source,
                    path: dir.clone(),
                })
            }
        }
        fs::create_dir_all(&dir).map_err(|source| EngineError::Io {
            source,
            path: dir.clone(),
        })?;

        let tuning = config.tuning.clone();
        let supervisor = TranscoderSupervisor::new(
            config.transcoder.ffmpeg.as_str(),
            config.transcoder.log_level.as_str(),
            config.transcoder.segment_seconds,
            config.transcoder.window_segments,
            config.transcoder.watermark.as_str(),
            tuning.readiness_poll(),
            tuning.readiness_deadline(),
            spawner,
        );
        let prober = FfprobeProber::new(
            &config.transcoder.ffprobe,
            tuning.probe_timeout(),
            executor,
        );
        let projector = ScheduleProjector::new(
            Arc::new(prober),
            tuning.fallback_duration(),
            tuning.schedule_rows,
            tuning.schedule_gap_secs,
        );

        let (command_tx, command_rx) = mpsc::channel(32);
        let (transcode_tx, transcode_rx) = mpsc::unbounded_channel();
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();

        let engine = Self {
            id: id.to_string(),
            name: name.to_string(),
            dir: dir.clone(),
            ad_path: config.ad_path(),
            catalog,
            supervisor,
            publisher: SlotPublisher::new(dir),
            projector,
            tuning,
            runtime: ChannelRuntime::new(),
            current: None,
            preload: None,
            current_gen: None,
            preload_gen: None,
            current_title: None,
            pending_play: false,
            generations: 0,
            commands: command_rx,
            transcode_rx,
            transcode_tx,
            tick_rx,
            tick_tx,
        };
        tokio::spawn(engine.run());
        Ok(ChannelHandle { tx: command_tx })
    }

    async fn run(mut self) {
        info!(channel = %self.id, "channel engine starting");
        self.initialize().await;
        loop {
            let next = tokio::select! {
                maybe = self.commands.recv() => Mailbox::Command(maybe),
                Some(event) = self.transcode_rx.recv() => Mailbox::Transcode(event),
                Some(tick) = self.tick_rx.recv() => Mailbox::Tick(tick),
            };
            match next {
                Mailbox::Command(None) | Mailbox::Command(Some(ChannelCommand::Shutdown)) => break,
                Mailbox::Command(Some(command)) => self.handle_command(command).await,
                Mailbox::Transcode(event) => self.handle_transcode(event).await,
                Mailbox::Tick(tick) => self.handle_tick(tick).await,
            }
            debug_assert!(self.runtime.invariants_hold());
        }
        if let Some(handle) = self.current.take() {
            handle.kill();
        }
        if let Some(handle) = self.preload.take() {
            handle.kill();
        }
        info!(channel = %self.id, "channel engine stopped");
    }

    async fn initialize(&mut self) {
        if let Err(err) = self.catalog.set_current(&self.id, None) {
            warn!(channel = %self.id, error = %err, "failed to clear current movie");
        }
        let queue_len = self.catalog.queue_len(&self.id).unwrap_or(0);
        if queue_len > 0 {
            info!(channel = %self.id, queue_len, "resuming persisted queue");
            self.pending_play = true;
            self.start_preload().await;
        } else {
            self.start_ad().await;
        }
    }

    async fn handle_command(&mut self, command: ChannelCommand) {
        match command {
            ChannelCommand::Enqueue(movie) => self.enqueue(movie).await,
            ChannelCommand::PlayNext => self.play_next().await,
            ChannelCommand::Status(reply) => {
                let queue_length = self.catalog.queue_len(&self.id).unwrap_or(0);
                let _ = reply.send(ChannelStatus {
                    name: self.name.clone(),
                    current_movie: self.current_title.clone(),
                    is_playing: self.runtime.is_playing,
                    playing_ad: self.runtime.playing_ad,
                    queue_length,
                    preload_ready: self.runtime.preload_ready,
                });
            }
            ChannelCommand::Queue(reply) => {
                let rows = self
                    .catalog
                    .queue(&self.id)
                    .unwrap_or_default()
                    .into_iter()
                    .enumerate()
                    .map(|(index, movie)| QueueRow {
                        position: index + 1,
                        title: movie.title,
                        added_by: movie.added_by,
                    })
                    .collect();
                let _ = reply.send(rows);
            }
            ChannelCommand::Schedule(reply) => {
                let schedule = self
                    .catalog
                    .channel(&self.id)
                    .map(|record| record.schedule)
                    .unwrap_or_default();
                let _ = reply.send(schedule);
            }
            // consumed by the run loop before dispatch
            ChannelCommand::Shutdown => {}
        }
    }

    async fn enqueue(&mut self, movie: Movie) {
        let title = movie.title.clone();
        let queue_len = match self.catalog.append_movie(&self.id, movie) {
            Ok(len) => len,
            Err(err) => {
                warn!(channel = %self.id, error = %err, "failed to persist enqueue");
                return;
            }
        };
        info!(channel = %self.id, title = %title, queue_len, "movie enqueued");
        self.refresh_schedule().await;

        // First item while the ad loop is on air: replace the ad now.
        if queue_len == 1 && self.runtime.playing_ad {
            if let Some(ad) = self.current.take() {
                ad.kill();
            }
            self.current_gen = None;
            self.runtime.stopped();
            prune_slot_files(&self.dir, self.runtime.active_slot);
            self.pending_play = true;
            self.schedule_tick(self.tuning.settle_after_kill(), Tick::StartPreload);
        }
    }

    /// The slot-swap transition. Requires a ready preload; otherwise forces
    /// one and retries itself.
    async fn play_next(&mut self) {
        let queue_len = self.catalog.queue_len(&self.id).unwrap_or(0);
        if queue_len == 0 {
            if !self.runtime.is_playing && self.current_gen.is_none() {
                self.start_ad().await;
            }
            return;
        }
        if !self.runtime.preload_ready {
            self.pending_play = true;
            if self.runtime.is_preloading {
                // A preload is already warming the slot; recheck shortly
                // instead of waiting out the full force-preload cadence.
                self.schedule_tick(self.tuning.preload_wait(), Tick::RetryPlayNext);
            } else {
                self.start_preload().await;
                self.schedule_tick(self.tuning.play_next_retry(), Tick::RetryPlayNext);
            }
            return;
        }

        // Head metadata is captured before the shift: the record could be
        // invalidated by the time the queue mutates.
        let movie = match self.catalog.queue_head(&self.id) {
            Ok(Some(movie)) => movie,
            Ok(None) => return,
            Err(err) => {
                warn!(channel = %self.id, error = %err, "failed to read queue head");
                return;
            }
        };

        let old_slot = self.runtime.active_slot;
        let old_handle = self.current.take();
        self.runtime.swap_for_playback();
        self.current_gen = self.preload_gen.take();
        self.current = self.preload.take();
        self.pending_play = false;

        if let Some(old) = old_handle {
            if old.role() == TranscodeRole::Ad {
                old.kill();
            }
        }
        self.schedule_tick(
            self.tuning.settle_after_kill(),
            Tick::PruneSlot { slot: old_slot },
        );

        self.publish_with_retries(self.runtime.active_slot).await;

        let duration = self.projector.movie_duration(&movie.file_path).await;
        let started_at = chrono::Utc::now();
        let ends_at = started_at
            + chrono::Duration::from_std(duration)
                .unwrap_or_else(|_| chrono::Duration::seconds(duration.as_secs() as i64));
        let current = CurrentMovie {
            title: movie.title.clone(),
            started_at,
            ends_at,
        };
        if let Err(err) = self.catalog.set_current(&self.id, Some(current.clone())) {
            warn!(channel = %self.id, error = %err, "failed to persist current movie");
        }
        let upcoming = self.catalog.queue(&self.id).unwrap_or_default();
        let rows = self
            .projector
            .project(Some(&current), upcoming.get(1..).unwrap_or(&[]))
            .await;
        if let Err(err) = self.catalog.set_schedule(&self.id, rows) {
            warn!(channel = %self.id, error = %err, "failed to persist schedule");
        }
        // The shift is the last persisted step of the transition, so a crash
        // here replays this movie from the head on restart.
        if let Err(err) = self.catalog.shift_queue(&self.id) {
            warn!(channel = %self.id, error = %err, "failed to shift queue");
        }
        self.current_title = Some(movie.title.clone());
        info!(
            channel = %self.id,
            title = %movie.title,
            slot = %self.runtime.active_slot,
            "now playing"
        );

        if let Some(generation) = self.current_gen {
            if self.current.is_none() {
                // The preload finished transcoding before the swap; its
                // output is still on disk. End-of-movie comes from the
                // probed runtime instead of a child exit.
                self.schedule_tick(duration, Tick::MovieEnded { generation });
            }
            self.schedule_tick(
                self.tuning.republish_interval(),
                Tick::Republish { generation },
            );
        }
        self.schedule_tick(self.tuning.preload_lag(), Tick::StartPreload);
    }

    async fn start_ad(&mut self) {
        if self.runtime.is_playing || self.current.is_some() {
            return;
        }
        prune_slot_files(&self.dir, self.runtime.active_slot);
        if let Err(err) = self.catalog.set_current(&self.id, None) {
            warn!(channel = %self.id, error = %err, "failed to clear current movie");
        }
        self.current_title = None;

        let spec = TranscodeSpec {
            input: self.ad_path.clone(),
            output_dir: self.dir.clone(),
            slot: self.runtime.active_slot,
            title: String::new(),
            role: TranscodeRole::Ad,
        };
        let generation = self.next_generation();
        match self
            .supervisor
            .launch(&spec, generation, self.transcode_tx.clone())
        {
            Ok(handle) => {
                self.current = Some(handle);
                self.current_gen = Some(generation);
            }
            Err(err) => {
                warn!(channel = %self.id, error = %err, "ad transcoder failed to start");
                self.schedule_tick(self.tuning.ad_restart(true), Tick::RetryAd);
            }
        }
    }

    async fn start_preload(&mut self) {
        if self.runtime.is_preloading || self.runtime.preload_ready {
            debug!(channel = %self.id, "preload already in flight");
            return;
        }
        loop {
            let head = match self.catalog.queue_head(&self.id) {
                Ok(Some(movie)) => movie,
                Ok(None) => {
                    if !self.runtime.is_playing && self.current_gen.is_none() {
                        self.pending_play = false;
                        self.start_ad().await;
                    }
                    return;
                }
                Err(err) => {
                    warn!(channel = %self.id, error = %err, "failed to read queue head");
                    return;
                }
            };

            prune_slot_files(&self.dir, self.runtime.next_slot);
            let spec = TranscodeSpec {
                input: head.file_path.clone(),
                output_dir: self.dir.clone(),
                slot: self.runtime.next_slot,
                title: head.title.clone(),
                role: TranscodeRole::Movie,
            };
            let generation = self.next_generation();
            match self
                .supervisor
                .launch(&spec, generation, self.transcode_tx.clone())
            {
                Ok(handle) => {
                    self.preload = Some(handle);
                    self.preload_gen = Some(generation);
                    self.runtime.begin_preload();
                    self.schedule_tick(
                        self.tuning.preload_deadline(),
                        Tick::PreloadDeadline { generation },
                    );
                    info!(
                        channel = %self.id,
                        title = %head.title,
                        slot = %self.runtime.next_slot,
                        "preload started"
                    );
                    return;
                }
                Err(err) => {
                    // Missing input and spawn refusal advance the queue the
                    // same way: drop the head, persist, try the next entry.
                    warn!(
                        channel = %self.id,
                        title = %head.title,
                        error = %err,
                        "dropping unplayable queue entry"
                    );
                    if let Err(err) = self.catalog.shift_queue(&self.id) {
                        warn!(channel = %self.id, error = %err, "failed to drop queue head");
                        return;
                    }
                    self.refresh_schedule().await;
                    // fall through to the next head
                }
            }
        }
    }

    async fn handle_transcode(&mut self, event: TranscodeEvent) {
        match event {
            TranscodeEvent::Ready { slot, generation } => {
                if self.preload_gen == Some(generation) {
                    self.runtime.preload_became_ready();
                    debug!(channel = %self.id, slot = %slot, "preload ready");
                    if self.pending_play {
                        self.play_next().await;
                    }
                } else if self.current_gen == Some(generation) {
                    if self.current.as_ref().map(TranscoderHandle::role) == Some(TranscodeRole::Ad)
                    {
                        // Let the ad's rolling window settle before the
                        // first publish can race an empty segment list.
                        self.schedule_tick(
                            self.tuning.ad_stabilize(),
                            Tick::PublishAd { generation },
                        );
                    }
                } else {
                    debug!(channel = %self.id, slot = %slot, generation, "stale ready event");
                }
            }
            TranscodeEvent::ReadinessTimeout { slot, generation } => {
                if self.preload_gen == Some(generation) {
                    warn!(channel = %self.id, slot = %slot, "preload readiness timed out");
                    self.fail_preload();
                } else if self.current_gen == Some(generation) {
                    warn!(channel = %self.id, slot = %slot, "ad readiness timed out");
                    if let Some(handle) = self.current.take() {
                        handle.kill();
                    }
                    self.current_gen = None;
                    self.runtime.stopped();
                    self.schedule_tick(self.tuning.ad_restart(true), Tick::RetryAd);
                } else {
                    debug!(channel = %self.id, slot = %slot, generation, "stale timeout event");
                }
            }
            TranscodeEvent::Exited {
                slot,
                generation,
                code,
            } => {
                if self.current_gen == Some(generation) {
                    let was_ad = self.current.as_ref().map(TranscoderHandle::role)
                        == Some(TranscodeRole::Ad);
                    self.current = None;
                    self.runtime.stopped();
                    if was_ad {
                        self.current_gen = None;
                        let queue_len = self.catalog.queue_len(&self.id).unwrap_or(0);
                        if queue_len == 0 {
                            debug!(channel = %self.id, code, "ad exited, restarting loop");
                            self.schedule_tick(self.tuning.ad_restart(code != 0), Tick::RetryAd);
                        } else {
                            prune_slot_files(&self.dir, self.runtime.active_slot);
                            self.pending_play = true;
                            self.schedule_tick(self.tuning.settle_after_kill(), Tick::StartPreload);
                        }
                    } else {
                        if code == 0 {
                            info!(channel = %self.id, slot = %slot, "movie finished");
                        } else {
                            // A crash mid-movie advances the queue anyway:
                            // the viewer sees a glitch, not a freeze.
                            warn!(channel = %self.id, slot = %slot, code, "movie transcoder died");
                        }
                        self.schedule_tick(
                            self.tuning.transition_delay(),
                            Tick::MovieEnded { generation },
                        );
                    }
                } else if self.preload_gen == Some(generation) {
                    if self.runtime.preload_ready && code == 0 {
                        // Finished transcoding a short clip; the output
                        // stays warm on disk for the coming swap.
                        debug!(channel = %self.id, slot = %slot, "preload completed early");
                        self.preload = None;
                    } else {
                        warn!(channel = %self.id, slot = %slot, code, "preload transcoder died");
                        self.fail_preload();
                    }
                } else {
                    debug!(channel = %self.id, slot = %slot, generation, code, "stale exit event");
                }
            }
        }
    }

    fn fail_preload(&mut self) {
        if let Some(handle) = self.preload.take() {
            handle.kill();
        }
        self.preload_gen = None;
        self.runtime.preload_failed();
        if self.pending_play {
            self.schedule_tick(self.tuning.play_next_retry(), Tick::RetryPlayNext);
        } else {
            self.schedule_tick(self.tuning.play_next_retry(), Tick::StartPreload);
        }
    }

    async fn handle_tick(&mut self, tick: Tick) {
        match tick {
            Tick::StartPreload => {
                let queue_len = self.catalog.queue_len(&self.id).unwrap_or(0);
                if queue_len > 0 && !self.runtime.is_preloading && !self.runtime.preload_ready {
                    self.start_preload().await;
                }
            }
            Tick::RetryPlayNext => self.play_next().await,
            Tick::RetryAd => {
                let queue_len = self.catalog.queue_len(&self.id).unwrap_or(0);
                if queue_len == 0 {
                    self.start_ad().await;
                } else {
                    self.pending_play = true;
                    self.start_preload().await;
                }
            }
            Tick::PublishAd { generation } => {
                if self.current_gen != Some(generation) {
                    return;
                }
                self.publish_with_retries(self.runtime.active_slot).await;
                self.runtime.enter_ad();
                info!(channel = %self.id, slot = %self.runtime.active_slot, "ad loop on air");
                self.schedule_tick(
                    self.tuning.republish_interval(),
                    Tick::Republish { generation },
                );
            }
            Tick::PreloadDeadline { generation } => {
                if self.preload_gen != Some(generation) || !self.runtime.is_preloading {
                    return;
                }
                // Last-resort manual check before declaring the preload dead.
                if slot_is_playable(&self.dir, self.runtime.next_slot) {
                    self.runtime.preload_became_ready();
                    if self.pending_play {
                        self.play_next().await;
                    }
                } else {
                    warn!(channel = %self.id, "preload deadline elapsed without playable output");
                    self.fail_preload();
                }
            }
            Tick::MovieEnded { generation } => {
                if self.current_gen != Some(generation) {
                    return;
                }
                self.current_gen = None;
                self.current = None;
                self.runtime.stopped();
                let queue_len = self.catalog.queue_len(&self.id).unwrap_or(0);
                if queue_len > 0 {
                    self.play_next().await;
                } else {
                    self.start_ad().await;
                }
            }
            Tick::PruneSlot { slot } => {
                let occupied = self.current.as_ref().map(TranscoderHandle::slot) == Some(slot)
                    || self.preload.as_ref().map(TranscoderHandle::slot) == Some(slot);
                if !occupied {
                    prune_slot_files(&self.dir, slot);
                }
            }
            Tick::Republish { generation } => {
                if self.current_gen != Some(generation) || !self.runtime.is_playing {
                    return;
                }
                // The transcoder's rolling window keeps moving, so the
                // public copy is refreshed while this generation plays.
                if let Err(err) = self.publisher.publish(self.runtime.active_slot) {
                    debug!(channel = %self.id, error = %err, "republish skipped");
                }
                self.schedule_tick(
                    self.tuning.republish_interval(),
                    Tick::Republish { generation },
                );
            }
        }
    }

    async fn publish_with_retries(&mut self, slot: Slot) {
        let attempts = self.tuning.publish_attempts.max(1);
        for attempt in 1..=attempts {
            match self.publisher.publish(slot) {
                Ok(()) => return,
                Err(err) if attempt < attempts => {
                    debug!(
                        channel = %self.id,
                        slot = %slot,
                        attempt,
                        error = %err,
                        "publish attempt failed"
                    );
                    tokio::time::sleep(self.tuning.publish_retry()).await;
                }
                Err(err) => {
                    // Keep the transition going; the republish cycle or the
                    // next preload recovers the public playlist.
                    warn!(channel = %self.id, slot = %slot, error = %err, "publish failed");
                }
            }
        }
    }

    async fn refresh_schedule(&mut self) {
        let record = match self.catalog.channel(&self.id) {
            Some(record) => record,
            None => return,
        };
        let rows = self
            .projector
            .project(record.current_movie.as_ref(), &record.queue)
            .await;
        if let Err(err) = self.catalog.set_schedule(&self.id, rows) {
            warn!(channel = %self.id, error = %err, "failed to persist schedule");
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.generations += 1;
        self.generations
    }

    fn schedule_tick(&self, after: Duration, tick: Tick) {
        let tx = self.tick_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(tick);
        });
    }
}

/// Removes one slot's playlists and segments, leaving the other slot and
/// the public names untouched.
pub fn prune_slot_files(dir: &Path, slot: Slot) {
    for name in [slot.stream_playlist(), slot.master_playlist()] {
        let path = dir.join(name);
        if let Err(err) = fs::remove_file(&path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %err, "failed to remove slot playlist");
            }
        }
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if slot.owns_segment(name) {
            if let Err(err) = fs::remove_file(entry.path()) {
                warn!(path = %entry.path().display(), error = %err, "failed to remove segment");
            }
        }
    }
}
