//! The shared playback session.
//!
//! One [`PlaybackSession`] owns the process's single [`MediaEngine`] and
//! retargets it to whichever feed position should play. All engine mutation
//! happens on the session worker task, which multiplexes three inputs:
//!
//! - commands from [`PlaybackSession`] handles (`play`, `pause_all`, ...),
//! - engine events tagged with the [`LoadToken`] of the load they belong to,
//! - the watchdog interval, armed while a preview is playing.
//!
//! Lifecycle notifications go out on a latest-wins [`StatusPublisher`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fp_cache::DataSource;
use fp_core::config::Config;
use fp_core::{Error, FeedPosition, PlayStatus, Result, StatusPublisher, StatusStream};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::buffer::{BufferPolicy, BufferPolicyBuilder};
use crate::engine::{
    EngineContext, EngineEvent, EngineEventKind, EngineEventSink, EngineFactory, EngineState,
    LoadRequest, LoadToken, MediaEngine, RenderTarget,
};

/// Builds a fresh buffer policy for each engine construction.
pub type PolicyFactory = Box<dyn Fn() -> Result<Box<dyn BufferPolicy>> + Send>;

/// Logical session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No target position.
    Idle,
    /// Loading the target's preview window.
    Buffering,
    /// Buffered but not yet playing.
    Ready,
    Playing,
    /// The target's preview finished or failed.
    Ended,
}

/// Point-in-time view of the session, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub position: Option<FeedPosition>,
    pub state: SessionState,
    pub playback_position: Duration,
    pub buffered: Duration,
    pub engines_created: usize,
}

enum Command {
    Play { position: FeedPosition, url: String },
    PauseAll,
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

/// Handle to the playback session worker. Cheap to clone.
#[derive(Clone)]
pub struct PlaybackSession {
    commands: mpsc::UnboundedSender<Command>,
    statuses: Arc<StatusPublisher>,
    engines_created: Arc<AtomicUsize>,
    cancel: CancellationToken,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl PlaybackSession {
    /// Start a session using the preview buffer policy from `config.buffer`.
    ///
    /// Fails with [`Error::Configuration`] on invalid thresholds. Must be
    /// called from within a Tokio runtime.
    pub fn spawn(
        config: &Config,
        factory: Arc<dyn EngineFactory>,
        data_source: Arc<dyn DataSource>,
        render_target: Arc<dyn RenderTarget>,
    ) -> Result<Self> {
        let buffer = config.buffer.clone();
        let policy: PolicyFactory = Box::new(move || {
            let policy = BufferPolicyBuilder::from_config(&buffer).build_preview()?;
            Ok(Box::new(policy) as Box<dyn BufferPolicy>)
        });
        Self::spawn_with_policy(config, policy, factory, data_source, render_target)
    }

    /// Start a session with a caller-chosen buffer policy.
    pub fn spawn_with_policy(
        config: &Config,
        policy: PolicyFactory,
        factory: Arc<dyn EngineFactory>,
        data_source: Arc<dyn DataSource>,
        render_target: Arc<dyn RenderTarget>,
    ) -> Result<Self> {
        config.check()?;
        for warning in config.validate() {
            tracing::warn!("Config: {warning}");
        }
        // Build the first policy now so bad thresholds fail here, not on first play.
        let first_policy = policy()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let statuses = Arc::new(StatusPublisher::new());
        let engines_created = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let worker = Worker {
            factory,
            data_source,
            render_target,
            statuses: Arc::clone(&statuses),
            next_policy: Some(first_policy),
            make_policy: policy,
            engine: None,
            events_tx: event_tx,
            engines_created: Arc::clone(&engines_created),
            cap: config.preview_cap(),
            watchdog_period: config.session.watchdog_interval(),
            watchdog: None,
            current: None,
            last_token: LoadToken::new(0),
            play_when_ready: false,
            state: SessionState::Idle,
        };
        let handle = tokio::spawn(worker.run(command_rx, event_rx, cancel.clone()));

        Ok(Self {
            commands: command_tx,
            statuses,
            engines_created,
            cancel,
            worker: Arc::new(Mutex::new(Some(handle))),
        })
    }

    /// Retarget the engine to `position` and start loading `url` there.
    pub fn play(&self, position: FeedPosition, url: impl Into<String>) -> Result<()> {
        self.send(Command::Play {
            position,
            url: url.into(),
        })
    }

    /// Stop whatever is playing and detach it from its surface.
    pub fn pause_all(&self) -> Result<()> {
        self.send(Command::PauseAll)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    /// Subscribe to `Started` / `Ended` notifications.
    pub fn subscribe(&self) -> StatusStream {
        self.statuses.subscribe()
    }

    /// Number of engines constructed so far. Never exceeds one.
    pub fn engines_created(&self) -> usize {
        self.engines_created.load(Ordering::SeqCst)
    }

    /// Stop the worker and release the engine.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Playback session worker panicked: {e}");
            }
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::SessionClosed)
    }
}

/// The position currently owning the engine.
#[derive(Debug, Clone, Copy)]
struct Target {
    position: FeedPosition,
    token: LoadToken,
    started: bool,
    finished: bool,
}

struct Worker {
    factory: Arc<dyn EngineFactory>,
    data_source: Arc<dyn DataSource>,
    render_target: Arc<dyn RenderTarget>,
    statuses: Arc<StatusPublisher>,
    next_policy: Option<Box<dyn BufferPolicy>>,
    make_policy: PolicyFactory,
    engine: Option<Box<dyn MediaEngine>>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    engines_created: Arc<AtomicUsize>,
    cap: Duration,
    watchdog_period: Duration,
    watchdog: Option<Interval>,
    current: Option<Target>,
    last_token: LoadToken,
    play_when_ready: bool,
    state: SessionState,
}

impl Worker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
        cancel: CancellationToken,
    ) {
        tracing::info!(cap_ms = self.cap.as_millis() as u64, "Playback session started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = events.recv() => self.handle_event(event),
                _ = tick_watchdog(&mut self.watchdog) => self.on_watchdog_tick(),
            }
        }

        self.release();
        tracing::info!("Playback session stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Play { position, url } => self.play(position, url),
            Command::PauseAll => self.pause_all(),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn play(&mut self, position: FeedPosition, url: String) {
        self.disarm_watchdog();
        let previous = self.current.take();
        if let Some(previous) = previous {
            if previous.position != position {
                self.render_target.unbind(previous.position);
            }
        }

        if let Err(e) = self.ensure_engine() {
            tracing::error!(position = %position, error = %e, "Failed to create playback engine");
            self.state = SessionState::Ended;
            self.statuses.publish(PlayStatus::Ended(position));
            return;
        }
        let Some(engine) = self.engine.as_mut() else {
            return;
        };

        self.last_token = self.last_token.next();
        let token = self.last_token;

        engine.stop();
        engine.set_play_when_ready(false);
        engine.set_volume(0.0);
        engine.load(LoadRequest { url: url.clone(), token });
        engine.prepare();
        self.render_target.bind(position, engine.handle());
        engine.set_play_when_ready(true);

        self.play_when_ready = true;
        self.state = SessionState::Buffering;
        self.current = Some(Target {
            position,
            token,
            started: false,
            finished: false,
        });
        tracing::info!(position = %position, %token, url = %url, "Retargeted engine");
    }

    fn pause_all(&mut self) {
        self.disarm_watchdog();
        if let Some(target) = self.current.take() {
            self.render_target.unbind(target.position);
            tracing::info!(position = %target.position, "Paused preview");
        }
        if let Some(engine) = self.engine.as_mut() {
            engine.set_play_when_ready(false);
            engine.stop();
        }
        self.play_when_ready = false;
        self.state = SessionState::Idle;
    }

    fn handle_event(&mut self, event: EngineEvent) {
        let Some(target) = self.current.as_mut() else {
            tracing::trace!(token = %event.token, "Engine event with no target");
            return;
        };
        if event.token != target.token || target.finished {
            tracing::trace!(token = %event.token, current = %target.token, "Stale engine event");
            return;
        }

        match event.kind {
            EngineEventKind::StateChanged(EngineState::Ready) => {
                if target.started {
                    return;
                }
                target.started = true;
                let position = target.position;
                self.state = if self.play_when_ready {
                    SessionState::Playing
                } else {
                    SessionState::Ready
                };
                tracing::info!(position = %position, "Preview started");
                self.statuses.publish(PlayStatus::Started(position));
                self.arm_watchdog();
            }
            EngineEventKind::StateChanged(EngineState::Buffering) => {
                if !target.started {
                    self.state = SessionState::Buffering;
                }
            }
            EngineEventKind::StateChanged(EngineState::Ended) => self.finish("clip ended"),
            EngineEventKind::StateChanged(EngineState::Idle) => {}
            EngineEventKind::Error(message) => {
                tracing::warn!(position = %target.position, error = %message, "Engine error");
                self.finish("engine error");
            }
        }
    }

    fn on_watchdog_tick(&mut self) {
        let Some(engine) = self.engine.as_ref() else {
            self.disarm_watchdog();
            return;
        };

        let played = engine.position();
        if played >= self.cap {
            self.finish("preview window elapsed");
        } else if engine.state() == EngineState::Ended {
            self.finish("clip ended");
        } else {
            tracing::trace!(played_ms = played.as_millis() as u64, "Watchdog tick");
        }
    }

    /// Stop playing the current target and announce `Ended` once.
    fn finish(&mut self, reason: &str) {
        self.disarm_watchdog();
        let Some(target) = self.current.as_mut() else {
            return;
        };
        if target.finished {
            return;
        }
        target.finished = true;
        let position = target.position;

        if let Some(engine) = self.engine.as_mut() {
            engine.set_play_when_ready(false);
        }
        self.play_when_ready = false;
        self.state = SessionState::Ended;

        tracing::info!(position = %position, reason, "Preview ended");
        self.statuses.publish(PlayStatus::Ended(position));
    }

    fn ensure_engine(&mut self) -> Result<()> {
        if self.engine.is_some() {
            return Ok(());
        }

        let buffer_policy = match self.next_policy.take() {
            Some(policy) => policy,
            None => (self.make_policy)()?,
        };
        let ctx = EngineContext {
            buffer_policy,
            data_source: Arc::clone(&self.data_source),
            events: EngineEventSink::new(self.events_tx.clone()),
        };

        let engine = self.factory.create(ctx)?;
        let created = self.engines_created.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(created, "Created playback engine");
        self.engine = Some(engine);
        Ok(())
    }

    fn arm_watchdog(&mut self) {
        let mut interval =
            tokio::time::interval_at(Instant::now() + self.watchdog_period, self.watchdog_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.watchdog = Some(interval);
    }

    fn disarm_watchdog(&mut self) {
        self.watchdog = None;
    }

    fn snapshot(&self) -> SessionSnapshot {
        let (playback_position, buffered) = match self.engine.as_ref() {
            Some(engine) => (engine.position(), engine.buffered()),
            None => (Duration::ZERO, Duration::ZERO),
        };
        SessionSnapshot {
            position: self.current.map(|t| t.position),
            state: self.state,
            playback_position,
            buffered,
            engines_created: self.engines_created.load(Ordering::SeqCst),
        }
    }

    fn release(&mut self) {
        self.disarm_watchdog();
        if let Some(target) = self.current.take() {
            self.render_target.unbind(target.position);
        }
        if let Some(mut engine) = self.engine.take() {
            engine.set_play_when_ready(false);
            engine.stop();
            engine.release();
        }
    }
}

/// Next watchdog tick, or never while disarmed.
async fn tick_watchdog(watchdog: &mut Option<Interval>) {
    match watchdog {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
