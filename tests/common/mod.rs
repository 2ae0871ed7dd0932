//! Shared test harness for integration tests.
//!
//! Provides [`FeedHarness`], which wires a [`FeedPreview`] to an in-memory
//! fetcher, a swappable byte store and [`SimEngine`], a fake engine that
//! loads through the real buffer policy and plays on Tokio's clock. Tests
//! using it run with `start_paused = true`.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use feedpreview::scheduler::{PreviewListener, ScrollState, Viewport};
use feedpreview::{AttachedFeed, Config, FeedPosition, FeedPreview, Result};
use fp_cache::{ByteRange, ByteStore, CacheLayer, DataSource, Fetcher, MemoryByteStore, StoredEntry};
use fp_core::Error;
use fp_playback::{
    BufferPolicy, EngineContext, EngineEventSink, EngineFactory, EngineHandle, EngineState,
    LoadRequest, LoadToken, MediaEngine, RenderTarget, TrackType,
};

/// Simulated network time per loaded chunk.
pub const CHUNK_LOAD_TIME: Duration = Duration::from_millis(50);
/// Media per loaded chunk.
pub const CHUNK_MEDIA: Duration = Duration::from_millis(500);
/// Clip length unless overridden.
pub const DEFAULT_CLIP: Duration = Duration::from_secs(10);

pub fn pos(i: usize) -> FeedPosition {
    FeedPosition::new(i)
}

pub fn clip_url(i: usize) -> String {
    format!("https://cdn.test/clips/{i}.mp4")
}

// ---------------------------------------------------------------------------
// Network and storage
// ---------------------------------------------------------------------------

/// Serves registered bodies from memory and counts requests.
#[derive(Default)]
pub struct MemoryFetcher {
    bodies: Mutex<HashMap<String, Bytes>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MemoryFetcher {
    pub fn insert(&self, url: impl Into<String>, body: impl Into<Bytes>) {
        self.bodies.lock().insert(url.into(), body.into());
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, url: &str, range: Option<ByteRange>) -> Result<Bytes> {
        *self.calls.lock().entry(url.to_string()).or_default() += 1;
        let body = self
            .bodies
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::fetch(url, "unexpected status 404 Not Found"))?;
        Ok(match range {
            Some(range) => range.slice(&body),
            None => body,
        })
    }
}

/// A store that fails every read and write.
pub struct FailingStore;

impl ByteStore for FailingStore {
    fn scan(&self) -> io::Result<Vec<StoredEntry>> {
        Ok(Vec::new())
    }

    fn read(&self, _key: &str) -> io::Result<Bytes> {
        Err(io::Error::other("disk I/O error"))
    }

    fn write(&self, _key: &str, _data: &[u8]) -> io::Result<()> {
        Err(io::Error::other("disk I/O error"))
    }

    fn remove(&self, _key: &str) -> io::Result<()> {
        Err(io::Error::other("disk I/O error"))
    }
}

// ---------------------------------------------------------------------------
// SimEngine
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SimState {
    request: Option<LoadRequest>,
    /// Token of the load in progress; cleared by `stop`.
    active: Option<LoadToken>,
    state: Option<EngineState>,
    buffered: Duration,
    duration: Duration,
    play_when_ready: bool,
    /// When playback began, or `None` while not playing.
    playing_since: Option<Instant>,
    /// Playback position accumulated before `playing_since`.
    played: Duration,
    segments: Vec<BytesMut>,
    volume: Option<f32>,
}

impl SimState {
    fn position(&self) -> Duration {
        let running = self.playing_since.map_or(Duration::ZERO, |t| t.elapsed());
        (self.played + running).min(self.duration)
    }

    fn freeze(&mut self) {
        self.played = self.position();
        self.playing_since = None;
    }

    fn maybe_start(&mut self) {
        if self.play_when_ready
            && self.state == Some(EngineState::Ready)
            && self.playing_since.is_none()
        {
            self.playing_since = Some(Instant::now());
        }
    }
}

/// Fake engine: loads through the data source and the buffer policy, then
/// plays in real (Tokio) time.
pub struct SimEngine {
    state: Arc<Mutex<SimState>>,
    policy: Arc<Mutex<Box<dyn BufferPolicy>>>,
    data_source: Arc<dyn DataSource>,
    events: EngineEventSink,
    durations: Arc<HashMap<String, Duration>>,
    log: Arc<Mutex<Vec<String>>>,
}

impl MediaEngine for SimEngine {
    fn handle(&self) -> EngineHandle {
        EngineHandle::new(1)
    }

    fn load(&mut self, request: LoadRequest) {
        self.log.lock().push(format!("load {}", request.url));
        let mut state = self.state.lock();
        state.duration = self
            .durations
            .get(&request.url)
            .copied()
            .unwrap_or(DEFAULT_CLIP);
        state.request = Some(request);
        state.state = Some(EngineState::Idle);
        state.buffered = Duration::ZERO;
        state.played = Duration::ZERO;
        state.playing_since = None;
    }

    fn prepare(&mut self) {
        let Some(request) = self.state.lock().request.clone() else {
            return;
        };
        self.state.lock().active = Some(request.token);
        self.policy.lock().on_prepared();
        tokio::spawn(load_clip(
            request,
            Arc::clone(&self.state),
            Arc::clone(&self.policy),
            Arc::clone(&self.data_source),
            self.events.clone(),
        ));
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        state.active = None;
        state.state = Some(EngineState::Idle);
        state.freeze();
        state.buffered = Duration::ZERO;
        state.segments.clear();
        drop(state);
        self.policy.lock().on_stopped();
    }

    fn release(&mut self) {
        self.log.lock().push("release".to_string());
        self.policy.lock().on_released();
    }

    fn set_play_when_ready(&mut self, play_when_ready: bool) {
        let mut state = self.state.lock();
        state.play_when_ready = play_when_ready;
        if play_when_ready {
            state.maybe_start();
        } else {
            state.freeze();
        }
    }

    fn set_volume(&mut self, volume: f32) {
        self.state.lock().volume = Some(volume);
    }

    fn position(&self) -> Duration {
        self.state.lock().position()
    }

    fn buffered(&self) -> Duration {
        self.state.lock().buffered
    }

    fn state(&self) -> EngineState {
        let state = self.state.lock();
        match state.state {
            Some(EngineState::Ready) if state.position() >= state.duration => EngineState::Ended,
            Some(s) => s,
            None => EngineState::Idle,
        }
    }
}

async fn load_clip(
    request: LoadRequest,
    state: Arc<Mutex<SimState>>,
    policy: Arc<Mutex<Box<dyn BufferPolicy>>>,
    data_source: Arc<dyn DataSource>,
    events: EngineEventSink,
) {
    let token = request.token;
    let still_active = |s: &SimState| s.active == Some(token);

    if let Err(e) = data_source.open(&request.url).await {
        if still_active(&state.lock()) {
            events.error(token, e.to_string());
        }
        return;
    }

    {
        let mut s = state.lock();
        if !still_active(&s) {
            return;
        }
        s.state = Some(EngineState::Buffering);
    }
    policy.lock().on_tracks_selected(&[TrackType::Video, TrackType::Audio]);
    events.state_changed(token, EngineState::Buffering);

    loop {
        tokio::time::sleep(CHUNK_LOAD_TIME).await;

        let mut s = state.lock();
        if !still_active(&s) {
            return;
        }
        let mut policy = policy.lock();
        let position_us = s.position().as_micros() as i64;
        let buffered_us = s.buffered.as_micros() as i64;

        if s.buffered < s.duration && policy.should_continue_loading(position_us, buffered_us, 1.0) {
            s.buffered = (s.buffered + CHUNK_MEDIA).min(s.duration);
            let segment = policy.allocator().allocate();
            s.segments.push(segment);
        }

        let buffered_us = s.buffered.as_micros() as i64;
        let fully_loaded = s.buffered >= s.duration;
        if fully_loaded || policy.should_start_playback(buffered_us, 1.0, false, None) {
            s.state = Some(EngineState::Ready);
            s.maybe_start();
            drop(policy);
            drop(s);
            events.state_changed(token, EngineState::Ready);
            return;
        }
    }
}

/// Builds [`SimEngine`]s and counts constructions.
#[derive(Default)]
pub struct SimFactory {
    pub created: AtomicUsize,
    pub durations: HashMap<String, Duration>,
    pub log: Arc<Mutex<Vec<String>>>,
    state: Mutex<Option<Arc<Mutex<SimState>>>>,
}

impl SimFactory {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter_map(|l| l.strip_prefix("load ").map(str::to_string))
            .collect()
    }

    /// Volume last set on the engine.
    pub fn volume(&self) -> Option<f32> {
        self.state.lock().as_ref().and_then(|s| s.lock().volume)
    }
}

impl EngineFactory for SimFactory {
    fn create(&self, ctx: EngineContext) -> Result<Box<dyn MediaEngine>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let state = Arc::new(Mutex::new(SimState::default()));
        *self.state.lock() = Some(Arc::clone(&state));
        Ok(Box::new(SimEngine {
            state,
            policy: Arc::new(Mutex::new(ctx.buffer_policy)),
            data_source: ctx.data_source,
            events: ctx.events,
            durations: Arc::new(self.durations.clone()),
            log: Arc::clone(&self.log),
        }))
    }
}

// ---------------------------------------------------------------------------
// View layer
// ---------------------------------------------------------------------------

/// Records bind/unbind calls.
#[derive(Default)]
pub struct Surfaces {
    pub log: Mutex<Vec<String>>,
}

impl Surfaces {
    pub fn last(&self) -> Option<String> {
        self.log.lock().last().cloned()
    }
}

impl RenderTarget for Surfaces {
    fn bind(&self, position: FeedPosition, _engine: EngineHandle) {
        self.log.lock().push(format!("bind {position}"));
    }

    fn unbind(&self, position: FeedPosition) {
        self.log.lock().push(format!("unbind {position}"));
    }
}

/// A viewport whose scroll state and visible range tests set directly.
pub struct TestViewport {
    inner: Mutex<(ScrollState, Option<usize>, Option<usize>)>,
}

impl TestViewport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new((ScrollState::Idle, None, None)),
        })
    }

    pub fn showing(first: usize, last: usize) -> Arc<Self> {
        let viewport = Self::new();
        viewport.set_visible(Some(first), Some(last));
        viewport
    }

    pub fn set_visible(&self, first: Option<usize>, last: Option<usize>) {
        let mut inner = self.inner.lock();
        inner.1 = first;
        inner.2 = last;
    }

    pub fn set_scroll_state(&self, state: ScrollState) {
        self.inner.lock().0 = state;
    }
}

impl Viewport for TestViewport {
    fn scroll_state(&self) -> ScrollState {
        self.inner.lock().0
    }

    fn visible_range(&self) -> (Option<usize>, Option<usize>) {
        let inner = self.inner.lock();
        (inner.1, inner.2)
    }
}

/// A listener call seen by [`RecordingListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Play(FeedPosition),
    PauseAll,
}

/// Listener that reports every call on a channel and can refuse positions.
pub struct RecordingListener {
    tx: mpsc::UnboundedSender<Call>,
    refused: Mutex<Vec<FeedPosition>>,
}

impl RecordingListener {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Call>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx,
                refused: Mutex::new(Vec::new()),
            }),
            rx,
        )
    }

    pub fn refuse(&self, position: FeedPosition) {
        self.refused.lock().push(position);
    }
}

impl PreviewListener for RecordingListener {
    fn play(&self, position: FeedPosition) -> Result<()> {
        let _ = self.tx.send(Call::Play(position));
        if self.refused.lock().contains(&position) {
            return Err(Error::UnknownPosition(position));
        }
        Ok(())
    }

    fn pause_all(&self) {
        let _ = self.tx.send(Call::PauseAll);
    }
}

/// Drain every call already delivered.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<Call>) -> Vec<Call> {
    let mut calls = Vec::new();
    while let Ok(call) = rx.try_recv() {
        calls.push(call);
    }
    calls
}

// ---------------------------------------------------------------------------
// FeedHarness
// ---------------------------------------------------------------------------

/// A full feed stack with fakes at the engine, network and view seams.
pub struct FeedHarness {
    pub preview: FeedPreview,
    pub cache: Arc<CacheLayer>,
    pub fetcher: Arc<MemoryFetcher>,
    pub factory: Arc<SimFactory>,
    pub surfaces: Arc<Surfaces>,
    pub items: Vec<String>,
}

impl FeedHarness {
    /// `count` one-kilobyte clips backed by an in-memory store.
    pub fn new(count: usize) -> Self {
        let store: Arc<dyn ByteStore> = Arc::new(MemoryByteStore::new());
        Self::with_store(count, HashMap::new(), move || Ok(Arc::clone(&store)))
    }

    /// In-memory store with a caller-supplied configuration.
    pub fn with_config(count: usize, config: Config) -> Self {
        let store: Arc<dyn ByteStore> = Arc::new(MemoryByteStore::new());
        Self::build(count, config, HashMap::new(), move || Ok(Arc::clone(&store)))
    }

    pub fn with_store<F>(count: usize, durations: HashMap<String, Duration>, open_store: F) -> Self
    where
        F: Fn() -> io::Result<Arc<dyn ByteStore>> + Send + Sync + 'static,
    {
        Self::build(count, Config::default(), durations, open_store)
    }

    fn build<F>(count: usize, config: Config, durations: HashMap<String, Duration>, open_store: F) -> Self
    where
        F: Fn() -> io::Result<Arc<dyn ByteStore>> + Send + Sync + 'static,
    {
        let fetcher = Arc::new(MemoryFetcher::default());
        let items: Vec<String> = (0..count).map(clip_url).collect();
        for url in &items {
            fetcher.insert(url.clone(), vec![0u8; 1024]);
        }

        let cache = Arc::new(CacheLayer::with_store(
            config.cache.capacity_bytes,
            fetcher.clone(),
            open_store,
        ));
        let factory = Arc::new(SimFactory {
            durations,
            ..SimFactory::default()
        });
        let surfaces = Arc::new(Surfaces::default());
        let preview =
            FeedPreview::with_cache(config, Arc::clone(&cache), factory.clone(), surfaces.clone())
                .expect("valid config");

        Self {
            preview,
            cache,
            fetcher,
            factory,
            surfaces,
            items,
        }
    }

    pub fn attach(&self, viewport: Arc<TestViewport>) -> AttachedFeed {
        self.preview.attach(viewport, self.items.clone())
    }
}
