//! Seams to the external decode/render engine.
//!
//! The engine itself (demux, decode, render) lives outside this workspace.
//! A [`MediaEngine`] is built once by an [`EngineFactory`] and then driven
//! exclusively from the session worker. It reports state changes back through
//! an [`EngineEventSink`], tagging each event with the [`LoadToken`] of the
//! load it belongs to.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use fp_cache::DataSource;
use fp_core::{FeedPosition, Result};
use tokio::sync::mpsc;

use crate::buffer::BufferPolicy;

/// Identifies one `load` request; events from superseded loads are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadToken(u64);

impl LoadToken {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for LoadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "load-{}", self.0)
    }
}

/// Opaque reference to the engine's video output, handed to the render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineHandle(u64);

impl EngineHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Engine playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Nothing loaded, or stopped.
    Idle,
    /// Loading media; not enough buffered to play.
    Buffering,
    /// Enough media buffered; plays if play-when-ready is set.
    Ready,
    /// Reached the end of the media.
    Ended,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEventKind {
    StateChanged(EngineState),
    /// Decode or network failure on the active load.
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineEvent {
    pub token: LoadToken,
    pub kind: EngineEventKind,
}

/// Where an engine reports its events.
#[derive(Debug, Clone)]
pub struct EngineEventSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineEventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { tx }
    }

    pub fn state_changed(&self, token: LoadToken, state: EngineState) {
        self.send(EngineEvent {
            token,
            kind: EngineEventKind::StateChanged(state),
        });
    }

    pub fn error(&self, token: LoadToken, message: impl Into<String>) {
        self.send(EngineEvent {
            token,
            kind: EngineEventKind::Error(message.into()),
        });
    }

    fn send(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Engine event dropped; session has shut down");
        }
    }
}

/// What to load next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub url: String,
    pub token: LoadToken,
}

/// The single, reusable decode/render engine.
///
/// Methods are called only from the session worker and must not block. The
/// engine does its loading elsewhere and reports progress through the sink it
/// was built with. An engine whose source is fully buffered but shorter than
/// the policy's start threshold should report `Ready` once loading is done.
pub trait MediaEngine: Send {
    fn handle(&self) -> EngineHandle;

    /// Replace the current media item.
    fn load(&mut self, request: LoadRequest);

    /// Begin loading the current media item.
    fn prepare(&mut self);

    /// Stop playback and discard buffered media.
    fn stop(&mut self);

    /// Free all engine resources. The engine is not used afterwards.
    fn release(&mut self);

    fn set_play_when_ready(&mut self, play_when_ready: bool);

    fn set_volume(&mut self, volume: f32);

    /// Current playback position within the media.
    fn position(&self) -> Duration;

    /// Media buffered ahead of the playback position.
    fn buffered(&self) -> Duration;

    fn state(&self) -> EngineState;
}

/// Everything an engine is built with.
pub struct EngineContext {
    pub buffer_policy: Box<dyn BufferPolicy>,
    pub data_source: Arc<dyn DataSource>,
    pub events: EngineEventSink,
}

/// Constructs the engine. Called at most once per successful construction.
pub trait EngineFactory: Send + Sync {
    fn create(&self, ctx: EngineContext) -> Result<Box<dyn MediaEngine>>;
}

/// The feed's view layer: attaches the engine's output to one item's surface.
pub trait RenderTarget: Send + Sync {
    fn bind(&self, position: FeedPosition, engine: EngineHandle);

    fn unbind(&self, position: FeedPosition);
}
