//! Composition root: one cache, one playback session, any number of feeds.

use std::sync::Arc;

use fp_cache::{CacheLayer, HttpFetcher};
use fp_core::config::Config;
use fp_core::{Error, FeedPosition, Result};
use fp_playback::{EngineFactory, PlaybackSession, RenderTarget};
use parking_lot::Mutex;

use crate::scheduler::{PreviewListener, PreviewScheduler, SchedulerHandle, Viewport};

/// Maps feed positions to clip URLs and forwards play requests to the session.
pub struct FeedBinder {
    session: PlaybackSession,
    urls: Vec<String>,
    last_play: Mutex<Option<FeedPosition>>,
}

impl FeedBinder {
    pub fn new(session: PlaybackSession, urls: Vec<String>) -> Self {
        Self {
            session,
            urls,
            last_play: Mutex::new(None),
        }
    }

    pub fn url(&self, position: FeedPosition) -> Option<String> {
        self.urls.get(position.index()).cloned()
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// The position most recently asked to play, cleared by `pause_all`.
    pub fn last_play(&self) -> Option<FeedPosition> {
        *self.last_play.lock()
    }
}

impl PreviewListener for FeedBinder {
    fn play(&self, position: FeedPosition) -> Result<()> {
        let url = self.url(position).ok_or(Error::UnknownPosition(position))?;
        self.session.play(position, url)?;
        *self.last_play.lock() = Some(position);
        Ok(())
    }

    fn pause_all(&self) {
        *self.last_play.lock() = None;
        if let Err(e) = self.session.pause_all() {
            tracing::warn!(error = %e, "Failed to pause previews");
        }
    }
}

/// A feed wired to the shared session.
pub struct AttachedFeed {
    pub scheduler: SchedulerHandle,
    pub binder: Arc<FeedBinder>,
}

/// Owns the process-wide cache and playback session.
pub struct FeedPreview {
    config: Config,
    cache: Arc<CacheLayer>,
    session: PlaybackSession,
}

impl FeedPreview {
    /// Build with a disk-backed cache under `config.cache.dir` and an HTTP
    /// fetcher. Fails on invalid buffer thresholds.
    pub fn new(
        config: Config,
        engine_factory: Arc<dyn EngineFactory>,
        render_target: Arc<dyn RenderTarget>,
    ) -> Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(&config.cache));
        let cache = Arc::new(CacheLayer::new(&config.cache, fetcher));
        Self::with_cache(config, cache, engine_factory, render_target)
    }

    /// Build around an existing cache.
    pub fn with_cache(
        config: Config,
        cache: Arc<CacheLayer>,
        engine_factory: Arc<dyn EngineFactory>,
        render_target: Arc<dyn RenderTarget>,
    ) -> Result<Self> {
        let session = PlaybackSession::spawn(
            &config,
            engine_factory,
            Arc::clone(&cache) as Arc<dyn fp_cache::DataSource>,
            render_target,
        )?;
        tracing::info!(
            cache_dir = %config.cache.dir.display(),
            capacity_bytes = config.cache.capacity_bytes,
            cap_ms = config.buffer.max_buffer_ms,
            "Feed preview ready"
        );
        Ok(Self {
            config,
            cache,
            session,
        })
    }

    /// Start scheduling previews for a feed shown in `viewport`.
    pub fn attach(&self, viewport: Arc<dyn Viewport>, items: Vec<String>) -> AttachedFeed {
        let binder = Arc::new(FeedBinder::new(self.session.clone(), items));
        let statuses = self.session.subscribe();
        let scheduler =
            PreviewScheduler::spawn(viewport, Arc::clone(&binder) as Arc<dyn PreviewListener>, statuses);
        AttachedFeed { scheduler, binder }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    pub fn session(&self) -> &PlaybackSession {
        &self.session
    }

    /// Stop the session worker and release the engine.
    pub async fn shutdown(&self) {
        self.session.shutdown().await;
    }
}
