//! Buffer policies: when the engine keeps loading and when it may start.
//!
//! The engine consults its [`BufferPolicy`] on every loading tick. Two
//! implementations are provided:
//!
//! - [`PreviewBufferPolicy`]: buffers a single short window up front and never
//!   loads again once playback has advanced. Playback starts only when that
//!   whole window is buffered.
//! - [`LongFormBufferPolicy`]: classic min/max hysteresis for full-length
//!   viewing.

use std::sync::Arc;
use std::time::Duration;

use fp_core::config::BufferConfig;
use fp_core::Result;

use crate::allocator::{Allocator, SEGMENT_SIZE};

/// Byte budget used before tracks are selected, and the floor afterwards.
pub const MIN_TARGET_BUFFER_BYTES: usize = 200 * SEGMENT_SIZE;

/// Buffered media below which the long-form policy always warns about
/// hitting the byte budget.
const LOW_BUFFER_WARNING_US: i64 = 500_000;

/// Kind of media a selected track carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackType {
    /// Muxed stream carrying video, audio and text together.
    Default,
    Audio,
    Video,
    Text,
    Metadata,
    CameraMotion,
    Image,
    /// A renderer with no track selected.
    None,
}

impl TrackType {
    /// Default byte budget for one track of this type.
    pub fn default_buffer_size(self) -> usize {
        match self {
            TrackType::Default => {
                TrackType::Video.default_buffer_size()
                    + TrackType::Audio.default_buffer_size()
                    + TrackType::Text.default_buffer_size()
            }
            TrackType::Video => 2000 * SEGMENT_SIZE,
            TrackType::Audio => 200 * SEGMENT_SIZE,
            TrackType::Text
            | TrackType::Metadata
            | TrackType::CameraMotion
            | TrackType::Image => 2 * SEGMENT_SIZE,
            TrackType::None => 0,
        }
    }
}

/// Byte budget for a set of selected tracks.
pub fn target_buffer_bytes_for(tracks: &[TrackType]) -> usize {
    let sum: usize = tracks.iter().map(|t| t.default_buffer_size()).sum();
    sum.max(MIN_TARGET_BUFFER_BYTES)
}

/// Convert buffered media time to wall-clock playout time at `speed`.
pub fn playout_duration_us(media_duration_us: i64, speed: f32) -> i64 {
    if speed == 1.0 || speed <= 0.0 {
        return media_duration_us;
    }
    (media_duration_us as f64 / speed as f64).round() as i64
}

fn media_duration_for_playout_us(playout_duration_us: i64, speed: f32) -> i64 {
    if speed == 1.0 || speed <= 0.0 {
        return playout_duration_us;
    }
    (playout_duration_us as f64 * speed as f64).round() as i64
}

/// Observable policy state, reset on every retarget or stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPolicyState {
    pub is_loading: bool,
    pub target_buffer_bytes: usize,
    /// Buffered media required before playback may start.
    pub min_buffer_duration_for_playback_start: Duration,
    /// Upper bound on buffered media; for previews, also the preview cap.
    pub max_buffer_duration: Duration,
}

/// Strategy consulted by the engine to drive loading and playback start.
///
/// Times are in microseconds of media; `playback_speed` is a rate multiplier.
pub trait BufferPolicy: Send {
    /// Whether the engine should keep fetching media.
    fn should_continue_loading(
        &mut self,
        playback_position_us: i64,
        buffered_duration_us: i64,
        playback_speed: f32,
    ) -> bool;

    /// Whether enough media is buffered to start (or resume) playback.
    fn should_start_playback(
        &mut self,
        buffered_duration_us: i64,
        playback_speed: f32,
        rebuffering: bool,
        target_live_offset_us: Option<i64>,
    ) -> bool;

    fn on_prepared(&mut self);

    fn on_tracks_selected(&mut self, tracks: &[TrackType]);

    fn on_stopped(&mut self);

    fn on_released(&mut self);

    fn allocator(&self) -> Arc<Allocator>;

    fn back_buffer_duration_us(&self) -> i64;

    fn retain_back_buffer_from_keyframe(&self) -> bool;

    fn state(&self) -> BufferPolicyState;
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder shared by both policies. Thresholds are validated at build time.
#[derive(Debug, Clone, Default)]
pub struct BufferPolicyBuilder {
    allocator: Option<Arc<Allocator>>,
    config: BufferConfig,
}

impl BufferPolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration section.
    pub fn from_config(config: &BufferConfig) -> Self {
        Self {
            allocator: None,
            config: config.clone(),
        }
    }

    pub fn allocator(mut self, allocator: Arc<Allocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    pub fn buffer_durations_ms(
        mut self,
        min_buffer_ms: u32,
        max_buffer_ms: u32,
        buffer_for_playback_ms: u32,
        buffer_for_playback_after_rebuffer_ms: u32,
    ) -> Self {
        self.config.min_buffer_ms = min_buffer_ms;
        self.config.max_buffer_ms = max_buffer_ms;
        self.config.buffer_for_playback_ms = buffer_for_playback_ms;
        self.config.buffer_for_playback_after_rebuffer_ms = buffer_for_playback_after_rebuffer_ms;
        self
    }

    /// Fixed byte budget; `None` derives it from the selected tracks.
    pub fn target_buffer_bytes(mut self, bytes: Option<usize>) -> Self {
        self.config.target_buffer_bytes = bytes;
        self
    }

    pub fn prioritize_time_over_size_thresholds(mut self, prioritize: bool) -> Self {
        self.config.prioritize_time_over_size_thresholds = prioritize;
        self
    }

    pub fn back_buffer(mut self, duration_ms: u32, retain_from_keyframe: bool) -> Self {
        self.config.back_buffer_duration_ms = duration_ms;
        self.config.retain_back_buffer_from_keyframe = retain_from_keyframe;
        self
    }

    pub fn build_preview(self) -> Result<PreviewBufferPolicy> {
        Ok(PreviewBufferPolicy {
            budget: self.into_budget()?,
        })
    }

    pub fn build_long_form(self) -> Result<LongFormBufferPolicy> {
        Ok(LongFormBufferPolicy {
            budget: self.into_budget()?,
        })
    }

    fn into_budget(self) -> Result<Budget> {
        self.config.check()?;
        let c = &self.config;
        Ok(Budget {
            allocator: self.allocator.unwrap_or_default(),
            min_buffer_us: ms_to_us(c.min_buffer_ms),
            max_buffer_us: ms_to_us(c.max_buffer_ms),
            buffer_for_playback_us: ms_to_us(c.buffer_for_playback_ms),
            buffer_for_playback_after_rebuffer_us: ms_to_us(c.buffer_for_playback_after_rebuffer_ms),
            target_override: c.target_buffer_bytes,
            target_buffer_bytes: c.target_buffer_bytes.unwrap_or(MIN_TARGET_BUFFER_BYTES),
            prioritize_time_over_size_thresholds: c.prioritize_time_over_size_thresholds,
            back_buffer_duration_us: ms_to_us(c.back_buffer_duration_ms),
            retain_back_buffer_from_keyframe: c.retain_back_buffer_from_keyframe,
            is_loading: false,
        })
    }
}

fn ms_to_us(ms: u32) -> i64 {
    i64::from(ms) * 1000
}

fn us_to_duration(us: i64) -> Duration {
    Duration::from_micros(us.max(0) as u64)
}

/// Thresholds and byte accounting common to both policies.
#[derive(Debug)]
struct Budget {
    allocator: Arc<Allocator>,
    min_buffer_us: i64,
    max_buffer_us: i64,
    buffer_for_playback_us: i64,
    buffer_for_playback_after_rebuffer_us: i64,
    target_override: Option<usize>,
    target_buffer_bytes: usize,
    prioritize_time_over_size_thresholds: bool,
    back_buffer_duration_us: i64,
    retain_back_buffer_from_keyframe: bool,
    is_loading: bool,
}

impl Budget {
    fn on_tracks_selected(&mut self, tracks: &[TrackType]) {
        self.target_buffer_bytes = self
            .target_override
            .unwrap_or_else(|| target_buffer_bytes_for(tracks));
        self.allocator.set_target_buffer_size(self.target_buffer_bytes);
        tracing::trace!(target_bytes = self.target_buffer_bytes, ?tracks, "Tracks selected");
    }

    fn reset(&mut self, reset_allocator: bool) {
        self.target_buffer_bytes = self.target_override.unwrap_or(MIN_TARGET_BUFFER_BYTES);
        self.is_loading = false;
        if reset_allocator {
            self.allocator.reset();
        }
    }

    fn target_reached(&self) -> bool {
        self.allocator.total_bytes_allocated() >= self.target_buffer_bytes
    }

    fn state(&self, start_threshold_us: i64) -> BufferPolicyState {
        BufferPolicyState {
            is_loading: self.is_loading,
            target_buffer_bytes: self.target_buffer_bytes,
            min_buffer_duration_for_playback_start: us_to_duration(start_threshold_us),
            max_buffer_duration: us_to_duration(self.max_buffer_us),
        }
    }
}

macro_rules! delegate_lifecycle {
    () => {
        fn on_prepared(&mut self) {
            self.budget.reset(false);
        }

        fn on_tracks_selected(&mut self, tracks: &[TrackType]) {
            self.budget.on_tracks_selected(tracks);
        }

        fn on_stopped(&mut self) {
            self.budget.reset(true);
        }

        fn on_released(&mut self) {
            self.budget.reset(true);
        }

        fn allocator(&self) -> Arc<Allocator> {
            Arc::clone(&self.budget.allocator)
        }

        fn back_buffer_duration_us(&self) -> i64 {
            self.budget.back_buffer_duration_us
        }

        fn retain_back_buffer_from_keyframe(&self) -> bool {
            self.budget.retain_back_buffer_from_keyframe
        }
    };
}

// ---------------------------------------------------------------------------
// PreviewBufferPolicy
// ---------------------------------------------------------------------------

/// Load one short window, start when all of it is buffered, never refill.
#[derive(Debug)]
pub struct PreviewBufferPolicy {
    budget: Budget,
}

impl PreviewBufferPolicy {
    pub fn builder() -> BufferPolicyBuilder {
        BufferPolicyBuilder::new()
    }

    /// Policy with preview defaults capped at `max_buffer_ms`.
    pub fn with_cap(max_buffer_ms: u32) -> Result<Self> {
        BufferPolicyBuilder::from_config(&BufferConfig::preview(max_buffer_ms)).build_preview()
    }

    /// The preview window.
    pub fn cap(&self) -> Duration {
        us_to_duration(self.budget.max_buffer_us)
    }
}

impl BufferPolicy for PreviewBufferPolicy {
    fn should_continue_loading(
        &mut self,
        playback_position_us: i64,
        buffered_duration_us: i64,
        _playback_speed: f32,
    ) -> bool {
        // Byte budget sizes the allocator only; the window always fills to the cap.
        self.budget.is_loading =
            buffered_duration_us <= self.budget.max_buffer_us && playback_position_us == 0;
        self.budget.is_loading
    }

    fn should_start_playback(
        &mut self,
        buffered_duration_us: i64,
        playback_speed: f32,
        _rebuffering: bool,
        _target_live_offset_us: Option<i64>,
    ) -> bool {
        playout_duration_us(buffered_duration_us, playback_speed) >= self.budget.max_buffer_us
    }

    delegate_lifecycle!();

    fn state(&self) -> BufferPolicyState {
        self.budget.state(self.budget.max_buffer_us)
    }
}

// ---------------------------------------------------------------------------
// LongFormBufferPolicy
// ---------------------------------------------------------------------------

/// Min/max hysteresis loading for full-length playback.
#[derive(Debug)]
pub struct LongFormBufferPolicy {
    budget: Budget,
}

impl LongFormBufferPolicy {
    pub fn builder() -> BufferPolicyBuilder {
        BufferPolicyBuilder::new()
    }
}

impl BufferPolicy for LongFormBufferPolicy {
    fn should_continue_loading(
        &mut self,
        _playback_position_us: i64,
        buffered_duration_us: i64,
        playback_speed: f32,
    ) -> bool {
        let b = &mut self.budget;
        let target_reached = b.target_reached();

        let mut min_buffer_us = b.min_buffer_us;
        if playback_speed > 1.0 {
            // Faster playout drains the buffer faster; keep more media around.
            min_buffer_us =
                media_duration_for_playout_us(min_buffer_us, playback_speed).min(b.max_buffer_us);
        }
        let min_buffer_us = min_buffer_us.max(LOW_BUFFER_WARNING_US);

        if buffered_duration_us < min_buffer_us {
            b.is_loading = b.prioritize_time_over_size_thresholds || !target_reached;
            if !b.is_loading && buffered_duration_us < LOW_BUFFER_WARNING_US {
                tracing::warn!(
                    buffered_us = buffered_duration_us,
                    "Target buffer size reached with less than 500ms of buffered media"
                );
            }
        } else if buffered_duration_us >= b.max_buffer_us || target_reached {
            b.is_loading = false;
        }
        b.is_loading
    }

    fn should_start_playback(
        &mut self,
        buffered_duration_us: i64,
        playback_speed: f32,
        rebuffering: bool,
        target_live_offset_us: Option<i64>,
    ) -> bool {
        let b = &self.budget;
        let buffered = playout_duration_us(buffered_duration_us, playback_speed);
        let mut min_buffer_us = if rebuffering {
            b.buffer_for_playback_after_rebuffer_us
        } else {
            b.buffer_for_playback_us
        };
        if let Some(offset) = target_live_offset_us {
            min_buffer_us = min_buffer_us.min(offset / 2);
        }

        min_buffer_us <= 0
            || buffered >= min_buffer_us
            || (!b.prioritize_time_over_size_thresholds && b.target_reached())
    }

    delegate_lifecycle!();

    fn state(&self) -> BufferPolicyState {
        self.budget.state(self.budget.buffer_for_playback_us)
    }
}
