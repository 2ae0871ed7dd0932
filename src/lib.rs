//! feedpreview: auto-playing video previews for an infinite-scroll feed.
//!
//! Previews play one at a time as items become fully visible. A single
//! playback engine is shared by every feed position; clips are read through a
//! size-bounded disk cache.
//!
//! The workspace is split the same way as the runtime:
//!
//! - `fp-core`: errors, configuration, feed positions, the status channel
//! - `fp-cache`: the LRU content cache and HTTP fetcher
//! - `fp-playback`: buffer policies and the shared [`PlaybackSession`]
//! - this crate: the [`scheduler`] and the [`FeedPreview`] composition root

pub mod feed;
pub mod scheduler;
pub mod telemetry;

pub use feed::{AttachedFeed, FeedBinder, FeedPreview};
pub use fp_core::{config::Config, Error, FeedPosition, PlayStatus, Result, StatusStream};
pub use fp_playback::PlaybackSession;
pub use scheduler::{
    PreviewListener, PreviewScheduler, SchedulerEvent, SchedulerHandle, ScrollState, Viewport,
    ViewportRange,
};
