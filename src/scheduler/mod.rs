//! Visibility-driven preview scheduling.
//!
//! The scheduler watches scroll activity and decides which single feed
//! position should play. When scrolling settles it queues every fully-visible
//! position and plays them in order, one after another, as each preview
//! ends. Dragging clears the queue and pauses playback.

mod dispatcher;
mod queue;
mod range;

pub use dispatcher::{PreviewScheduler, QueueSnapshot, SchedulerHandle};
pub use queue::{PreviewQueue, SchedulerCore};
pub use range::ViewportRange;

use fp_core::{FeedPosition, PlayStatus, Result};

/// Scroll activity of the feed's viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollState {
    /// The user is moving the list.
    Dragging,
    /// Scrolling has settled.
    Idle,
}

/// Input to the scheduler's dispatcher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SchedulerEvent {
    ScrollStateChanged(ScrollState),
    /// A scroll by `(dx, dy)`. A zero delta is a layout pass and counts as a
    /// settle while the viewport is idle.
    Scrolled { dx: i32, dy: i32 },
    /// A playback status from the session.
    Status(PlayStatus),
}

/// The feed's list viewport.
pub trait Viewport: Send + Sync {
    fn scroll_state(&self) -> ScrollState;

    /// First and last fully-visible indices, `None` where nothing is.
    fn visible_range(&self) -> (Option<usize>, Option<usize>);
}

/// Whoever turns scheduling decisions into playback.
pub trait PreviewListener: Send + Sync {
    /// Start the preview at `position`. An error makes the scheduler move on
    /// to the next queued position.
    fn play(&self, position: FeedPosition) -> Result<()>;

    fn pause_all(&self);
}
