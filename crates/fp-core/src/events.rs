//! Play-status notification channel.
//!
//! [`StatusPublisher`] wraps a `tokio::sync::watch` channel: a single slot
//! where a new status overwrites the previous one. A slow subscriber never
//! sees a backlog of stale `Ended` events, only the most recent status.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::ids::FeedPosition;

/// Lifecycle notification for the position currently owning the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "position", rename_all = "snake_case")]
pub enum PlayStatus {
    /// The engine became ready and the preview started.
    Started(FeedPosition),
    /// The preview window elapsed, the clip ended, or playback failed.
    Ended(FeedPosition),
}

impl PlayStatus {
    /// The feed position this status refers to.
    pub fn position(&self) -> FeedPosition {
        match self {
            PlayStatus::Started(p) | PlayStatus::Ended(p) => *p,
        }
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, PlayStatus::Ended(_))
    }
}

/// Sending side of the latest-wins status channel.
#[derive(Debug)]
pub struct StatusPublisher {
    tx: watch::Sender<Option<PlayStatus>>,
}

impl StatusPublisher {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Publish a status, replacing any value not yet observed.
    pub fn publish(&self, status: PlayStatus) {
        tracing::debug!(?status, "Publishing play status");
        self.tx.send_replace(Some(status));
    }

    /// Subscribe to statuses published from now on.
    pub fn subscribe(&self) -> StatusStream {
        StatusStream {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of the status channel.
#[derive(Debug, Clone)]
pub struct StatusStream {
    rx: watch::Receiver<Option<PlayStatus>>,
}

impl StatusStream {
    /// Wait for the next unseen status.
    ///
    /// Returns `None` once the publisher has been dropped.
    pub async fn next(&mut self) -> Option<PlayStatus> {
        loop {
            if self.rx.changed().await.is_err() {
                return None;
            }
            if let Some(status) = *self.rx.borrow_and_update() {
                return Some(status);
            }
        }
    }

    /// Mark whatever is in the slot as seen without returning it.
    pub fn skip_pending(&mut self) {
        self.rx.borrow_and_update();
    }
}
