//! Queue bookkeeping for the scheduler, free of any I/O.

use std::collections::VecDeque;

use fp_core::FeedPosition;

use super::range::ViewportRange;

/// FIFO of positions waiting to play.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreviewQueue {
    items: VecDeque<FeedPosition>,
}

impl PreviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents with every position in `range`.
    pub fn rebuild(&mut self, range: &ViewportRange) {
        self.items.clear();
        self.items.extend(range.positions());
    }

    pub fn pop(&mut self) -> Option<FeedPosition> {
        self.items.pop_front()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn to_vec(&self) -> Vec<FeedPosition> {
        self.items.iter().copied().collect()
    }
}

/// Decides what plays next. The dispatcher feeds it events and carries out
/// the positions it returns.
#[derive(Debug, Default)]
pub struct SchedulerCore {
    queue: PreviewQueue,
    /// Position most recently handed to the listener.
    now_playing: Option<FeedPosition>,
}

impl SchedulerCore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scrolling settled on `range`: requeue it and return the head to play.
    pub fn settle(&mut self, range: &ViewportRange) -> Option<FeedPosition> {
        self.queue.rebuild(range);
        self.now_playing = self.queue.pop();
        self.now_playing
    }

    /// The user started dragging: forget everything queued.
    pub fn drag(&mut self) {
        self.queue.clear();
        self.now_playing = None;
    }

    /// `position` finished (or could not play). Returns the next position to
    /// request, or `None` when the queue is exhausted or `position` is not the
    /// one this scheduler is waiting on.
    pub fn advance(&mut self, position: FeedPosition) -> Option<FeedPosition> {
        if self.now_playing != Some(position) {
            return None;
        }
        self.now_playing = self.queue.pop();
        self.now_playing
    }

    pub fn now_playing(&self) -> Option<FeedPosition> {
        self.now_playing
    }

    pub fn queue(&self) -> &PreviewQueue {
        &self.queue
    }
}
