//! The scheduler task.
//!
//! All queue mutation happens here, one event at a time: scroll events pushed
//! through a [`SchedulerHandle`] and play statuses read from the session's
//! status stream.

use std::sync::Arc;

use fp_core::{Error, FeedPosition, PlayStatus, Result, StatusStream};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::queue::SchedulerCore;
use super::range::ViewportRange;
use super::{PreviewListener, SchedulerEvent, ScrollState, Viewport};

/// What the scheduler is holding, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub now_playing: Option<FeedPosition>,
    pub queued: Vec<FeedPosition>,
}

enum Request {
    Event(SchedulerEvent),
    Snapshot(oneshot::Sender<QueueSnapshot>),
}

/// Entry point for starting a scheduler.
pub struct PreviewScheduler;

impl PreviewScheduler {
    /// Spawn a dispatcher for one viewport.
    ///
    /// `statuses` should be subscribed before any play request goes out so no
    /// `Ended` is missed. Must be called from within a Tokio runtime.
    pub fn spawn(
        viewport: Arc<dyn Viewport>,
        listener: Arc<dyn PreviewListener>,
        statuses: StatusStream,
    ) -> SchedulerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let dispatcher = Dispatcher {
            viewport,
            listener,
            statuses,
            core: SchedulerCore::new(),
        };
        let handle = tokio::spawn(dispatcher.run(rx, cancel.clone()));

        SchedulerHandle {
            requests: tx,
            cancel,
            worker: Arc::new(Mutex::new(Some(handle))),
        }
    }
}

/// Handle to a running scheduler. Cheap to clone.
#[derive(Clone)]
pub struct SchedulerHandle {
    requests: mpsc::UnboundedSender<Request>,
    cancel: CancellationToken,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SchedulerHandle {
    pub fn scroll_state_changed(&self, state: ScrollState) -> Result<()> {
        self.send(SchedulerEvent::ScrollStateChanged(state))
    }

    pub fn scrolled(&self, dx: i32, dy: i32) -> Result<()> {
        self.send(SchedulerEvent::Scrolled { dx, dy })
    }

    pub fn send(&self, event: SchedulerEvent) -> Result<()> {
        self.requests
            .send(Request::Event(event))
            .map_err(|_| Error::SessionClosed)
    }

    /// Queue state after every event sent so far has been handled.
    pub async fn snapshot(&self) -> Result<QueueSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Snapshot(tx))
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    /// Stop the dispatcher, pause whatever it started and drop the status
    /// subscription.
    pub async fn detach(&self) {
        self.cancel.cancel();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Scheduler task panicked: {e}");
            }
        }
    }

    pub fn is_detached(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

struct Dispatcher {
    viewport: Arc<dyn Viewport>,
    listener: Arc<dyn PreviewListener>,
    statuses: StatusStream,
    core: SchedulerCore,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        cancel: CancellationToken,
    ) {
        tracing::debug!("Preview scheduler attached");
        let mut statuses_open = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                request = requests.recv() => match request {
                    Some(Request::Event(event)) => self.handle(event),
                    Some(Request::Snapshot(reply)) => {
                        let _ = reply.send(QueueSnapshot {
                            now_playing: self.core.now_playing(),
                            queued: self.core.queue().to_vec(),
                        });
                    }
                    None => break,
                },
                status = self.statuses.next(), if statuses_open => match status {
                    Some(status) => self.handle(SchedulerEvent::Status(status)),
                    None => {
                        tracing::debug!("Status stream closed");
                        statuses_open = false;
                    }
                },
            }
        }

        if self.core.now_playing().is_some() {
            self.core.drag();
            self.listener.pause_all();
        }
        tracing::debug!("Preview scheduler detached");
    }

    fn handle(&mut self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::ScrollStateChanged(ScrollState::Idle) => self.settle(),
            SchedulerEvent::ScrollStateChanged(ScrollState::Dragging) => {
                self.core.drag();
                tracing::debug!("Drag started; pausing previews");
                self.listener.pause_all();
            }
            SchedulerEvent::Scrolled { dx: 0, dy: 0 } => {
                if self.viewport.scroll_state() == ScrollState::Idle {
                    self.settle();
                }
            }
            SchedulerEvent::Scrolled { .. } => {}
            SchedulerEvent::Status(PlayStatus::Ended(position)) => {
                tracing::trace!(position = %position, "Preview ended");
                let next = self.core.advance(position);
                self.request(next);
            }
            SchedulerEvent::Status(PlayStatus::Started(position)) => {
                tracing::trace!(position = %position, "Preview started");
            }
        }
    }

    fn settle(&mut self) {
        let (first, last) = self.viewport.visible_range();
        let range = ViewportRange::new(first, last).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Ignoring inconsistent viewport range");
            ViewportRange::empty()
        });

        // An unread Ended may belong to the head we are about to request again.
        self.statuses.skip_pending();
        let head = self.core.settle(&range);
        tracing::debug!(
            first = ?range.first(),
            last = ?range.last(),
            queued = self.core.queue().len(),
            "Scroll settled"
        );
        self.request(head);
    }

    /// Ask the listener to play `position`, skipping positions it refuses.
    fn request(&mut self, mut position: Option<FeedPosition>) {
        while let Some(p) = position {
            match self.listener.play(p) {
                Ok(()) => {
                    tracing::debug!(position = %p, "Requested preview");
                    return;
                }
                Err(e) => {
                    tracing::warn!(position = %p, error = %e, "Cannot play position; advancing");
                    position = self.core.advance(p);
                }
            }
        }
    }
}
