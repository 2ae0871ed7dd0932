//! The span of fully-visible feed items.

use fp_core::{Error, FeedPosition, Result};

/// Fully-visible items, as reported by the viewport when scrolling settles.
///
/// Either bound may be absent, meaning no item is fully visible. When both
/// are present, `first <= last`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewportRange {
    first: Option<FeedPosition>,
    last: Option<FeedPosition>,
}

impl ViewportRange {
    /// Build a range, rejecting `first > last`.
    pub fn new(first: Option<usize>, last: Option<usize>) -> Result<Self> {
        if let (Some(f), Some(l)) = (first, last) {
            if f > l {
                return Err(Error::InvalidRange { first, last });
            }
        }
        Ok(Self {
            first: first.map(FeedPosition::new),
            last: last.map(FeedPosition::new),
        })
    }

    /// A range with nothing visible.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn first(&self) -> Option<FeedPosition> {
        self.first
    }

    pub fn last(&self) -> Option<FeedPosition> {
        self.last
    }

    /// True unless both bounds are present.
    pub fn is_empty(&self) -> bool {
        self.first.is_none() || self.last.is_none()
    }

    /// Every position in the range, ascending.
    pub fn positions(&self) -> impl Iterator<Item = FeedPosition> {
        let span = match (self.first, self.last) {
            (Some(first), Some(last)) => first.index()..last.index() + 1,
            _ => 0..0,
        };
        span.map(FeedPosition::new)
    }
}
