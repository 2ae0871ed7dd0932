//! Typed feed index.
//!
//! A viewport with no item at a bound reports `None` there; there is no
//! sentinel [`FeedPosition`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of an item in the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedPosition(usize);

impl FeedPosition {
    /// Wrap a raw index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Return the inner index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for FeedPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<usize> for FeedPosition {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl From<FeedPosition> for usize {
    fn from(position: FeedPosition) -> Self {
        position.0
    }
}
