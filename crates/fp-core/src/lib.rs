//! fp-core: shared types, errors, configuration and the play-status channel.
//!
//! This crate is the foundational dependency for all other fp-* crates:
//!
//! - **[`FeedPosition`]**: typed index of an item in the feed
//! - **[`Error`]**: unified error taxonomy (cache, engine, range, configuration)
//! - **[`config`]**: JSON configuration with defaults and validation
//! - **[`events`]**: latest-wins `Started` / `Ended` notification channel

pub mod config;
pub mod error;
pub mod events;
pub mod ids;

pub use error::{Error, Result};
pub use events::{PlayStatus, StatusPublisher, StatusStream};
pub use ids::FeedPosition;
