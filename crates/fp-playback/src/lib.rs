//! # fp-playback
//!
//! Buffer policies and the shared single-engine playback session.
//!
//! - **[`buffer`]**: the [`BufferPolicy`] strategy consulted by the engine,
//!   with the canonical [`PreviewBufferPolicy`] and the long-form alternative
//! - **[`allocator`]**: segment allocator the policies account bytes against
//! - **[`engine`]**: seams to the external decode/render engine
//! - **[`session`]**: [`PlaybackSession`], the actor that owns the one engine

pub mod allocator;
pub mod buffer;
pub mod engine;
pub mod session;

pub use allocator::{Allocator, SEGMENT_SIZE};
pub use buffer::{
    BufferPolicy, BufferPolicyBuilder, BufferPolicyState, LongFormBufferPolicy,
    PreviewBufferPolicy, TrackType,
};
pub use engine::{
    EngineContext, EngineEvent, EngineEventKind, EngineEventSink, EngineFactory, EngineHandle,
    EngineState, LoadRequest, LoadToken, MediaEngine, RenderTarget,
};
pub use session::{PlaybackSession, PolicyFactory, SessionSnapshot, SessionState};
