//! Ordered playback of speech streams relayed from the dialog channel.
//!
//! - [`producer`]: copy loop from a channel audio source into a relay stream
//! - [`queue`]: the Idle/Playing state machine over queued entries
//! - [`service`]: the task that owns the queue and serializes every transition

pub mod producer;
pub mod queue;
pub mod service;

pub use producer::{frame_channel, FrameFeeder};
pub use service::{PlaybackEvent, PlaybackHandle, PlaybackService};
