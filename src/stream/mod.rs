//! Streaming control plane: wire messages, the duplex channel contract, and
//! the per-attachment serve loop.

pub mod channel;
pub mod messages;
mod plane;

pub use channel::{ChannelError, MemoryChannel, OutboundFrame, RemoteClient, ReplayChannel, pair};
pub use messages::{PlaybackCommand, encode_loading_event, parse_command};
pub use plane::serve_attachment;
