//! Binary frame encoding and the per-session encoded-frame cache.

mod cache;
mod codec;

pub use cache::{CacheError, FrameCache};
pub use codec::{CodecError, decode_frame, encode_frame};
