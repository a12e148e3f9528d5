//! Binary frame codec.
//!
//! Frames cross the wire as MessagePack maps keyed by field name, so any
//! MessagePack client can decode them without a schema. Encoding is
//! deterministic: `drivers` is an ordered map and field order is fixed by
//! the struct definitions, so equal frames encode byte-for-byte equal.

use bytes::Bytes;

use crate::telemetry::frame::Frame;

/// Frame encode/decode errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Failed to encode frame: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Failed to decode frame: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encode a frame's public projection.
pub fn encode_frame(frame: &Frame) -> Result<Bytes, CodecError> {
    let payload = rmp_serde::to_vec_named(frame)?;
    Ok(Bytes::from(payload))
}

/// Decode a binary frame payload.
pub fn decode_frame(payload: &[u8]) -> Result<Frame, CodecError> {
    Ok(rmp_serde::from_slice(payload)?)
}
