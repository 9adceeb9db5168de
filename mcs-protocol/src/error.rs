//! Protocol error types.

use crate::registry::MessageKind;
use thiserror::Error;

/// Protocol-level errors that can occur during framing or stanza handling.
///
/// Every decode-side variant is fatal to the decoder that produced it; the
/// owner is expected to drop the decoder together with its connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("unknown message tag: {0}")]
    UnknownTag(u8),

    #[error("length prefix exceeds {max} bytes")]
    VarintTooLong { max: usize },

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("failed to decode {kind:?} payload: {source}")]
    Decode {
        kind: MessageKind,
        #[source]
        source: prost::DecodeError,
    },

    #[error("message kind {0:?} cannot be encoded")]
    Unencodable(MessageKind),

    #[error("decoder is unusable after a previous error")]
    Poisoned,
}
