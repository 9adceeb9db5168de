//! # mcs-protocol
//!
//! Wire protocol implementation for MCS, the persistent-connection push
//! messaging protocol spoken with `mtalk.google.com`.
//!
//! This crate provides:
//! - The tag registry mapping one-byte wire tags to stanza kinds
//! - Protobuf stanza types (login, heartbeat, data, iq, close, stream error)
//! - Frame encoding with varint32 length prefixes
//! - A resumable decoder that is invariant to how the transport chunks bytes

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod registry;

pub use codec::{DecodedMessage, Decoder, DecoderState, Encoder};
pub use error::ProtocolError;
pub use frame::Frame;
pub use message::{
    AppData, Close, DataMessageStanza, HeartbeatAck, HeartbeatPing, IqExtension, IqStanza,
    IqType, LoginRequest, LoginResponse, Message, SelectiveAck, Setting, StreamAck,
    StreamErrorStanza,
};
pub use registry::{MessageKind, Registry};

/// Protocol version sent in the connection preamble.
pub const MCS_VERSION: u8 = 41;

/// Older protocol version still accepted from the server.
pub const LEGACY_MCS_VERSION: u8 = 38;

/// Default MCS endpoint host.
pub const DEFAULT_HOST: &str = "mtalk.google.com";

/// Default MCS endpoint port.
pub const DEFAULT_PORT: u16 = 5228;

/// Maximum frame payload size (1 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 1024 * 1024;

/// Category of server-originated control data messages.
pub const MCS_CATEGORY: &str = "com.google.android.gsf.gtalkservice";

/// Sender field used on client-originated control data messages.
pub const GCM_FROM_FIELD: &str = "gcm@android.com";

/// App-data key marking a server idle probe.
pub const IDLE_NOTIFICATION: &str = "IdleNotification";

/// Browser build advertised in the login client id and at checkin.
pub const CHROME_VERSION: &str = "101.0.4951.64";

/// Iq extension id carrying a selective ack.
pub const SELECTIVE_ACK_EXTENSION: i32 = 12;

/// Iq extension id carrying a stream ack.
pub const STREAM_ACK_EXTENSION: i32 = 13;
