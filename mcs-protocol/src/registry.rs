//! Tag registry.
//!
//! Maps the one-byte wire tag to a stanza kind and dispatches payload
//! encode/decode. The table order matches the server's tag assignment and
//! must never be reordered.

use crate::error::ProtocolError;
use crate::message::*;
use bytes::Bytes;
use prost::Message as _;

/// Every tag slot of the protocol, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    HeartbeatPing = 0,
    HeartbeatAck = 1,
    LoginRequest = 2,
    LoginResponse = 3,
    Close = 4,
    MessageStanza = 5,
    PresenceStanza = 6,
    IqStanza = 7,
    DataMessageStanza = 8,
    BatchPresenceStanza = 9,
    StreamErrorStanza = 10,
    HttpRequest = 11,
    HttpResponse = 12,
    BindAccountRequest = 13,
    BindAccountResponse = 14,
    TalkMetadata = 15,
}

const TAG_TABLE: [MessageKind; 16] = [
    MessageKind::HeartbeatPing,
    MessageKind::HeartbeatAck,
    MessageKind::LoginRequest,
    MessageKind::LoginResponse,
    MessageKind::Close,
    MessageKind::MessageStanza,
    MessageKind::PresenceStanza,
    MessageKind::IqStanza,
    MessageKind::DataMessageStanza,
    MessageKind::BatchPresenceStanza,
    MessageKind::StreamErrorStanza,
    MessageKind::HttpRequest,
    MessageKind::HttpResponse,
    MessageKind::BindAccountRequest,
    MessageKind::BindAccountResponse,
    MessageKind::TalkMetadata,
];

impl MessageKind {
    /// Returns true if this client has a protobuf schema for the kind.
    pub fn has_schema(&self) -> bool {
        matches!(
            self,
            MessageKind::HeartbeatPing
                | MessageKind::HeartbeatAck
                | MessageKind::LoginRequest
                | MessageKind::LoginResponse
                | MessageKind::Close
                | MessageKind::IqStanza
                | MessageKind::DataMessageStanza
                | MessageKind::StreamErrorStanza
        )
    }
}

/// Immutable tag registry, owned by each encoder and decoder.
#[derive(Debug, Clone, Copy)]
pub struct Registry {
    table: &'static [MessageKind],
}

impl Registry {
    pub fn new() -> Self {
        Self { table: &TAG_TABLE }
    }

    /// Looks up the kind assigned to a wire tag.
    pub fn tag_to_kind(&self, tag: u8) -> Option<MessageKind> {
        self.table.get(tag as usize).copied()
    }

    /// Returns the wire tag of a kind.
    pub fn kind_to_tag(&self, kind: MessageKind) -> u8 {
        self.table
            .iter()
            .position(|k| *k == kind)
            .map(|pos| pos as u8)
            .unwrap_or(kind as u8)
    }

    /// Decodes a payload received under `tag`.
    pub fn decode(&self, tag: u8, payload: Bytes) -> Result<Message, ProtocolError> {
        let kind = self
            .tag_to_kind(tag)
            .ok_or(ProtocolError::UnknownTag(tag))?;
        let wrap = |source| ProtocolError::Decode { kind, source };

        let message = match kind {
            MessageKind::HeartbeatPing => {
                Message::HeartbeatPing(HeartbeatPing::decode(payload).map_err(wrap)?)
            }
            MessageKind::HeartbeatAck => {
                Message::HeartbeatAck(HeartbeatAck::decode(payload).map_err(wrap)?)
            }
            MessageKind::LoginRequest => {
                Message::LoginRequest(LoginRequest::decode(payload).map_err(wrap)?)
            }
            MessageKind::LoginResponse => {
                Message::LoginResponse(LoginResponse::decode(payload).map_err(wrap)?)
            }
            MessageKind::Close => Message::Close(Close::decode(payload).map_err(wrap)?),
            MessageKind::IqStanza => Message::IqStanza(IqStanza::decode(payload).map_err(wrap)?),
            MessageKind::DataMessageStanza => {
                Message::DataMessage(DataMessageStanza::decode(payload).map_err(wrap)?)
            }
            MessageKind::StreamErrorStanza => {
                Message::StreamError(StreamErrorStanza::decode(payload).map_err(wrap)?)
            }
            other => Message::Unhandled {
                kind: other,
                payload,
            },
        };

        Ok(message)
    }

    /// Encodes a message, returning its wire tag and payload.
    pub fn encode(&self, message: &Message) -> Result<(u8, Bytes), ProtocolError> {
        let payload = match message {
            Message::HeartbeatPing(m) => m.encode_to_vec(),
            Message::HeartbeatAck(m) => m.encode_to_vec(),
            Message::LoginRequest(m) => m.encode_to_vec(),
            Message::LoginResponse(m) => m.encode_to_vec(),
            Message::Close(m) => m.encode_to_vec(),
            Message::IqStanza(m) => m.encode_to_vec(),
            Message::DataMessage(m) => m.encode_to_vec(),
            Message::StreamError(m) => m.encode_to_vec(),
            Message::Unhandled { kind, .. } => return Err(ProtocolError::Unencodable(*kind)),
        };
        Ok((self.kind_to_tag(message.kind()), Bytes::from(payload)))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
