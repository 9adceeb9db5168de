//! Encoder and incremental decoder for MCS frames.

use crate::error::ProtocolError;
use crate::frame::{read_varint32, Frame, Varint};
use crate::message::{LoginRequest, Message};
use crate::registry::Registry;
use crate::{LEGACY_MCS_VERSION, MAX_PAYLOAD_SIZE, MCS_VERSION};
use bytes::{Buf, BytesMut};

const VERSION_PACKET_LEN: usize = 1;
const TAG_PACKET_LEN: usize = 1;
const SIZE_PACKET_LEN_MIN: usize = 1;

/// Encodes stanzas into frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct Encoder {
    registry: Registry,
}

impl Encoder {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Encodes a stanza as `[tag][size][payload]`.
    pub fn encode(&self, message: &Message) -> Result<BytesMut, ProtocolError> {
        let (tag, payload) = self.registry.encode(message)?;
        Frame::new(tag, payload).encode()
    }

    /// Encodes the login request preceded by the protocol version byte.
    pub fn encode_login(&self, login: &LoginRequest) -> Result<BytesMut, ProtocolError> {
        let (tag, payload) = self
            .registry
            .encode(&Message::LoginRequest(login.clone()))?;
        Frame::new(tag, payload).encode_with_version(MCS_VERSION)
    }
}

/// Decoder state, advanced strictly forward and then cycling per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Waiting for the version byte, the first tag and a size byte.
    AwaitPreamble,
    /// Waiting for the next tag and at least one size byte.
    AwaitTagAndSize,
    /// The length prefix was split across reads; `consumed` bytes are buffered.
    AwaitSizeContinue { consumed: usize },
    /// Waiting for the full payload.
    AwaitPayload,
    /// A fatal error occurred; the decoder must be discarded.
    Failed,
}

/// A fully decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub tag: u8,
    pub message: Message,
}

enum Progress {
    NeedMore,
    Advanced,
    Message(DecodedMessage),
}

/// Resumable decoder for the inbound byte stream of one connection.
///
/// Bytes are appended with [`Decoder::extend`]; [`Decoder::decode_next`] is
/// then called until it returns `Ok(None)`. The sequence of decoded messages
/// does not depend on how the stream was split between `extend` calls.
pub struct Decoder {
    registry: Registry,
    buffer: BytesMut,
    state: DecoderState,
    message_tag: u8,
    message_size: usize,
    server_version: Option<u8>,
}

impl Decoder {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            buffer: BytesMut::with_capacity(8192),
            state: DecoderState::AwaitPreamble,
            message_tag: 0,
            message_size: 0,
            server_version: None,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        if self.state != DecoderState::Failed {
            self.buffer.extend_from_slice(data);
        }
    }

    /// Attempts to decode the next message from the buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Any error is fatal: the
    /// decoder discards its buffer and every later call returns
    /// [`ProtocolError::Poisoned`].
    pub fn decode_next(&mut self) -> Result<Option<DecodedMessage>, ProtocolError> {
        loop {
            let step = match self.state {
                DecoderState::Failed => return Err(ProtocolError::Poisoned),
                DecoderState::AwaitPreamble => self.on_preamble(),
                DecoderState::AwaitTagAndSize => self.on_tag_and_size(),
                DecoderState::AwaitSizeContinue { consumed } => self.on_size_continue(consumed),
                DecoderState::AwaitPayload => self.on_payload(),
            };

            match step {
                Ok(Progress::NeedMore) => return Ok(None),
                Ok(Progress::Advanced) => continue,
                Ok(Progress::Message(decoded)) => return Ok(Some(decoded)),
                Err(e) => {
                    tracing::debug!("Decoder failed in state {:?}: {}", self.state, e);
                    self.state = DecoderState::Failed;
                    self.buffer.clear();
                    return Err(e);
                }
            }
        }
    }

    /// Appends `data` and drains every complete message.
    ///
    /// Messages decoded before an error in the same chunk are lost; callers
    /// that must act on them use `extend` + `decode_next` instead.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<DecodedMessage>, ProtocolError> {
        self.extend(data);
        let mut out = Vec::new();
        while let Some(decoded) = self.decode_next()? {
            out.push(decoded);
        }
        Ok(out)
    }

    /// Returns the current state.
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Returns the protocol version announced by the server, once read.
    pub fn server_version(&self) -> Option<u8> {
        self.server_version
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn on_preamble(&mut self) -> Result<Progress, ProtocolError> {
        if self.buffer.len() < VERSION_PACKET_LEN + TAG_PACKET_LEN + SIZE_PACKET_LEN_MIN {
            return Ok(Progress::NeedMore);
        }

        let version = self.buffer.get_u8();
        if version != MCS_VERSION && version != LEGACY_MCS_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        tracing::debug!("Server protocol version {}", version);
        self.server_version = Some(version);

        self.read_tag()?;
        self.read_size()
    }

    fn on_tag_and_size(&mut self) -> Result<Progress, ProtocolError> {
        if self.buffer.len() < TAG_PACKET_LEN + SIZE_PACKET_LEN_MIN {
            return Ok(Progress::NeedMore);
        }
        self.read_tag()?;
        self.read_size()
    }

    fn on_size_continue(&mut self, consumed: usize) -> Result<Progress, ProtocolError> {
        if self.buffer.len() < consumed + 1 {
            return Ok(Progress::NeedMore);
        }
        self.read_size()
    }

    fn on_payload(&mut self) -> Result<Progress, ProtocolError> {
        if self.buffer.len() < self.message_size {
            return Ok(Progress::NeedMore);
        }
        let payload = self.buffer.split_to(self.message_size).freeze();
        self.finish_message(payload)
    }

    fn read_tag(&mut self) -> Result<(), ProtocolError> {
        let tag = self.buffer.get_u8();
        if self.registry.tag_to_kind(tag).is_none() {
            return Err(ProtocolError::UnknownTag(tag));
        }
        self.message_tag = tag;
        Ok(())
    }

    /// Parses the length prefix from the front of the buffer. Bytes of an
    /// incomplete prefix stay buffered and are re-read on the next attempt.
    fn read_size(&mut self) -> Result<Progress, ProtocolError> {
        match read_varint32(&self.buffer)? {
            Varint::Incomplete { consumed } => {
                self.state = DecoderState::AwaitSizeContinue { consumed };
                Ok(Progress::Advanced)
            }
            Varint::Complete { value, len } => {
                self.buffer.advance(len);
                if value > MAX_PAYLOAD_SIZE {
                    return Err(ProtocolError::FrameTooLarge {
                        size: value,
                        max: MAX_PAYLOAD_SIZE,
                    });
                }
                self.message_size = value as usize;

                if self.message_size == 0 {
                    self.finish_message(bytes::Bytes::new())
                } else {
                    self.state = DecoderState::AwaitPayload;
                    Ok(Progress::Advanced)
                }
            }
        }
    }

    fn finish_message(&mut self, payload: bytes::Bytes) -> Result<Progress, ProtocolError> {
        let tag = self.message_tag;
        let message = self.registry.decode(tag, payload)?;
        tracing::trace!("Decoded {:?} ({} bytes)", message.kind(), self.message_size);

        self.message_tag = 0;
        self.message_size = 0;
        self.state = DecoderState::AwaitTagAndSize;
        Ok(Progress::Message(DecodedMessage { tag, message }))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(Registry::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::*;
    use crate::registry::MessageKind;
    use bytes::Bytes;

    fn login_response() -> Message {
        Message::LoginResponse(LoginResponse {
            id: "chrome-1".to_string(),
            stream_id: Some(1),
            ..Default::default()
        })
    }

    fn data_message(persistent_id: &str, body: usize) -> Message {
        Message::DataMessage(DataMessageStanza {
            from: "12345".to_string(),
            category: "org.example.app".to_string(),
            persistent_id: Some(persistent_id.to_string()),
            raw_data: Some(vec![0xab; body]),
            ..Default::default()
        })
    }

    /// Server-side stream: preamble + login response, then later frames.
    fn server_stream(messages: &[Message]) -> Vec<u8> {
        let encoder = Encoder::default();
        let mut out = vec![MCS_VERSION];
        for message in messages {
            out.extend_from_slice(&encoder.encode(message).unwrap());
        }
        out
    }

    #[test]
    fn test_single_chunk() {
        let messages = vec![login_response(), data_message("p-1", 10)];
        let mut decoder = Decoder::default();
        let decoded = decoder.feed(&server_stream(&messages)).unwrap();

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].tag, 3);
        assert_eq!(decoded[0].message, messages[0]);
        assert_eq!(decoded[1].tag, 8);
        assert_eq!(decoded[1].message, messages[1]);
        assert_eq!(decoder.server_version(), Some(MCS_VERSION));
        assert_eq!(decoder.state(), DecoderState::AwaitTagAndSize);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_byte_at_a_time() {
        let messages = vec![
            login_response(),
            data_message("p-1", 300),
            Message::HeartbeatPing(HeartbeatPing::default()),
            data_message("p-2", 0),
        ];
        let stream = server_stream(&messages);

        let mut decoder = Decoder::default();
        let mut decoded = Vec::new();
        for byte in &stream {
            decoded.extend(decoder.feed(std::slice::from_ref(byte)).unwrap());
        }

        let decoded: Vec<Message> = decoded.into_iter().map(|d| d.message).collect();
        assert_eq!(decoded, messages);
    }

    #[test]
    fn test_split_inside_length_prefix() {
        // 300-byte body forces a two-byte size varint
        let messages = vec![login_response(), data_message("p-1", 300)];
        let stream = server_stream(&messages);
        let login_len = Encoder::default().encode(&messages[0]).unwrap().len() + 1;

        let mut decoder = Decoder::default();
        // up to and including the tag and first size byte of the data message
        let first = decoder.feed(&stream[..login_len + 2]).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(
            decoder.state(),
            DecoderState::AwaitSizeContinue { consumed: 1 }
        );

        let rest = decoder.feed(&stream[login_len + 2..]).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].message, messages[1]);
    }

    #[test]
    fn test_partial_payload_waits() {
        let messages = vec![login_response(), data_message("p-1", 64)];
        let stream = server_stream(&messages);

        let mut decoder = Decoder::default();
        let first = decoder.feed(&stream[..stream.len() - 1]).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(decoder.state(), DecoderState::AwaitPayload);

        let rest = decoder.feed(&stream[stream.len() - 1..]).unwrap();
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn test_zero_length_message() {
        let mut decoder = Decoder::default();
        // preamble, then HeartbeatAck (tag 1) and Close (tag 4) with size 0
        let decoded = decoder.feed(&[MCS_VERSION, 1, 0, 4, 0]).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(
            decoded[0].message,
            Message::HeartbeatAck(HeartbeatAck::default())
        );
        assert_eq!(decoded[1].message, Message::Close(Close::default()));
        assert_eq!(decoder.state(), DecoderState::AwaitTagAndSize);
    }

    #[test]
    fn test_legacy_version_accepted() {
        let mut decoder = Decoder::default();
        let decoded = decoder.feed(&[LEGACY_MCS_VERSION, 0, 0]).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoder.server_version(), Some(LEGACY_MCS_VERSION));
    }

    #[test]
    fn test_version_rejected() {
        for version in [0u8, 37, 39, 40, 42, 99] {
            let mut decoder = Decoder::default();
            let result = decoder.feed(&[version, 3, 0]);
            assert!(matches!(result, Err(ProtocolError::UnsupportedVersion(v)) if v == version));
            assert_eq!(decoder.state(), DecoderState::Failed);
        }
    }

    #[test]
    fn test_preamble_waits_for_three_bytes() {
        let mut decoder = Decoder::default();
        assert!(decoder.feed(&[99, 3]).unwrap().is_empty());
        assert_eq!(decoder.state(), DecoderState::AwaitPreamble);
        assert!(decoder.feed(&[0]).is_err());
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut decoder = Decoder::default();
        // tag 16 followed by a well-formed empty payload
        let result = decoder.feed(&[MCS_VERSION, 16, 2, 0x08, 0x01]);
        assert!(matches!(result, Err(ProtocolError::UnknownTag(16))));
    }

    #[test]
    fn test_decoder_poisoned_after_error() {
        let mut decoder = Decoder::default();
        assert!(decoder.feed(&[1, 0, 0]).is_err());
        assert!(matches!(
            decoder.feed(&[MCS_VERSION, 0, 0]),
            Err(ProtocolError::Poisoned)
        ));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_varint_too_long() {
        let mut decoder = Decoder::default();
        let result = decoder.feed(&[MCS_VERSION, 8, 0x80, 0x80, 0x80, 0x80, 0x80]);
        assert!(matches!(result, Err(ProtocolError::VarintTooLong { .. })));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut decoder = Decoder::default();
        // size varint for MAX_PAYLOAD_SIZE + 1
        let mut stream = vec![MCS_VERSION, 8];
        let mut size = BytesMut::new();
        crate::frame::put_varint32(&mut size, MAX_PAYLOAD_SIZE + 1);
        stream.extend_from_slice(&size);
        assert!(matches!(
            decoder.feed(&stream),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_messages_before_error_are_returned() {
        let mut decoder = Decoder::default();
        decoder.extend(&[MCS_VERSION, 1, 0, 200, 0]);
        let first = decoder.decode_next().unwrap().unwrap();
        assert_eq!(first.message.kind(), MessageKind::HeartbeatAck);
        assert!(matches!(
            decoder.decode_next(),
            Err(ProtocolError::UnknownTag(200))
        ));
    }

    #[test]
    fn test_schema_less_tag_passes_through() {
        let mut decoder = Decoder::default();
        let decoded = decoder.feed(&[MCS_VERSION, 6, 2, 0x08, 0x01]).unwrap();
        assert_eq!(
            decoded[0].message,
            Message::Unhandled {
                kind: MessageKind::PresenceStanza,
                payload: Bytes::from_static(&[0x08, 0x01]),
            }
        );
    }

    #[test]
    fn test_encode_login_preamble() {
        let login = LoginRequest::for_device(1, 2, vec![]);
        let encoded = Encoder::default().encode_login(&login).unwrap();
        assert_eq!(encoded[0], MCS_VERSION);
        assert_eq!(encoded[1], MessageKind::LoginRequest as u8);

        // the server would see the same bytes as a valid preamble
        let mut decoder = Decoder::default();
        let decoded = decoder.feed(&encoded).unwrap();
        assert_eq!(decoded[0].message, Message::LoginRequest(login));
    }
}
