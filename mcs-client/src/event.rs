//! Events surfaced to the application.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use mcs_protocol::DataMessageStanza;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a connection was torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// TCP connect, TLS handshake or login write failed.
    ConnectFailed(String),
    /// The peer closed the socket.
    TransportClosed,
    /// A socket read or write failed.
    TransportError(String),
    /// No bytes arrived within the read timeout.
    ReadTimeout,
    /// The inbound byte stream could not be decoded.
    Decode(String),
    /// An outbound stanza could not be encoded.
    Encode(String),
    /// The previous heartbeat ping was never answered.
    HeartbeatTimeout,
    /// The server sent a close stanza.
    ServerClose,
    /// The login response carried an error.
    LoginRejected { code: i32, message: Option<String> },
    /// The persistent-id store failed.
    Storage(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ConnectFailed(e) => write!(f, "connect failed: {}", e),
            DisconnectReason::TransportClosed => write!(f, "connection closed by peer"),
            DisconnectReason::TransportError(e) => write!(f, "transport error: {}", e),
            DisconnectReason::ReadTimeout => write!(f, "read timeout"),
            DisconnectReason::Decode(e) => write!(f, "decode error: {}", e),
            DisconnectReason::Encode(e) => write!(f, "encode error: {}", e),
            DisconnectReason::HeartbeatTimeout => write!(f, "heartbeat timeout"),
            DisconnectReason::ServerClose => write!(f, "server closed the stream"),
            DisconnectReason::LoginRejected { code, message } => match message {
                Some(m) => write!(f, "login rejected ({}): {}", code, m),
                None => write!(f, "login rejected ({})", code),
            },
            DisconnectReason::Storage(e) => write!(f, "storage error: {}", e),
        }
    }
}

/// Event emitted by a running client.
#[derive(Debug, Clone, PartialEq)]
pub enum McsEvent {
    /// Transport connected; the login request is on the wire.
    Connected,
    /// The server accepted the login.
    LoggedIn,
    /// The connection was lost; a reconnect is scheduled.
    Disconnected { reason: DisconnectReason },
    /// A deduplicated push message.
    Notification(Notification),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDataEntry {
    pub key: String,
    pub value: String,
}

/// A push message delivered to the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Message id set by the sending app.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub from: String,
    /// Target app id.
    pub category: String,
    pub app_data: Vec<AppDataEntry>,
    /// Server-assigned id used for dedup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_id: Option<String>,
    /// Time to live, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i32>,
    /// Send time reported by the sender, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent: Option<i64>,
    /// Binary payload, base64 in serialized form.
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<Vec<u8>>,
}

impl Notification {
    /// Looks up an app-data value by key.
    pub fn app_data_value(&self, key: &str) -> Option<&str> {
        self.app_data
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }
}

impl From<DataMessageStanza> for Notification {
    fn from(msg: DataMessageStanza) -> Self {
        Self {
            id: msg.id,
            from: msg.from,
            category: msg.category,
            app_data: msg
                .app_data
                .into_iter()
                .map(|d| AppDataEntry {
                    key: d.key,
                    value: d.value,
                })
                .collect(),
            persistent_id: msg.persistent_id,
            ttl: msg.ttl,
            sent: msg.sent,
            raw_data: msg.raw_data,
        }
    }
}

mod base64_bytes {
    use super::*;
    use serde::{de, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let text: Option<String> = Option::deserialize(deserializer)?;
        text.map(|t| STANDARD.decode(t).map_err(de::Error::custom))
            .transpose()
    }
}
