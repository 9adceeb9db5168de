//! MCS stanza types.
//!
//! Field numbers follow `mcs.proto`; they are part of the wire contract and
//! must not be renumbered. Scalars use proto2 presence (`Option`) so that
//! required-but-empty fields such as an iq id of `""` are still written.

use crate::registry::MessageKind;
use crate::{
    CHROME_VERSION, GCM_FROM_FIELD, IDLE_NOTIFICATION, MCS_CATEGORY, SELECTIVE_ACK_EXTENSION,
    STREAM_ACK_EXTENSION,
};
use bytes::Bytes;
use prost::Message as _;

/// Domain sent in every login request.
pub const LOGIN_DOMAIN: &str = "mcs.android.com";

/// Network type hint sent at login (ethernet).
pub const NETWORK_TYPE_ETHERNET: i32 = 1;

#[derive(Clone, PartialEq, prost::Message)]
pub struct HeartbeatPing {
    #[prost(int32, optional, tag = "1")]
    pub stream_id: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub last_stream_id_received: Option<i32>,
    #[prost(int64, optional, tag = "3")]
    pub status: Option<i64>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HeartbeatAck {
    #[prost(int32, optional, tag = "1")]
    pub stream_id: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub last_stream_id_received: Option<i32>,
    #[prost(int64, optional, tag = "3")]
    pub status: Option<i64>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ErrorInfo {
    #[prost(int32, required, tag = "1")]
    pub code: i32,
    #[prost(string, optional, tag = "2")]
    pub message: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub r#type: Option<String>,
    #[prost(message, optional, tag = "4")]
    pub extension: Option<Extension>,
}

/// Key/value login setting.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Setting {
    #[prost(string, required, tag = "1")]
    pub name: String,
    #[prost(string, required, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HeartbeatStat {
    #[prost(string, required, tag = "1")]
    pub ip: String,
    #[prost(bool, required, tag = "2")]
    pub timeout: bool,
    #[prost(int32, required, tag = "3")]
    pub interval_ms: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HeartbeatConfig {
    #[prost(bool, optional, tag = "1")]
    pub upload_stat: Option<bool>,
    #[prost(string, optional, tag = "2")]
    pub ip: Option<String>,
    #[prost(int32, optional, tag = "3")]
    pub interval_ms: Option<i32>,
}

/// Connection statistics a client may report at login.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ClientEvent {
    #[prost(int32, optional, tag = "1")]
    pub r#type: Option<i32>,
    #[prost(uint32, optional, tag = "100")]
    pub number_discarded_events: Option<u32>,
    #[prost(int32, optional, tag = "200")]
    pub network_type: Option<i32>,
    #[prost(uint64, optional, tag = "202")]
    pub time_connection_started_ms: Option<u64>,
    #[prost(uint64, optional, tag = "203")]
    pub time_connection_ended_ms: Option<u64>,
    #[prost(int32, optional, tag = "204")]
    pub error_code: Option<i32>,
    #[prost(uint64, optional, tag = "300")]
    pub time_connection_established_ms: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum AuthService {
    AndroidId = 2,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoginRequest {
    #[prost(string, required, tag = "1")]
    pub id: String,
    #[prost(string, required, tag = "2")]
    pub domain: String,
    #[prost(string, required, tag = "3")]
    pub user: String,
    #[prost(string, required, tag = "4")]
    pub resource: String,
    #[prost(string, required, tag = "5")]
    pub auth_token: String,
    #[prost(string, optional, tag = "6")]
    pub device_id: Option<String>,
    #[prost(int64, optional, tag = "7")]
    pub last_rmq_id: Option<i64>,
    #[prost(message, repeated, tag = "8")]
    pub setting: Vec<Setting>,
    #[prost(string, repeated, tag = "10")]
    pub received_persistent_id: Vec<String>,
    #[prost(bool, optional, tag = "12")]
    pub adaptive_heartbeat: Option<bool>,
    #[prost(message, optional, tag = "13")]
    pub heartbeat_stat: Option<HeartbeatStat>,
    #[prost(bool, optional, tag = "14")]
    pub use_rmq2: Option<bool>,
    #[prost(int64, optional, tag = "15")]
    pub account_id: Option<i64>,
    #[prost(enumeration = "AuthService", optional, tag = "16")]
    pub auth_service: Option<i32>,
    #[prost(int32, optional, tag = "17")]
    pub network_type: Option<i32>,
    #[prost(int64, optional, tag = "18")]
    pub status: Option<i64>,
    #[prost(message, repeated, tag = "22")]
    pub client_event: Vec<ClientEvent>,
}

impl LoginRequest {
    /// Builds the login request for a checked-in device.
    ///
    /// `received_persistent_ids` tells the server which data messages were
    /// already delivered so it does not send them again.
    pub fn for_device(
        android_id: u64,
        security_token: u64,
        received_persistent_ids: Vec<String>,
    ) -> Self {
        Self {
            id: format!("chrome-{}", CHROME_VERSION),
            domain: LOGIN_DOMAIN.to_string(),
            user: android_id.to_string(),
            resource: android_id.to_string(),
            auth_token: security_token.to_string(),
            device_id: Some(format!("android-{:x}", android_id)),
            setting: vec![Setting {
                name: "new_vc".to_string(),
                value: "1".to_string(),
            }],
            received_persistent_id: received_persistent_ids,
            adaptive_heartbeat: Some(false),
            use_rmq2: Some(true),
            auth_service: Some(AuthService::AndroidId as i32),
            network_type: Some(NETWORK_TYPE_ETHERNET),
            ..Default::default()
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoginResponse {
    #[prost(string, required, tag = "1")]
    pub id: String,
    #[prost(string, optional, tag = "2")]
    pub jid: Option<String>,
    #[prost(message, optional, tag = "3")]
    pub error: Option<ErrorInfo>,
    #[prost(message, repeated, tag = "4")]
    pub setting: Vec<Setting>,
    #[prost(int32, optional, tag = "5")]
    pub stream_id: Option<i32>,
    #[prost(int32, optional, tag = "6")]
    pub last_stream_id_received: Option<i32>,
    #[prost(message, optional, tag = "7")]
    pub heartbeat_config: Option<HeartbeatConfig>,
    #[prost(int64, optional, tag = "8")]
    pub server_timestamp: Option<i64>,
}

impl LoginResponse {
    /// Returns the server-reported error, if the login was rejected.
    pub fn login_error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref().filter(|e| e.code != 0)
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StreamErrorStanza {
    #[prost(string, required, tag = "1")]
    pub r#type: String,
    #[prost(string, optional, tag = "2")]
    pub text: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Close {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Extension {
    #[prost(int32, required, tag = "1")]
    pub id: i32,
    #[prost(bytes = "vec", required, tag = "2")]
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum IqType {
    Get = 0,
    Set = 1,
    IqResult = 2,
    IqError = 3,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct IqStanza {
    #[prost(int64, optional, tag = "1")]
    pub rmq_id: Option<i64>,
    #[prost(enumeration = "IqType", required, tag = "2")]
    pub r#type: i32,
    #[prost(string, required, tag = "3")]
    pub id: String,
    #[prost(string, optional, tag = "4")]
    pub from: Option<String>,
    #[prost(string, optional, tag = "5")]
    pub to: Option<String>,
    #[prost(message, optional, tag = "6")]
    pub error: Option<ErrorInfo>,
    #[prost(message, optional, tag = "7")]
    pub extension: Option<Extension>,
    #[prost(string, optional, tag = "8")]
    pub persistent_id: Option<String>,
    #[prost(int32, optional, tag = "9")]
    pub stream_id: Option<i32>,
    #[prost(int32, optional, tag = "10")]
    pub last_stream_id_received: Option<i32>,
    #[prost(int64, optional, tag = "11")]
    pub account_id: Option<i64>,
    #[prost(int64, optional, tag = "12")]
    pub status: Option<i64>,
}

/// Classification of the extension carried by an inbound iq stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IqExtension {
    /// The server confirms it has seen our stream up to some id.
    StreamAck,
    /// The server acknowledges individual persistent ids.
    SelectiveAck(Vec<String>),
    /// An extension this client does not interpret.
    Other(i32),
    /// No extension present.
    None,
}

impl IqStanza {
    /// Builds the stream-ack iq confirming receipt up to `last_stream_id_received`.
    pub fn stream_ack(last_stream_id_received: i32) -> Self {
        Self {
            r#type: IqType::Set as i32,
            id: String::new(),
            extension: Some(Extension {
                id: STREAM_ACK_EXTENSION,
                data: StreamAck {}.encode_to_vec(),
            }),
            last_stream_id_received: Some(last_stream_id_received),
            ..Default::default()
        }
    }

    /// Decodes the ack extension, if any.
    pub fn ack_extension(&self) -> Result<IqExtension, prost::DecodeError> {
        let Some(extension) = &self.extension else {
            return Ok(IqExtension::None);
        };
        match extension.id {
            STREAM_ACK_EXTENSION => Ok(IqExtension::StreamAck),
            SELECTIVE_ACK_EXTENSION => {
                let ack = SelectiveAck::decode(extension.data.as_slice())?;
                Ok(IqExtension::SelectiveAck(ack.id))
            }
            other => Ok(IqExtension::Other(other)),
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AppData {
    #[prost(string, required, tag = "1")]
    pub key: String,
    #[prost(string, required, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DataMessageStanza {
    #[prost(string, optional, tag = "2")]
    pub id: Option<String>,
    #[prost(string, required, tag = "3")]
    pub from: String,
    #[prost(string, optional, tag = "4")]
    pub to: Option<String>,
    #[prost(string, required, tag = "5")]
    pub category: String,
    #[prost(string, optional, tag = "6")]
    pub token: Option<String>,
    #[prost(message, repeated, tag = "7")]
    pub app_data: Vec<AppData>,
    #[prost(bool, optional, tag = "8")]
    pub from_trusted_server: Option<bool>,
    #[prost(string, optional, tag = "9")]
    pub persistent_id: Option<String>,
    #[prost(int32, optional, tag = "10")]
    pub stream_id: Option<i32>,
    #[prost(int32, optional, tag = "11")]
    pub last_stream_id_received: Option<i32>,
    #[prost(string, optional, tag = "13")]
    pub reg_id: Option<String>,
    #[prost(int64, optional, tag = "16")]
    pub device_user_id: Option<i64>,
    #[prost(int32, optional, tag = "17")]
    pub ttl: Option<i32>,
    #[prost(int64, optional, tag = "18")]
    pub sent: Option<i64>,
    #[prost(int32, optional, tag = "19")]
    pub queued: Option<i32>,
    #[prost(int64, optional, tag = "20")]
    pub status: Option<i64>,
    #[prost(bytes = "vec", optional, tag = "21")]
    pub raw_data: Option<Vec<u8>>,
    #[prost(bool, optional, tag = "24")]
    pub immediate_ack: Option<bool>,
}

impl DataMessageStanza {
    /// Looks up an app-data value by key.
    pub fn app_data_value(&self, key: &str) -> Option<&str> {
        self.app_data
            .iter()
            .find(|d| d.key == key)
            .map(|d| d.value.as_str())
    }

    /// Returns true for a server idle probe that expects an echo.
    pub fn is_idle_probe(&self) -> bool {
        self.category == MCS_CATEGORY && self.app_data_value(IDLE_NOTIFICATION).is_some()
    }

    /// Builds the reply telling the server this client is not idle.
    pub fn idle_reply(sent_secs: i64) -> Self {
        Self {
            from: GCM_FROM_FIELD.to_string(),
            category: MCS_CATEGORY.to_string(),
            app_data: vec![AppData {
                key: IDLE_NOTIFICATION.to_string(),
                value: "false".to_string(),
            }],
            ttl: Some(0),
            sent: Some(sent_secs),
            ..Default::default()
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StreamAck {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SelectiveAck {
    #[prost(string, repeated, tag = "1")]
    pub id: Vec<String>,
}

/// A decoded MCS stanza.
///
/// Kinds the registry knows about but this client has no schema for are kept
/// as raw payloads in [`Message::Unhandled`].
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    HeartbeatPing(HeartbeatPing),
    HeartbeatAck(HeartbeatAck),
    LoginRequest(LoginRequest),
    LoginResponse(LoginResponse),
    Close(Close),
    IqStanza(IqStanza),
    DataMessage(DataMessageStanza),
    StreamError(StreamErrorStanza),
    Unhandled { kind: MessageKind, payload: Bytes },
}

impl Message {
    /// Returns the registry kind of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::HeartbeatPing(_) => MessageKind::HeartbeatPing,
            Message::HeartbeatAck(_) => MessageKind::HeartbeatAck,
            Message::LoginRequest(_) => MessageKind::LoginRequest,
            Message::LoginResponse(_) => MessageKind::LoginResponse,
            Message::Close(_) => MessageKind::Close,
            Message::IqStanza(_) => MessageKind::IqStanza,
            Message::DataMessage(_) => MessageKind::DataMessageStanza,
            Message::StreamError(_) => MessageKind::StreamErrorStanza,
            Message::Unhandled { kind, .. } => *kind,
        }
    }
}
