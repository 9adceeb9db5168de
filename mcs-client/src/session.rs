//! Session state machine.
//!
//! The session owns no socket and no timer. Each input (transport connected,
//! message received, heartbeat timer fired, transport failed, stop) mutates
//! the session and returns the [`Action`]s the driver must carry out, in
//! order. This keeps every protocol rule testable without I/O.
//!
//! ```text
//! Idle -> Connecting -> AwaitingLoginAck -> Active
//!   ^                                         |
//!   +---- RetryScheduled <--- (any failure) --+
//!
//! Stopped is terminal and reachable from every state.
//! ```

use crate::error::ClientError;
use crate::event::{DisconnectReason, McsEvent, Notification};
use bytes::Bytes;
use mcs_protocol::{
    DataMessageStanza, Encoder, HeartbeatAck, HeartbeatPing, IqExtension, IqStanza,
    LoginRequest, LoginResponse, Message,
};
use mcs_storage::{CredentialStore, Credentials, PersistentIdStore};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Messages received since the last flush before a stream ack is sent.
pub const MAX_UNACKED_IDS: usize = 10;

/// Upper bound of the reconnect delay.
pub const MAX_RETRY_DELAY_SECS: u64 = 15;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    AwaitingLoginAck,
    Active,
    RetryScheduled,
    Stopped,
}

/// Side effect requested by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Encode and write a stanza.
    Send(Message),
    /// Deliver an event to the application.
    Emit(McsEvent),
    /// (Re)arm the heartbeat timer to fire after the given delay.
    ArmHeartbeat(Duration),
    CancelHeartbeat,
    /// Tear down the connection and report the failure back.
    Reconnect(DisconnectReason),
}

/// Protocol state of one logical MCS client across reconnects.
///
/// Each connection attempt logs in with the credentials currently held by
/// the store, falling back to the ones given at construction.
pub struct Session<S: PersistentIdStore + CredentialStore> {
    credentials: Credentials,
    store: S,
    encoder: Encoder,
    heartbeat_interval: Duration,
    state: SessionState,
    stream_id: i32,
    unacked: usize,
    waiting_for_heartbeat_ack: bool,
    retry_count: u32,
}

impl<S: PersistentIdStore + CredentialStore> Session<S> {
    pub fn new(credentials: Credentials, store: S, heartbeat_interval: Duration) -> Self {
        Self {
            credentials,
            store,
            encoder: Encoder::default(),
            heartbeat_interval,
            state: SessionState::Idle,
            stream_id: 0,
            unacked: 0,
            waiting_for_heartbeat_ack: false,
            retry_count: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Credentials used by the latest login.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Messages processed since login; 0 before the login ack.
    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn unacked_count(&self) -> usize {
        self.unacked
    }

    pub fn is_waiting_for_heartbeat_ack(&self) -> bool {
        self.waiting_for_heartbeat_ack
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Starts a connection attempt and returns the bytes to write first:
    /// the version byte followed by the login request.
    pub fn begin_connect(&mut self) -> Result<Bytes, ClientError> {
        if self.state == SessionState::Stopped {
            return Err(ClientError::Stopped);
        }

        self.state = SessionState::Connecting;
        self.stream_id = 0;
        self.unacked = 0;
        self.waiting_for_heartbeat_ack = false;

        match self.store.credentials()? {
            Some(stored) if stored.is_valid() && stored != self.credentials => {
                tracing::info!(
                    "Logging in with refreshed credentials for device {}",
                    stored.android_id
                );
                self.credentials = stored;
            }
            _ => {}
        }

        let received = self.store.all_persistent_ids()?;
        tracing::debug!(
            "Logging in as device {} with {} received persistent ids",
            self.credentials.android_id,
            received.len()
        );
        let login = LoginRequest::for_device(
            self.credentials.android_id,
            self.credentials.security_token,
            received,
        );
        Ok(self.encoder.encode_login(&login)?.freeze())
    }

    /// The transport is up and the login bytes are about to be written.
    pub fn on_transport_connected(&mut self) -> Vec<Action> {
        if self.state != SessionState::Connecting {
            tracing::debug!("Ignoring transport connect in state {:?}", self.state);
            return Vec::new();
        }
        self.state = SessionState::AwaitingLoginAck;
        self.retry_count = 0;
        vec![Action::Emit(McsEvent::Connected)]
    }

    /// Processes one decoded inbound message.
    pub fn on_message(&mut self, message: Message) -> Result<Vec<Action>, ClientError> {
        match self.state {
            SessionState::AwaitingLoginAck => self.on_login_phase_message(message),
            SessionState::Active => self.on_active_message(message),
            state => {
                tracing::debug!("Dropping {:?} received in state {:?}", message.kind(), state);
                Ok(Vec::new())
            }
        }
    }

    fn on_login_phase_message(&mut self, message: Message) -> Result<Vec<Action>, ClientError> {
        let Message::LoginResponse(response) = message else {
            tracing::warn!("Ignoring {:?} before login ack", message.kind());
            return Ok(Vec::new());
        };
        self.on_login_response(response)
    }

    fn on_login_response(&mut self, response: LoginResponse) -> Result<Vec<Action>, ClientError> {
        if let Some(error) = response.login_error() {
            tracing::warn!(
                "Login rejected with code {}: {}",
                error.code,
                error.message.as_deref().unwrap_or("")
            );
            return Ok(vec![
                Action::CancelHeartbeat,
                Action::Reconnect(DisconnectReason::LoginRejected {
                    code: error.code,
                    message: error.message.clone(),
                }),
            ]);
        }

        // The ids just went out in the login request.
        self.store.clear_persistent_ids()?;

        self.stream_id = 1;
        self.unacked = 0;
        self.waiting_for_heartbeat_ack = false;
        self.retry_count = 0;
        self.state = SessionState::Active;
        tracing::info!("Logged in to MCS (login id {})", response.id);

        Ok(vec![
            Action::Emit(McsEvent::LoggedIn),
            Action::ArmHeartbeat(self.heartbeat_interval),
        ])
    }

    fn on_active_message(&mut self, message: Message) -> Result<Vec<Action>, ClientError> {
        self.stream_id = self.stream_id.wrapping_add(1);
        self.waiting_for_heartbeat_ack = false;
        self.unacked += 1;

        let mut actions = match message {
            Message::DataMessage(msg) => self.on_data_message(msg)?,
            Message::HeartbeatPing(_) => {
                tracing::debug!("Heartbeat ping from server");
                vec![Action::Send(Message::HeartbeatAck(HeartbeatAck {
                    last_stream_id_received: Some(self.stream_id),
                    ..Default::default()
                }))]
            }
            Message::HeartbeatAck(_) => {
                tracing::debug!("Heartbeat ack");
                Vec::new()
            }
            Message::Close(_) => {
                tracing::info!("Server closed the stream");
                vec![
                    Action::CancelHeartbeat,
                    Action::Reconnect(DisconnectReason::ServerClose),
                ]
            }
            Message::IqStanza(iq) => {
                self.on_iq(&iq);
                Vec::new()
            }
            Message::StreamError(err) => {
                tracing::warn!(
                    "Stream error from server: {} {}",
                    err.r#type,
                    err.text.as_deref().unwrap_or("")
                );
                Vec::new()
            }
            other => {
                tracing::debug!("Ignoring {:?}", other.kind());
                Vec::new()
            }
        };

        let reconnecting = actions
            .iter()
            .any(|a| matches!(a, Action::Reconnect(_)));
        if !reconnecting && self.unacked >= MAX_UNACKED_IDS {
            actions.push(self.flush_acks()?);
        }

        Ok(actions)
    }

    fn on_data_message(&mut self, msg: DataMessageStanza) -> Result<Vec<Action>, ClientError> {
        if msg.is_idle_probe() {
            tracing::debug!("Answering idle probe");
            return Ok(vec![Action::Send(Message::DataMessage(
                DataMessageStanza::idle_reply(unix_secs()),
            ))]);
        }

        match msg.persistent_id.as_deref() {
            Some(id) => {
                if self.store.has_persistent_id(id)? {
                    tracing::debug!("Dropping redelivered message {}", id);
                    return Ok(Vec::new());
                }
                self.store.add_persistent_id(id)?;
            }
            None => tracing::debug!("Data message without persistent id"),
        }

        Ok(vec![Action::Emit(McsEvent::Notification(Notification::from(
            msg,
        )))])
    }

    fn on_iq(&self, iq: &IqStanza) {
        match iq.ack_extension() {
            Ok(IqExtension::StreamAck) => tracing::debug!("Stream ack from server"),
            Ok(IqExtension::SelectiveAck(ids)) => {
                // Nothing is sent reliably, so there is nothing to release.
                tracing::debug!("Selective ack for {} ids", ids.len());
            }
            Ok(IqExtension::Other(id)) => tracing::debug!("Ignoring iq extension {}", id),
            Ok(IqExtension::None) => tracing::debug!("Ignoring iq {}", iq.id),
            Err(e) => tracing::warn!("Malformed iq extension: {}", e),
        }
    }

    fn flush_acks(&mut self) -> Result<Action, ClientError> {
        tracing::debug!("Acknowledging stream up to {}", self.stream_id);
        self.store.clear_persistent_ids()?;
        self.unacked = 0;
        Ok(Action::Send(Message::IqStanza(IqStanza::stream_ack(
            self.stream_id,
        ))))
    }

    /// The heartbeat timer fired.
    pub fn on_heartbeat_timer(&mut self) -> Vec<Action> {
        if self.state != SessionState::Active {
            tracing::debug!("Stale heartbeat timer in state {:?}", self.state);
            return Vec::new();
        }

        if self.waiting_for_heartbeat_ack {
            tracing::warn!("No traffic since the last heartbeat ping");
            return vec![
                Action::CancelHeartbeat,
                Action::Reconnect(DisconnectReason::HeartbeatTimeout),
            ];
        }

        self.waiting_for_heartbeat_ack = true;
        vec![
            Action::Send(Message::HeartbeatPing(HeartbeatPing {
                last_stream_id_received: Some(self.stream_id),
                ..Default::default()
            })),
            Action::ArmHeartbeat(self.heartbeat_interval),
        ]
    }

    /// The connection is gone. Returns the delay before the next attempt,
    /// or `None` once stopped.
    pub fn on_transport_failure(&mut self, reason: &DisconnectReason) -> Option<Duration> {
        if self.state == SessionState::Stopped {
            return None;
        }

        self.retry_count = self.retry_count.saturating_add(1);
        self.state = SessionState::RetryScheduled;
        self.waiting_for_heartbeat_ack = false;

        let delay = backoff_delay(self.retry_count);
        tracing::info!(
            "Disconnected ({}), reconnecting in {}s",
            reason,
            delay.as_secs()
        );
        Some(delay)
    }

    /// Stops the session for good.
    pub fn stop(&mut self) -> Vec<Action> {
        if self.state == SessionState::Stopped {
            return Vec::new();
        }
        tracing::debug!("Stopping session in state {:?}", self.state);
        self.state = SessionState::Stopped;
        self.waiting_for_heartbeat_ack = false;
        vec![Action::CancelHeartbeat]
    }
}

/// Reconnect delay after `retry_count` consecutive failures.
pub fn backoff_delay(retry_count: u32) -> Duration {
    Duration::from_secs(u64::from(retry_count.max(1)).min(MAX_RETRY_DELAY_SECS))
}

fn unix_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
