//! End-to-end session tests against an in-process fake MCS server speaking
//! plain TCP.

use mcs_client::{
    ClientConfig, CredentialStore, Credentials, DisconnectReason, McsClient, McsEvent,
    MemoryStore, PersistentIdStore, TlsClientConfig,
};
use mcs_protocol::message::ErrorInfo;
use mcs_protocol::{
    Close, DataMessageStanza, Decoder, Encoder, HeartbeatPing, LoginRequest, LoginResponse,
    Message, Registry, MCS_VERSION,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;

const ANDROID_ID: u64 = 4_000_000_000_123;
const SECURITY_TOKEN: u64 = 987_654_321;

/// Server side of one accepted connection.
struct FakeConn {
    stream: TcpStream,
    decoder: Decoder,
    encoder: Encoder,
}

impl FakeConn {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = tokio::time::timeout(Duration::from_secs(10), listener.accept())
            .await
            .expect("client never connected")
            .unwrap();
        Self {
            stream,
            decoder: Decoder::new(Registry::new()),
            encoder: Encoder::new(Registry::new()),
        }
    }

    async fn recv(&mut self) -> Message {
        loop {
            if let Some(decoded) = self.decoder.decode_next().unwrap() {
                return decoded.message;
            }
            let mut buf = [0u8; 1024];
            let n = tokio::time::timeout(Duration::from_secs(5), self.stream.read(&mut buf))
                .await
                .expect("client went quiet")
                .unwrap();
            assert!(n > 0, "client closed the connection");
            self.decoder.extend(&buf[..n]);
        }
    }

    async fn recv_login(&mut self) -> LoginRequest {
        match self.recv().await {
            Message::LoginRequest(login) => login,
            other => panic!("expected login request, got {:?}", other.kind()),
        }
    }

    async fn send(&mut self, message: Message) {
        let frame = self.encoder.encode(&message).unwrap();
        self.stream.write_all(&frame).await.unwrap();
    }

    /// Writes the version byte and the login response in one segment.
    async fn accept_login(&mut self) {
        let mut out = vec![MCS_VERSION];
        let response = Message::LoginResponse(LoginResponse {
            id: "login-1".to_string(),
            ..Default::default()
        });
        out.extend_from_slice(&self.encoder.encode(&response).unwrap());
        self.stream.write_all(&out).await.unwrap();
    }
}

fn data(persistent_id: &str, body: &str) -> Message {
    Message::DataMessage(DataMessageStanza {
        from: "1234567890".to_string(),
        category: "org.chromium.linux".to_string(),
        persistent_id: Some(persistent_id.to_string()),
        raw_data: Some(body.as_bytes().to_vec()),
        ..Default::default()
    })
}

fn local_config(listener: &TcpListener) -> ClientConfig {
    let port = listener.local_addr().unwrap().port();
    ClientConfig::new("127.0.0.1", port).with_tls(TlsClientConfig::disabled())
}

async fn next_event(events: &mut UnboundedReceiver<McsEvent>) -> McsEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("no event within timeout")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_login_delivery_heartbeat_and_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let store = Arc::new(MemoryStore::new());
    store.add_persistent_id("left-over").unwrap();

    let (handle, mut events) = McsClient::start(
        Credentials::new(ANDROID_ID, SECURITY_TOKEN),
        Arc::clone(&store),
        local_config(&listener),
    )
    .unwrap();

    // First connection: login carries the ids received before the restart.
    let mut conn = FakeConn::accept(&listener).await;
    let login = conn.recv_login().await;
    assert_eq!(conn.decoder.server_version(), Some(MCS_VERSION));
    assert_eq!(login.user, ANDROID_ID.to_string());
    assert_eq!(login.auth_token, SECURITY_TOKEN.to_string());
    assert_eq!(login.received_persistent_id, vec!["left-over".to_string()]);
    assert_eq!(next_event(&mut events).await, McsEvent::Connected);

    conn.accept_login().await;
    assert_eq!(next_event(&mut events).await, McsEvent::LoggedIn);

    conn.send(data("p1", "first")).await;
    conn.send(data("p1", "first again")).await;
    conn.send(data("p2", "second")).await;

    let McsEvent::Notification(n1) = next_event(&mut events).await else {
        panic!("expected a notification");
    };
    assert_eq!(n1.persistent_id.as_deref(), Some("p1"));
    assert_eq!(n1.raw_data.as_deref(), Some(&b"first"[..]));

    // the duplicate is swallowed, so p2 is next
    let McsEvent::Notification(n2) = next_event(&mut events).await else {
        panic!("expected a notification");
    };
    assert_eq!(n2.persistent_id.as_deref(), Some("p2"));

    // stream ids: login ack = 1, three data messages, then the ping = 5
    conn.send(Message::HeartbeatPing(HeartbeatPing::default())).await;
    match conn.recv().await {
        Message::HeartbeatAck(ack) => assert_eq!(ack.last_stream_id_received, Some(5)),
        other => panic!("expected heartbeat ack, got {:?}", other.kind()),
    }

    conn.send(Message::Close(Close {})).await;
    assert_eq!(
        next_event(&mut events).await,
        McsEvent::Disconnected {
            reason: DisconnectReason::ServerClose
        }
    );
    drop(conn);

    // Second connection: the login ack cleared "left-over"; p1 and p2 remain.
    let mut conn = FakeConn::accept(&listener).await;
    let login = conn.recv_login().await;
    let mut received = login.received_persistent_id.clone();
    received.sort();
    assert_eq!(received, vec!["p1".to_string(), "p2".to_string()]);
    assert_eq!(next_event(&mut events).await, McsEvent::Connected);

    handle.stop().await.unwrap();
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn test_login_rejection_triggers_retry() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (handle, mut events) = McsClient::start(
        Credentials::new(ANDROID_ID, SECURITY_TOKEN),
        MemoryStore::new(),
        local_config(&listener),
    )
    .unwrap();

    let mut conn = FakeConn::accept(&listener).await;
    conn.recv_login().await;
    assert_eq!(next_event(&mut events).await, McsEvent::Connected);

    let mut out = vec![MCS_VERSION];
    let rejected = Message::LoginResponse(LoginResponse {
        id: "login-1".to_string(),
        error: Some(ErrorInfo {
            code: 401,
            message: Some("unauthorized".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    });
    out.extend_from_slice(&conn.encoder.encode(&rejected).unwrap());
    conn.stream.write_all(&out).await.unwrap();

    assert_eq!(
        next_event(&mut events).await,
        McsEvent::Disconnected {
            reason: DisconnectReason::LoginRejected {
                code: 401,
                message: Some("unauthorized".to_string()),
            }
        }
    );

    // the client comes back after the backoff delay
    let mut conn = FakeConn::accept(&listener).await;
    conn.recv_login().await;
    assert_eq!(next_event(&mut events).await, McsEvent::Connected);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_bad_server_version_drops_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (handle, mut events) = McsClient::start(
        Credentials::new(ANDROID_ID, SECURITY_TOKEN),
        MemoryStore::new(),
        local_config(&listener),
    )
    .unwrap();

    let mut conn = FakeConn::accept(&listener).await;
    conn.recv_login().await;
    assert_eq!(next_event(&mut events).await, McsEvent::Connected);

    conn.stream.write_all(&[7, 3, 0]).await.unwrap();
    match next_event(&mut events).await {
        McsEvent::Disconnected {
            reason: DisconnectReason::Decode(_),
        } => {}
        other => panic!("expected decode disconnect, got {:?}", other),
    }

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_reconnect_logs_in_with_rotated_credentials() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let store = Arc::new(MemoryStore::new());
    let (handle, mut events) = McsClient::start(
        Credentials::new(1, 2),
        Arc::clone(&store),
        local_config(&listener),
    )
    .unwrap();

    let mut conn = FakeConn::accept(&listener).await;
    let login = conn.recv_login().await;
    assert_eq!(login.user, "1");
    assert_eq!(login.auth_token, "2");
    assert_eq!(next_event(&mut events).await, McsEvent::Connected);
    conn.accept_login().await;
    assert_eq!(next_event(&mut events).await, McsEvent::LoggedIn);

    // a periodic checkin rotates the pair while the connection is up
    store.set_credentials(Credentials::new(777, 888)).unwrap();
    drop(conn);
    assert_eq!(
        next_event(&mut events).await,
        McsEvent::Disconnected {
            reason: DisconnectReason::TransportClosed
        }
    );

    let mut conn = FakeConn::accept(&listener).await;
    let login = conn.recv_login().await;
    assert_eq!(login.user, "777");
    assert_eq!(login.auth_token, "888");

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_silent_server_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    // read timeout defaults to two heartbeat intervals
    let config = local_config(&listener).with_heartbeat_interval(Duration::from_secs(1));
    let (handle, mut events) = McsClient::start(
        Credentials::new(ANDROID_ID, SECURITY_TOKEN),
        MemoryStore::new(),
        config,
    )
    .unwrap();

    // No login response: nothing arrives within the read timeout.
    let mut conn = FakeConn::accept(&listener).await;
    conn.recv_login().await;
    assert_eq!(next_event(&mut events).await, McsEvent::Connected);
    assert_eq!(
        next_event(&mut events).await,
        McsEvent::Disconnected {
            reason: DisconnectReason::ReadTimeout
        }
    );
    drop(conn);

    // Logged in, then silent: one ping goes out and is never answered.
    let mut conn = FakeConn::accept(&listener).await;
    conn.recv_login().await;
    assert_eq!(next_event(&mut events).await, McsEvent::Connected);
    conn.accept_login().await;
    assert_eq!(next_event(&mut events).await, McsEvent::LoggedIn);

    match conn.recv().await {
        Message::HeartbeatPing(ping) => assert_eq!(ping.last_stream_id_received, Some(1)),
        other => panic!("expected heartbeat ping, got {:?}", other.kind()),
    }
    assert_eq!(
        next_event(&mut events).await,
        McsEvent::Disconnected {
            reason: DisconnectReason::HeartbeatTimeout
        }
    );

    handle.stop().await.unwrap();
}
