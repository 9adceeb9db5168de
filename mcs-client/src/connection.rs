//! Connection driver.
//!
//! A single task owns the socket, the decoder, the [`Session`] and both
//! timers. Every input is funnelled through one `select!` loop, so session
//! state is never touched concurrently and a timer can never fire into a
//! state that did not arm it.

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::event::{DisconnectReason, McsEvent};
use crate::session::{Action, Session};
use crate::stream::{self, ClientStream};
use crate::tls::{build_tls_target, TlsTarget};
use mcs_protocol::{Decoder, Encoder, Registry};
use mcs_storage::{CredentialStore, Credentials, PersistentIdStore};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};

/// Entry point for running a push listener.
pub struct McsClient;

impl McsClient {
    /// Spawns the driver task and returns its handle and event stream.
    ///
    /// The first connection attempt starts immediately. Reconnects continue
    /// until [`McsHandle::stop`] is called or the handle is dropped. Every
    /// attempt logs in with the credentials currently in `store`, so a
    /// periodic checkin writing there takes effect on the next reconnect;
    /// `credentials` is used while the store holds none.
    pub fn start<S>(
        credentials: Credentials,
        store: S,
        config: ClientConfig,
    ) -> Result<(McsHandle, mpsc::UnboundedReceiver<McsEvent>), ClientError>
    where
        S: PersistentIdStore + CredentialStore + 'static,
    {
        config.validate()?;
        let tls = build_tls_target(&config.tls, &config.host)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();

        let driver = Driver {
            session: Session::new(credentials, store, config.heartbeat_interval()),
            encoder: Encoder::new(Registry::new()),
            config,
            tls,
            events: events_tx,
            stop: stop_rx,
        };
        let task = tokio::spawn(driver.run());

        Ok((
            McsHandle {
                stop: Some(stop_tx),
                task,
            },
            events_rx,
        ))
    }
}

/// Handle to a running client.
pub struct McsHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl McsHandle {
    /// Stops the client and waits for the driver to release the connection.
    pub async fn stop(mut self) -> Result<(), ClientError> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        (&mut self.task).await.map_err(|e| {
            tracing::error!("Driver task failed: {}", e);
            ClientError::Stopped
        })
    }

    /// Returns whether the driver task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// How a single connection ended.
enum ConnectionEnd {
    Stopped,
    Failed(DisconnectReason),
    /// Retrying cannot help; the driver reports the reason and exits.
    Fatal(DisconnectReason),
}

struct Driver<S: PersistentIdStore + CredentialStore> {
    session: Session<S>,
    encoder: Encoder,
    config: ClientConfig,
    tls: Option<TlsTarget>,
    events: mpsc::UnboundedSender<McsEvent>,
    stop: oneshot::Receiver<()>,
}

impl<S: PersistentIdStore + CredentialStore> Driver<S> {
    async fn run(mut self) {
        tracing::info!(
            "Starting MCS client for {}:{} (tls={})",
            self.config.host,
            self.config.port,
            self.tls.is_some()
        );

        loop {
            let reason = match self.run_connection().await {
                ConnectionEnd::Stopped => break,
                ConnectionEnd::Failed(reason) => reason,
                ConnectionEnd::Fatal(reason) => {
                    tracing::error!("Giving up: {}", reason);
                    self.emit(McsEvent::Disconnected { reason });
                    break;
                }
            };

            let Some(delay) = self.session.on_transport_failure(&reason) else {
                break;
            };
            self.emit(McsEvent::Disconnected { reason });

            tokio::select! {
                _ = sleep(delay) => {}
                _ = &mut self.stop => break,
            }
        }

        self.session.stop();
        tracing::info!("MCS client stopped");
    }

    /// Runs one connection from connect to teardown.
    async fn run_connection(&mut self) -> ConnectionEnd {
        let login = match self.session.begin_connect() {
            Ok(bytes) => bytes,
            Err(ClientError::Stopped) => return ConnectionEnd::Stopped,
            Err(ClientError::Storage(e)) => {
                tracing::warn!("Cannot read the store for login: {}", e);
                return ConnectionEnd::Failed(DisconnectReason::Storage(e.to_string()));
            }
            Err(e) => {
                tracing::error!("Cannot build login request: {}", e);
                return ConnectionEnd::Fatal(DisconnectReason::Encode(e.to_string()));
            }
        };

        tracing::debug!("Connecting to {}:{}", self.config.host, self.config.port);
        let connected = tokio::select! {
            res = stream::connect(&self.config, self.tls.as_ref()) => res,
            _ = &mut self.stop => return ConnectionEnd::Stopped,
        };
        let mut stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Connect failed: {}", e);
                return ConnectionEnd::Failed(DisconnectReason::ConnectFailed(e.to_string()));
            }
        };

        let mut heartbeat: Option<Instant> = None;
        let actions = self.session.on_transport_connected();
        if let Err(reason) = self.apply(actions, &mut stream, &mut heartbeat).await {
            return self.teardown(stream, ConnectionEnd::Failed(reason)).await;
        }

        if let Err(e) = stream.write_all(&login).await {
            let reason = DisconnectReason::ConnectFailed(e.to_string());
            return self.teardown(stream, ConnectionEnd::Failed(reason)).await;
        }
        tracing::debug!("Login request sent ({} bytes)", login.len());

        let end = self.read_loop(&mut stream, &mut heartbeat).await;
        self.teardown(stream, end).await
    }

    async fn read_loop(
        &mut self,
        stream: &mut ClientStream,
        heartbeat: &mut Option<Instant>,
    ) -> ConnectionEnd {
        let mut decoder = Decoder::new(Registry::new());
        let mut buf = vec![0u8; self.config.read_buffer_size];
        let read_timeout = self.config.read_timeout();

        loop {
            let deadline = *heartbeat;
            tokio::select! {
                _ = &mut self.stop => return ConnectionEnd::Stopped,

                read = tokio::time::timeout(read_timeout, stream.read(&mut buf)) => {
                    let n = match read {
                        Err(_) => {
                            tracing::warn!("No data for {:?}", read_timeout);
                            return ConnectionEnd::Failed(DisconnectReason::ReadTimeout);
                        }
                        Ok(Err(e)) => {
                            return ConnectionEnd::Failed(DisconnectReason::TransportError(e.to_string()));
                        }
                        Ok(Ok(0)) => return ConnectionEnd::Failed(DisconnectReason::TransportClosed),
                        Ok(Ok(n)) => n,
                    };

                    tracing::trace!("Read {} bytes", n);
                    decoder.extend(&buf[..n]);
                    if let Err(reason) = self.drain(&mut decoder, stream, heartbeat).await {
                        return ConnectionEnd::Failed(reason);
                    }
                }

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    *heartbeat = None;
                    let actions = self.session.on_heartbeat_timer();
                    if let Err(reason) = self.apply(actions, stream, heartbeat).await {
                        return ConnectionEnd::Failed(reason);
                    }
                }
            }
        }
    }

    /// Hands every complete message in the decoder to the session.
    async fn drain(
        &mut self,
        decoder: &mut Decoder,
        stream: &mut ClientStream,
        heartbeat: &mut Option<Instant>,
    ) -> Result<(), DisconnectReason> {
        loop {
            let decoded = match decoder.decode_next() {
                Ok(Some(decoded)) => decoded,
                Ok(None) => return Ok(()),
                Err(e) => {
                    tracing::warn!("Dropping connection on decode error: {}", e);
                    return Err(DisconnectReason::Decode(e.to_string()));
                }
            };

            tracing::debug!("Received {:?}", decoded.message.kind());
            let actions = self
                .session
                .on_message(decoded.message)
                .map_err(|e| DisconnectReason::Storage(e.to_string()))?;
            self.apply(actions, stream, heartbeat).await?;
        }
    }

    /// Executes session actions in order.
    async fn apply(
        &mut self,
        actions: Vec<Action>,
        stream: &mut ClientStream,
        heartbeat: &mut Option<Instant>,
    ) -> Result<(), DisconnectReason> {
        for action in actions {
            match action {
                Action::Send(message) => {
                    let frame = match self.encoder.encode(&message) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::error!("Cannot encode {:?}: {}", message.kind(), e);
                            return Err(DisconnectReason::Encode(e.to_string()));
                        }
                    };
                    tracing::debug!("Sending {:?} ({} bytes)", message.kind(), frame.len());
                    stream
                        .write_all(&frame)
                        .await
                        .map_err(|e| DisconnectReason::TransportError(e.to_string()))?;
                }
                Action::Emit(event) => self.emit(event),
                Action::ArmHeartbeat(delay) => *heartbeat = Some(Instant::now() + delay),
                Action::CancelHeartbeat => *heartbeat = None,
                Action::Reconnect(reason) => return Err(reason),
            }
        }
        Ok(())
    }

    fn emit(&self, event: McsEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Event receiver dropped");
        }
    }

    async fn teardown(&mut self, mut stream: ClientStream, end: ConnectionEnd) -> ConnectionEnd {
        if let ConnectionEnd::Stopped = end {
            self.session.stop();
        }
        // The peer may already be gone; shutdown errors carry no information.
        let _ = tokio::time::timeout(Duration::from_secs(1), stream.shutdown()).await;
        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsClientConfig;
    use mcs_storage::MemoryStore;

    #[tokio::test]
    async fn test_stop_while_retrying() {
        // nothing listens on this port once the listener is dropped
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = ClientConfig::new("127.0.0.1", port).with_tls(TlsClientConfig::disabled());
        let (handle, mut events) =
            McsClient::start(Credentials::new(1, 2), MemoryStore::new(), config).unwrap();

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            McsEvent::Disconnected {
                reason: DisconnectReason::ConnectFailed(_)
            }
        ));

        handle.stop().await.unwrap();
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unencodable_login_stops_driver() {
        // a single received id larger than any frame the codec will write
        let store = MemoryStore::new();
        store
            .add_persistent_id(&"x".repeat(mcs_protocol::MAX_PAYLOAD_SIZE as usize + 1))
            .unwrap();

        let config = ClientConfig::new("127.0.0.1", 1).with_tls(TlsClientConfig::disabled());
        let (handle, mut events) =
            McsClient::start(Credentials::new(1, 2), store, config).unwrap();

        match events.recv().await {
            Some(McsEvent::Disconnected {
                reason: DisconnectReason::Encode(_),
            }) => {}
            other => panic!("expected encode disconnect, got {:?}", other),
        }
        // no retry follows
        assert!(events.recv().await.is_none());
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = ClientConfig::new("127.0.0.1", 1);
        config.heartbeat_interval_secs = 0;
        let result = McsClient::start(Credentials::new(1, 2), MemoryStore::new(), config);
        assert!(matches!(result, Err(ClientError::Config(_))));
    }
}
