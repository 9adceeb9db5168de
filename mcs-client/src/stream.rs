//! Transport stream: plain TCP or TLS over TCP.

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::tls::TlsTarget;
use pin_project_lite::pin_project;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpSocket, TcpStream};
use tokio_rustls::client::TlsStream as ClientTlsStream;

pin_project! {
    /// A client stream that can be either plain TCP or TLS.
    #[project = ClientStreamProj]
    pub enum ClientStream {
        Plain { #[pin] stream: TcpStream },
        Tls { #[pin] stream: ClientTlsStream<TcpStream> },
    }
}

impl ClientStream {
    /// Returns whether this stream is TLS-encrypted.
    pub fn is_tls(&self) -> bool {
        matches!(self, ClientStream::Tls { .. })
    }
}

/// Opens the transport to the configured endpoint.
///
/// The TCP connect and the TLS handshake share one `connect_timeout`.
pub async fn connect(
    config: &ClientConfig,
    tls: Option<&TlsTarget>,
) -> Result<ClientStream, ClientError> {
    tokio::time::timeout(config.connect_timeout(), connect_inner(config, tls))
        .await
        .map_err(|_| {
            tracing::debug!("Connect to {}:{} timed out", config.host, config.port);
            ClientError::Timeout
        })?
}

async fn connect_inner(
    config: &ClientConfig,
    tls: Option<&TlsTarget>,
) -> Result<ClientStream, ClientError> {
    let tcp = connect_tcp(&config.host, config.port).await?;

    match tls {
        Some(target) => {
            tracing::debug!("Performing TLS handshake with {:?}", target.server_name);
            let stream = target
                .connector
                .connect(target.server_name.clone(), tcp)
                .await
                .map_err(|e| ClientError::TlsHandshake(e.to_string()))?;
            Ok(ClientStream::Tls { stream })
        }
        None => Ok(ClientStream::Plain { stream: tcp }),
    }
}

/// Connects to the first reachable address of `host`, with SO_KEEPALIVE set.
async fn connect_tcp(host: &str, port: u16) -> Result<TcpStream, ClientError> {
    let mut last_err = None;
    for addr in tokio::net::lookup_host((host, port)).await? {
        match connect_addr(addr).await {
            Ok(stream) => {
                tracing::debug!("TCP connected to {}", addr);
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!("Connect to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }

    Err(ClientError::Io(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses for {}", host),
        )
    })))
}

async fn connect_addr(addr: SocketAddr) -> io::Result<TcpStream> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_keepalive(true)?;
    let stream = socket.connect(addr).await?;
    stream.set_nodelay(true).ok();
    Ok(stream)
}

impl AsyncRead for ClientStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_read(cx, buf),
            ClientStreamProj::Tls { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClientStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_write(cx, buf),
            ClientStreamProj::Tls { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_flush(cx),
            ClientStreamProj::Tls { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_shutdown(cx),
            ClientStreamProj::Tls { stream } => stream.poll_shutdown(cx),
        }
    }
}
