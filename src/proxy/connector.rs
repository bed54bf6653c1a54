//! Backend Connector
//!
//! Opens one fresh outbound connection per proxied request or session.
//! Nothing is pooled and nothing is retried: every failure is reported to
//! the caller as a [`ConnectError`].

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::error::ConnectError;
use crate::proxy::target::BackendTarget;

/// An open connection to the backend, plain or TLS.
pub enum BackendStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl std::fmt::Debug for BackendStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            BackendStream::Plain(_) => "Plain",
            BackendStream::Tls(_) => "Tls",
        };
        f.debug_tuple(kind).field(&self.peer_addr().ok()).finish()
    }
}

impl BackendStream {
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            BackendStream::Plain(s) => s.peer_addr(),
            BackendStream::Tls(s) => s.get_ref().0.peer_addr(),
        }
    }
}

impl AsyncRead for BackendStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            BackendStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for BackendStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            BackendStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            BackendStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Plain(s) => Pin::new(s).poll_flush(cx),
            BackendStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            BackendStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Connects to a [`BackendTarget`], bounded by a connect timeout.
#[derive(Clone)]
pub struct BackendConnector {
    tls: Option<TlsConnector>,
    connect_timeout: Duration,
}

impl BackendConnector {
    /// Build a connector for `target`. TLS state is only prepared for
    /// `wss`/`https` targets.
    pub fn new(target: &BackendTarget, connect_timeout: Duration) -> Self {
        let tls = target.is_tls().then(build_tls_connector);
        Self {
            tls,
            connect_timeout,
        }
    }

    /// Resolve, connect and (for TLS schemes) complete the TLS handshake.
    ///
    /// The caller owns the returned socket and closes it by dropping it.
    pub async fn connect(&self, target: &BackendTarget) -> Result<BackendStream, ConnectError> {
        let addr = format!("{}:{}", target.host, target.port);

        timeout(self.connect_timeout, self.establish(target))
            .await
            .map_err(|_| ConnectError::Timeout {
                addr,
                after: self.connect_timeout,
            })?
    }

    async fn establish(&self, target: &BackendTarget) -> Result<BackendStream, ConnectError> {
        let stream = open_tcp(target).await?;

        let Some(tls) = &self.tls else {
            return Ok(BackendStream::Plain(stream));
        };

        let server_name = ServerName::try_from(target.host.clone()).map_err(|e| {
            ConnectError::Handshake {
                host: target.host.clone(),
                reason: e.to_string(),
            }
        })?;

        let tls_stream = tls
            .connect(server_name, stream)
            .await
            .map_err(|e| ConnectError::Handshake {
                host: target.host.clone(),
                reason: e.to_string(),
            })?;

        tracing::trace!(host = %target.host, "TLS session established with backend");
        Ok(BackendStream::Tls(Box::new(tls_stream)))
    }
}

async fn open_tcp(target: &BackendTarget) -> Result<TcpStream, ConnectError> {
    let addrs: Vec<SocketAddr> = lookup_host(target.socket_addr())
        .await
        .map_err(|e| ConnectError::Dns {
            host: target.host.clone(),
            reason: e.to_string(),
        })?
        .collect();

    if addrs.is_empty() {
        return Err(ConnectError::Dns {
            host: target.host.clone(),
            reason: "no addresses returned".to_string(),
        });
    }

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                tracing::trace!(backend = %addr, "Connected to backend");
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(backend = %addr, error = %e, "Backend address failed");
                last_error = Some(match e.kind() {
                    io::ErrorKind::ConnectionRefused => ConnectError::Refused {
                        addr: addr.to_string(),
                    },
                    _ => ConnectError::Io {
                        addr: addr.to_string(),
                        source: e,
                    },
                });
            }
        }
    }

    Err(last_error.unwrap_or_else(|| ConnectError::Dns {
        host: target.host.clone(),
        reason: "no addresses returned".to_string(),
    }))
}

fn build_tls_connector() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    // The upgrade handshake is HTTP/1.1 only.
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    TlsConnector::from(Arc::new(config))
}
