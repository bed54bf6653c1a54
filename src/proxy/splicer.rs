//! Upgrade Splicer
//!
//! Takes over a client connection that asked for `Upgrade: websocket`,
//! replays the handshake against the backend and, once the backend answers
//! `101 Switching Protocols`, relays raw bytes in both directions until
//! the tunnel is torn down. WebSocket frames are never interpreted.
//!
//! # Session lifecycle
//!
//! ```text
//!   Pending ──► Handshaking ──► Established ──► Draining(dir) ──► Closed
//!                   │                 │
//!                   │ backend error,  │ hard I/O error, idle timeout,
//!                   │ non-101 reply,  │ session limit
//!                   │ client gone     │
//!                   └─────────────────┴──────────────────────────► Closed
//! ```
//!
//! Established is entered only after the backend's response head has been
//! written to the client in full. When one copy loop reaches EOF it
//! half-closes its peer and the other loop gets `drain_grace` to finish;
//! then both sockets are dropped together.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::ProxyError;
use crate::http::cors::CorsPolicy;
use crate::http::request::Request;
use crate::http::response::{Response, ResponseHead, StatusCode};
use crate::http::writer::ResponseWriter;
use crate::proxy::connector::{BackendConnector, BackendStream};
use crate::proxy::forwarder::read_response_head;
use crate::proxy::rewrite::build_upgrade_request;
use crate::proxy::session::{Direction, ProxySession, SessionState, TerminationReason, Traffic};
use crate::proxy::target::BackendTarget;

const BUFFER_SIZE: usize = 16 * 1024;

/// Client bytes buffered while the backend handshake is in flight.
const MAX_EARLY_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct SpliceSettings {
    pub prefix: String,
    /// Bound on waiting for the backend's handshake response
    pub response_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub max_session: Option<Duration>,
    pub drain_grace: Duration,
}

impl Default for SpliceSettings {
    fn default() -> Self {
        Self {
            prefix: "/ws".to_string(),
            response_timeout: Duration::from_secs(30),
            idle_timeout: None,
            max_session: None,
            drain_grace: Duration::from_secs(1),
        }
    }
}

/// Backend side of a completed handshake.
struct Handshake {
    stream: BackendStream,
    head: ResponseHead,
    raw_head: Bytes,
    leftover: BytesMut,
}

/// How one copy loop ended.
#[derive(Debug)]
enum PumpEnd {
    Eof,
    ReadFailed(io::Error),
    WriteFailed(io::Error),
}

pub struct UpgradeSplicer {
    target: Arc<BackendTarget>,
    connector: BackendConnector,
    settings: SpliceSettings,
    cors: CorsPolicy,
}

impl UpgradeSplicer {
    pub fn new(
        target: Arc<BackendTarget>,
        connector: BackendConnector,
        settings: SpliceSettings,
        cors: CorsPolicy,
    ) -> Self {
        Self {
            target,
            connector,
            settings,
            cors,
        }
    }

    /// Run one upgrade session to completion.
    ///
    /// `head` holds client bytes that arrived after the upgrade request;
    /// they reach the backend before anything else once the tunnel is up.
    /// Failures are logged here and reflected in the returned session.
    pub async fn run<C>(
        &self,
        mut client: C,
        peer: SocketAddr,
        request: Request,
        mut head: BytesMut,
    ) -> ProxySession
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let mut session = ProxySession::new(peer, request.path.clone());
        session.transition(SessionState::Handshaking);

        // Watch the client while the backend handshake runs: a disconnect
        // drops the handshake future, which aborts the backend connection.
        let outcome = {
            let handshake = self.handshake(&request);
            tokio::pin!(handshake);

            loop {
                tokio::select! {
                    res = &mut handshake => break res,
                    read = client.read_buf(&mut head), if head.len() < MAX_EARLY_BYTES => {
                        match read {
                            Ok(0) | Err(_) => break Err(ProxyError::ClientDisconnected),
                            Ok(_) => {}
                        }
                    }
                }
            }
        };

        let handshake = match outcome {
            Ok(handshake) => handshake,
            Err(ProxyError::ClientDisconnected) => {
                tracing::debug!(
                    path = %session.path,
                    remote_address = %peer,
                    "Client disconnected during upgrade handshake"
                );
                session.close(TerminationReason::ClientDisconnected);
                return session;
            }
            Err(e) => {
                tracing::error!(path = %session.path, error = %e, "Proxy error");
                self.reject(&mut client, &e).await;
                session.close(failure_reason(&e));
                return session;
            }
        };

        let Handshake {
            stream: mut backend,
            head: response,
            raw_head,
            leftover,
        } = handshake;

        if response.status != StatusCode::SWITCHING_PROTOCOLS {
            tracing::error!(
                path = %session.path,
                status = response.status.as_u16(),
                "WebSocket upgrade rejected by backend"
            );
            // Relay what the backend said, then close instead of leaving
            // the client waiting for a switch that will not happen.
            let _ = client.write_all(&raw_head).await;
            let _ = client.write_all(&leftover).await;
            let _ = client.shutdown().await;
            session.close(TerminationReason::ProtocolMismatch);
            return session;
        }

        // The full 101 head must reach the client before any tunnel bytes.
        let relayed = async {
            client.write_all(&raw_head).await?;
            client.write_all(&leftover).await?;
            client.flush().await
        };
        if let Err(e) = relayed.await {
            tracing::debug!(path = %session.path, error = %e, "Client gone before upgrade completed");
            session.close(TerminationReason::ClientDisconnected);
            return session;
        }

        session.transition(SessionState::Established);
        session.traffic().touch();
        tracing::info!(
            path = %session.path,
            remote_address = %peer,
            "WebSocket connection proxied"
        );

        if !head.is_empty() {
            let forwarded = async {
                backend.write_all(&head).await?;
                backend.flush().await
            };
            if let Err(e) = forwarded.await {
                tracing::debug!(path = %session.path, error = %e, "Backend gone before head bytes were sent");
                session.close(TerminationReason::UpstreamReset);
                return session;
            }
            session
                .traffic()
                .record(Direction::ClientToBackend, head.len());
        }

        let reason = self.splice(client, backend, &mut session).await;
        session.close(reason);

        tracing::info!(
            path = %session.path,
            remote_address = %peer,
            reason = %reason,
            bytes_up = session.bytes(Direction::ClientToBackend),
            bytes_down = session.bytes(Direction::BackendToClient),
            duration_ms = session.created_at.elapsed().as_millis() as u64,
            "WebSocket session closed"
        );

        session
    }

    /// Connect to the backend, send the upgrade request and read its answer.
    async fn handshake(&self, request: &Request) -> Result<Handshake, ProxyError> {
        let mut stream = self.connector.connect(&self.target).await?;

        let mut request_bytes = build_upgrade_request(&self.target, request, &self.settings.prefix);
        request_bytes.extend_from_slice(&request.body);
        stream.write_all(&request_bytes).await?;
        stream.flush().await?;

        let (head, raw_head, leftover) =
            timeout(self.settings.response_timeout, read_response_head(&mut stream))
                .await
                .map_err(|_| ProxyError::ResponseTimeout(self.settings.response_timeout))??;

        Ok(Handshake {
            stream,
            head,
            raw_head,
            leftover,
        })
    }

    /// Best-effort error response to a client still waiting on its handshake.
    async fn reject<C>(&self, client: &mut C, error: &ProxyError)
    where
        C: AsyncWrite + Unpin,
    {
        let mut response = Response::proxy_error(&error.to_string());
        self.cors.apply(&mut response.headers);
        response.headers.insert("Connection", "close");

        if let Err(e) = ResponseWriter::new(&response).write_to_stream(client).await {
            tracing::debug!(error = %e, "Could not deliver upgrade error response");
        }
        let _ = client.shutdown().await;
    }

    /// Relay bytes both ways until the session ends.
    async fn splice<C>(
        &self,
        client: C,
        backend: BackendStream,
        session: &mut ProxySession,
    ) -> TerminationReason
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let traffic = session.traffic();
        let (client_read, client_write) = tokio::io::split(client);
        let (backend_read, backend_write) = tokio::io::split(backend);

        let upstream = pump(client_read, backend_write, Direction::ClientToBackend, &traffic);
        let downstream = pump(backend_read, client_write, Direction::BackendToClient, &traffic);
        let idle = idle_watch(&traffic, self.settings.idle_timeout);
        let limit = deadline(self.settings.max_session);
        tokio::pin!(upstream, downstream, idle, limit);

        let (first, end) = tokio::select! {
            end = &mut upstream => (Direction::ClientToBackend, end),
            end = &mut downstream => (Direction::BackendToClient, end),
            _ = &mut idle => return TerminationReason::IdleTimeout,
            _ = &mut limit => return TerminationReason::SessionLimit,
        };

        let reason = end_reason(first, &end);
        if !matches!(end, PumpEnd::Eof) {
            tracing::debug!(path = %session.path, direction = ?first, end = ?end, "Tunnel aborted");
            return reason;
        }

        session.transition(SessionState::Draining(first));

        let rest = match first {
            Direction::ClientToBackend => timeout(self.settings.drain_grace, &mut downstream).await,
            Direction::BackendToClient => timeout(self.settings.drain_grace, &mut upstream).await,
        };
        match rest {
            Ok(PumpEnd::Eof) => {}
            Ok(end) => tracing::debug!(path = %session.path, end = ?end, "Drain ended with error"),
            Err(_) => tracing::debug!(path = %session.path, "Drain grace elapsed, closing tunnel"),
        }

        reason
    }
}

/// Copy one direction until EOF or error, half-closing the writer on EOF.
async fn pump<R, W>(mut reader: R, mut writer: W, direction: Direction, traffic: &Traffic) -> PumpEnd
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                let _ = writer.shutdown().await;
                return PumpEnd::Eof;
            }
            Ok(n) => n,
            Err(e) => return PumpEnd::ReadFailed(e),
        };

        if let Err(e) = writer.write_all(&buf[..n]).await {
            return PumpEnd::WriteFailed(e);
        }
        if let Err(e) = writer.flush().await {
            return PumpEnd::WriteFailed(e);
        }

        traffic.record(direction, n);
    }
}

async fn idle_watch(traffic: &Traffic, idle: Option<Duration>) {
    let Some(idle) = idle else {
        return std::future::pending().await;
    };

    loop {
        let quiet = traffic.idle_for();
        if quiet >= idle {
            return;
        }
        tokio::time::sleep(idle - quiet).await;
    }
}

async fn deadline(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

fn end_reason(direction: Direction, end: &PumpEnd) -> TerminationReason {
    match (direction, end) {
        (Direction::ClientToBackend, PumpEnd::Eof) => TerminationReason::ClientClosed,
        (Direction::BackendToClient, PumpEnd::Eof) => TerminationReason::BackendClosed,
        (Direction::ClientToBackend, PumpEnd::ReadFailed(_))
        | (Direction::BackendToClient, PumpEnd::WriteFailed(_)) => {
            TerminationReason::ClientDisconnected
        }
        (Direction::ClientToBackend, PumpEnd::WriteFailed(_))
        | (Direction::BackendToClient, PumpEnd::ReadFailed(_)) => TerminationReason::UpstreamReset,
    }
}

fn failure_reason(error: &ProxyError) -> TerminationReason {
    match error {
        ProxyError::ClientDisconnected => TerminationReason::ClientDisconnected,
        ProxyError::UpstreamReset(_) => TerminationReason::UpstreamReset,
        ProxyError::ProtocolMismatch(_) => TerminationReason::ProtocolMismatch,
        ProxyError::BackendUnreachable(_) | ProxyError::ResponseTimeout(_) | ProxyError::Io(_) => {
            TerminationReason::BackendUnreachable
        }
    }
}
