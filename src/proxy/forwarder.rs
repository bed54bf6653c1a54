//! HTTP Forwarder
//!
//! Relays ordinary (non-upgrade) requests under the proxy prefix to the
//! backend and streams the response back. One backend connection and one
//! attempt per request.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::ProxyError;
use crate::http::cors::CorsPolicy;
use crate::http::parser::{ParseError, parse_response_head};
use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseHead};
use crate::http::writer::{ResponseWriter, serialize_response_head};
use crate::proxy::connector::{BackendConnector, BackendStream};
use crate::proxy::rewrite::build_forward_request;
use crate::proxy::target::BackendTarget;

/// Default buffer size for reading from the backend
const BUFFER_SIZE: usize = 8192;

/// How the length of a relayed response body is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Length(u64),
    /// Relayed raw; the chunk framing reaches the client unchanged
    Chunked,
    UntilClose,
}

impl BodyFraming {
    pub fn of(head: &ResponseHead, method: Method) -> Self {
        if method == Method::HEAD || head.status.forbids_body() {
            return BodyFraming::Empty;
        }
        if head.headers.has_token("Transfer-Encoding", "chunked") {
            return BodyFraming::Chunked;
        }
        match head
            .headers
            .get("Content-Length")
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            Some(0) => BodyFraming::Empty,
            Some(n) => BodyFraming::Length(n),
            None => BodyFraming::UntilClose,
        }
    }

    /// Whether the client can tell where the body ends without a close.
    pub fn is_self_delimiting(&self) -> bool {
        !matches!(self, BodyFraming::UntilClose)
    }
}

/// The backend's side of an exchange once its response head has arrived.
struct Upstream {
    head: ResponseHead,
    leftover: BytesMut,
    stream: BackendStream,
}

pub struct HttpForwarder {
    target: Arc<BackendTarget>,
    connector: BackendConnector,
    prefix: String,
    response_timeout: Duration,
    cors: CorsPolicy,
}

impl HttpForwarder {
    pub fn new(
        target: Arc<BackendTarget>,
        connector: BackendConnector,
        prefix: impl Into<String>,
        response_timeout: Duration,
        cors: CorsPolicy,
    ) -> Self {
        Self {
            target,
            connector,
            prefix: prefix.into(),
            response_timeout,
            cors,
        }
    }

    /// Forward `request` and write the backend's response to `client`.
    ///
    /// If the backend cannot be reached or does not answer, the client gets
    /// a 500 with a JSON `{error, message}` body instead. Returns whether the
    /// client connection may be reused.
    pub async fn forward<W>(&self, request: &Request, client: &mut W) -> anyhow::Result<bool>
    where
        W: AsyncWrite + Unpin,
    {
        let upstream = match self.exchange(request).await {
            Ok(upstream) => upstream,
            Err(e) => {
                tracing::error!(path = %request.path, error = %e, "Proxy error");

                let keep_alive = request.keep_alive();
                let mut response = Response::proxy_error(&e.to_string());
                self.cors.apply(&mut response.headers);
                response
                    .headers
                    .insert("Connection", if keep_alive { "keep-alive" } else { "close" });

                ResponseWriter::new(&response).write_to_stream(client).await?;
                return Ok(keep_alive);
            }
        };

        let Upstream {
            mut head,
            leftover,
            stream,
        } = upstream;

        let status = head.status;
        let framing = BodyFraming::of(&head, request.method);
        let keep_alive = request.keep_alive() && framing.is_self_delimiting();

        head.headers.remove_hop_by_hop();
        self.cors.apply(&mut head.headers);
        head.headers
            .insert("Connection", if keep_alive { "keep-alive" } else { "close" });

        client.write_all(&serialize_response_head(&head)).await?;
        let copied = relay_body(framing, leftover, stream, client).await?;
        client.flush().await?;

        tracing::info!(
            path = %request.path,
            status = status.as_u16(),
            bytes = copied,
            "HTTP response proxied"
        );

        Ok(keep_alive)
    }

    /// Connect, send the request and wait for the final response head.
    async fn exchange(&self, request: &Request) -> Result<Upstream, ProxyError> {
        let mut stream = self.connector.connect(&self.target).await?;

        let request_bytes = build_forward_request(&self.target, request, &self.prefix);
        stream.write_all(&request_bytes).await?;
        stream.flush().await?;

        tracing::trace!(path = %request.path, "Request sent to backend");

        let (head, leftover) = timeout(self.response_timeout, read_final_head(&mut stream))
            .await
            .map_err(|_| ProxyError::ResponseTimeout(self.response_timeout))??;

        Ok(Upstream {
            head,
            leftover,
            stream,
        })
    }
}

/// Read response heads until a non-interim one arrives.
async fn read_final_head(stream: &mut BackendStream) -> Result<(ResponseHead, BytesMut), ProxyError> {
    loop {
        let (head, _raw, leftover) = read_response_head(stream).await?;
        // Interim responses are consumed here; the client gets the final one.
        if !head.status.is_informational() {
            return Ok((head, leftover));
        }
        if !leftover.is_empty() {
            return Err(ProxyError::ProtocolMismatch(
                "data after an interim response".to_string(),
            ));
        }
    }
}

/// Read a response head from `stream`.
///
/// Returns the parsed head, its exact bytes, and whatever was read past it.
pub async fn read_response_head<R>(
    stream: &mut R,
) -> Result<(ResponseHead, Bytes, BytesMut), ProxyError>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

    loop {
        match parse_response_head(&buffer) {
            Ok((head, consumed)) => {
                let raw = buffer.split_to(consumed).freeze();
                return Ok((head, raw, buffer));
            }
            Err(ParseError::Incomplete) => {}
            Err(e) => {
                return Err(ProxyError::ProtocolMismatch(format!(
                    "malformed response from backend: {e:?}"
                )));
            }
        }

        let n = stream.read_buf(&mut buffer).await?;
        if n == 0 {
            return Err(ProxyError::UpstreamReset(
                "backend closed before sending a response".to_string(),
            ));
        }
    }
}

async fn relay_body<W>(
    framing: BodyFraming,
    leftover: BytesMut,
    stream: BackendStream,
    client: &mut W,
) -> Result<u64, ProxyError>
where
    W: AsyncWrite + Unpin,
{
    let mut source = (&leftover[..]).chain(stream);

    match framing {
        BodyFraming::Empty => Ok(0),
        BodyFraming::Length(n) => {
            let copied = tokio::io::copy(&mut (&mut source).take(n), client).await?;
            if copied < n {
                return Err(ProxyError::UpstreamReset(format!(
                    "backend closed after {copied} of {n} body bytes"
                )));
            }
            Ok(copied)
        }
        BodyFraming::Chunked | BodyFraming::UntilClose => {
            Ok(tokio::io::copy(&mut source, client).await?)
        }
    }
}
