use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;

use crate::http::cors::CorsPolicy;
use crate::http::parser::{ParseError, parse_http_request};
use crate::http::request::{Method, Request};
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::server::AppContext;
use crate::server::dispatch::{RouteDecision, dispatch};
use crate::server::status;

pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    buffer: BytesMut,
    state: ConnectionState,
    ctx: Arc<AppContext>,
    shutdown: watch::Receiver<bool>,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter, bool), // bool = keep_alive?
    Forwarding(Request),
    /// Terminal: the connection is handed to the Upgrade Splicer
    Upgrading(Request),
    Closed,
}

enum ReadOutcome {
    Request(Request),
    Rejected(Response),
    Closed,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        ctx: Arc<AppContext>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            stream,
            peer,
            buffer: BytesMut::with_capacity(4096),
            state: ConnectionState::Reading,
            ctx,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading => {
                    self.state = match self.read_request().await? {
                        ReadOutcome::Request(req) => ConnectionState::Processing(req),
                        ReadOutcome::Rejected(response) => self.respond(response, false, true),
                        ReadOutcome::Closed => ConnectionState::Closed,
                    };
                }

                ConnectionState::Processing(req) => {
                    self.state = self.process(req);
                }

                ConnectionState::Writing(mut writer, keep_alive) => {
                    writer.write_to_stream(&mut self.stream).await?;
                    self.state = self.next_after_response(keep_alive);
                }

                ConnectionState::Forwarding(req) => {
                    let keep_alive = self.ctx.forwarder.forward(&req, &mut self.stream).await?;
                    self.state = self.next_after_response(keep_alive);
                }

                ConnectionState::Upgrading(req) => {
                    let head = std::mem::take(&mut self.buffer);
                    self.ctx
                        .splicer
                        .run(self.stream, self.peer, req, head)
                        .await;
                    return Ok(());
                }

                ConnectionState::Closed => {
                    break;
                }
            }
        }

        Ok(())
    }

    async fn read_request(&mut self) -> anyhow::Result<ReadOutcome> {
        loop {
            // Try parsing whatever we already have
            match parse_http_request(&self.buffer) {
                Ok((request, consumed)) => {
                    let _ = self.buffer.split_to(consumed);
                    return Ok(ReadOutcome::Request(request));
                }
                Err(ParseError::Incomplete) => {}
                Err(ParseError::TooLarge) => {
                    return Ok(ReadOutcome::Rejected(Response::payload_too_large()));
                }
                Err(e) => {
                    tracing::debug!(peer = %self.peer, error = ?e, "Malformed request");
                    return Ok(ReadOutcome::Rejected(Response::bad_request()));
                }
            }

            // Between requests a shutdown closes the connection at once.
            let idle = self.buffer.is_empty();
            if idle && *self.shutdown.borrow() {
                return Ok(ReadOutcome::Closed);
            }

            let n = tokio::select! {
                read = timeout(self.ctx.keepalive_timeout, self.stream.read_buf(&mut self.buffer)) => {
                    match read {
                        Ok(n) => n?,
                        Err(_) => {
                            tracing::debug!(peer = %self.peer, "Keep-alive timeout");
                            return Ok(ReadOutcome::Closed);
                        }
                    }
                }
                _ = self.shutdown.changed(), if idle => return Ok(ReadOutcome::Closed),
            };

            if n == 0 {
                // Client closed connection
                return Ok(ReadOutcome::Closed);
            }
        }
    }

    fn process(&self, req: Request) -> ConnectionState {
        let keep_alive = req.keep_alive();
        let include_body = req.method != Method::HEAD;

        if CorsPolicy::is_preflight(&req) {
            let response = self.ctx.cors.preflight(&req);
            return self.respond(response, keep_alive, false);
        }

        match dispatch(&req, &self.ctx.prefix) {
            RouteDecision::HealthCheck => self.respond(status::health(), keep_alive, include_body),
            RouteDecision::Stats => self.respond(
                status::stats(self.ctx.started_at),
                keep_alive,
                include_body,
            ),
            RouteDecision::NotFound => {
                tracing::debug!(method = %req.method, path = %req.path, "No route matched");
                self.respond(Response::not_found(), keep_alive, include_body)
            }
            RouteDecision::HttpForward => ConnectionState::Forwarding(req),
            RouteDecision::WebSocketUpgrade => {
                tracing::debug!(peer = %self.peer, path = %req.path, "Upgrade requested");
                ConnectionState::Upgrading(req)
            }
        }
    }

    fn respond(&self, mut response: Response, keep_alive: bool, include_body: bool) -> ConnectionState {
        self.ctx.cors.apply(&mut response.headers);
        response
            .headers
            .insert("Connection", if keep_alive { "keep-alive" } else { "close" });

        ConnectionState::Writing(ResponseWriter::with_body(&response, include_body), keep_alive)
    }

    fn next_after_response(&self, keep_alive: bool) -> ConnectionState {
        if keep_alive && !*self.shutdown.borrow() {
            ConnectionState::Reading
        } else {
            ConnectionState::Closed
        }
    }
}
