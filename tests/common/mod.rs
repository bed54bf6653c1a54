//! Stub backends and helpers shared by the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use wsgate::config::Config;
use wsgate::http::cors::CorsPolicy;
use wsgate::proxy::{BackendConnector, BackendTarget, PathRewrite, SpliceSettings, UpgradeSplicer};

pub const UPGRADE_REQUEST: &str = "GET /ws/echo HTTP/1.1\r\n\
    Host: proxy.local\r\n\
    Origin: http://app.local\r\n\
    Upgrade: websocket\r\n\
    Connection: Upgrade\r\n\
    Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
    Sec-WebSocket-Version: 13\r\n\r\n";

pub const SWITCHING_PROTOCOLS: &str = "HTTP/1.1 101 Switching Protocols\r\n\
    Upgrade: websocket\r\n\
    Connection: Upgrade\r\n\
    Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n";

#[derive(Debug)]
pub enum BackendEvent {
    /// Full request head received by the stub
    Request(String),
    /// The stub observed EOF or an error from the proxy
    Closed,
}

/// Read up to and including the blank line; returns the head and any extra bytes.
pub async fn read_head<R: AsyncRead + Unpin>(stream: &mut R) -> Option<(String, Vec<u8>)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let rest = buf.split_off(pos + 4);
            return Some((String::from_utf8_lossy(&buf).into_owned(), rest));
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// WebSocket-ish backend: answers every upgrade with 101 and echoes bytes back.
pub async fn echo_backend() -> (SocketAddr, mpsc::UnboundedReceiver<BackendEvent>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let Some((head, rest)) = read_head(&mut socket).await else {
                    let _ = tx.send(BackendEvent::Closed);
                    return;
                };
                let _ = tx.send(BackendEvent::Request(head));
                if socket.write_all(SWITCHING_PROTOCOLS.as_bytes()).await.is_err() {
                    return;
                }
                if !rest.is_empty() && socket.write_all(&rest).await.is_err() {
                    return;
                }

                let mut buf = [0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                let _ = tx.send(BackendEvent::Closed);
            });
        }
    });

    (addr, rx)
}

/// Backend that answers every request with `response` and closes.
pub async fn fixed_backend(response: &'static str) -> (SocketAddr, mpsc::UnboundedReceiver<BackendEvent>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some((head, mut rest)) = read_head(&mut socket).await {
                    let wanted = content_length(&head);
                    let mut buf = [0u8; 1024];
                    while rest.len() < wanted {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => rest.extend_from_slice(&buf[..n]),
                        }
                    }
                    let mut full = head;
                    full.push_str(&String::from_utf8_lossy(&rest));
                    let _ = tx.send(BackendEvent::Request(full));
                    let _ = socket.write_all(response.as_bytes()).await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, rx)
}

fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse().ok())
        .unwrap_or(0)
}

/// Backend that completes the upgrade, waits for EOF from the proxy, then
/// sends `farewell` and closes.
pub async fn farewell_backend(farewell: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                if read_head(&mut socket).await.is_none() {
                    return;
                }
                if socket.write_all(SWITCHING_PROTOCOLS.as_bytes()).await.is_err() {
                    return;
                }

                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(_) => {}
                        Err(_) => return,
                    }
                }

                tokio::time::sleep(Duration::from_millis(100)).await;
                let _ = socket.write_all(farewell).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Backend that accepts and reads but never answers.
pub async fn silent_backend() -> (SocketAddr, mpsc::UnboundedReceiver<BackendEvent>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
                let _ = tx.send(BackendEvent::Closed);
            });
        }
    });

    (addr, rx)
}

/// An address nothing listens on.
pub async fn dead_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Connected (client, server-side) socket pair.
pub async fn socket_pair() -> (TcpStream, TcpStream, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).await.unwrap();
    let (server, peer) = listener.accept().await.unwrap();
    (client, server, peer)
}

pub fn splicer_for(backend: SocketAddr) -> UpgradeSplicer {
    splicer_with(backend, SpliceSettings::default())
}

pub fn splicer_with(backend: SocketAddr, settings: SpliceSettings) -> UpgradeSplicer {
    let target = Arc::new(
        BackendTarget::from_url(&format!("ws://{backend}"), PathRewrite::Identity, true).unwrap(),
    );
    let connector = BackendConnector::new(&target, Duration::from_secs(2));
    UpgradeSplicer::new(target, connector, settings, CorsPolicy::default())
}

/// Config for a proxy on an ephemeral port in front of `backend`.
pub fn proxy_config(backend: SocketAddr) -> Config {
    let mut cfg = Config::default();
    cfg.server.listen_addr = "127.0.0.1:0".to_string();
    cfg.server.shutdown_grace_secs = 1;
    cfg.backend.url = format!("ws://{backend}");
    cfg.backend.connect_timeout_ms = 2000;
    cfg
}

pub async fn with_timeout<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("test step timed out")
}
