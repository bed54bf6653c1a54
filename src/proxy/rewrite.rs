//! Outbound request construction
//!
//! Both the HTTP Forwarder and the Upgrade Splicer send the client's request
//! to the backend with the path rewritten and `Host`/`Origin` adjusted.
//! They differ only in what happens to connection-scoped headers.

use crate::http::headers::Headers;
use crate::http::request::Request;
use crate::proxy::target::BackendTarget;

/// Request head and body for a plain forwarded request.
///
/// Hop-by-hop headers are dropped, the body is sent with an explicit
/// `Content-Length`, and the backend is asked to close after responding.
pub fn build_forward_request(target: &BackendTarget, request: &Request, prefix: &str) -> Vec<u8> {
    let mut headers = request.headers.clone();
    headers.remove_hop_by_hop();
    headers.remove("Transfer-Encoding");
    headers.remove("Content-Length");
    // The whole body is already buffered; never wait for 100 Continue.
    headers.remove("Expect");

    rewrite_origin(target, &mut headers);

    if !request.body.is_empty() || request.header("Content-Length").is_some() {
        headers.insert("Content-Length", request.body.len().to_string());
    }
    headers.insert("Connection", "close");

    let mut buffer = serialize_request(target, request, prefix, &headers);
    buffer.extend_from_slice(&request.body);
    buffer
}

/// Request head for a WebSocket upgrade.
///
/// `Connection` and `Upgrade` pass through untouched so the backend sees a
/// valid handshake; every `Sec-WebSocket-*` header is relayed as-is.
pub fn build_upgrade_request(target: &BackendTarget, request: &Request, prefix: &str) -> Vec<u8> {
    let mut headers = request.headers.clone();
    for name in ["Keep-Alive", "Proxy-Connection", "TE", "Trailer"] {
        headers.remove(name);
    }

    rewrite_origin(target, &mut headers);

    serialize_request(target, request, prefix, &headers)
}

fn rewrite_origin(target: &BackendTarget, headers: &mut Headers) {
    if !target.change_origin {
        return;
    }

    headers.insert("Host", target.authority());
    if headers.contains("Origin") {
        headers.insert("Origin", target.origin());
    }
}

fn serialize_request(
    target: &BackendTarget,
    request: &Request,
    prefix: &str,
    headers: &Headers,
) -> Vec<u8> {
    let path = if request.path.is_empty() {
        "/"
    } else {
        &request.path
    };
    let outbound = target.outbound_path(path, prefix);

    let mut buffer = Vec::with_capacity(512);
    buffer.extend_from_slice(
        format!("{} {} {}\r\n", request.method, outbound, request.version).as_bytes(),
    );

    for (key, value) in headers.iter() {
        buffer.extend_from_slice(format!("{key}: {value}\r\n").as_bytes());
    }

    // End of headers
    buffer.extend_from_slice(b"\r\n");
    buffer
}
