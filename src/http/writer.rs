use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::headers::Headers;
use crate::http::response::{Response, ResponseHead};

const HTTP_VERSION: &str = "HTTP/1.1";

fn serialize_head(buf: &mut Vec<u8>, version: &str, code: u16, reason: &str, headers: &Headers) {
    // Status line
    buf.extend_from_slice(format!("{version} {code} {reason}\r\n").as_bytes());

    for (k, v) in headers.iter() {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");
}

pub fn serialize_response(resp: &Response, include_body: bool) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256 + resp.body.len());
    serialize_head(
        &mut buf,
        HTTP_VERSION,
        resp.status.as_u16(),
        resp.status.reason_phrase(),
        &resp.headers,
    );

    if include_body {
        buf.extend_from_slice(&resp.body);
    }

    buf
}

/// Serialise a relayed response head, keeping the backend's reason phrase.
pub fn serialize_response_head(head: &ResponseHead) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);
    serialize_head(
        &mut buf,
        HTTP_VERSION,
        head.status.as_u16(),
        &head.reason,
        &head.headers,
    );
    buf
}

pub struct ResponseWriter {
    buffer: Vec<u8>,
    written: usize,
}

impl ResponseWriter {
    pub fn new(response: &Response) -> Self {
        Self::with_body(response, true)
    }

    /// Writer for a response whose body is suppressed, as for HEAD requests.
    pub fn with_body(response: &Response, include_body: bool) -> Self {
        Self {
            buffer: serialize_response(response, include_body),
            written: 0,
        }
    }

    pub async fn write_to_stream<W>(&mut self, stream: &mut W) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        while self.written < self.buffer.len() {
            let n = stream.write(&self.buffer[self.written..]).await?;

            if n == 0 {
                return Err(anyhow::anyhow!("connection closed while writing"));
            }

            self.written += n;
        }

        stream.flush().await?;
        Ok(())
    }
}
