use crate::http::headers::Headers;
use crate::http::request::{Method, Request};
use crate::http::response::{ResponseHead, StatusCode};

/// Largest request or response head accepted.
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Largest request body buffered for forwarding.
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Longest chunk-size or trailer line accepted.
const MAX_CHUNK_LINE: usize = 4096;

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    InvalidRequest,
    InvalidMethod,
    InvalidHeader,
    InvalidContentLength,
    InvalidChunk,
    InvalidStatus,
    TooLarge,
    Incomplete,
}

/// Parse one request from the front of `buf`.
///
/// Returns the request and the number of bytes it occupied; anything after
/// that belongs to the next request, or to the tunnel after an upgrade.
pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    let headers_end = match find_headers_end(buf) {
        Some(end) => end,
        None if buf.len() > MAX_HEAD_BYTES => return Err(ParseError::TooLarge),
        None => return Err(ParseError::Incomplete),
    };
    if headers_end > MAX_HEAD_BYTES {
        return Err(ParseError::TooLarge);
    }

    let headers_str =
        std::str::from_utf8(&buf[..headers_end]).map_err(|_| ParseError::InvalidRequest)?;
    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let path = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;
    if parts.next().is_some() || !version.starts_with("HTTP/1.") {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;
    let headers = parse_header_lines(lines)?;

    let body_start = headers_end + 4;
    let (body, body_len) = if headers.has_token("Transfer-Encoding", "chunked") {
        decode_chunked(&buf[body_start..])?
    } else {
        let content_length = headers
            .get("Content-Length")
            .map(|v| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| ParseError::InvalidContentLength)
            })
            .transpose()?
            .unwrap_or(0);

        if content_length > MAX_BODY_BYTES {
            return Err(ParseError::TooLarge);
        }
        if buf.len() - body_start < content_length {
            return Err(ParseError::Incomplete);
        }
        (
            buf[body_start..body_start + content_length].to_vec(),
            content_length,
        )
    };

    let request = Request {
        method,
        path: path.to_string(),
        version: version.to_string(),
        headers,
        body,
    };

    Ok((request, body_start + body_len))
}

/// Parse a response status line and headers from the front of `buf`.
///
/// Returns the head and the number of bytes it occupied, including the
/// blank line.
pub fn parse_response_head(buf: &[u8]) -> Result<(ResponseHead, usize), ParseError> {
    let headers_end = match find_headers_end(buf) {
        Some(end) => end,
        None if buf.len() > MAX_HEAD_BYTES => return Err(ParseError::TooLarge),
        None => return Err(ParseError::Incomplete),
    };

    let headers_str =
        std::str::from_utf8(&buf[..headers_end]).map_err(|_| ParseError::InvalidStatus)?;
    let mut lines = headers_str.split("\r\n");

    let status_line = lines.next().ok_or(ParseError::InvalidStatus)?;
    let mut parts = status_line.splitn(3, ' ');

    let version = parts.next().ok_or(ParseError::InvalidStatus)?;
    if !version.starts_with("HTTP/") {
        return Err(ParseError::InvalidStatus);
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(StatusCode::from_u16)
        .ok_or(ParseError::InvalidStatus)?;
    let reason = parts.next().unwrap_or("").to_string();

    let head = ResponseHead {
        status,
        reason,
        headers: parse_header_lines(lines)?,
    };

    Ok((head, headers_end + 4))
}

fn parse_header_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Headers, ParseError> {
    let mut headers = Headers::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(ParseError::InvalidHeader);
        }

        headers.append(key, value.trim());
    }

    Ok(headers)
}

/// Decode a chunked body, returning the payload and the encoded length.
///
/// The framing is walked first without copying, so a body that is still
/// arriving costs one hop per chunk on each read rather than a full decode.
fn decode_chunked(buf: &[u8]) -> Result<(Vec<u8>, usize), ParseError> {
    let (payload_len, encoded_len) = chunked_extent(buf)?;

    let mut body = Vec::with_capacity(payload_len);
    let mut pos = 0;
    loop {
        let line_end = find_crlf(&buf[pos..]).ok_or(ParseError::InvalidChunk)?;
        let size = chunk_size(&buf[pos..pos + line_end])?;
        pos += line_end + 2;
        if size == 0 {
            return Ok((body, encoded_len));
        }
        body.extend_from_slice(&buf[pos..pos + size]);
        pos += size + 2;
    }
}

/// Validate the chunk framing at the front of `buf`.
///
/// Returns the decoded payload length and the number of bytes the encoded
/// body occupies, trailers included.
fn chunked_extent(buf: &[u8]) -> Result<(usize, usize), ParseError> {
    let mut payload = 0usize;
    let mut pos = 0usize;

    loop {
        let line_end = chunk_line(&buf[pos..])?;
        let size = chunk_size(&buf[pos..pos + line_end])?;
        pos += line_end + 2;

        if size == 0 {
            // Skip trailers up to the terminating blank line.
            loop {
                let end = chunk_line(&buf[pos..])?;
                pos += end + 2;
                if end == 0 {
                    return Ok((payload, pos));
                }
            }
        }

        if size > MAX_BODY_BYTES - payload {
            return Err(ParseError::TooLarge);
        }
        payload += size;

        let data_end = pos
            .checked_add(size)
            .and_then(|end| end.checked_add(2))
            .ok_or(ParseError::TooLarge)?;
        if buf.len() < data_end {
            return Err(ParseError::Incomplete);
        }
        if &buf[data_end - 2..data_end] != b"\r\n" {
            return Err(ParseError::InvalidChunk);
        }
        pos = data_end;
    }
}

/// Length of the size or trailer line at the front of `buf`.
fn chunk_line(buf: &[u8]) -> Result<usize, ParseError> {
    let window = &buf[..buf.len().min(MAX_CHUNK_LINE + 2)];
    match find_crlf(window) {
        Some(end) => Ok(end),
        None if buf.len() > MAX_CHUNK_LINE + 1 => Err(ParseError::InvalidChunk),
        None => Err(ParseError::Incomplete),
    }
}

fn chunk_size(line: &[u8]) -> Result<usize, ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidChunk)?;
    // Chunk extensions follow a ';' and are ignored.
    let size = line.split(';').next().unwrap_or("").trim();
    usize::from_str_radix(size, 16).map_err(|_| ParseError::InvalidChunk)
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
