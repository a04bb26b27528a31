//! Request-line and `Host`-header parsing, and fingerprint computation.
//!
//! Parses just enough of an HTTP/1.x request to decide cacheability and to
//! build the cache key; the body and all other headers are forwarded
//! opaquely by the session loop.

use thiserror::Error;

/// Errors raised while parsing a client request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The request could not be parsed as HTTP/1.x at all.
    #[error("malformed HTTP request")]
    Malformed,
    /// The request was well-formed but did not carry a complete header
    /// block in the bytes read so far.
    #[error("incomplete request")]
    Incomplete,
}

/// A parsed request line plus the headers needed for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    /// HTTP method, e.g. `"GET"`.
    pub method: String,
    /// Request target as sent on the wire, e.g. `"/a"` or an absolute URI.
    pub target: String,
    /// `"HTTP/1.0"` or `"HTTP/1.1"`.
    pub version: String,
    /// The `Host` header value, if present.
    pub host: Option<String>,
    /// Offset of the end of the header block (start of the body, if any)
    /// within the bytes handed to [`parse_request`].
    pub header_block_len: usize,
    /// The `Content-Length` header value, if present and well-formed.
    pub content_length: Option<usize>,
}

impl ParsedRequest {
    /// Whether this request is eligible for caching: `GET` over HTTP/1.x.
    pub fn is_cacheable(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
            && (self.version == "HTTP/1.0" || self.version == "HTTP/1.1")
    }

    /// The cache fingerprint: the canonical request line plus the `Host`
    /// header, per SPEC_FULL.md §4.5/§9. Distinct virtual hosts on the same
    /// path therefore get distinct cache entries.
    pub fn fingerprint(&self) -> Vec<u8> {
        let mut fp = format!("{} {} {}\n", self.method, self.target, self.version).into_bytes();
        if let Some(host) = &self.host {
            fp.extend_from_slice(b"Host: ");
            fp.extend_from_slice(host.as_bytes());
        }
        fp
    }
}

/// Parses the request line and headers out of `buf`.
///
/// Returns [`ParseError::Incomplete`] if `buf` does not yet contain a full
/// header block (`\r\n\r\n`) — the caller should read more bytes and retry.
pub fn parse_request(buf: &[u8]) -> Result<ParsedRequest, ParseError> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut headers);
    let status = req.parse(buf).map_err(|_| ParseError::Malformed)?;

    let header_block_len = match status {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return Err(ParseError::Incomplete),
    };

    let method = req.method.ok_or(ParseError::Malformed)?.to_string();
    let target = req.path.ok_or(ParseError::Malformed)?.to_string();
    let minor = req.version.ok_or(ParseError::Malformed)?;
    let version = format!("HTTP/1.{minor}");

    let host = req
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("host"))
        .map(|h| String::from_utf8_lossy(h.value).trim().to_string());

    let content_length = req
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("content-length"))
        .and_then(|h| std::str::from_utf8(h.value).ok())
        .and_then(|v| v.trim().parse::<usize>().ok());

    Ok(ParsedRequest {
        method,
        target,
        version,
        host,
        header_block_len,
        content_length,
    })
}
