//! Per-connection glue: routes each client request to the cache or to the
//! origin, per §4.5.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use thiserror::Error;

use crate::buffer::{BufferState, FailReason};
use crate::cache::Cache;
use crate::entry::CacheEntry;
use crate::http::{self, ParseError, ParsedRequest};
use crate::upstream::{self, FORWARD_CHUNK_SIZE};

/// Errors encountered while servicing one client connection. All of these
/// are handled by closing the client connection; none escape
/// `handle_connection` as a panic or propagate to the thread pool.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to read request from client: {0}")]
    ClientRead(std::io::Error),
    #[error("failed to write to client: {0}")]
    ClientWrite(std::io::Error),
    #[error("request parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("request is missing a Host header")]
    NoHost,
    #[error(transparent)]
    Upstream(#[from] upstream::UpstreamError),
}

const MAX_REQUEST_HEAD: usize = 64 * 1024;

/// Reads from `stream` until a full request head (request line + headers)
/// has been parsed, or [`MAX_REQUEST_HEAD`] bytes have been read without
/// completing one.
fn read_request_head(stream: &mut TcpStream) -> Result<(Vec<u8>, ParsedRequest), SessionError> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        match http::parse_request(&buf) {
            Ok(parsed) => return Ok((buf, parsed)),
            Err(ParseError::Malformed) => return Err(SessionError::Parse(ParseError::Malformed)),
            Err(ParseError::Incomplete) => {
                if buf.len() >= MAX_REQUEST_HEAD {
                    return Err(SessionError::Parse(ParseError::Incomplete));
                }
                let n = stream.read(&mut chunk).map_err(SessionError::ClientRead)?;
                if n == 0 {
                    return Err(SessionError::Parse(ParseError::Incomplete));
                }
                buf.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

/// Copies any request body bytes declared by `Content-Length` from the
/// client to `upstream`, beyond what was already captured in the head read.
fn forward_request_body(
    client: &mut TcpStream,
    upstream: &mut TcpStream,
    parsed: &ParsedRequest,
    already_read_past_head: usize,
) -> Result<(), SessionError> {
    let Some(total) = parsed.content_length else {
        return Ok(());
    };
    let mut remaining = total.saturating_sub(already_read_past_head);
    let mut buf = [0u8; FORWARD_CHUNK_SIZE];
    while remaining > 0 {
        let want = remaining.min(buf.len());
        let n = client.read(&mut buf[..want]).map_err(SessionError::ClientRead)?;
        if n == 0 {
            break;
        }
        upstream.write_all(&buf[..n]).map_err(|e| SessionError::Upstream(e.into()))?;
        remaining -= n;
    }
    Ok(())
}

/// Forwards a non-cacheable request byte-for-byte with no cache
/// involvement: the request head (plus any declared body) goes upstream,
/// and the response is relayed back to the client verbatim.
fn forward_uncached(
    client: &mut TcpStream,
    head: &[u8],
    parsed: &ParsedRequest,
) -> Result<(), SessionError> {
    let host = parsed.host.as_deref().ok_or(SessionError::NoHost)?;
    let mut upstream = upstream::connect(host)?;
    upstream::forward_request(&mut upstream, head)?;
    let extra_body_in_head = head.len().saturating_sub(parsed.header_block_len);
    forward_request_body(client, &mut upstream, parsed, extra_body_in_head)?;

    let mut buf = [0u8; FORWARD_CHUNK_SIZE];
    loop {
        match upstream::read_chunk(&mut upstream, &mut buf)? {
            None => break,
            Some(n) => client.write_all(&buf[..n]).map_err(SessionError::ClientWrite)?,
        }
    }
    Ok(())
}

/// Streams a cache entry's [`crate::buffer::MessageBuffer`] to `client`
/// starting at offset 0, until the entry completes or fails.
fn stream_hit(client: &mut TcpStream, entry: &CacheEntry) -> Result<(), SessionError> {
    let mut offset = 0;
    loop {
        let (chunk, state) = entry.buffer().read_from(offset);
        if !chunk.is_empty() {
            client.write_all(&chunk).map_err(SessionError::ClientWrite)?;
            offset += chunk.len();
        }
        match state {
            BufferState::Producing => continue,
            BufferState::Complete => return Ok(()),
            BufferState::Error(_) => {
                // Abort: the client already received whatever was valid.
                return Ok(());
            }
        }
    }
}

/// Acts as the producer for a freshly inserted entry: connects upstream,
/// forwards the request, then in a loop reads upstream bytes, appends them
/// to the entry's buffer (unblocking any consumers), and simultaneously
/// writes them to this session's own client. Finalizes or fails the buffer
/// on EOF/error so every consumer unblocks. If this session's own client
/// disconnects mid-stream, forwarding into the buffer continues regardless
/// — only writes to the dead client socket stop — so the buffer still
/// reaches `complete`/`error` for any other consumer.
fn produce(
    client: &mut TcpStream,
    head: &[u8],
    parsed: &ParsedRequest,
    entry: &CacheEntry,
) -> Result<(), SessionError> {
    let host = match parsed.host.as_deref() {
        Some(h) => h,
        None => {
            entry.buffer().fail(FailReason::UpstreamFailure);
            return Err(SessionError::NoHost);
        }
    };

    let mut upstream = match upstream::connect(host) {
        Ok(s) => s,
        Err(e) => {
            entry.buffer().fail(FailReason::UpstreamFailure);
            return Err(e.into());
        }
    };

    if let Err(e) = upstream::forward_request(&mut upstream, head) {
        entry.buffer().fail(FailReason::UpstreamFailure);
        return Err(e.into());
    }

    let mut buf = [0u8; FORWARD_CHUNK_SIZE];
    // Once this session's own client goes away we stop writing to it, but
    // we keep pulling from upstream and feeding the buffer regardless: the
    // entry must still reach `complete`/`error` for the benefit of any
    // other consumer waiting on it (FailReason::ClientDisconnect: one
    // consumer leaves, producer and other consumers unaffected).
    let mut client_alive = true;
    loop {
        match upstream::read_chunk(&mut upstream, &mut buf) {
            Ok(None) => {
                entry.buffer().finalize();
                return Ok(());
            }
            Ok(Some(n)) => {
                // Append first so waiting consumers see the bytes even if
                // this session's own client write below fails.
                if entry.buffer().append(&buf[..n]).is_err() {
                    // Buffer was already finalized/failed by a racing
                    // caller; nothing more to do.
                    return Ok(());
                }
                if client_alive {
                    if let Err(e) = client.write_all(&buf[..n]) {
                        log::debug!("client disconnected mid-stream ({:?}): {e}", FailReason::ClientDisconnect);
                        client_alive = false;
                    }
                }
            }
            Err(e) => {
                entry.buffer().fail(FailReason::UpstreamFailure);
                return Err(e.into());
            }
        }
    }
}

/// Services one accepted client connection end to end.
pub fn handle_connection(mut stream: TcpStream, cache: Arc<Cache>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());

    let (head, parsed) = match read_request_head(&mut stream) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("{peer}: failed to read request: {e}");
            return;
        }
    };

    if !parsed.is_cacheable() {
        log::debug!("{peer}: {} {} is not cacheable, forwarding opaquely", parsed.method, parsed.target);
        if let Err(e) = forward_uncached(&mut stream, &head, &parsed) {
            log::warn!("{peer}: error forwarding uncacheable request: {e}");
        }
        return;
    }

    let fingerprint = parsed.fingerprint();
    let fp_for_insert = fingerprint.clone();
    let (entry, is_producer) =
        cache.get_or_insert(&fingerprint, move || Arc::new(CacheEntry::new(&fp_for_insert)));

    if !is_producer {
        log::debug!("{peer}: cache hit for {} {}", parsed.method, parsed.target);
        if let Err(e) = stream_hit(&mut stream, &entry) {
            log::warn!("{peer}: error streaming cache hit: {e}");
        }
        return;
    }

    log::debug!("{peer}: cache miss for {} {}, becoming producer", parsed.method, parsed.target);
    if let Err(e) = produce(&mut stream, &head, &parsed, &entry) {
        log::warn!("{peer}: upstream failure, evicting entry: {e}");
        cache.delete(&fingerprint);
    }
}
