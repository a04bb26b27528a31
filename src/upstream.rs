//! Origin connector: DNS resolution, TCP connect, and raw byte forwarding.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use thiserror::Error;

/// Errors connecting to or talking with the upstream origin.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The `Host` header was missing or empty; there is nowhere to connect.
    #[error("request has no Host header")]
    NoHost,
    /// DNS resolution or TCP connect failed.
    #[error("failed to connect to upstream {0}: {1}")]
    ConnectFailure(String, std::io::Error),
    /// A read or write on the upstream socket failed after connecting.
    #[error("upstream I/O error: {0}")]
    Io(#[from] std::io::Error),
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_WRITE_TIMEOUT: Duration = Duration::from_secs(30);
pub const FORWARD_CHUNK_SIZE: usize = 8192;

/// Splits a `Host` header value into `(host, port)`, defaulting to port 80.
fn split_host_port(host: &str) -> (&str, u16) {
    match host.rsplit_once(':') {
        Some((h, p)) => match p.parse::<u16>() {
            Ok(port) => (h, port),
            Err(_) => (host, 80),
        },
        None => (host, 80),
    }
}

/// Opens a TCP connection to the origin named by `host_header`.
pub fn connect(host_header: &str) -> Result<TcpStream, UpstreamError> {
    let (host, port) = split_host_port(host_header);
    let addr = format!("{host}:{port}");
    let mut last_err = None;
    for socket_addr in std::net::ToSocketAddrs::to_socket_addrs(&addr)
        .map_err(|e| UpstreamError::ConnectFailure(addr.clone(), e))?
    {
        match TcpStream::connect_timeout(&socket_addr, CONNECT_TIMEOUT) {
            Ok(stream) => {
                stream.set_read_timeout(Some(READ_WRITE_TIMEOUT)).ok();
                stream.set_write_timeout(Some(READ_WRITE_TIMEOUT)).ok();
                stream.set_nodelay(true).ok();
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(UpstreamError::ConnectFailure(
        addr,
        last_err.unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved")),
    ))
}

/// Writes the raw request bytes to `upstream`.
pub fn forward_request(upstream: &mut TcpStream, request_bytes: &[u8]) -> Result<(), UpstreamError> {
    upstream.write_all(request_bytes)?;
    Ok(())
}

/// Reads the next available chunk from `upstream`.
///
/// Returns `Ok(None)` on a clean EOF. A reusable `buf` avoids reallocating
/// per chunk; the caller should size it at [`FORWARD_CHUNK_SIZE`] or larger.
pub fn read_chunk(upstream: &mut TcpStream, buf: &mut [u8]) -> Result<Option<usize>, UpstreamError> {
    let n = upstream.read(buf)?;
    if n == 0 {
        Ok(None)
    } else {
        Ok(Some(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_host_and_explicit_port() {
        assert_eq!(split_host_port("example.test:8080"), ("example.test", 8080));
    }

    #[test]
    fn defaults_to_port_80_when_absent() {
        assert_eq!(split_host_port("example.test"), ("example.test", 80));
    }

    #[test]
    fn falls_back_to_port_80_on_garbage_port() {
        assert_eq!(split_host_port("example.test:notaport"), ("example.test", 80));
    }

    #[test]
    fn connect_to_closed_local_port_fails_with_connect_failure() {
        // Port 0 never accepts; should fail to connect rather than panic.
        let result = connect("127.0.0.1:0");
        assert!(result.is_err());
    }
}
