//! Accept loop: binds the listener, owns the cache and thread pool, and
//! drives cooperative shutdown on SIGINT/SIGTERM.

use std::io::ErrorKind;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::cache::{Cache, CacheError};
use crate::config::Config;
use crate::pool::{PoolError, ShutdownMode, ThreadPool};
use crate::session;

/// Errors that can prevent the server from starting or running cleanly.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to port {0}: {1}")]
    BindFailure(u16, std::io::Error),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("failed to install signal handler: {0}")]
    SignalHandler(std::io::Error),
}

/// How often the accept loop wakes up to check the shutdown flag while no
/// connection is pending.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Binds `port`, runs the accept loop until a shutdown signal arrives (or
/// `shutdown_flag` is externally set, as tests do), and tears down the pool
/// and cache cleanly on the way out.
pub fn run(port: u16, config: Config, shutdown_flag: Arc<AtomicBool>) -> Result<(), ServerError> {
    let listener = TcpListener::bind(("0.0.0.0", port)).map_err(|e| ServerError::BindFailure(port, e))?;

    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown_flag))
        .map_err(ServerError::SignalHandler)?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown_flag))
        .map_err(ServerError::SignalHandler)?;

    let cache = Cache::new(config.cache_capacity, config.ttl_ms)?;
    let pool = ThreadPool::new(config.worker_count, config.queue_capacity)?;

    log::info!(
        "listening on port {port} (workers={}, queue={}, cache_buckets={}, ttl_ms={})",
        config.worker_count,
        config.queue_capacity,
        config.cache_capacity,
        config.ttl_ms
    );

    // A read timeout on the listener turns the otherwise-unbounded
    // `accept()` call into something the shutdown flag can interrupt: the
    // standard library has no portable "accept with cancellation".
    listener
        .set_nonblocking(true)
        .map_err(|e| ServerError::BindFailure(port, e))?;

    while !shutdown_flag.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                let cache = Arc::clone(&cache);
                if let Err(()) = submit_connection(&pool, stream, cache) {
                    log::warn!("dropped connection: pool is shutting down");
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                log::warn!("accept() failed: {e}");
            }
        }
    }

    log::info!("shutdown signal received");
    pool.shutdown(ShutdownMode::Drop, SHUTDOWN_JOIN_TIMEOUT);
    cache.destroy();
    log::info!("shutdown complete");
    Ok(())
}

fn submit_connection(pool: &ThreadPool, stream: std::net::TcpStream, cache: Arc<Cache>) -> Result<(), ()> {
    pool.submit(move || session::handle_connection(stream, cache))
        .map(|_id| ())
        .ok_or(())
}
