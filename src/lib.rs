//! A forwarding HTTP caching proxy.
//!
//! Accepts client connections, parses HTTP/1.x requests, and for each
//! cacheable request either serves the response from an in-memory cache or
//! fetches it from the upstream origin while streaming the bytes
//! concurrently back to the requesting client and into the cache.
//!
//! The interesting design is the concurrent response cache
//! ([`cache`]/[`entry`]/[`buffer`]) with streaming producer/multi-consumer
//! semantics and time-based eviction, together with the bounded work-queue
//! [`pool`] that multiplexes client handlers onto a fixed set of worker
//! threads. [`session`] wires the two together; [`http`] and [`upstream`]
//! are the thin HTTP-awareness and origin-connector layers; [`config`],
//! [`cli`], and [`logging`] are the ambient startup plumbing.

pub mod buffer;
pub mod cache;
pub mod cli;
pub mod config;
pub mod entry;
pub mod http;
pub mod logging;
pub mod pool;
pub mod server;
pub mod session;
pub mod signals;
pub mod upstream;
