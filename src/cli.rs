//! `proxy <port>` command-line argument parsing.

use clap::Parser;

/// A forwarding HTTP caching proxy.
#[derive(Debug, Parser)]
#[command(name = "proxy", version, about)]
pub struct Args {
    /// TCP port to listen on.
    pub port: u16,
}
