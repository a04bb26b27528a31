use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use coretech_cacheproxy::cli::Args;
use coretech_cacheproxy::config::Config;
use coretech_cacheproxy::logging;
use coretech_cacheproxy::server;

fn try_main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load().context("loading configuration from the environment")?;
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    server::run(args.port, config, shutdown_flag).context("running the proxy server")?;
    Ok(())
}

fn main() -> ExitCode {
    logging::init();

    match try_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
