//! A `log::Log` implementation rendering the format fixed by §6:
//! `YYYY-MM-DD HH:MM:SS.mmm --- [<thread-name>] : <message>`.

use std::io::Write;
use std::thread;

use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record};
use once_cell::sync::OnceCell;

struct LineLogger {
    level: LevelFilter,
}

impl Log for LineLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let now = Local::now();
        let thread_name = thread::current().name().unwrap_or("<unnamed>").to_string();
        let line = format!(
            "{} --- [{}] : {}",
            now.format("%Y-%m-%d %H:%M:%S%.3f"),
            thread_name,
            record.args()
        );
        let mut stderr = std::io::stderr();
        let _ = writeln!(stderr, "{line}");
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceCell<LineLogger> = OnceCell::new();

/// Installs the process-wide logger. Level filtering is driven by
/// `RUST_LOG` (any value accepted by `log::LevelFilter::from_str`),
/// defaulting to `info` when unset or unparsable. Safe to call more than
/// once; only the first call takes effect.
pub fn init() {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);

    let logger = LOGGER.get_or_init(|| LineLogger { level });
    if log::set_logger(logger).is_ok() {
        log::set_max_level(level);
    }
}

/// Exposed for tests that need to assert a message was at least
/// constructible at a given level without installing the global logger
/// twice within one test binary.
pub fn format_test_line(level: Level, thread_name: &str, message: &str) -> String {
    let now = Local::now();
    format!(
        "{} --- [{}] : {} ({level})",
        now.format("%Y-%m-%d %H:%M:%S%.3f"),
        thread_name,
        message
    )
}
