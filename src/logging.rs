use std::env;
use std::io::Write;

use log::{self, LevelFilter, Metadata, Record};

/// Writes `LEVEL target - message` lines to stderr so stdout stays free for
/// the `watch` board output.
struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let _ = writeln!(
                std::io::stderr().lock(),
                "{:<5} {} - {}",
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: StderrLogger = StderrLogger;

/// Initialize logging with a level taken from the `BATTLESHIP_LOG` environment variable.
/// Defaults to `info` if the variable is not set or invalid. Calling it twice is harmless.
pub fn init_logging() {
    let level = env::var("BATTLESHIP_LOG")
        .ok()
        .and_then(|lvl| lvl.parse().ok())
        .unwrap_or(LevelFilter::Info);
    init_with_level(level);
}

pub fn init_with_level(level: LevelFilter) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}
