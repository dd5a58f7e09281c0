#![no_std]

pub mod console;

pub use console::*;
use log::{Level, LevelFilter};

struct SimpleLogger;

impl log::Log for SimpleLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }
    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        crate_interface::call_interface!(LogInterface::print_log(record));
    }
    fn flush(&self) {}
}

/// The sink a kernel must register to receive log records. The kernel owns
/// the console, so the writer lives there and is reached through
/// `crate_interface`.
#[crate_interface::def_interface]
pub trait LogInterface: Send + Sync {
    fn print_log(record: &log::Record);
}

/// Sets up the `log` facade. The level comes from the `LOG` environment
/// variable at build time and defaults to `info`.
pub fn init() {
    static LOGGER: SimpleLogger = SimpleLogger;
    log::set_logger(&LOGGER).ok();
    log::set_max_level(match option_env!("LOG") {
        Some("trace") => LevelFilter::Trace,
        Some("debug") => LevelFilter::Debug,
        Some("info") => LevelFilter::Info,
        Some("warn") => LevelFilter::Warn,
        Some("error") => LevelFilter::Error,
        Some("off") => LevelFilter::Off,
        _ => LevelFilter::Info,
    });
}

pub fn level2color(level: Level) -> u8 {
    match level {
        Level::Error => 31, // Red
        Level::Warn => 93,  // BrightYellow
        Level::Info => 36,  // Cyan
        Level::Debug => 32, // Green
        Level::Trace => 90, // BrightBlack
    }
}
