//! Kernel logging: a `log` crate backend that writes straight to the
//! serial console with a coloured level tag and an uptime stamp.

use core::fmt::Write;

use log::{Level, LevelFilter, Log, Metadata, Record};
use piko_pal::console::ConsoleWriter;

struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let level = match record.level() {
            Level::Error => "\x1b[31mERROR\x1b[0m",
            Level::Warn => "\x1b[33m WARN\x1b[0m",
            Level::Info => "\x1b[32m INFO\x1b[0m",
            Level::Debug => "\x1b[34mDEBUG\x1b[0m",
            Level::Trace => "\x1b[35mTRACE\x1b[0m",
        };

        let ms = piko_pal::timer::now_ms();
        let _ = writeln!(
            ConsoleWriter,
            "[{:>4}.{:03}] {} {}: {}",
            ms / 1000,
            ms % 1000,
            level,
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Install the kernel logger. Idempotent: a second call is a no-op.
pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(LevelFilter::Info))
        .ok();
}
