//! Kernel logger
//!
//! Lines go to stderr, prefixed with the simulated clock and the name of the kernel thread that
//! logged them (when there is one).
use crate::threads;
use log::{Level, LevelFilter, Log, Metadata, Record};
use owo_colors::{OwoColorize, Style};

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

fn level_style(level: Level) -> Style {
    let style = Style::new();
    match level {
        Level::Error => style.red().bold(),
        Level::Warn => style.yellow(),
        Level::Info => style.blue(),
        Level::Debug => style.green(),
        Level::Trace => style.dimmed(),
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let level = record.level();
        let level = format!("{level:<5}");
        let level = level.style(level_style(record.level()));
        match threads::try_context() {
            Some(context) => eprintln!(
                "[{level} {:>8} {}] {}",
                context.kernel.time(),
                context.thread.name().cyan(),
                record.args()
            ),
            None => eprintln!("[{level}] {}", record.args()),
        }
    }

    fn flush(&self) {}
}

/// Install the kernel logger
///
/// Only the first call installs the logger, but every call updates the maximum level
pub fn init(level: LevelFilter) {
    // Already installed if this fails
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
