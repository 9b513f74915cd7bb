/// Colored log records on stderr
use crossterm::{
    style::{Color, Print, ResetColor, SetForegroundColor},
    QueueableCommand,
};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::io::{stderr, Write};

struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

fn level_color(level: Level) -> Color {
    match level {
        Level::Error => Color::Red,
        Level::Warn => Color::Yellow,
        Level::Info => Color::Green,
        Level::Debug => Color::Cyan,
        Level::Trace => Color::DarkGrey,
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut err = stderr().lock();
        // Nowhere left to report a failed log write.
        let _ = err
            .queue(SetForegroundColor(level_color(record.level())))
            .and_then(|err| err.queue(Print(format!("{:>5} ", record.level()))))
            .and_then(|err| err.queue(ResetColor))
            .and_then(|err| err.queue(Print(format!("{}\n", record.args()))))
            .and_then(|err| err.flush());
    }

    fn flush(&self) {
        let _ = stderr().flush();
    }
}

/// Map `-v` repetitions to a level filter; warnings always show.
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

pub fn init(verbosity: u8) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level_for(verbosity));
    Ok(())
}
