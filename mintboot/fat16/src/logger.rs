//! `log` backend for the boot console: level tag, target, message, one
//! record per line with `\r\n` endings.

use core::fmt::{Display, Write};

use log::{Level, LevelFilter, Log, Metadata, Record};
use owo_colors::OwoColorize;

/// Where log lines end up: a serial port, the VT52 screen, a test buffer.
pub trait Console: Write + Send {}

impl<T: Write + Send> Console for T {}

enum Color {
    Default,
    Gray,
    BrightRed,
    BrightYellow,
    BrightBlue,
    BrightCyan,
    BrightMagenta,
}

struct Inner<C> {
    console: C,
    /// Emit ANSI colors; off for consoles that would print the escapes.
    colored: bool,
}

impl<C: Console> Inner<C> {
    fn write_with_color(&mut self, color: Color, string: impl Display) {
        let string: &dyn Display = match (self.colored, color) {
            (false, _) | (true, Color::Default) => &string,
            (true, Color::Gray) => &string.dimmed(),
            (true, Color::BrightRed) => &string.bright_red(),
            (true, Color::BrightYellow) => &string.bright_yellow(),
            (true, Color::BrightBlue) => &string.bright_blue(),
            (true, Color::BrightCyan) => &string.bright_cyan(),
            (true, Color::BrightMagenta) => &string.bright_magenta(),
        };
        // A console that stops accepting output has nowhere to report it.
        let _ = write!(WriterWithCr::new(&mut self.console), "{string}");
    }
}

pub struct ConsoleLogger<C> {
    inner: spin::Mutex<Inner<C>>,
    level: LevelFilter,
}

impl<C: Console> ConsoleLogger<C> {
    pub const fn new(console: C, level: LevelFilter, colored: bool) -> Self {
        Self {
            inner: spin::Mutex::new(Inner { console, colored }),
            level,
        }
    }

    pub fn with_console<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        f(&mut self.inner.lock().console)
    }
}

impl<C: Console> Log for ConsoleLogger<C> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut inner = self.inner.lock();
        let level = record.level();
        inner.write_with_color(
            match level {
                Level::Error => Color::BrightRed,
                Level::Warn => Color::BrightYellow,
                Level::Info => Color::BrightBlue,
                Level::Debug => Color::BrightCyan,
                Level::Trace => Color::BrightMagenta,
            },
            format_args!("{level:5} "),
        );
        inner.write_with_color(Color::Gray, format_args!("[{}] ", record.target()));
        inner.write_with_color(Color::Default, record.args());
        inner.write_with_color(Color::Default, "\n");
    }

    fn flush(&self) {}
}

/// Install `logger` as the global `log` backend.
pub fn init<C: Console>(logger: &'static ConsoleLogger<C>) -> Result<(), log::SetLoggerError> {
    log::set_logger(logger)?;
    log::set_max_level(logger.level);
    Ok(())
}

struct WriterWithCr<T> {
    writer: T,
}

impl<T> WriterWithCr<T> {
    const fn new(writer: T) -> Self {
        Self { writer }
    }
}

impl<T: Write> Write for WriterWithCr<T> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let mut lines = s.split('\n');
        if let Some(first) = lines.next() {
            self.writer.write_str(first)?;
        }
        for line in lines {
            self.writer.write_str("\r\n")?;
            self.writer.write_str(line)?;
        }
        Ok(())
    }
}
