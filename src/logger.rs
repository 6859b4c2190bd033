use colored::Colorize;
use log::{Level, LevelFilter, Log, Metadata, Record};

/// Writes log records to stderr; debug records are shown in gray, the way
/// diagnostic output is shown elsewhere in the shell.
struct ShellLogger {
    level: LevelFilter,
}

impl Log for ShellLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level && metadata.target().starts_with(env!("CARGO_CRATE_NAME"))
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        eprintln!("{}", format_record(record.level(), &record.args().to_string()));
    }

    fn flush(&self) {}
}

fn format_record(level: Level, message: &str) -> String {
    let line = format!("[{}] {}", level.as_str().to_lowercase(), message);
    match level {
        Level::Error => line.red().to_string(),
        Level::Warn => line.yellow().to_string(),
        _ => line.truecolor(128, 128, 128).to_string(),
    }
}

pub fn level_for(debug: bool) -> LevelFilter {
    if debug { LevelFilter::Debug } else { LevelFilter::Warn }
}

/// Installs the logger. Calling it twice keeps the first installation.
pub fn init(debug: bool) {
    let level = level_for(debug);
    if log::set_boxed_logger(Box::new(ShellLogger { level })).is_ok() {
        log::set_max_level(level);
    }
}
