pub mod auth;
pub mod config;
pub mod enroll;
pub mod inter;
pub mod store;
pub mod subject;
pub mod user;

use std::fmt::Display;
use std::io::Read;

pub fn log_level_from_env() -> simplelog::LevelFilter {
    use simplelog::LevelFilter;

    let mut level_string = match std::env::var("LOG_LEVEL") {
        Err(_) => { return LevelFilter::Warn; },
        Ok(s) => s,
    };

    level_string.make_ascii_lowercase();
    match level_string.as_str() {
        "max" => LevelFilter::max(),
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Warn,
    }
}

/// CSV reader with the settings every seed file uses: `#` comments,
/// trimmed fields, no header row, and a fixed number of fields per row.
pub(crate) fn csv_reader<R: Read>(r: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .flexible(false)
        .has_headers(false)
        .from_reader(r)
}

pub(crate) fn csv_error_message<E: Display + ?Sized>(
    n: usize,
    pos: Option<&csv::Position>,
    e: &E,
) -> String {
    match pos {
        Some(p) => format!("Error on line {}: {}", p.line(), e),
        None => format!("Error in CSV record {}: {}", n, e),
    }
}
