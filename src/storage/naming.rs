use chrono::{DateTime, NaiveDate, Utc};
use std::path::Path;

pub const LOG_EXTENSION: &str = "log";

const DATE_FORMAT: &str = "%Y%m%d";

/// File name for the log of a given day, e.g. `20240103.log`.
pub fn file_name(date: NaiveDate) -> String {
    format!("{}.{}", date.format(DATE_FORMAT), LOG_EXTENSION)
}

/// Day a timestamp belongs to. Sub-day information is discarded so every
/// write made on the same UTC day lands in the same file.
pub fn day_of(ts: DateTime<Utc>) -> NaiveDate {
    ts.date_naive()
}

/// Whether a path looks like a log file: a visible regular name ending in `.log`.
pub fn is_log_file_name(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with('.') {
        return false;
    }
    path.extension().and_then(|e| e.to_str()) == Some(LOG_EXTENSION)
}

/// Date encoded in a log file name. `None` unless the stem is exactly
/// eight digits forming a valid calendar date.
pub fn parse_file_date(path: &Path) -> Option<NaiveDate> {
    let stem = path.file_stem()?.to_str()?;
    if stem.len() != 8 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(stem, DATE_FORMAT).ok()
}
