use std::{borrow::Cow, path::Path};

use chrono::{DateTime, Local, Utc};
use humansize::{ToF64, Unsigned, DECIMAL};

pub fn format_path(path: &Path) -> String {
    let path_str = path.to_string_lossy();
    match snailquote::escape(&path_str) {
        Cow::Owned(escaped) => escaped,
        Cow::Borrowed(_) => path_str.into_owned(),
    }
}

pub fn format_size<T: ToF64 + Unsigned>(input: T) -> String {
    humansize::format_size(input, DECIMAL)
}

pub fn format_time(time: &DateTime<Utc>) -> String {
    time.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Local time of a millisecond timestamp; unset timestamps read "never".
pub fn format_millis(millis: i64) -> String {
    match DateTime::from_timestamp_millis(millis) {
        Some(time) if millis > 0 => format_time(&time),
        _ => "never".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_and_paths() {
        assert_eq!(format_size(1_500_u64), "1.50 kB");
        assert_eq!(format_path(Path::new("/data/user/0")), "/data/user/0");
        assert_eq!(format_path(Path::new("/sdcard/My Files")), "'/sdcard/My Files'");
        assert_eq!(format_millis(0), "never");
    }
}
