//! Formatting helpers shared by log lines and snapshots

use num_format::{Locale, ToFormattedString};

const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

/// Binary-prefixed size with the exact byte count, e.g. `64.00 GiB (68,719,476,736 bytes)`
pub fn pretty_size(bytes: u64) -> String {
    let exact = bytes.to_formatted_string(&Locale::en);
    if bytes < 1024 {
        return format!("{exact} B");
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {} ({exact} bytes)", UNITS[unit])
}
