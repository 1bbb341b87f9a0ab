// NTFS timestamp handling
// All on-disk times are Windows FILETIME: 100-nanosecond intervals since
// January 1, 1601 00:00:00 UTC.

use chrono::{DateTime, TimeZone, Utc};

/// Number of seconds between the FILETIME epoch (1601) and the Unix epoch (1970)
const WINDOWS_EPOCH_DIFF: u64 = 11644473600;

/// FILETIME is in 100-nanosecond intervals
const FILETIME_TICKS_PER_SECOND: u64 = 10_000_000;

/// Converts Windows FILETIME to a UTC datetime. Returns None for zero or
/// pre-Unix-epoch values.
pub fn filetime_to_datetime(filetime: u64) -> Option<DateTime<Utc>> {
    if filetime == 0 {
        return None;
    }
    let seconds = filetime / FILETIME_TICKS_PER_SECOND;
    if seconds < WINDOWS_EPOCH_DIFF {
        // Time is before the Unix epoch
        return None;
    }
    let unix_seconds = (seconds - WINDOWS_EPOCH_DIFF) as i64;
    let nanos = ((filetime % FILETIME_TICKS_PER_SECOND) * 100) as u32;
    Utc.timestamp_opt(unix_seconds, nanos).single()
}
