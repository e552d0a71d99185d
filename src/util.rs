//! Small stateless helpers shared by the cache, dispatcher, and path sanitizer:
//! FNV-1a hashing, RFC 7231 date formatting, and gzip compression.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// FNV-1a over arbitrary bytes. Used for the cache's path-keyed lookup table
/// and the rate limiter's bucket index.
#[inline]
pub(crate) fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Formats a [`SystemTime`] as an RFC 7231 IMF-fixdate, e.g.
/// `Sun, 06 Nov 1994 08:49:37 GMT`. Used for the `Last-Modified` header and
/// (via its date portion) `If-Modified-Since` comparisons.
///
/// Civil-date conversion follows Howard Hinnant's `civil_from_days` algorithm;
/// no calendar crate is pulled in for a one-shot UTC-only formula.
pub(crate) fn http_date(time: SystemTime) -> String {
    let secs = time
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs() as i64;

    let days = secs.div_euclid(86_400);
    let time_of_day = secs.rem_euclid(86_400);

    let (year, month, day) = civil_from_days(days);
    let weekday = WEEKDAYS[(days.rem_euclid(7) + 4).rem_euclid(7) as usize];

    let hour = time_of_day / 3600;
    let minute = (time_of_day % 3600) / 60;
    let second = time_of_day % 60;

    format!(
        "{weekday}, {day:02} {} {year:04} {hour:02}:{minute:02}:{second:02} GMT",
        MONTHS[(month - 1) as usize]
    )
}

/// Converts a day count since the Unix epoch into a proleptic Gregorian
/// `(year, month, day)` triple.
fn civil_from_days(days: i64) -> (i64, i64, i64) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if month <= 2 { y + 1 } else { y };

    (year, month, day)
}

/// gzip-compresses `data` at the default compression level.
///
/// Used by the dispatcher's in-memory gzip fast path for small, compressible
/// text responses; never applied to already-compressed or binary formats.
pub(crate) fn gzip_compress(data: &[u8]) -> Vec<u8> {
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    // A Vec<u8> sink never fails to write.
    encoder.write_all(data).expect("in-memory gzip write");
    encoder.finish().expect("in-memory gzip finish")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_matches_known_vector() {
        // FNV-1a 64-bit of the empty string is the offset basis.
        assert_eq!(fnv1a(b""), FNV_OFFSET_BASIS);
        assert_ne!(fnv1a(b"/index.html"), fnv1a(b"/index.htm"));
    }

    #[test]
    fn http_date_epoch() {
        assert_eq!(http_date(UNIX_EPOCH), "Thu, 01 Jan 1970 00:00:00 GMT");
    }

    #[test]
    fn http_date_known_instant() {
        // 1700000000 -> 2023-11-14T22:13:20Z
        let time = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert_eq!(http_date(time), "Tue, 14 Nov 2023 22:13:20 GMT");
    }

    #[test]
    fn gzip_round_trips_through_flate2() {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let data = b"the quick brown fox jumps over the lazy dog".repeat(20);
        let compressed = gzip_compress(&data);
        assert!(compressed.len() < data.len());

        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }
}
