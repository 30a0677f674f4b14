use crate::err::{DeserializationError, DeserializationResult};

use byteorder::ReadBytesExt;
use chrono::prelude::*;
use std::io::Cursor;

/// Difference between the FILETIME epoch (1601-01-01) and the Unix epoch, in seconds.
const EPOCH_DELTA_SECONDS: i64 = 11_644_473_600;

/// Converts a FILETIME (100ns ticks since 1601-01-01 UTC) to a UTC instant.
/// An unset (zero) timestamp maps to the Unix epoch.
pub fn datetime_from_filetime(filetime: u64) -> DateTime<Utc> {
    let epoch = DateTime::<Utc>::from_timestamp(0, 0).expect("unix epoch is always valid");

    if filetime == 0 {
        return epoch;
    }

    let micros_since_1601 = (filetime / 10) as i64;
    let unix_micros = micros_since_1601 - EPOCH_DELTA_SECONDS * 1_000_000;

    DateTime::<Utc>::from_timestamp_micros(unix_micros).unwrap_or(epoch)
}

/// Renders a UTC instant in the fixed ISO-8601 form used across all outputs.
pub fn format_utc(datetime: &DateTime<Utc>) -> String {
    datetime.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Reads a 16-byte Windows SYSTEMTIME structure, interpreted as UTC.
pub fn read_systemtime(cursor: &mut Cursor<&[u8]>) -> DeserializationResult<DateTime<Utc>> {
    let start = cursor.position();

    let year = try_read!(cursor, u16, "systemtime_year")?;
    let month = try_read!(cursor, u16, "systemtime_month")?;
    let _day_of_week = try_read!(cursor, u16, "systemtime_day_of_week")?;
    let day = try_read!(cursor, u16, "systemtime_day")?;
    let hour = try_read!(cursor, u16, "systemtime_hour")?;
    let minute = try_read!(cursor, u16, "systemtime_minute")?;
    let second = try_read!(cursor, u16, "systemtime_second")?;
    let milliseconds = try_read!(cursor, u16, "systemtime_milliseconds")?;

    // An entirely unset value is conventional for "no timestamp".
    if year == 0
        && month == 0
        && day == 0
        && hour == 0
        && minute == 0
        && second == 0
        && milliseconds == 0
    {
        return Ok(datetime_from_filetime(0));
    }

    NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))
        .and_then(|date| {
            date.and_hms_nano_opt(
                u32::from(hour),
                u32::from(minute),
                u32::from(second),
                u32::from(milliseconds) * 1_000_000,
            )
        })
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or(DeserializationError::InvalidDateTime { offset: start })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converts_a_known_filetime() {
        // 2016-07-08T18:12:51.681640Z
        let filetime = 131_124_751_716_816_400_u64;
        let datetime = datetime_from_filetime(filetime);

        assert_eq!(format_utc(&datetime), "2016-07-08T18:12:51.681640Z");
    }

    #[test]
    fn test_zero_filetime_is_the_unix_epoch() {
        let datetime = datetime_from_filetime(0);
        assert_eq!(format_utc(&datetime), "1970-01-01T00:00:00.000000Z");
    }

    #[test]
    fn test_reads_a_systemtime() {
        let mut bytes = vec![];
        for field in [2024u16, 1, 1, 15, 10, 30, 45, 123] {
            bytes.extend_from_slice(&field.to_le_bytes());
        }

        let as_slice = bytes.as_slice();
        let mut cursor = Cursor::new(as_slice);
        let datetime = read_systemtime(&mut cursor).unwrap();

        assert_eq!(format_utc(&datetime), "2024-01-15T10:30:45.123000Z");
        assert_eq!(cursor.position(), 16);
    }
}
