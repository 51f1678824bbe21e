use jiff::{Timestamp, civil::DateTime, tz::Offset};

use crate::err::{DeserializationError, DeserializationResult};

/// Seconds between 1601-01-01 (the FILETIME epoch) and the unix epoch.
const WINDOWS_TO_UNIX_SECS: i64 = 11_644_473_600;
const TICKS_PER_SECOND: u64 = 10_000_000;

/// Converts a FILETIME (100ns ticks since 1601-01-01T00:00:00Z) to a timestamp.
pub(crate) fn filetime_to_timestamp(filetime: u64) -> DeserializationResult<Timestamp> {
    let secs = (filetime / TICKS_PER_SECOND) as i64 - WINDOWS_TO_UNIX_SECS;
    let nanos = ((filetime % TICKS_PER_SECOND) * 100) as i32;
    Timestamp::new(secs, nanos).map_err(|_| DeserializationError::InvalidDateTime)
}

/// Converts a 16 byte SYSTEMTIME structure to a timestamp.
///
/// An all-zero structure maps to the FILETIME epoch, which is how Windows renders it.
pub(crate) fn systime_from_bytes(bytes: &[u8; 16]) -> DeserializationResult<Timestamp> {
    let field = |i: usize| u16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]);

    if bytes.iter().all(|&b| b == 0) {
        return filetime_to_timestamp(0);
    }

    // Field 2 is the day of week, which is implied by the date.
    let (year, month, day) = (field(0), field(1), field(3));
    let (hour, minute, second, millis) = (field(4), field(5), field(6), field(7));

    let narrow = |v: u16| i8::try_from(v).map_err(|_| DeserializationError::InvalidDateTime);
    let year = i16::try_from(year).map_err(|_| DeserializationError::InvalidDateTime)?;
    let nanos = i32::from(millis) * 1_000_000;

    let dt = DateTime::new(
        year,
        narrow(month)?,
        narrow(day)?,
        narrow(hour)?,
        narrow(minute)?,
        narrow(second)?,
        nanos,
    )
    .map_err(|_| DeserializationError::InvalidDateTime)?;

    Offset::UTC
        .to_timestamp(dt)
        .map_err(|_| DeserializationError::InvalidDateTime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_filetime_epoch_boundaries() {
        assert_eq!(
            filetime_to_timestamp(116_444_736_000_000_000).unwrap(),
            Timestamp::UNIX_EPOCH
        );
        assert_eq!(
            filetime_to_timestamp(0).unwrap().to_string(),
            "1601-01-01T00:00:00Z"
        );
    }

    #[test]
    fn test_filetime_keeps_sub_second_ticks() {
        // 2016-07-08T18:12:51.681640Z
        let ts = filetime_to_timestamp(131_124_751_716_816_400).unwrap();
        assert_eq!(ts.as_second(), 1_468_001_571);
        assert_eq!(ts.subsec_nanosecond(), 681_640_000);
    }

    #[test]
    fn test_systemtime() {
        let fields: [u16; 8] = [2021, 3, 5, 14, 10, 20, 30, 250];
        let mut bytes = [0_u8; 16];
        for (i, f) in fields.iter().enumerate() {
            bytes[i * 2..i * 2 + 2].copy_from_slice(&f.to_le_bytes());
        }
        assert_eq!(
            systime_from_bytes(&bytes).unwrap().to_string(),
            "2021-03-14T10:20:30.25Z"
        );
    }

    #[test]
    fn test_systemtime_out_of_range_month_is_rejected() {
        let mut bytes = [0_u8; 16];
        bytes[0..2].copy_from_slice(&2021_u16.to_le_bytes());
        bytes[2..4].copy_from_slice(&13_u16.to_le_bytes());
        bytes[6..8].copy_from_slice(&1_u16.to_le_bytes());
        assert!(systime_from_bytes(&bytes).is_err());
    }
}
