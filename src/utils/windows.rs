use jiff::{Timestamp, civil::DateTime, tz::Offset};

use crate::err::{DeserializationError, DeserializationResult};
use crate::utils::ByteCursor;

/// Seconds between 1601-01-01 and the Unix epoch.
pub const FILETIME_UNIX_EPOCH_SECS: i64 = 11_644_473_600;

const TICKS_PER_SECOND: u64 = 10_000_000;

/// Converts a Windows FILETIME (100ns ticks since 1601-01-01 UTC) to a timestamp.
///
/// `offset` is only used for error reporting.
pub fn filetime_to_timestamp(filetime: u64, offset: u64) -> DeserializationResult<Timestamp> {
    // Both casts are lossless: u64::MAX / 10^7 fits an i64, and the remainder times 100 fits an i32.
    let secs = (filetime / TICKS_PER_SECOND) as i64 - FILETIME_UNIX_EPOCH_SECS;
    let nanos = ((filetime % TICKS_PER_SECOND) * 100) as i32;
    Timestamp::new(secs, nanos).map_err(|_| DeserializationError::InvalidDateTime {
        value: filetime,
        offset,
    })
}

/// Reads a FILETIME stored as two little-endian 32-bit halves, low half first.
pub fn read_filetime(cursor: &mut ByteCursor<'_>) -> DeserializationResult<Timestamp> {
    let offset = cursor.position();
    let low = u64::from(cursor.u32_named("filetime low")?);
    let high = u64::from(cursor.u32_named("filetime high")?);
    filetime_to_timestamp((high << 32) | low, offset)
}

pub fn read_systime(cursor: &mut ByteCursor<'_>) -> DeserializationResult<Timestamp> {
    let offset = cursor.position();
    let bytes = cursor.array::<16>("systime")?;
    systime_from_bytes(&bytes, offset)
}

/// Decodes a SYSTEMTIME structure (eight little-endian u16 fields).
pub fn systime_from_bytes(bytes: &[u8; 16], offset: u64) -> DeserializationResult<Timestamp> {
    let field = |i: usize| u16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]);
    let invalid = || DeserializationError::InvalidDateTime {
        value: u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]),
        offset,
    };

    let year = field(0);
    let month = field(1);
    // field(2) is the day of the week
    let day = field(3);
    let hour = field(4);
    let minute = field(5);
    let second = field(6);
    let milliseconds = field(7);

    // An entirely unset value maps to the FILETIME epoch.
    if bytes.iter().all(|&b| b == 0) {
        return filetime_to_timestamp(0, offset);
    }

    let small = |v: u16| i8::try_from(v).map_err(|_| invalid());
    let year = i16::try_from(year).map_err(|_| invalid())?;
    let nanos = i32::from(milliseconds) * 1_000_000;

    let dt = DateTime::new(
        year,
        small(month)?,
        small(day)?,
        small(hour)?,
        small(minute)?,
        small(second)?,
        nanos,
    )
    .map_err(|_| invalid())?;

    Offset::UTC.to_timestamp(dt).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_unix_epoch() {
        let ts = filetime_to_timestamp(116_444_736_000_000_000, 0).unwrap();
        assert_eq!(ts, Timestamp::UNIX_EPOCH);
    }

    #[test]
    fn test_filetime_from_halves() {
        // low = 0x00000000, high = 0x01C00000
        let data = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xc0, 0x01];
        let mut cursor = ByteCursor::new(&data);
        let ts = read_filetime(&mut cursor).unwrap();

        // 2000-08-06T23:42:36.6373888Z
        assert_eq!(ts.as_nanosecond(), 965_605_356_637_388_800);
        assert_eq!(cursor.pos(), 8);
    }

    #[test]
    fn test_known_evtx_timestamp() {
        // First record of a stock Security.evtx, 2016-07-08T18:12:51.681640Z
        let ts = filetime_to_timestamp(131_124_751_716_816_400, 0).unwrap();
        let dt = Offset::UTC.to_datetime(ts);

        assert_eq!((dt.year(), dt.month(), dt.day()), (2016, 7, 8));
        assert_eq!(
            (dt.hour(), dt.minute(), dt.second(), dt.subsec_nanosecond()),
            (18, 12, 51, 681_640_000)
        );
    }

    #[test]
    fn test_filetime_zero_is_1601() {
        let ts = filetime_to_timestamp(0, 0).unwrap();
        assert_eq!(ts.as_second(), -11_644_473_600);
    }

    #[test]
    fn test_out_of_range_filetime() {
        let err = filetime_to_timestamp(u64::MAX, 42).unwrap_err();
        assert_eq!(
            err,
            DeserializationError::InvalidDateTime {
                value: u64::MAX,
                offset: 42
            }
        );
    }

    #[test]
    fn test_systime() {
        let fields: [u16; 8] = [2019, 3, 5, 13, 18, 42, 7, 250];
        let mut bytes = [0_u8; 16];
        for (i, f) in fields.iter().enumerate() {
            bytes[i * 2..i * 2 + 2].copy_from_slice(&f.to_le_bytes());
        }

        let ts = systime_from_bytes(&bytes, 0).unwrap();
        let expected = Offset::UTC
            .to_timestamp(DateTime::new(2019, 3, 13, 18, 42, 7, 250_000_000).unwrap())
            .unwrap();
        assert_eq!(ts, expected);
    }

    #[test]
    fn test_unset_systime() {
        let ts = systime_from_bytes(&[0; 16], 0).unwrap();
        assert_eq!(ts, filetime_to_timestamp(0, 0).unwrap());
    }
}
