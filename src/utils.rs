//! Timestamp handling shared by labels and indexes.
//!
//! On-tape times are ISO-8601 UTC with up to nine subsecond digits. The
//! parsed precision is kept so serialization reproduces the original
//! text exactly; out-of-range values are retained rather than clamped,
//! and only clamped when handed to the host filesystem layer.

use crate::error::{LtfsError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use tracing::warn;

/// Seconds for 0001-01-01T00:00:00Z and 9999-12-31T23:59:59Z, the range
/// a four-digit year can express.
const TIME_MIN: i64 = -62135596800;
const TIME_MAX: i64 = 253402300799;

/// One on-tape timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LtfsTime {
    pub secs: i64,
    pub nanos: u32,
    /// Subsecond digits the source carried (0..=9); new timestamps use 9.
    pub digits: u8,
}

impl LtfsTime {
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            secs: now.timestamp(),
            nanos: now.timestamp_subsec_nanos().min(999_999_999),
            digits: 9,
        }
    }

    /// Parse `YYYY-MM-DDThh:mm:ss[.n{1,9}]Z`.
    ///
    /// Returns the timestamp and whether it falls outside the
    /// representable four-digit-year range (the value is kept either
    /// way).
    pub fn parse(text: &str) -> Result<(Self, bool)> {
        let body = text
            .strip_suffix('Z')
            .ok_or_else(|| LtfsError::index_invalid(format!("bad timestamp: {text}")))?;

        let (base, digits, nanos) = match body.split_once('.') {
            None => (body, 0u8, 0u32),
            Some((base, frac)) => {
                if frac.is_empty() || frac.len() > 9 || !frac.chars().all(|c| c.is_ascii_digit()) {
                    return Err(LtfsError::index_invalid(format!("bad timestamp: {text}")));
                }
                let value: u32 = frac
                    .parse()
                    .map_err(|_| LtfsError::index_invalid(format!("bad timestamp: {text}")))?;
                let nanos = value * 10u32.pow(9 - frac.len() as u32);
                (base, frac.len() as u8, nanos)
            }
        };

        let naive = NaiveDateTime::parse_from_str(base, "%Y-%m-%dT%H:%M:%S")
            .map_err(|_| LtfsError::index_invalid(format!("bad timestamp: {text}")))?;
        let secs = naive.and_utc().timestamp();

        let out_of_range = !(TIME_MIN..=TIME_MAX).contains(&secs);
        if out_of_range {
            warn!(timestamp = text, "timestamp outside representable range, keeping value");
        }
        Ok((
            Self {
                secs,
                nanos,
                digits,
            },
            out_of_range,
        ))
    }

    /// Render with the precision the value was parsed with.
    pub fn format(&self) -> String {
        let base = match DateTime::<Utc>::from_timestamp(self.secs, self.nanos) {
            Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
            None => format!("@{}", self.secs),
        };
        if self.digits == 0 {
            format!("{base}Z")
        } else {
            let frac = self.nanos / 10u32.pow(9 - self.digits as u32);
            format!("{base}.{frac:0width$}Z", width = self.digits as usize)
        }
    }

    /// Clamp to the host-representable range when reporting to the
    /// filesystem layer; on-tape and in-memory values stay untouched.
    pub fn clamped_secs(&self) -> i64 {
        self.secs.clamp(TIME_MIN, TIME_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats_nine_digit_precision() {
        let (t, oor) = LtfsTime::parse("2025-08-14T04:33:40.191740900Z").unwrap();
        assert!(!oor);
        assert_eq!(t.nanos, 191_740_900);
        assert_eq!(t.digits, 9);
        assert_eq!(t.format(), "2025-08-14T04:33:40.191740900Z");
    }

    #[test]
    fn preserves_shorter_precision() {
        let (t, _) = LtfsTime::parse("2017-11-07T03:48:12.5Z").unwrap();
        assert_eq!(t.digits, 1);
        assert_eq!(t.nanos, 500_000_000);
        assert_eq!(t.format(), "2017-11-07T03:48:12.5Z");

        let (t0, _) = LtfsTime::parse("2017-11-07T03:48:12Z").unwrap();
        assert_eq!(t0.digits, 0);
        assert_eq!(t0.format(), "2017-11-07T03:48:12Z");
    }

    #[test]
    fn rejects_malformed_timestamps() {
        assert!(LtfsTime::parse("2025-08-14T04:33:40").is_err());
        assert!(LtfsTime::parse("2025-08-14 04:33:40Z").is_err());
        assert!(LtfsTime::parse("2025-08-14T04:33:40.1234567890Z").is_err());
        assert!(LtfsTime::parse("2025-13-40T04:33:40.0Z").is_err());
        assert!(LtfsTime::parse("2025-08-14T04:33:40.Z").is_err());
    }

    #[test]
    fn round_trip_is_exact() {
        for s in [
            "1970-01-01T00:00:00.000000000Z",
            "2038-01-19T03:14:08.999999999Z",
            "1969-12-31T23:59:59.000000001Z",
        ] {
            let (t, _) = LtfsTime::parse(s).unwrap();
            assert_eq!(t.format(), s);
        }
    }
}
