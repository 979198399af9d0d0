//! TJD / seconds-of-day time encoding
//!
//! Packets carry time as a truncated Julian Day (JD - 2440000.5) plus the offset
//! into that day in centiseconds.

use chrono::{DateTime, Timelike, Utc};

const SECS_IN_DAY: i64 = 86_400;
const CENTISECS_IN_DAY: i64 = SECS_IN_DAY * 100;

/// Truncated Julian Day of the UNIX epoch (JD 2440587.5 - 2440000.5)
const TJD_AT_UNIX_EPOCH: i64 = 587;

/// Modified Julian Day of the UNIX epoch
const MJD_AT_UNIX_EPOCH: i64 = 40_587;

/// A point in time in the packet's native encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcnTime {
    /// Truncated Julian Day
    pub tjd: i32,
    /// Seconds of day, in centiseconds
    pub sod: i32,
}

impl GcnTime {
    /// Convert a UNIX timestamp (seconds) to TJD/SoD, rounded to the nearest centisecond
    pub fn from_unix(timestamp: f64) -> Self {
        let centis = (timestamp * 100.0).round() as i64;
        Self {
            tjd: (centis.div_euclid(CENTISECS_IN_DAY) + TJD_AT_UNIX_EPOCH) as i32,
            sod: centis.rem_euclid(CENTISECS_IN_DAY) as i32,
        }
    }

    /// Like [`GcnTime::from_unix`], but `None` when the day number does not fit
    /// in a packet word
    pub fn try_from_unix(timestamp: f64) -> Option<Self> {
        let centis = (timestamp * 100.0).round();
        if !centis.is_finite() || centis.abs() >= i64::MAX as f64 {
            return None;
        }
        let centis = centis as i64;
        let tjd = i32::try_from(centis.div_euclid(CENTISECS_IN_DAY) + TJD_AT_UNIX_EPOCH).ok()?;
        Some(Self {
            tjd,
            sod: centis.rem_euclid(CENTISECS_IN_DAY) as i32,
        })
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self::from_unix(dt.timestamp_micros() as f64 / 1e6)
    }

    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Convert back to a UNIX timestamp in seconds
    pub fn to_unix(self) -> f64 {
        (i64::from(self.tjd) - TJD_AT_UNIX_EPOCH) as f64 * SECS_IN_DAY as f64 + f64::from(self.sod) / 100.0
    }
}

/// Current UNIX time in seconds
pub fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}

/// Modified Julian Day and milliseconds past midnight for a UTC instant
pub fn mjd_mpm(dt: DateTime<Utc>) -> (i64, i64) {
    let mjd = dt.timestamp().div_euclid(SECS_IN_DAY) + MJD_AT_UNIX_EPOCH;
    let mpm = i64::from(dt.num_seconds_from_midnight()) * 1000 + i64::from(dt.timestamp_subsec_millis());
    (mjd, mpm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_unix_epoch_is_tjd_587() {
        let t = GcnTime::from_unix(0.0);
        assert_eq!(t, GcnTime { tjd: 587, sod: 0 });
        assert_eq!(t.to_unix(), 0.0);
    }

    #[test]
    fn test_known_date() {
        // 2015-09-09T12:00:00Z is JD 2457275.0, TJD 17274 at noon
        let dt = Utc.with_ymd_and_hms(2015, 9, 9, 12, 0, 0).unwrap();
        let t = GcnTime::from_datetime(dt);
        assert_eq!(t.tjd, 17274);
        assert_eq!(t.sod, 12 * 3600 * 100);
    }

    #[test]
    fn test_centisecond_precision() {
        let ts = 1_441_800_123.456;
        let back = GcnTime::from_unix(ts).to_unix();
        assert!((back - ts).abs() <= 0.005 + 1e-6, "{back} vs {ts}");
    }

    #[test]
    fn test_rounding_at_midnight_rolls_day() {
        let t = GcnTime::from_unix(86_399.999);
        assert_eq!(t, GcnTime { tjd: 588, sod: 0 });
    }

    #[test]
    fn test_unencodable_times_are_rejected() {
        assert_eq!(GcnTime::try_from_unix(0.0), Some(GcnTime { tjd: 587, sod: 0 }));
        assert_eq!(GcnTime::try_from_unix(f64::NAN), None);
        assert_eq!(GcnTime::try_from_unix(f64::INFINITY), None);
        assert_eq!(GcnTime::try_from_unix(1e15), None);
        assert_eq!(GcnTime::try_from_unix(-1e15), None);
    }

    #[test]
    fn test_mjd_mpm() {
        let dt = Utc.with_ymd_and_hms(2015, 9, 9, 1, 2, 3).unwrap();
        let (mjd, mpm) = mjd_mpm(dt);
        assert_eq!(mjd, 57274);
        assert_eq!(mpm, (3600 + 2 * 60 + 3) * 1000);
    }
}
