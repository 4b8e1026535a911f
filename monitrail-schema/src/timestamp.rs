//! Collision-resistant timestamps
//!
//! A [`Timestamp`] couples a UTC time with a small uniquifier byte so that
//! entries emitted within the same clock tick still get a total order.

use crate::ParseError;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Smallest representable time step, in nanoseconds
pub const TICK_NANOS: i64 = 100;

/// Length of the textual time part: `yyyy-MM-dd HHhmm.ss.fffffff`
const TIME_TEXT_LEN: usize = 27;

/// Length of the `yyyy-MM-dd HHhmm.ss` prefix
const SECONDS_TEXT_LEN: usize = 19;

const SECONDS_FORMAT: &str = "%Y-%m-%d %Hh%M.%S";

/// Discriminates the two sentinels from real values.
///
/// Parsing or constructing from a time always yields `Known`, so a sentinel can
/// never be produced from text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum StampKind {
    Unknown,
    Known,
    Invalid,
}

/// A UTC time plus a uniquifier that is non-zero only when the time collides
/// with the previous stamp of an ordered sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp {
    time: DateTime<Utc>,
    uniquifier: u8,
    kind: StampKind,
}

fn utc(year: i32, month: u32, day: u32, h: u32, m: u32, s: u32, nanos: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_nano_opt(h, m, s, nanos))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn truncate_to_tick(time: DateTime<Utc>) -> DateTime<Utc> {
    let nanos = time.nanosecond();
    time.with_nanosecond(nanos - nanos % TICK_NANOS as u32)
        .unwrap_or(time)
}

impl Timestamp {
    /// Create a stamp from a time (truncated to the tick) and a uniquifier
    pub fn new(time: DateTime<Utc>, uniquifier: u8) -> Self {
        Self {
            time: truncate_to_tick(time),
            uniquifier,
            kind: StampKind::Known,
        }
    }

    /// Current time with a zero uniquifier
    pub fn now() -> Self {
        Self::new(Utc::now(), 0)
    }

    /// Smallest known stamp: 0001-01-01 00:00:00, uniquifier 0
    pub fn min_value() -> Self {
        Self::new(utc(1, 1, 1, 0, 0, 0, 0), 0)
    }

    /// Largest known stamp: 9999-12-31 23:59:59.9999999, uniquifier 255
    pub fn max_value() -> Self {
        Self::new(utc(9999, 12, 31, 23, 59, 59, 999_999_900), u8::MAX)
    }

    /// The "never set" stamp (also the `Default`)
    pub fn unknown() -> Self {
        Self {
            time: utc(1, 1, 1, 0, 0, 0, 0),
            uniquifier: 0,
            kind: StampKind::Unknown,
        }
    }

    /// The explicitly invalid stamp
    pub fn invalid() -> Self {
        Self {
            time: utc(1, 1, 1, 0, 0, 0, 0),
            uniquifier: 0,
            kind: StampKind::Invalid,
        }
    }

    /// Build a stamp strictly greater than `last_one`
    pub fn after(last_one: Timestamp, time: DateTime<Utc>) -> Self {
        Self::next(last_one, time, true)
    }

    /// Build a stamp from `last_one` and a candidate time.
    ///
    /// With `ensure_greater` the result is strictly greater than `last_one`;
    /// otherwise it is only guaranteed to differ from it.
    pub fn next(last_one: Timestamp, time: DateTime<Utc>, ensure_greater: bool) -> Self {
        let time = truncate_to_tick(time);
        let collides = if ensure_greater {
            time <= last_one.time
        } else {
            time == last_one.time
        };
        if !collides {
            return Self::new(time, 0);
        }
        if last_one.uniquifier == u8::MAX {
            Self::new(last_one.time + Duration::nanoseconds(TICK_NANOS), 1)
        } else {
            Self::new(last_one.time, last_one.uniquifier + 1)
        }
    }

    /// UTC time of this stamp
    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    /// Uniquifier byte
    pub fn uniquifier(&self) -> u8 {
        self.uniquifier
    }

    /// False for the `unknown()` sentinel
    pub fn is_known(&self) -> bool {
        self.kind != StampKind::Unknown
    }

    /// True for the `invalid()` sentinel
    pub fn is_invalid(&self) -> bool {
        self.kind == StampKind::Invalid
    }

    /// Nanoseconds since the Unix epoch, saturating outside the i64 range
    pub fn unix_nanos(&self) -> i64 {
        self.time.timestamp_nanos_opt().unwrap_or(if self.time.timestamp() < 0 {
            i64::MIN
        } else {
            i64::MAX
        })
    }

    /// Match a stamp at the start of `s`.
    ///
    /// Returns the stamp and the remaining text. An optional `(n)` uniquifier
    /// suffix is consumed when present and valid.
    pub fn parse_prefix(s: &str) -> Option<(Timestamp, &str)> {
        let seconds = s.get(..SECONDS_TEXT_LEN)?;
        let fraction = s.get(SECONDS_TEXT_LEN..TIME_TEXT_LEN)?;
        let digits = fraction.strip_prefix('.')?;
        if digits.len() != 7 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let ticks: u32 = digits.parse().ok()?;
        let naive = NaiveDateTime::parse_from_str(seconds, SECONDS_FORMAT)
            .ok()?
            .with_nanosecond(ticks * TICK_NANOS as u32)?;
        let time = Utc.from_utc_datetime(&naive);

        let mut rest = &s[TIME_TEXT_LEN..];
        let mut uniquifier = 0;
        if let Some(open) = rest.strip_prefix('(') {
            if let Some(close) = open.find(')') {
                if let Ok(u) = open[..close].parse::<u8>() {
                    uniquifier = u;
                    rest = &open[close + 1..];
                }
            }
        }
        Some((Timestamp::new(time, uniquifier), rest))
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::unknown()
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then(self.uniquifier.cmp(&other.uniquifier))
            .then(self.kind.cmp(&other.kind))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ticks = (self.time.nanosecond() / TICK_NANOS as u32).min(9_999_999);
        write!(f, "{}.{:07}", self.time.format(SECONDS_FORMAT), ticks)?;
        if self.uniquifier != 0 {
            write!(f, "({})", self.uniquifier)?;
        }
        Ok(())
    }
}

impl FromStr for Timestamp {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Timestamp::parse_prefix(s) {
            Some((stamp, "")) => Ok(stamp),
            _ => Err(ParseError::InvalidTimestamp(s.to_string())),
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
