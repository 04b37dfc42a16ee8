use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::consumption::AggregateError;

/// Calendar bucket used to group readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Daily,
    /// Monday through Sunday; buckets close on Sunday.
    Weekly,
    Monthly,
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Daily => write!(f, "daily"),
            Period::Weekly => write!(f, "weekly"),
            Period::Monthly => write!(f, "monthly"),
        }
    }
}

impl FromStr for Period {
    type Err = AggregateError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Period::Daily),
            "weekly" => Ok(Period::Weekly),
            "monthly" => Ok(Period::Monthly),
            other => Err(AggregateError::InvalidPeriod(other.to_string())),
        }
    }
}

impl Period {
    /// First calendar day of the bucket containing `date`.
    pub fn bucket_start(self, date: NaiveDate) -> NaiveDate {
        match self {
            Period::Daily => date,
            Period::Weekly => {
                date - Days::new(u64::from(date.weekday().num_days_from_monday()))
            }
            Period::Monthly => date - Days::new(u64::from(date.day0())),
        }
    }

    /// Last calendar day (inclusive) of the bucket starting at `start`.
    pub fn bucket_end(self, start: NaiveDate) -> NaiveDate {
        match self {
            Period::Daily => start,
            Period::Weekly => start + Days::new(6),
            Period::Monthly => start + Months::new(1) - Days::new(1),
        }
    }
}

/// Which side of a range a bound constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundSide {
    Start,
    End,
}

impl fmt::Display for BoundSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundSide::Start => write!(f, "start"),
            BoundSide::End => write!(f, "end"),
        }
    }
}

/// A range bound as supplied by the caller. Unparsable text is kept rather
/// than discarded so the caller's [`BoundPolicy`] decides what happens to it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Bound {
    #[default]
    Unbounded,
    Valid(NaiveDateTime),
    Invalid(String),
}

impl Bound {
    /// Absent or blank text is `Unbounded`; text [`parse_instant`] rejects is
    /// kept as `Invalid`.
    pub fn parse(text: Option<&str>) -> Self {
        match text {
            None => Bound::Unbounded,
            Some(s) if s.trim().is_empty() => Bound::Unbounded,
            Some(s) => match parse_instant(s) {
                Some(ts) => Bound::Valid(ts),
                None => Bound::Invalid(s.to_string()),
            },
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Bound::Invalid(_))
    }
}

impl From<NaiveDateTime> for Bound {
    fn from(ts: NaiveDateTime) -> Self {
        Bound::Valid(ts)
    }
}

impl From<NaiveDate> for Bound {
    fn from(date: NaiveDate) -> Self {
        Bound::Valid(date.and_time(NaiveTime::MIN))
    }
}

/// What to do with a [`Bound::Invalid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundPolicy {
    /// Treat as unbounded (logged at warn level).
    #[default]
    Lenient,
    /// Fail the aggregation with [`AggregateError::InvalidBound`].
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RangeFilter {
    pub start: Bound,
    pub end: Bound,
}

impl RangeFilter {
    pub fn new(start: Bound, end: Bound) -> Self {
        RangeFilter { start, end }
    }

    pub fn unbounded() -> Self {
        RangeFilter::default()
    }

    pub fn parse(start: Option<&str>, end: Option<&str>) -> Self {
        RangeFilter { start: Bound::parse(start), end: Bound::parse(end) }
    }

    pub fn resolve(&self, policy: BoundPolicy) -> Result<InstantRange, AggregateError> {
        Ok(InstantRange {
            start: resolve_bound(&self.start, BoundSide::Start, policy)?,
            end: resolve_bound(&self.end, BoundSide::End, policy)?,
        })
    }
}

fn resolve_bound(
    bound: &Bound,
    side: BoundSide,
    policy: BoundPolicy,
) -> Result<Option<NaiveDateTime>, AggregateError> {
    match (bound, policy) {
        (Bound::Unbounded, _) => Ok(None),
        (Bound::Valid(ts), _) => Ok(Some(*ts)),
        (Bound::Invalid(text), BoundPolicy::Lenient) => {
            tracing::warn!(%side, bound = %text, "ignoring unparsable range bound");
            Ok(None)
        }
        (Bound::Invalid(text), BoundPolicy::Strict) => {
            Err(AggregateError::InvalidBound { side, text: text.clone() })
        }
    }
}

/// Inclusive instant range; `None` on either side means open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstantRange {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl fmt::Display for InstantRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.start, self.end) {
            (Some(s), Some(e)) => write!(f, "{s} to {e}"),
            (Some(s), None) => write!(f, "from {s}"),
            (None, Some(e)) => write!(f, "until {e}"),
            (None, None) => write!(f, "all time"),
        }
    }
}

impl InstantRange {
    pub fn contains(self, ts: NaiveDateTime) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts <= e)
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%B %d %Y",
    "%B %d, %Y",
    "%d %B %Y",
];

/// Parse a calendar date or timestamp:
///
/// - RFC 3339 (`2024-01-05T14:30:00+05:30`), keeping the wall-clock time and
///   dropping the offset
/// - ISO dates and date-times with `T` or a space, optional seconds and fraction
/// - `2024/01/05`, compact `20240105`
/// - month-first `01/05/2024`, optionally followed by `HH:MM[:SS]`
/// - month names: `Jan 5 2024`, `January 5, 2024`, `5 Jan 2024`
///
/// Bare dates resolve to midnight.
pub fn parse_instant(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ts);
        }
    }

    parse_date(s).map(|date| date.and_time(NaiveTime::MIN))
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    if s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit()) {
        let iso = format!("{}-{}-{}", &s[..4], &s[4..6], &s[6..]);
        return NaiveDate::parse_from_str(&iso, "%Y-%m-%d").ok();
    }
    DATE_FORMATS.iter().find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}
