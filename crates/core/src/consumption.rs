use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::period::{BoundPolicy, BoundSide, InstantRange, Period, RangeFilter};
use super::reading::Reading;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("Invalid period '{0}'. Use 'daily', 'weekly', or 'monthly'")]
    InvalidPeriod(String),
    #[error("Invalid {side} bound: '{text}'")]
    InvalidBound { side: BoundSide, text: String },
}

/// How a negative within-period delta is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloverPolicy {
    /// Report `last - first` as-is, negative or not.
    #[default]
    None,
    /// The register wraps to zero after reaching this value, so a negative
    /// delta has this value added back.
    WrapAt(Decimal),
}

impl RolloverPolicy {
    pub fn consumption(self, first: Decimal, last: Decimal) -> Decimal {
        let delta = last - first;
        match self {
            RolloverPolicy::WrapAt(modulus) if delta < Decimal::ZERO => delta + modulus,
            _ => delta,
        }
    }
}

/// Consumption over one calendar bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodSummary {
    /// Midnight on the first day of the bucket.
    pub period_start: NaiveDateTime,
    /// Last calendar day of the bucket (the Sunday of a week, the final day of a month).
    pub period_end: NaiveDate,
    pub first: Decimal,
    pub last: Decimal,
    pub consumption: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregator {
    pub period: Period,
    pub range: RangeFilter,
    pub bound_policy: BoundPolicy,
    pub rollover: RolloverPolicy,
}

impl Aggregator {
    pub fn new(period: Period) -> Self {
        Aggregator {
            period,
            range: RangeFilter::unbounded(),
            bound_policy: BoundPolicy::default(),
            rollover: RolloverPolicy::default(),
        }
    }

    pub fn with_range(mut self, range: RangeFilter) -> Self {
        self.range = range;
        self
    }

    pub fn with_bound_policy(mut self, policy: BoundPolicy) -> Self {
        self.bound_policy = policy;
        self
    }

    pub fn with_rollover(mut self, rollover: RolloverPolicy) -> Self {
        self.rollover = rollover;
        self
    }

    /// Bucket `log` into periods and report consumption for every bucket
    /// holding at least two readings, ordered by bucket start.
    pub fn run(&self, log: &[Reading]) -> Result<Vec<PeriodSummary>, AggregateError> {
        if log.is_empty() {
            return Ok(Vec::new());
        }
        let range = self.range.resolve(self.bound_policy)?;
        let readings = select(log, range);
        Ok(summarize(&readings, self.period, self.rollover))
    }
}

/// String-driven entry point: `period` is `daily`, `weekly` or `monthly`;
/// `start`/`end` are optional date or timestamp strings, and ones that fail to
/// parse are treated as absent.
///
/// The period selector is only checked once there is something to bucket, so
/// an empty log (or one emptied by the range) never fails.
pub fn aggregate(
    log: &[Reading],
    period: &str,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<Vec<PeriodSummary>, AggregateError> {
    if log.is_empty() {
        return Ok(Vec::new());
    }
    let range = RangeFilter::parse(start, end).resolve(BoundPolicy::Lenient)?;
    let readings = select(log, range);
    if readings.is_empty() {
        debug!(%range, "no readings left after range filter");
        return Ok(Vec::new());
    }
    let period: Period = period.parse()?;
    Ok(summarize(&readings, period, RolloverPolicy::None))
}

/// Chronologically ordered readings inside `range`. Readings sharing a
/// timestamp keep their log order.
fn select(log: &[Reading], range: InstantRange) -> Vec<&Reading> {
    let mut sorted: Vec<&Reading> = log.iter().collect();
    sorted.sort_by_key(|r| r.timestamp);
    sorted.retain(|r| range.contains(r.timestamp));
    sorted
}

struct Bucket {
    start: NaiveDate,
    first: Decimal,
    last: Decimal,
    count: usize,
}

fn summarize(readings: &[&Reading], period: Period, rollover: RolloverPolicy) -> Vec<PeriodSummary> {
    let mut buckets: Vec<Bucket> = Vec::new();

    // Input is sorted, so each bucket's readings are contiguous.
    for r in readings {
        let start = period.bucket_start(r.date());
        match buckets.last_mut() {
            Some(b) if b.start == start => {
                b.last = r.value;
                b.count += 1;
            }
            _ => buckets.push(Bucket { start, first: r.value, last: r.value, count: 1 }),
        }
    }

    debug!(%period, readings = readings.len(), buckets = buckets.len(), "bucketed readings");

    buckets
        .into_iter()
        .filter(|b| b.count >= 2)
        .map(|b| PeriodSummary {
            period_start: b.start.and_time(NaiveTime::MIN),
            period_end: period.bucket_end(b.start),
            first: b.first,
            last: b.last,
            consumption: rollover.consumption(b.first, b.last),
        })
        .collect()
}
