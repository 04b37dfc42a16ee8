use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One timestamped meter value and the location it was captured at.
///
/// Timestamps are wall-clock calendar times as recorded by the capturing
/// device; calendar bucketing happens in that same local frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: NaiveDateTime,
    pub value: Decimal,
    pub latitude: f64,
    pub longitude: f64,
}

impl Reading {
    pub fn new(timestamp: NaiveDateTime, value: Decimal, latitude: f64, longitude: f64) -> Self {
        Reading { timestamp, value, latitude, longitude }
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }
}
