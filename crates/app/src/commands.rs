use anyhow::Context;
use chrono::NaiveDateTime;
use metron_core::{Aggregator, BoundPolicy, Period, PeriodSummary, RangeFilter, Reading, RolloverPolicy};
use metron_ocr::{OcrBackend, ReadingExtractor};
use metron_storage::CsvReadingLog;
use rust_decimal::Decimal;
use std::path::Path;

use crate::config::SiteConfig;

/// Options of `metron summary` as typed on the command line.
#[derive(Debug, Clone, Default)]
pub struct SummaryArgs {
    pub period: String,
    pub start: Option<String>,
    pub end: Option<String>,
    pub strict_bounds: bool,
    pub rollover_at: Option<Decimal>,
}

impl SummaryArgs {
    pub fn aggregator(&self) -> anyhow::Result<Aggregator> {
        let period: Period = self.period.parse()?;
        let policy = if self.strict_bounds { BoundPolicy::Strict } else { BoundPolicy::Lenient };
        let rollover = self.rollover_at.map_or(RolloverPolicy::None, RolloverPolicy::WrapAt);
        Ok(Aggregator::new(period)
            .with_range(RangeFilter::parse(self.start.as_deref(), self.end.as_deref()))
            .with_bound_policy(policy)
            .with_rollover(rollover))
    }
}

/// Read the meter in `image`, stamp it with `now` and the site location, and
/// append it to the log.
pub fn ingest<R: OcrBackend>(
    extractor: &ReadingExtractor<R>,
    log: &CsvReadingLog,
    site: &SiteConfig,
    image: &Path,
    now: NaiveDateTime,
) -> anyhow::Result<Reading> {
    let value = extractor
        .extract_file(image)
        .with_context(|| format!("Failed to read meter from {}", image.display()))?;
    let reading = Reading::new(now, value, site.latitude, site.longitude);
    log.append(&reading)
        .with_context(|| format!("Failed to append to {}", log.path().display()))?;
    tracing::info!(value = %reading.value, timestamp = %reading.timestamp, "reading recorded");
    Ok(reading)
}

pub fn summary(log: &CsvReadingLog, args: &SummaryArgs) -> anyhow::Result<Vec<PeriodSummary>> {
    let aggregator = args.aggregator()?;
    let readings = log
        .load()
        .with_context(|| format!("Failed to load {}", log.path().display()))?;
    Ok(aggregator.run(&readings)?)
}

pub fn render_reading(reading: &Reading, json: bool) -> anyhow::Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(reading)?);
    }
    Ok(format!(
        "{}  {}  ({}, {})",
        reading.timestamp.format("%Y-%m-%d %H:%M:%S"),
        reading.value,
        reading.latitude,
        reading.longitude
    ))
}

pub fn render_summary(rows: &[PeriodSummary], json: bool) -> anyhow::Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(rows)?);
    }
    if rows.is_empty() {
        return Ok("No periods with at least two readings.".to_string());
    }
    let mut out = format!("{:<12}{:<12}{:>14}{:>14}{:>14}", "start", "end", "first", "last", "consumption");
    for row in rows {
        out.push('\n');
        out.push_str(&format!(
            "{:<12}{:<12}{:>14}{:>14}{:>14}",
            row.period_start.date().to_string(),
            row.period_end.to_string(),
            row.first.to_string(),
            row.last.to_string(),
            row.consumption.to_string()
        ));
    }
    Ok(out)
}
