use metron_core::{parse_instant, Reading};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const LOG_HEADER: [&str; 4] = ["timestamp", "reading", "latitude", "longitude"];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Invalid timestamp on line {line}: {value}")]
    InvalidTimestamp { line: u64, value: String },
    #[error("Invalid reading on line {line}: {value}")]
    InvalidReading { line: u64, value: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct LogRow {
    timestamp: String,
    reading: String,
    latitude: f64,
    longitude: f64,
}

impl From<&Reading> for LogRow {
    fn from(r: &Reading) -> Self {
        LogRow {
            timestamp: r.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            reading: r.value.to_string(),
            latitude: r.latitude,
            longitude: r.longitude,
        }
    }
}

/// Append-only CSV file of readings with a
/// `timestamp,reading,latitude,longitude` header.
///
/// Rows are kept in insertion order, which need not be chronological.
#[derive(Debug, Clone)]
pub struct CsvReadingLog {
    path: PathBuf,
}

impl CsvReadingLog {
    /// Open the log at `path`, creating it (and its parent directory) with a
    /// header row when it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let mut wtr = csv::Writer::from_path(&path)?;
            wtr.write_record(LOG_HEADER)?;
            wtr.flush()?;
            tracing::info!(path = %path.display(), "created reading log");
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, reading: &Reading) -> Result<(), StorageError> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        wtr.serialize(LogRow::from(reading))?;
        wtr.flush()?;
        Ok(())
    }

    /// Every reading in file order. A log that was never created is empty.
    pub fn load(&self) -> Result<Vec<Reading>, StorageError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)?;

        let headers = rdr.headers()?.clone();
        let mut record = csv::StringRecord::new();
        let mut readings = Vec::new();
        while rdr.read_record(&mut record)? {
            let line = record.position().map_or(0, |p| p.line());
            let row: LogRow = record.deserialize(Some(&headers))?;
            let timestamp = parse_instant(&row.timestamp).ok_or_else(|| {
                StorageError::InvalidTimestamp { line, value: row.timestamp.clone() }
            })?;
            let value = Decimal::from_str(&row.reading)
                .map_err(|_| StorageError::InvalidReading { line, value: row.reading.clone() })?;
            readings.push(Reading::new(timestamp, value, row.latitude, row.longitude));
        }

        tracing::debug!(path = %self.path.display(), count = readings.len(), "loaded reading log");
        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use metron_core::aggregate;

    fn at(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn reading(d: u32, h: u32, value: Decimal) -> Reading {
        Reading::new(at(d, h), value, 12.971599, 77.594566)
    }

    #[test]
    fn open_creates_file_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("readings.csv");
        CsvReadingLog::open(&path).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "timestamp,reading,latitude,longitude\n");
    }

    #[test]
    fn open_existing_file_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.csv");
        let log = CsvReadingLog::open(&path).unwrap();
        log.append(&reading(1, 8, Decimal::new(1025, 1))).unwrap();

        let reopened = CsvReadingLog::open(&path).unwrap();
        assert_eq!(reopened.load().unwrap().len(), 1);
    }

    #[test]
    fn append_then_load_preserves_values_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = CsvReadingLog::open(dir.path().join("readings.csv")).unwrap();
        let later = reading(2, 9, Decimal::new(15050, 2));
        let earlier = reading(1, 9, Decimal::new(1000, 1));
        log.append(&later).unwrap();
        log.append(&earlier).unwrap();

        let loaded = log.load().unwrap();
        assert_eq!(loaded, vec![later, earlier]);
    }

    #[test]
    fn appended_row_format() {
        let dir = tempfile::tempdir().unwrap();
        let log = CsvReadingLog::open(dir.path().join("readings.csv")).unwrap();
        log.append(&reading(5, 14, Decimal::new(1025, 1))).unwrap();
        let contents = fs::read_to_string(log.path()).unwrap();
        assert_eq!(
            contents.lines().nth(1).unwrap(),
            "2024-01-05T14:00:00,102.5,12.971599,77.594566"
        );
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = CsvReadingLog { path: dir.path().join("absent.csv") };
        assert!(log.load().unwrap().is_empty());
    }

    #[test]
    fn load_accepts_fractional_and_space_separated_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.csv");
        fs::write(
            &path,
            "timestamp,reading,latitude,longitude\n\
             2024-01-05T10:15:30.123456,102.5,13.0,77.6\n\
             2024-01-05 18:00:00,110,13.0,77.6\n",
        )
        .unwrap();
        let loaded = CsvReadingLog::open(&path).unwrap().load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].timestamp, at(5, 18));
        assert_eq!(loaded[1].value, Decimal::from(110));
    }

    #[test]
    fn load_reports_bad_timestamp_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.csv");
        fs::write(
            &path,
            "timestamp,reading,latitude,longitude\n\
             2024-01-05T10:00:00,1,0,0\n\
             yesterday,2,0,0\n",
        )
        .unwrap();
        let err = CsvReadingLog::open(&path).unwrap().load().unwrap_err();
        assert!(matches!(err, StorageError::InvalidTimestamp { line: 3, .. }));
    }

    #[test]
    fn error_line_counts_blank_and_multiline_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.csv");
        fs::write(
            &path,
            "timestamp,reading,latitude,longitude\n\
             \n\
             \"2024-01-05T10:00:00\",1,0,0\n\
             \n\
             \"2024-01-05\nT11:00\",2,0,0\n",
        )
        .unwrap();
        let err = CsvReadingLog::open(&path).unwrap().load().unwrap_err();
        assert!(matches!(err, StorageError::InvalidTimestamp { line: 5, .. }));
    }

    #[test]
    fn load_reports_bad_reading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.csv");
        fs::write(&path, "timestamp,reading,latitude,longitude\n2024-01-05,abc,0,0\n").unwrap();
        let err = CsvReadingLog::open(&path).unwrap().load().unwrap_err();
        assert!(matches!(err, StorageError::InvalidReading { line: 2, .. }));
    }

    #[test]
    fn out_of_order_log_aggregates_chronologically() {
        let dir = tempfile::tempdir().unwrap();
        let log = CsvReadingLog::open(dir.path().join("readings.csv")).unwrap();
        log.append(&reading(1, 20, Decimal::from(130))).unwrap();
        log.append(&reading(1, 6, Decimal::from(100))).unwrap();
        log.append(&reading(2, 6, Decimal::from(150))).unwrap();

        let summary = aggregate(&log.load().unwrap(), "daily", None, None).unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].consumption, Decimal::from(30));
    }
}
