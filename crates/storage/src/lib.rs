pub mod reading_log;

pub use reading_log::{CsvReadingLog, StorageError, LOG_HEADER};
