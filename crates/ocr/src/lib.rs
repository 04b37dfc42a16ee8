pub mod config;
pub mod extract;
pub mod pipeline;
pub mod preprocess;
pub mod recognizer;
pub mod types;

pub use config::{ExtractorConfig, PreprocessConfig, TesseractConfig, DIGIT_WHITELIST};
pub use extract::{normalize, parse_digits_fallback, parse_reading, select_candidate, ParseError};
pub use pipeline::{ExtractError, ReadingExtractor};
pub use preprocess::{prepare_for_ocr, prepare_for_ocr_from_bytes, PreprocessError};
pub use recognizer::{MockRecognizer, OcrBackend, OcrError, ScriptedRecognizer, TesseractCli};
pub use types::{
    ExtractedReading, OcrCandidate, PageSegMode, Recognition, RecognitionConfig, SelectionStrategy,
};
