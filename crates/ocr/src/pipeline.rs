use image::DynamicImage;
use rust_decimal::Decimal;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ExtractorConfig;
use crate::extract::{self, ParseError};
use crate::preprocess::{self, PreprocessError};
use crate::recognizer::OcrBackend;
use crate::types::{ExtractedReading, OcrCandidate};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Could not read image: {0}")]
    ImageDecode(#[from] image::ImageError),
    #[error("No OCR text extracted")]
    NoTextExtracted,
    #[error("No numerical reading found")]
    NoNumericReading,
    #[error("Reading '{0}' does not fit in a decimal")]
    Unrepresentable(String),
    #[error("Failed to encode processed image: {0}")]
    Encode(String),
}

impl From<PreprocessError> for ExtractError {
    fn from(e: PreprocessError) -> Self {
        match e {
            PreprocessError::Load(e) => ExtractError::ImageDecode(e),
            PreprocessError::Encode(msg) => ExtractError::Encode(msg),
        }
    }
}

impl From<ParseError> for ExtractError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::NoNumericReading => ExtractError::NoNumericReading,
            ParseError::Unrepresentable(s) => ExtractError::Unrepresentable(s),
        }
    }
}

/// Turns a meter photo into a decimal reading:
/// preprocess → OCR under each configured mode → pick a candidate → normalize → parse.
///
/// Holds no mutable state, so one extractor can serve concurrent callers.
pub struct ReadingExtractor<R: OcrBackend> {
    recognizer: R,
    config: ExtractorConfig,
}

impl<R: OcrBackend> ReadingExtractor<R> {
    pub fn new(recognizer: R, config: ExtractorConfig) -> Self {
        Self { recognizer, config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Extract a reading from an image file.
    pub fn extract_file(&self, path: &Path) -> Result<Decimal, ExtractError> {
        Ok(self.extract_detailed(&preprocess::load(path)?)?.value)
    }

    /// Extract a reading from encoded image bytes (JPEG / PNG / …).
    pub fn extract_bytes(&self, data: &[u8]) -> Result<Decimal, ExtractError> {
        Ok(self.extract_detailed(&preprocess::decode(data)?)?.value)
    }

    /// Extract a reading from an already decoded image.
    pub fn extract(&self, image: &DynamicImage) -> Result<Decimal, ExtractError> {
        Ok(self.extract_detailed(image)?.value)
    }

    pub fn extract_detailed(&self, image: &DynamicImage) -> Result<ExtractedReading, ExtractError> {
        let processed = preprocess::preprocess(image, &self.config.preprocess);
        let png = preprocess::encode_as_png(&processed)?;
        self.read_candidates(self.recognize_all(&png))
    }

    /// Run every configured recognition attempt. Failed attempts are logged
    /// and left out.
    pub fn recognize_all(&self, image_bytes: &[u8]) -> Vec<OcrCandidate> {
        self.config
            .recognition_configs()
            .filter_map(|cfg| match self.recognizer.recognize(image_bytes, &cfg) {
                Ok(recognition) => {
                    debug!(mode = %cfg.mode, text = %recognition.text.trim(), "OCR attempt succeeded");
                    Some(OcrCandidate::new(recognition, &cfg))
                }
                Err(e) => {
                    warn!(mode = %cfg.mode, error = %e, "OCR attempt failed, skipping");
                    None
                }
            })
            .collect()
    }

    /// Select, normalize and parse. Blank winning text counts as no text.
    pub fn read_candidates(&self, candidates: Vec<OcrCandidate>) -> Result<ExtractedReading, ExtractError> {
        let selected = extract::select_candidate(&candidates, self.config.selection)
            .filter(|c| !c.text.trim().is_empty())
            .cloned()
            .ok_or(ExtractError::NoTextExtracted)?;

        let normalized = extract::normalize(&selected.text);
        let parsed = extract::parse_reading(&normalized)?;
        debug!(
            value = %parsed.value,
            config = %selected.config,
            fallback = parsed.used_fallback,
            "parsed meter reading"
        );

        Ok(ExtractedReading {
            value: parsed.value,
            normalized,
            selected,
            candidates,
            used_fallback: parsed.used_fallback,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
