use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Layout assumption handed to the OCR engine. Numbering follows Tesseract's
/// `--psm` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSegMode {
    /// A uniform block of text (psm 6).
    Block,
    /// A single text line (psm 7).
    SingleLine,
    /// A single word (psm 8).
    SingleWord,
}

impl PageSegMode {
    /// Order in which modes are attempted by default.
    pub const DEFAULT_ORDER: [PageSegMode; 3] =
        [PageSegMode::SingleLine, PageSegMode::Block, PageSegMode::SingleWord];

    pub fn psm(self) -> u8 {
        match self {
            PageSegMode::Block => 6,
            PageSegMode::SingleLine => 7,
            PageSegMode::SingleWord => 8,
        }
    }
}

impl fmt::Display for PageSegMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageSegMode::Block => write!(f, "block"),
            PageSegMode::SingleLine => write!(f, "single_line"),
            PageSegMode::SingleWord => write!(f, "single_word"),
        }
    }
}

impl std::str::FromStr for PageSegMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "block" | "6" => Ok(PageSegMode::Block),
            "single_line" | "7" => Ok(PageSegMode::SingleLine),
            "single_word" | "8" => Ok(PageSegMode::SingleWord),
            other => Err(format!("Unknown page segmentation mode: '{other}'")),
        }
    }
}

/// One OCR attempt's settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionConfig {
    pub mode: PageSegMode,
    /// Characters the engine may emit.
    pub whitelist: String,
}

impl RecognitionConfig {
    pub fn new(mode: PageSegMode, whitelist: impl Into<String>) -> Self {
        Self { mode, whitelist: whitelist.into() }
    }
}

impl fmt::Display for RecognitionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "--psm {} -c tessedit_char_whitelist={}", self.mode.psm(), self.whitelist)
    }
}

/// What a backend returns for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    /// Engine-reported confidence (0.0–1.0), when the backend exposes one.
    pub confidence: Option<f32>,
}

impl Recognition {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), confidence: None }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }
}

/// Text recognized under one configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrCandidate {
    pub text: String,
    /// Rendered [`RecognitionConfig`] that produced this text.
    pub config: String,
    pub confidence: Option<f32>,
}

impl OcrCandidate {
    pub fn new(recognition: Recognition, config: &RecognitionConfig) -> Self {
        Self {
            text: recognition.text,
            config: config.to_string(),
            confidence: recognition.confidence,
        }
    }

    /// Character count once surrounding whitespace is removed.
    pub fn trimmed_len(&self) -> usize {
        self.text.trim().chars().count()
    }
}

/// How the winning candidate is chosen among successful attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Longest trimmed text wins; ties go to the earliest attempt.
    #[default]
    LongestText,
    /// Highest engine confidence wins. Falls back to `LongestText` unless every
    /// candidate carries a confidence.
    HighestConfidence,
}

/// A reading together with how it was obtained.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractedReading {
    pub value: Decimal,
    /// Text after OCR-confusion normalization.
    pub normalized: String,
    pub selected: OcrCandidate,
    /// Every attempt that produced text, in attempt order.
    pub candidates: Vec<OcrCandidate>,
    /// True when no decimal number was found and digits were reassembled.
    pub used_fallback: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn recognition_clamps_confidence() {
        assert_eq!(Recognition::new("1").with_confidence(1.5).confidence, Some(1.0));
        assert_eq!(Recognition::new("1").with_confidence(-0.1).confidence, Some(0.0));
    }

    #[test]
    fn page_seg_mode_psm_numbers() {
        assert_eq!(PageSegMode::SingleLine.psm(), 7);
        assert_eq!(PageSegMode::Block.psm(), 6);
        assert_eq!(PageSegMode::SingleWord.psm(), 8);
    }

    #[test]
    fn page_seg_mode_roundtrip() {
        for mode in PageSegMode::DEFAULT_ORDER {
            assert_eq!(PageSegMode::from_str(&mode.to_string()).unwrap(), mode);
        }
        assert_eq!(PageSegMode::from_str("7").unwrap(), PageSegMode::SingleLine);
        assert!(PageSegMode::from_str("sparse").is_err());
    }

    #[test]
    fn recognition_config_renders_tesseract_flags() {
        let cfg = RecognitionConfig::new(PageSegMode::SingleLine, "0123456789.");
        assert_eq!(cfg.to_string(), "--psm 7 -c tessedit_char_whitelist=0123456789.");
    }

    #[test]
    fn candidate_trimmed_len_ignores_whitespace() {
        let cfg = RecognitionConfig::new(PageSegMode::Block, "0123456789.");
        let c = OcrCandidate::new(Recognition::new("  102.5 \n"), &cfg);
        assert_eq!(c.trimmed_len(), 5);
        assert_eq!(c.config, "--psm 6 -c tessedit_char_whitelist=0123456789.");
    }
}
