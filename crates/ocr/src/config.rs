use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::types::{PageSegMode, RecognitionConfig, SelectionStrategy};

pub const DIGIT_WHITELIST: &str = "0123456789.";

/// Image cleanup parameters. Defaults suit small backlit LCD meter faces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Longer edge above which the photo is downscaled first.
    pub max_edge: u32,
    /// Tiles per axis for adaptive histogram equalization.
    pub clahe_tiles: u32,
    pub clahe_clip_limit: f32,
    /// Odd window size of the Gaussian-weighted local threshold.
    pub threshold_block_size: u32,
    /// Subtracted from the local mean before comparing.
    pub threshold_offset: f32,
    pub median_kernel: u32,
    pub dilate_kernel: u32,
    pub dilate_iterations: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            max_edge: 2800,
            clahe_tiles: 8,
            clahe_clip_limit: 2.0,
            threshold_block_size: 31,
            threshold_offset: 10.0,
            median_kernel: 3,
            dilate_kernel: 2,
            dilate_iterations: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub whitelist: String,
    /// Attempted in order; an empty list means no attempt can succeed.
    pub page_seg_modes: Vec<PageSegMode>,
    pub selection: SelectionStrategy,
    pub preprocess: PreprocessConfig,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            whitelist: DIGIT_WHITELIST.to_string(),
            page_seg_modes: PageSegMode::DEFAULT_ORDER.to_vec(),
            selection: SelectionStrategy::default(),
            preprocess: PreprocessConfig::default(),
        }
    }
}

impl ExtractorConfig {
    pub fn recognition_configs(&self) -> impl Iterator<Item = RecognitionConfig> + '_ {
        self.page_seg_modes
            .iter()
            .map(|mode| RecognitionConfig::new(*mode, self.whitelist.as_str()))
    }
}

/// How to invoke the `tesseract` executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseractConfig {
    pub command: PathBuf,
    pub tessdata_dir: Option<PathBuf>,
    pub lang: String,
    /// Per-attempt limit; an attempt that runs over counts as failed.
    pub timeout_secs: Option<u64>,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            command: PathBuf::from("tesseract"),
            tessdata_dir: None,
            lang: "eng".to_string(),
            timeout_secs: None,
        }
    }
}

impl TesseractConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_attempts_line_block_word_with_digit_whitelist() {
        let cfgs: Vec<_> = ExtractorConfig::default().recognition_configs().collect();
        let modes: Vec<_> = cfgs.iter().map(|c| c.mode).collect();
        assert_eq!(
            modes,
            vec![PageSegMode::SingleLine, PageSegMode::Block, PageSegMode::SingleWord]
        );
        assert!(cfgs.iter().all(|c| c.whitelist == "0123456789."));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: ExtractorConfig =
            serde_json::from_str(r#"{"page_seg_modes": ["single_word"], "preprocess": {"median_kernel": 5}}"#)
                .unwrap();
        assert_eq!(cfg.page_seg_modes, vec![PageSegMode::SingleWord]);
        assert_eq!(cfg.preprocess.median_kernel, 5);
        assert_eq!(cfg.preprocess.threshold_block_size, 31);
        assert_eq!(cfg.whitelist, DIGIT_WHITELIST);
    }

    #[test]
    fn tesseract_timeout_is_optional() {
        assert_eq!(TesseractConfig::default().timeout(), None);
        let cfg = TesseractConfig { timeout_secs: Some(3), ..TesseractConfig::default() };
        assert_eq!(cfg.timeout(), Some(Duration::from_secs(3)));
    }
}
