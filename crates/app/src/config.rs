use metron_ocr::{ExtractorConfig, TesseractConfig};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "METRON_CONFIG";
pub const TESSERACT_ENV: &str = "TESSERACT_CMD";
const DEFAULT_CONFIG_PATH: &str = "metron.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub path: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("data/readings.csv") }
    }
}

/// Where the meter is installed. Stamped onto every ingested reading.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log: LogConfig,
    pub site: SiteConfig,
    pub ocr: ExtractorConfig,
    pub tesseract: TesseractConfig,
}

impl AppConfig {
    /// Read the file named by `METRON_CONFIG` (default `metron.toml`), then
    /// apply `TESSERACT_CMD`.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => env::var_os(CONFIG_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
        };
        let cfg = Self::load_from(&path)?;
        Ok(cfg.with_tesseract_override(env::var_os(TESSERACT_ENV).map(PathBuf::from)))
    }

    /// A missing file yields the defaults; an unreadable or malformed one is an error.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        let cfg: AppConfig = toml::from_str(&contents)?;
        Ok(cfg)
    }

    pub fn with_tesseract_override(mut self, command: Option<PathBuf>) -> Self {
        if let Some(cmd) = command.filter(|c| !c.as_os_str().is_empty()) {
            self.tesseract.command = cmd;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metron_ocr::{PageSegMode, SelectionStrategy};

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::load_from(&dir.path().join("metron.toml")).unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.log.path, PathBuf::from("data/readings.csv"));
        assert_eq!(cfg.tesseract.command, PathBuf::from("tesseract"));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metron.toml");
        fs::write(
            &path,
            r#"
[site]
latitude = 12.9716
longitude = 77.5946

[ocr]
page_seg_modes = ["block", "single_line"]
selection = "highest_confidence"

[ocr.preprocess]
threshold_block_size = 41

[tesseract]
lang = "digits"
timeout_secs = 20
"#,
        )
        .unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.site.latitude, 12.9716);
        assert_eq!(cfg.log, LogConfig::default());
        assert_eq!(cfg.ocr.page_seg_modes, vec![PageSegMode::Block, PageSegMode::SingleLine]);
        assert_eq!(cfg.ocr.selection, SelectionStrategy::HighestConfidence);
        assert_eq!(cfg.ocr.preprocess.threshold_block_size, 41);
        assert_eq!(cfg.ocr.preprocess.median_kernel, 3);
        assert_eq!(cfg.tesseract.lang, "digits");
        assert_eq!(cfg.tesseract.command, PathBuf::from("tesseract"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metron.toml");
        fs::write(&path, "[site]\nlatitude = \"north\"\n").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    #[test]
    fn tesseract_override_replaces_command() {
        let cfg = AppConfig::default()
            .with_tesseract_override(Some(PathBuf::from("/usr/local/bin/tesseract")));
        assert_eq!(cfg.tesseract.command, PathBuf::from("/usr/local/bin/tesseract"));

        let unchanged = AppConfig::default().with_tesseract_override(Some(PathBuf::new()));
        assert_eq!(unchanged.tesseract.command, PathBuf::from("tesseract"));
    }
}
