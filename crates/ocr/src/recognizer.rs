use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::TesseractConfig;
use crate::types::{PageSegMode, Recognition, RecognitionConfig};

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Image decode error: {0}")]
    ImageDecode(String),
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("OCR engine timed out after {0:?}")]
    Timeout(Duration),
    #[error("OCR engine not available: {0}")]
    NotAvailable(String),
}

/// Abstraction over an OCR backend.
/// Implementations accept PNG image bytes and return the recognized text for
/// one page-segmentation/whitelist combination.
pub trait OcrBackend: Send + Sync {
    fn recognize(&self, image_bytes: &[u8], config: &RecognitionConfig) -> Result<Recognition, OcrError>;
}

impl<B: OcrBackend + ?Sized> OcrBackend for Box<B> {
    fn recognize(&self, image_bytes: &[u8], config: &RecognitionConfig) -> Result<Recognition, OcrError> {
        (**self).recognize(image_bytes, config)
    }
}

// ── Mock backends (always available, used for tests) ─────────────────────────

/// Returns the same pre-set string for every attempt.
pub struct MockRecognizer {
    pub text: String,
}

impl MockRecognizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl OcrBackend for MockRecognizer {
    fn recognize(&self, _image_bytes: &[u8], _config: &RecognitionConfig) -> Result<Recognition, OcrError> {
        Ok(Recognition::new(self.text.clone()))
    }
}

/// Answers per page-segmentation mode and records the order it was asked in.
/// Modes with no scripted answer fail with an engine error.
#[derive(Default)]
pub struct ScriptedRecognizer {
    answers: Vec<(PageSegMode, Result<Recognition, String>)>,
    calls: Mutex<Vec<PageSegMode>>,
}

impl ScriptedRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, mode: PageSegMode, text: impl Into<String>) -> Self {
        self.answers.push((mode, Ok(Recognition::new(text))));
        self
    }

    pub fn with_recognition(mut self, mode: PageSegMode, recognition: Recognition) -> Self {
        self.answers.push((mode, Ok(recognition)));
        self
    }

    pub fn with_failure(mut self, mode: PageSegMode, message: impl Into<String>) -> Self {
        self.answers.push((mode, Err(message.into())));
        self
    }

    pub fn calls(&self) -> Vec<PageSegMode> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl OcrBackend for ScriptedRecognizer {
    fn recognize(&self, _image_bytes: &[u8], config: &RecognitionConfig) -> Result<Recognition, OcrError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(config.mode);
        }
        match self.answers.iter().find(|(mode, _)| *mode == config.mode) {
            Some((_, Ok(recognition))) => Ok(recognition.clone()),
            Some((_, Err(message))) => Err(OcrError::Engine(message.clone())),
            None => Err(OcrError::Engine(format!("no scripted answer for {}", config.mode))),
        }
    }
}

// ── Tesseract command-line backend ────────────────────────────────────────────

/// Runs the `tesseract` executable once per attempt, piping the image through
/// stdin and reading the text from stdout.
pub struct TesseractCli {
    config: TesseractConfig,
}

impl TesseractCli {
    pub fn new(config: TesseractConfig) -> Self {
        Self { config }
    }

    fn command(&self, recognition: &RecognitionConfig) -> Command {
        let mut cmd = Command::new(&self.config.command);
        cmd.arg("stdin")
            .arg("stdout")
            .arg("-l")
            .arg(&self.config.lang)
            .arg("--psm")
            .arg(recognition.mode.psm().to_string())
            .arg("-c")
            .arg(format!("tessedit_char_whitelist={}", recognition.whitelist));
        if let Some(dir) = &self.config.tessdata_dir {
            cmd.arg("--tessdata-dir").arg(dir);
        }
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd
    }
}

impl OcrBackend for TesseractCli {
    fn recognize(&self, image_bytes: &[u8], config: &RecognitionConfig) -> Result<Recognition, OcrError> {
        let mut child = self.command(config).spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                OcrError::NotAvailable(format!("{}: {e}", self.config.command.display()))
            }
            _ => OcrError::Engine(e.to_string()),
        })?;

        // Feed and drain the pipes on their own threads so a stalled engine
        // can only ever block them, never the deadline below.
        let writer = child.stdin.take().map(|mut stdin| {
            let image = image_bytes.to_vec();
            thread::spawn(move || stdin.write_all(&image))
        });
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = match self.config.timeout() {
            Some(limit) => wait_with_deadline(&mut child, limit)?,
            None => match child.wait() {
                Ok(status) => status,
                Err(e) => {
                    abort(&mut child);
                    return Err(OcrError::Engine(e.to_string()));
                }
            },
        };

        let text = collect(stdout)?;
        if !status.success() {
            let err = collect(stderr).unwrap_or_default();
            return Err(OcrError::Engine(format!("tesseract exited with {status}: {}", err.trim())));
        }

        if let Some(handle) = writer {
            match handle.join() {
                Ok(Ok(())) => {}
                // The engine may exit successfully before consuming all input.
                Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => return Err(OcrError::Engine(format!("writing image to tesseract: {e}"))),
                Err(_) => return Err(OcrError::Engine("image writer thread panicked".into())),
            }
        }

        Ok(Recognition::new(text))
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn collect(handle: Option<JoinHandle<io::Result<Vec<u8>>>>) -> Result<String, OcrError> {
    let Some(handle) = handle else {
        return Ok(String::new());
    };
    let bytes = handle
        .join()
        .map_err(|_| OcrError::Engine("output reader thread panicked".into()))?
        .map_err(|e| OcrError::Engine(e.to_string()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn abort(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Poll until the child exits. Past `limit` the child is killed and reaped;
/// the pipe threads are left to finish on their own.
fn wait_with_deadline(child: &mut Child, limit: Duration) -> Result<ExitStatus, OcrError> {
    let deadline = Instant::now() + limit;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {}
            Err(e) => {
                abort(child);
                return Err(OcrError::Engine(e.to_string()));
            }
        }
        if Instant::now() >= deadline {
            abort(child);
            return Err(OcrError::Timeout(limit));
        }
        thread::sleep(Duration::from_millis(10));
    }
}

// ── In-process Tesseract backend (optional, gated behind `tesseract` feature) ──

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::{OcrBackend, OcrError};
    use crate::types::{Recognition, RecognitionConfig};
    use leptess::{LepTess, Variable};

    pub struct TesseractRecognizer {
        data_path: Option<String>,
        lang: String,
    }

    impl TesseractRecognizer {
        pub fn new(data_path: Option<String>, lang: &str) -> Self {
            Self { data_path, lang: lang.to_string() }
        }
    }

    impl OcrBackend for TesseractRecognizer {
        fn recognize(&self, image_bytes: &[u8], config: &RecognitionConfig) -> Result<Recognition, OcrError> {
            let mut lt = LepTess::new(self.data_path.as_deref(), &self.lang)
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.set_variable(Variable::TesseditPagesegMode, &config.mode.psm().to_string())
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.set_variable(Variable::TesseditCharWhitelist, &config.whitelist)
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.set_image_from_mem(image_bytes)
                .map_err(|e| OcrError::ImageDecode(e.to_string()))?;
            let text = lt.get_utf8_text().map_err(|e| OcrError::Engine(e.to_string()))?;
            let confidence = lt.mean_text_conf() as f32 / 100.0;
            Ok(Recognition::new(text).with_confidence(confidence))
        }
    }
}

/// Shell scripts standing in for the `tesseract` binary.
#[cfg(all(test, unix))]
pub(crate) mod fake_engine {
    use crate::config::TesseractConfig;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    /// Arguments arrive where the real binary gets them, so `$6` is the psm.
    pub fn script(dir: &Path, body: &str, timeout_secs: Option<u64>) -> TesseractConfig {
        let path = dir.join("tesseract");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        TesseractConfig { command: path, timeout_secs, ..TesseractConfig::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn line_cfg() -> RecognitionConfig {
        RecognitionConfig::new(PageSegMode::SingleLine, "0123456789.")
    }

    #[test]
    fn mock_returns_preset_text() {
        let r = MockRecognizer::new("00123.45");
        assert_eq!(r.recognize(b"fake image data", &line_cfg()).unwrap().text, "00123.45");
    }

    #[test]
    fn mock_ignores_image_content() {
        let r = MockRecognizer::new("7");
        assert_eq!(r.recognize(b"anything", &line_cfg()).unwrap().text, "7");
        assert_eq!(r.recognize(b"", &line_cfg()).unwrap().text, "7");
    }

    #[test]
    fn scripted_answers_by_mode_and_records_calls() {
        let r = ScriptedRecognizer::new()
            .with_text(PageSegMode::Block, "12")
            .with_failure(PageSegMode::SingleWord, "boom");
        let word = RecognitionConfig::new(PageSegMode::SingleWord, "0123456789.");
        let block = RecognitionConfig::new(PageSegMode::Block, "0123456789.");

        assert!(matches!(r.recognize(b"", &line_cfg()), Err(OcrError::Engine(_))));
        assert_eq!(r.recognize(b"", &block).unwrap().text, "12");
        assert!(matches!(r.recognize(b"", &word), Err(OcrError::Engine(m)) if m == "boom"));
        assert_eq!(
            r.calls(),
            vec![PageSegMode::SingleLine, PageSegMode::Block, PageSegMode::SingleWord]
        );
    }

    #[test]
    fn boxed_backend_delegates() {
        let r: Box<dyn OcrBackend> = Box::new(MockRecognizer::new("42"));
        assert_eq!(r.recognize(b"", &line_cfg()).unwrap().text, "42");
    }

    #[test]
    fn tesseract_command_carries_mode_whitelist_and_tessdata() {
        let cli = TesseractCli::new(TesseractConfig {
            command: PathBuf::from("/opt/tess/bin/tesseract"),
            tessdata_dir: Some(PathBuf::from("/opt/tess/share")),
            lang: "eng".into(),
            timeout_secs: None,
        });
        let cmd = cli.command(&RecognitionConfig::new(PageSegMode::Block, "0123456789."));
        assert_eq!(cmd.get_program(), "/opt/tess/bin/tesseract");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "stdin",
                "stdout",
                "-l",
                "eng",
                "--psm",
                "6",
                "-c",
                "tessedit_char_whitelist=0123456789.",
                "--tessdata-dir",
                "/opt/tess/share",
            ]
        );
    }

    #[test]
    fn missing_tesseract_binary_is_not_available() {
        let cli = TesseractCli::new(TesseractConfig {
            command: PathBuf::from("/nonexistent/metron-test/tesseract"),
            ..TesseractConfig::default()
        });
        let err = cli.recognize(b"png", &line_cfg()).unwrap_err();
        assert!(matches!(err, OcrError::NotAvailable(_)));
    }

    #[cfg(unix)]
    mod subprocess {
        use super::*;
        use crate::recognizer::fake_engine;

        fn large_image() -> Vec<u8> {
            vec![0x55; 1 << 20]
        }

        #[test]
        fn reads_text_from_stdout() {
            let dir = tempfile::tempdir().unwrap();
            let cfg = fake_engine::script(dir.path(), "cat > /dev/null\necho \"102.5 psm=$6\"", Some(10));
            let text = TesseractCli::new(cfg).recognize(b"png", &line_cfg()).unwrap().text;
            assert_eq!(text.trim(), "102.5 psm=7");
        }

        #[test]
        fn nonzero_exit_is_engine_error_with_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let cfg = fake_engine::script(
                dir.path(),
                "cat > /dev/null\necho 'Error in pixReadMem' >&2\nexit 3",
                Some(10),
            );
            let err = TesseractCli::new(cfg).recognize(b"png", &line_cfg()).unwrap_err();
            assert!(matches!(err, OcrError::Engine(m) if m.contains("pixReadMem")));
        }

        #[test]
        fn stalled_engine_times_out() {
            let dir = tempfile::tempdir().unwrap();
            let cfg = fake_engine::script(dir.path(), "exec sleep 10", Some(1));
            let started = Instant::now();
            let err = TesseractCli::new(cfg).recognize(&large_image(), &line_cfg()).unwrap_err();
            assert!(matches!(err, OcrError::Timeout(d) if d == Duration::from_secs(1)));
            assert!(started.elapsed() < Duration::from_secs(5));
        }

        #[test]
        fn engine_ignoring_input_still_succeeds() {
            let dir = tempfile::tempdir().unwrap();
            let cfg = fake_engine::script(dir.path(), "echo 42", Some(10));
            let text = TesseractCli::new(cfg).recognize(&large_image(), &line_cfg()).unwrap().text;
            assert_eq!(text, "42\n");
        }

        #[test]
        fn large_output_before_reading_input_does_not_deadlock() {
            let dir = tempfile::tempdir().unwrap();
            let cfg = fake_engine::script(
                dir.path(),
                "head -c 200000 /dev/zero | tr '\\0' 1\ncat > /dev/null",
                Some(10),
            );
            let text = TesseractCli::new(cfg).recognize(&large_image(), &line_cfg()).unwrap().text;
            assert_eq!(text.len(), 200_000);
        }
    }
}
