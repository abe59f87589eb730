//! Optical character recognition backends.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error};

use crate::error::{RagError, Result};

/// Default OCR language (Tesseract language code).
pub const DEFAULT_OCR_LANGUAGE: &str = "eng";

const BACKEND: &str = "tesseract";

/// Turns an image into text.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognize text in a PNG-encoded image.
    async fn recognize(&self, png: &[u8]) -> Result<String>;

    fn name(&self) -> &str;
}

/// Runs the `tesseract` command-line program.
///
/// The image is written to a temporary file and recognized with
/// `tesseract <file> stdout -l <language>`.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: PathBuf,
    language: String,
}

impl TesseractOcr {
    pub fn new(binary: impl Into<PathBuf>, language: impl Into<String>) -> Self {
        Self { binary: binary.into(), language: language.into() }
    }

    pub fn binary(&self) -> &std::path::Path {
        &self.binary
    }

    pub fn language(&self) -> &str {
        &self.language
    }
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self::new("tesseract", DEFAULT_OCR_LANGUAGE)
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize(&self, png: &[u8]) -> Result<String> {
        let image = tempfile::Builder::new()
            .prefix("docchat-ocr-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| {
                RagError::backend(BACKEND, format!("cannot create temporary image: {e}"))
            })?;
        tokio::fs::write(image.path(), png)
            .await
            .map_err(|e| RagError::backend(BACKEND, format!("cannot write temporary image: {e}")))?;

        debug!(
            binary = %self.binary.display(),
            language = %self.language,
            bytes = png.len(),
            "running OCR"
        );
        let output = Command::new(&self.binary)
            .arg(image.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                error!(binary = %self.binary.display(), error = %e, "failed to start tesseract");
                if e.kind() == std::io::ErrorKind::NotFound {
                    RagError::backend(
                        BACKEND,
                        format!("'{}' not found; install Tesseract OCR", self.binary.display()),
                    )
                } else {
                    RagError::backend(BACKEND, format!("failed to start: {e}"))
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(status = %output.status, "tesseract failed");
            return Err(RagError::backend(
                BACKEND,
                format!("exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn name(&self) -> &str {
        BACKEND
    }
}
