//! Content extraction: uploaded images, PDFs and zip archives to plain text.
//!
//! The artifact kind is decided once, at intake, by [`ArtifactKind::classify`].
//! [`Extractor::extract`] never fails as a whole: archives report one
//! [`ExtractionOutcome`] per entry so that a single bad file does not sink
//! the rest of the upload.

use std::io::{Cursor, Read};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::document::Document;
use crate::error::{RagError, Result};
use crate::ocr::OcrEngine;

/// Reason recorded for files that are neither images, PDFs nor archives.
pub const UNSUPPORTED_TYPE: &str = "unsupported type";

/// Default cap on the uncompressed size of one archive entry.
pub const DEFAULT_MAX_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

/// Default cap on the uncompressed size of all entries of one archive.
pub const DEFAULT_MAX_ARCHIVE_BYTES: u64 = 256 * 1024 * 1024;

const IMAGE_SUBTYPES: &[&str] = &["png", "jpeg", "gif", "bmp", "tiff", "webp"];
const SYSTEM_FILES: &[&str] = &["thumbs.db", "desktop.ini", "__macosx"];

/// A raw file handed in by the HTTP or command-line layer.
#[derive(Debug, Clone)]
pub struct Upload {
    /// The sanitized file name.
    pub filename: String,
    pub bytes: Vec<u8>,
    /// Declared MIME type, when the caller knows one.
    pub mime_hint: Option<String>,
}

impl Upload {
    /// Create an upload; `filename` is sanitized with [`sanitize_filename`].
    pub fn new(filename: &str, bytes: Vec<u8>) -> Self {
        Self { filename: sanitize_filename(filename), bytes, mime_hint: None }
    }

    pub fn with_mime_hint(mut self, mime: impl Into<String>) -> Self {
        let mime = mime.into();
        self.mime_hint = if mime.trim().is_empty() { None } else { Some(mime) };
        self
    }

    pub fn kind(&self) -> ArtifactKind {
        ArtifactKind::classify(&self.filename, self.mime_hint.as_deref())
    }
}

/// Reduce a client-supplied file name to a safe single path component.
///
/// Directory parts are dropped, whitespace becomes `_`, anything outside
/// `[A-Za-z0-9._-]` is removed and leading dots are stripped. Falls back to
/// `upload` when nothing is left.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter_map(|c| match c {
            c if c.is_whitespace() => Some('_'),
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') => Some(c),
            _ => None,
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() { "upload".to_string() } else { cleaned.to_string() }
}

/// What an uploaded artifact is, as far as extraction cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Image,
    Pdf,
    Archive,
    Unsupported,
}

impl ArtifactKind {
    /// Classify by MIME hint, falling back to the file extension when the
    /// hint is missing or not specific.
    pub fn classify(filename: &str, mime_hint: Option<&str>) -> Self {
        if let Some(kind) = mime_hint.map(Self::from_mime).filter(|k| *k != Self::Unsupported) {
            return kind;
        }
        mime_guess::from_path(filename)
            .first()
            .map(|mime| Self::from_mime(mime.essence_str()))
            .unwrap_or(Self::Unsupported)
    }

    fn from_mime(mime: &str) -> Self {
        let essence = mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        match essence.split_once('/') {
            Some(("image", subtype)) if IMAGE_SUBTYPES.contains(&subtype) => Self::Image,
            Some(("application", "pdf")) => Self::Pdf,
            Some(("application", "zip" | "x-zip-compressed" | "x-zip")) => Self::Archive,
            _ => Self::Unsupported,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Pdf => "pdf",
            Self::Archive => "archive",
            Self::Unsupported => "unsupported",
        }
    }
}

/// Result of extracting one file or archive entry.
#[derive(Debug)]
pub enum Extraction {
    Extracted(Document),
    Skipped(String),
    Failed(RagError),
}

/// One [`Extraction`] together with the source it belongs to.
#[derive(Debug)]
pub struct ExtractionOutcome {
    pub source_id: String,
    pub extraction: Extraction,
}

impl ExtractionOutcome {
    fn new(source_id: impl Into<String>, extraction: Extraction) -> Self {
        Self { source_id: source_id.into(), extraction }
    }
}

/// Decompression caps applied while reading zip archives.
///
/// An entry larger than `max_entry_bytes` is recorded as failed. Once the
/// entries read so far reach `max_total_bytes`, every later entry fails too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveLimits {
    pub max_entry_bytes: u64,
    pub max_total_bytes: u64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
            max_total_bytes: DEFAULT_MAX_ARCHIVE_BYTES,
        }
    }
}

/// Turns uploads into [`Document`]s.
#[derive(Clone)]
pub struct Extractor {
    ocr: Arc<dyn OcrEngine>,
    limits: ArchiveLimits,
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("ocr", &self.ocr.name())
            .field("limits", &self.limits)
            .finish()
    }
}

impl Extractor {
    pub fn new(ocr: Arc<dyn OcrEngine>) -> Self {
        Self { ocr, limits: ArchiveLimits::default() }
    }

    pub fn with_archive_limits(mut self, limits: ArchiveLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn archive_limits(&self) -> ArchiveLimits {
        self.limits
    }

    /// Extract a single image or PDF.
    ///
    /// # Errors
    ///
    /// - [`RagError::Extraction`] for undecodable images, corrupt or
    ///   encrypted PDFs, and any other artifact kind
    /// - [`RagError::Backend`] when the OCR engine fails
    pub async fn extract_document(&self, upload: &Upload) -> Result<Document> {
        let source_id = upload.filename.as_str();
        match upload.kind() {
            ArtifactKind::Image => self.extract_image(source_id, upload.bytes.clone()).await,
            ArtifactKind::Pdf => extract_pdf(source_id, upload.bytes.clone()).await,
            other => Err(RagError::extraction(
                source_id,
                format!("expected an image or PDF, got {}", other.as_str()),
            )),
        }
    }

    /// Extract every document in an upload.
    pub async fn extract(&self, upload: &Upload) -> Vec<ExtractionOutcome> {
        let source_id = upload.filename.clone();
        match upload.kind() {
            ArtifactKind::Image | ArtifactKind::Pdf => {
                let extraction = match self.extract_document(upload).await {
                    Ok(document) => Extraction::Extracted(document),
                    Err(e) => Extraction::Failed(e),
                };
                vec![ExtractionOutcome::new(source_id, extraction)]
            }
            ArtifactKind::Archive => self.extract_archive(&source_id, upload.bytes.clone()).await,
            ArtifactKind::Unsupported => {
                debug!(source = %source_id, "skipping unsupported upload");
                let skipped = Extraction::Skipped(UNSUPPORTED_TYPE.into());
                vec![ExtractionOutcome::new(source_id, skipped)]
            }
        }
    }

    async fn extract_image(&self, source_id: &str, bytes: Vec<u8>) -> Result<Document> {
        let owned_id = source_id.to_string();
        let png = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let image = image::load_from_memory(&bytes)
                .map_err(|e| RagError::extraction(&owned_id, format!("cannot decode image: {e}")))?;
            let mut png = Vec::new();
            image
                .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
                .map_err(|e| {
                    RagError::extraction(&owned_id, format!("cannot re-encode image: {e}"))
                })?;
            Ok(png)
        })
        .await
        .map_err(|e| RagError::extraction(source_id, format!("image task failed: {e}")))??;

        let text = self.ocr.recognize(&png).await?;
        debug!(source = source_id, chars = text.chars().count(), "recognized image text");
        Ok(Document::new(source_id, text)
            .with_metadata("source", source_id)
            .with_metadata("kind", ArtifactKind::Image.as_str()))
    }

    async fn extract_archive(&self, archive_id: &str, bytes: Vec<u8>) -> Vec<ExtractionOutcome> {
        let owned_id = archive_id.to_string();
        let limits = self.limits;
        let entries = tokio::task::spawn_blocking(move || read_archive(&owned_id, bytes, limits))
            .await
            .map_err(|e| RagError::extraction(archive_id, format!("archive task failed: {e}")))
            .and_then(|entries| entries);

        let entries = match entries {
            Ok(entries) => entries,
            Err(e) => {
                warn!(source = archive_id, error = %e, "cannot open archive");
                return vec![ExtractionOutcome::new(archive_id, Extraction::Failed(e))];
            }
        };

        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            let source_id = format!("{archive_id}/{}", entry.name);
            let extraction = match entry.bytes {
                Err(e) => Extraction::Failed(e),
                Ok(bytes) => match ArtifactKind::classify(&entry.name, None) {
                    ArtifactKind::Image => self.extract_image(&source_id, bytes).await.into(),
                    ArtifactKind::Pdf => extract_pdf(&source_id, bytes).await.into(),
                    ArtifactKind::Archive | ArtifactKind::Unsupported => {
                        Extraction::Skipped(UNSUPPORTED_TYPE.into())
                    }
                },
            };
            let extraction = match extraction {
                Extraction::Extracted(document) => {
                    Extraction::Extracted(document.with_metadata("archive", archive_id))
                }
                Extraction::Failed(e) => {
                    warn!(source = %source_id, error = %e, "archive entry failed");
                    Extraction::Failed(e)
                }
                skipped => {
                    warn!(source = %source_id, "skipping unsupported archive entry");
                    skipped
                }
            };
            outcomes.push(ExtractionOutcome::new(source_id, extraction));
        }
        outcomes
    }
}

impl From<Result<Document>> for Extraction {
    fn from(result: Result<Document>) -> Self {
        match result {
            Ok(document) => Self::Extracted(document),
            Err(e) => Self::Failed(e),
        }
    }
}

struct ArchiveEntry {
    name: String,
    bytes: Result<Vec<u8>>,
}

fn is_hidden_entry(name: &str) -> bool {
    name.split('/').filter(|c| !c.is_empty()).any(|component| {
        component.starts_with('.')
            || SYSTEM_FILES.contains(&component.to_ascii_lowercase().as_str())
    })
}

/// Read every visible file entry of a zip archive, in archive order,
/// without decompressing past `limits`.
fn read_archive(
    archive_id: &str,
    bytes: Vec<u8>,
    limits: ArchiveLimits,
) -> Result<Vec<ArchiveEntry>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| RagError::extraction(archive_id, format!("cannot open archive: {e}")))?;

    let mut entries = Vec::new();
    let mut total: u64 = 0;
    for index in 0..archive.len() {
        let mut file = match archive.by_index(index) {
            Ok(file) => file,
            Err(e) => {
                entries.push(ArchiveEntry {
                    name: format!("entry-{index}"),
                    bytes: Err(RagError::extraction(
                        format!("{archive_id}/entry-{index}"),
                        format!("cannot read entry: {e}"),
                    )),
                });
                continue;
            }
        };

        let name = file.name().replace('\\', "/");
        if file.is_dir() || is_hidden_entry(&name) {
            continue;
        }
        let source_id = format!("{archive_id}/{name}");

        let remaining = limits.max_total_bytes.saturating_sub(total);
        let limit = limits.max_entry_bytes.min(remaining);
        // The declared size comes from the archive itself and is not trusted.
        let capacity = usize::try_from(file.size().min(limit)).unwrap_or_default();
        let mut buf = Vec::with_capacity(capacity);
        let read = Read::by_ref(&mut file).take(limit.saturating_add(1)).read_to_end(&mut buf);
        let bytes = match read {
            Err(e) => Err(RagError::extraction(&source_id, format!("cannot read entry: {e}"))),
            Ok(read) if read as u64 > limit => {
                let message = if limit < limits.max_entry_bytes {
                    format!(
                        "archive exceeds {} bytes uncompressed; entry not read",
                        limits.max_total_bytes
                    )
                } else {
                    format!("entry exceeds {} bytes uncompressed", limits.max_entry_bytes)
                };
                Err(RagError::extraction(&source_id, message))
            }
            Ok(read) => {
                total += read as u64;
                Ok(buf)
            }
        };
        entries.push(ArchiveEntry { name, bytes });
    }
    Ok(entries)
}

async fn extract_pdf(source_id: &str, bytes: Vec<u8>) -> Result<Document> {
    let owned_id = source_id.to_string();
    tokio::task::spawn_blocking(move || pdf_to_document(&owned_id, &bytes))
        .await
        .map_err(|e| RagError::extraction(source_id, format!("pdf task failed: {e}")))?
}

fn pdf_to_document(source_id: &str, bytes: &[u8]) -> Result<Document> {
    let pdf = lopdf::Document::load_mem(bytes)
        .map_err(|e| RagError::extraction(source_id, format!("cannot parse PDF: {e}")))?;
    if pdf.is_encrypted() {
        return Err(RagError::extraction(source_id, "PDF is encrypted"));
    }

    let pages = pdf.get_pages();
    let mut texts = Vec::with_capacity(pages.len());
    for page_number in pages.keys() {
        match pdf.extract_text(&[*page_number]) {
            Ok(text) => texts.push(text.trim_end().to_string()),
            Err(e) => warn!(source = source_id, page = page_number, error = %e, "no text on page"),
        }
    }

    debug!(source = source_id, pages = pages.len(), "extracted PDF text");
    Ok(Document::new(source_id, texts.join("\n"))
        .with_metadata("source", source_id)
        .with_metadata("kind", ArtifactKind::Pdf.as_str())
        .with_metadata("page_count", pages.len().to_string()))
}
