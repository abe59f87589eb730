//! End-to-end pipeline tests with in-test PDFs, zips and images and mock
//! OCR and language model backends.

use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use docchat_rag::config::RagConfig;
use docchat_rag::error::{RagError, Result};
use docchat_rag::extract::{ArtifactKind, Extraction, Extractor, Upload};
use docchat_rag::fs_store::FsVectorStore;
use docchat_rag::hashing::HashingEmbeddingProvider;
use docchat_rag::inmemory::InMemoryVectorStore;
use docchat_rag::llm::{ChatMessage, LanguageModel, Role};
use docchat_rag::ocr::OcrEngine;
use docchat_rag::pipeline::{FileStatus, PipelineState, RagPipeline};
use docchat_rag::store::IndexStore;
use docchat_rag::vectorstore::VectorStore;
use lopdf::content::{Content, Operation};
use lopdf::{Object, Stream, dictionary};
use tokio::sync::Notify;

// fixtures

/// Build a PDF with one page per entry of `pages`.
fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![100.into(), 600.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id =
            doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

fn zip_with(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, bytes) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn deflated_zip_with(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, bytes) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn png() -> Vec<u8> {
    let image = image::RgbImage::from_pixel(8, 8, image::Rgb([255, 255, 255]));
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png).unwrap();
    bytes
}

// mocks

struct FixedOcr(&'static str);

#[async_trait]
impl OcrEngine for FixedOcr {
    async fn recognize(&self, png: &[u8]) -> Result<String> {
        assert!(png.starts_with(b"\x89PNG"), "OCR input must be PNG");
        Ok(self.0.to_string())
    }

    fn name(&self) -> &str {
        "fixed-ocr"
    }
}

/// Blocks inside OCR until released, to observe in-flight state.
struct GatedOcr {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl OcrEngine for GatedOcr {
    async fn recognize(&self, _png: &[u8]) -> Result<String> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok("released".to_string())
    }

    fn name(&self) -> &str {
        "gated-ocr"
    }
}

#[derive(Default)]
struct EchoModel {
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

#[async_trait]
impl LanguageModel for EchoModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.calls.lock().unwrap().push(messages.to_vec());
        Ok(format!("answered: {}", messages.last().map(|m| m.content.as_str()).unwrap_or("")))
    }

    fn name(&self) -> &str {
        "echo"
    }
}

struct FailingModel;

#[async_trait]
impl LanguageModel for FailingModel {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        Err(RagError::Backend { backend: "groq".into(), message: "401 invalid api key".into() })
    }

    fn name(&self) -> &str {
        "failing"
    }
}

fn pipeline_with(
    ocr: Arc<dyn OcrEngine>,
    llm: Arc<dyn LanguageModel>,
    backend: Arc<dyn VectorStore>,
) -> RagPipeline {
    let config = RagConfig::builder().collection("tests").keep_uploads(false).build().unwrap();
    RagPipeline::builder()
        .config(config)
        .index_store(IndexStore::new(Arc::new(HashingEmbeddingProvider::default()), backend))
        .extractor(Extractor::new(ocr))
        .language_model(llm)
        .build()
        .unwrap()
}

fn pipeline(llm: Arc<dyn LanguageModel>) -> RagPipeline {
    pipeline_with(
        Arc::new(FixedOcr("Receipt total 42 dollars")),
        llm,
        Arc::new(InMemoryVectorStore::new()),
    )
}

// tests

#[tokio::test]
async fn three_page_pdf_becomes_one_chunk_in_page_order() {
    let pipeline = pipeline(Arc::new(EchoModel::default()));
    let upload = Upload::new("greek.pdf", pdf_with_pages(&["Alpha.", "Beta.", "Gamma."]));
    assert_eq!(upload.kind(), ArtifactKind::Pdf);

    let report = pipeline.ingest(upload).await.unwrap();
    assert_eq!(report.statuses(), vec!["extracted (1 chunks)"]);

    let snapshot = pipeline.store().snapshot("tests").await.unwrap();
    assert_eq!(snapshot.len(), 1);
    let chunk = &snapshot.entries()[0].chunk;
    let alpha = chunk.text.find("Alpha.").unwrap();
    let beta = chunk.text.find("Beta.").unwrap();
    let gamma = chunk.text.find("Gamma.").unwrap();
    assert!(alpha < beta && beta < gamma, "pages out of order: {:?}", chunk.text);
    assert_eq!(chunk.metadata.get("page_count").map(String::as_str), Some("3"));
    assert_eq!(chunk.metadata.get("kind").map(String::as_str), Some("pdf"));
}

#[tokio::test]
async fn archive_entry_over_the_size_limit_is_recorded_as_an_error() {
    // 32 MiB of zeros deflates to a few dozen KiB.
    let archive = deflated_zip_with(&[
        ("one.pdf", pdf_with_pages(&["First document."])),
        ("filler.pdf", vec![0u8; 32 * 1024 * 1024]),
        ("two.pdf", pdf_with_pages(&["Second document."])),
    ]);
    assert!(archive.len() < 1024 * 1024);

    let config = RagConfig::builder()
        .collection("tests")
        .keep_uploads(false)
        .max_entry_bytes(256 * 1024)
        .build()
        .unwrap();
    // No extractor override: the default one picks the limits up from the config.
    let pipeline = RagPipeline::builder()
        .config(config)
        .index_store(IndexStore::new(
            Arc::new(HashingEmbeddingProvider::default()),
            Arc::new(InMemoryVectorStore::new()),
        ))
        .language_model(Arc::new(EchoModel::default()))
        .build()
        .unwrap();

    let report = pipeline.ingest(Upload::new("bundle.zip", archive)).await.unwrap();
    assert_eq!(report.failed(), 1);
    assert_eq!(report.files[1].source_id, "bundle.zip/filler.pdf");
    match &report.files[1].status {
        FileStatus::Error { message } => assert!(message.contains("exceeds"), "{message}"),
        other => panic!("expected an error, got {other:?}"),
    }
    let extracted = report
        .files
        .iter()
        .filter(|f| matches!(f.status, FileStatus::Extracted { .. }))
        .count();
    assert_eq!(extracted, 2);
    assert_eq!(pipeline.store().snapshot("tests").await.unwrap().len(), 2);
}

#[tokio::test]
async fn archive_with_corrupt_entry_keeps_the_valid_ones() {
    let archive = zip_with(&[
        ("docs/one.pdf", pdf_with_pages(&["First document."])),
        ("docs/broken.pdf", b"%PDF-1.4 this is not a pdf".to_vec()),
        ("docs/two.pdf", pdf_with_pages(&["Second document."])),
        ("scan.png", png()),
        ("notes.txt", b"plain text".to_vec()),
        (".DS_Store", vec![0, 1, 2]),
        ("__MACOSX/docs/._one.pdf", vec![0, 1, 2]),
    ]);

    let pipeline = pipeline(Arc::new(EchoModel::default()));
    let report = pipeline.ingest(Upload::new("bundle.zip", archive)).await.unwrap();

    let sources: Vec<&str> = report.files.iter().map(|f| f.source_id.as_str()).collect();
    assert_eq!(
        sources,
        vec![
            "bundle.zip/docs/one.pdf",
            "bundle.zip/docs/broken.pdf",
            "bundle.zip/docs/two.pdf",
            "bundle.zip/scan.png",
            "bundle.zip/notes.txt",
        ]
    );
    let extracted = report
        .files
        .iter()
        .filter(|f| matches!(f.status, FileStatus::Extracted { .. }))
        .count();
    assert_eq!(extracted, 3);
    assert_eq!(report.failed(), 1);
    assert!(report.statuses()[1].starts_with("error: "));
    assert_eq!(report.statuses()[4], "skipped: unsupported type");

    let snapshot = pipeline.store().snapshot("tests").await.unwrap();
    assert_eq!(snapshot.len(), 3);
    assert!(
        snapshot
            .entries()
            .iter()
            .all(|e| e.chunk.metadata.get("archive").map(String::as_str) == Some("bundle.zip"))
    );
}

#[tokio::test]
async fn unreadable_archive_is_one_recorded_error() {
    let pipeline = pipeline(Arc::new(EchoModel::default()));
    let report =
        pipeline.ingest(Upload::new("bad.zip", b"definitely not a zip".to_vec())).await.unwrap();
    assert_eq!(report.files.len(), 1);
    assert_eq!(report.failed(), 1);
    assert!(report.chunk_ids.is_empty());
}

#[tokio::test]
async fn images_go_through_ocr() {
    let pipeline = pipeline(Arc::new(EchoModel::default()));
    let upload = Upload::new("receipt.png", png()).with_mime_hint("image/png");
    let report = pipeline.ingest(upload).await.unwrap();
    assert_eq!(report.statuses(), vec!["extracted (1 chunks)"]);

    let snapshot = pipeline.store().snapshot("tests").await.unwrap();
    assert_eq!(snapshot.entries()[0].chunk.text, "Receipt total 42 dollars");
}

#[tokio::test]
async fn undecodable_image_is_an_extraction_error() {
    let extractor = Extractor::new(Arc::new(FixedOcr("unused")));
    let outcomes = extractor.extract(&Upload::new("photo.jpg", b"not a jpeg".to_vec())).await;
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0].extraction, Extraction::Failed(RagError::Extraction { .. })));
}

#[tokio::test]
async fn unsupported_upload_is_skipped() {
    let pipeline = pipeline(Arc::new(EchoModel::default()));
    let report = pipeline.ingest(Upload::new("notes.txt", b"hello".to_vec())).await.unwrap();
    assert_eq!(report.statuses(), vec!["skipped: unsupported type"]);
    assert!(report.chunk_ids.is_empty());
}

#[tokio::test]
async fn query_grounds_the_model_on_retrieved_chunks() {
    let model = Arc::new(EchoModel::default());
    let pipeline = pipeline(model.clone());
    pipeline
        .ingest(Upload::new("greek.pdf", pdf_with_pages(&["Alpha.", "Beta.", "Gamma."])))
        .await
        .unwrap();

    let answer = pipeline.query("  what comes after alpha?  ").await.unwrap();
    assert_eq!(answer.text, "answered: what comes after alpha?");
    assert_eq!(answer.sources.len(), 1);

    let calls = model.calls.lock().unwrap();
    let messages = &calls[0];
    assert_eq!(messages[0].role, Role::System);
    assert!(messages[0].content.ends_with(&answer.sources[0].chunk.text));
    assert_eq!(messages[1].role, Role::User);
}

#[tokio::test]
async fn empty_collection_query_has_no_sources() {
    let model = Arc::new(EchoModel::default());
    let pipeline = pipeline(model.clone());
    pipeline.ingest(Upload::new("notes.txt", b"hello".to_vec())).await.unwrap();

    let answer = pipeline.query("anything?").await.unwrap();
    assert!(answer.sources.is_empty());
    assert_eq!(model.calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn query_before_any_ingest_is_not_found() {
    let pipeline = pipeline(Arc::new(EchoModel::default()));
    let err = pipeline.query("hello?").await.unwrap_err();
    assert!(matches!(err, RagError::NotFound { .. }), "got {err:?}");
    assert_eq!(pipeline.last_error(), Some(err.to_string()));
}

#[tokio::test]
async fn blank_question_is_a_config_error() {
    let pipeline = pipeline(Arc::new(EchoModel::default()));
    assert!(matches!(pipeline.query("   ").await, Err(RagError::Config(_))));
}

#[tokio::test]
async fn model_failure_is_propagated() {
    let pipeline = pipeline(Arc::new(FailingModel));
    pipeline
        .ingest(Upload::new("greek.pdf", pdf_with_pages(&["Alpha."])))
        .await
        .unwrap();
    let err = pipeline.query("what?").await.unwrap_err();
    assert_eq!(err.stage(), "backend");
    assert_eq!(pipeline.state(), PipelineState::Idle);
}

#[tokio::test]
async fn state_tracks_ingestion_and_returns_to_idle_on_cancel() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let pipeline = Arc::new(pipeline_with(
        Arc::new(GatedOcr { entered: entered.clone(), release: release.clone() }),
        Arc::new(EchoModel::default()),
        Arc::new(InMemoryVectorStore::new()),
    ));
    assert_eq!(pipeline.state(), PipelineState::Idle);

    let task = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.ingest(Upload::new("scan.png", png())).await }
    });
    entered.notified().await;
    assert_eq!(pipeline.state(), PipelineState::Ingesting);

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    assert_eq!(pipeline.state(), PipelineState::Idle);
}

#[tokio::test]
async fn batch_ingest_persists_and_kept_uploads_land_on_disk() {
    let temp = tempfile::tempdir().unwrap();
    let config = RagConfig::builder()
        .data_dir(temp.path())
        .collection("persisted")
        .keep_uploads(true)
        .build()
        .unwrap();
    let store = IndexStore::new(
        Arc::new(HashingEmbeddingProvider::default()),
        Arc::new(FsVectorStore::new(temp.path())),
    );
    let pipeline = RagPipeline::builder()
        .config(config)
        .index_store(store)
        .extractor(Extractor::new(Arc::new(FixedOcr("unused"))))
        .language_model(Arc::new(EchoModel::default()))
        .build()
        .unwrap();

    let reports = pipeline
        .ingest_batch(vec![
            Upload::new("../one.pdf", pdf_with_pages(&["One."])),
            Upload::new("two.pdf", pdf_with_pages(&["Two."])),
        ])
        .await
        .unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].filename, "one.pdf");

    assert!(temp.path().join("uploads/one.pdf").is_file());
    assert!(temp.path().join("uploads/two.pdf").is_file());

    let reopened = IndexStore::new(
        Arc::new(HashingEmbeddingProvider::default()),
        Arc::new(FsVectorStore::new(temp.path())),
    );
    assert_eq!(reopened.load("persisted").await.unwrap().len, 2);
}
