//! Persistence, concurrency and search-bound tests for the index store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use docchat_rag::document::Chunk;
use docchat_rag::error::RagError;
use docchat_rag::fs_store::FsVectorStore;
use docchat_rag::hashing::HashingEmbeddingProvider;
use docchat_rag::inmemory::InMemoryVectorStore;
use docchat_rag::retriever::{MmrConfig, Retriever};
use docchat_rag::store::IndexStore;
use proptest::prelude::*;

const DIM: usize = 48;

fn chunk(source: &str, index: usize, text: &str) -> Chunk {
    Chunk {
        text: text.to_string(),
        source_id: source.to_string(),
        chunk_index: index,
        char_offset: index * 10,
        metadata: HashMap::from([
            ("source".to_string(), source.to_string()),
            ("chunk_index".to_string(), index.to_string()),
        ]),
    }
}

fn fs_store(root: &std::path::Path) -> IndexStore {
    IndexStore::new(
        Arc::new(HashingEmbeddingProvider::new(DIM).unwrap()),
        Arc::new(FsVectorStore::new(root)),
    )
}

#[tokio::test]
async fn add_then_load_round_trips_text_and_metadata() {
    let temp = tempfile::tempdir().unwrap();
    let chunks = vec![
        chunk("guide.pdf", 0, "Engineering is the use of science to solve problems."),
        chunk("guide.pdf", 1, "Civil engineers design bridges."),
        chunk("scan.png", 0, "Invoice total: 420 EUR"),
    ];

    let store = fs_store(temp.path());
    store.create_or_open("docs").await.unwrap();
    let ids = store.add("docs", chunks.clone()).await.unwrap();
    assert_eq!(ids.len(), 3);

    // A fresh store sees only what reached disk.
    let reopened = fs_store(temp.path());
    let info = reopened.load("docs").await.unwrap();
    assert_eq!(info.len, 3);
    assert_eq!(info.dimensions, DIM);

    let snapshot = reopened.snapshot("docs").await.unwrap();
    let loaded: Vec<Chunk> = snapshot.entries().iter().map(|e| e.chunk.clone()).collect();
    assert_eq!(loaded, chunks);
    let loaded_ids: HashSet<&str> = snapshot.entries().iter().map(|e| e.id.as_str()).collect();
    assert_eq!(loaded_ids, ids.iter().map(String::as_str).collect());
}

#[tokio::test]
async fn appends_accumulate_across_reopen() {
    let temp = tempfile::tempdir().unwrap();
    let store = fs_store(temp.path());
    store.create_or_open("docs").await.unwrap();
    store.add("docs", vec![chunk("a.pdf", 0, "first")]).await.unwrap();

    let reopened = fs_store(temp.path());
    reopened.create_or_open("docs").await.unwrap();
    reopened.add("docs", vec![chunk("b.pdf", 0, "second")]).await.unwrap();

    let texts: Vec<String> = fs_store(temp.path())
        .snapshot("docs")
        .await
        .unwrap()
        .entries()
        .iter()
        .map(|e| e.chunk.text.clone())
        .collect();
    assert_eq!(texts, vec!["first", "second"]);
}

#[tokio::test]
async fn loading_unknown_collection_is_not_found() {
    let temp = tempfile::tempdir().unwrap();
    let err = fs_store(temp.path()).load("nonexistent").await.unwrap_err();
    assert!(matches!(err, RagError::NotFound { .. }), "got {err:?}");
    assert_eq!(err.stage(), "not_found");
}

#[tokio::test]
async fn failed_persist_leaves_visible_contents_unchanged() {
    let temp = tempfile::tempdir().unwrap();
    let store = fs_store(temp.path());
    store.create_or_open("docs").await.unwrap();
    store.add("docs", vec![chunk("a.pdf", 0, "kept")]).await.unwrap();

    // Swap the collection directory for a plain file so the next write fails.
    let dir = temp.path().join("collections").join("docs");
    std::fs::remove_dir_all(&dir).unwrap();
    std::fs::write(&dir, b"not a directory").unwrap();

    let err = store.add("docs", vec![chunk("b.pdf", 0, "lost")]).await.unwrap_err();
    assert!(matches!(err, RagError::Store { .. }), "got {err:?}");

    let snapshot = store.snapshot("docs").await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.entries()[0].chunk.text, "kept");
}

#[tokio::test]
async fn partially_written_collection_is_a_store_error() {
    let temp = tempfile::tempdir().unwrap();
    let store = fs_store(temp.path());
    store.create_or_open("docs").await.unwrap();
    store.add("docs", vec![chunk("a.pdf", 0, "alpha")]).await.unwrap();

    let docstore = temp.path().join("collections/docs/docstore.json");
    std::fs::write(&docstore, br#"{"entries":{}}"#).unwrap();

    let err = fs_store(temp.path()).load("docs").await.unwrap_err();
    assert!(matches!(err, RagError::Store { .. }), "got {err:?}");
}

#[tokio::test]
async fn dimension_change_is_a_config_error() {
    let temp = tempfile::tempdir().unwrap();
    fs_store(temp.path()).create_or_open("docs").await.unwrap();

    let other = IndexStore::new(
        Arc::new(HashingEmbeddingProvider::new(DIM * 2).unwrap()),
        Arc::new(FsVectorStore::new(temp.path())),
    );
    let err = other.load("docs").await.unwrap_err();
    assert!(matches!(err, RagError::Config(_)), "got {err:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_lose_no_entries() {
    let temp = tempfile::tempdir().unwrap();
    let store = Arc::new(fs_store(temp.path()));
    store.create_or_open("docs").await.unwrap();

    let mut handles = Vec::new();
    for writer in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let chunks = (0..5)
                .map(|i| {
                    chunk(&format!("file{writer}.pdf"), i, &format!("writer {writer} part {i}"))
                })
                .collect();
            store.add("docs", chunks).await.unwrap()
        }));
    }
    let mut all_ids = HashSet::new();
    for handle in handles {
        all_ids.extend(handle.await.unwrap());
    }
    assert_eq!(all_ids.len(), 40);

    assert_eq!(store.snapshot("docs").await.unwrap().len(), 40);
    let reloaded = fs_store(temp.path()).load("docs").await.unwrap();
    assert_eq!(reloaded.len, 40);
}

#[tokio::test]
async fn stores_sharing_a_data_dir_keep_each_others_appends() {
    let temp = tempfile::tempdir().unwrap();
    let server = fs_store(temp.path());
    server.create_or_open("docs").await.unwrap();
    let cli = fs_store(temp.path());
    cli.create_or_open("docs").await.unwrap();

    cli.add("docs", vec![chunk("cli.pdf", 0, "from cli")]).await.unwrap();
    server.add("docs", vec![chunk("server.pdf", 0, "from server")]).await.unwrap();

    let texts: Vec<String> = fs_store(temp.path())
        .snapshot("docs")
        .await
        .unwrap()
        .entries()
        .iter()
        .map(|e| e.chunk.text.clone())
        .collect();
    assert_eq!(texts, vec!["from cli", "from server"]);
}

#[tokio::test]
async fn open_store_sees_entries_written_by_another_store() {
    let temp = tempfile::tempdir().unwrap();
    let server = fs_store(temp.path());
    server.create_or_open("docs").await.unwrap();
    assert_eq!(server.snapshot("docs").await.unwrap().len(), 0);

    let cli = fs_store(temp.path());
    cli.create_or_open("docs").await.unwrap();
    cli.add("docs", vec![chunk("a.pdf", 0, "alpha"), chunk("a.pdf", 1, "beta")]).await.unwrap();

    assert_eq!(server.load("docs").await.unwrap().len, 2);
    assert_eq!(server.snapshot("docs").await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_from_separate_stores_lose_no_entries() {
    let temp = tempfile::tempdir().unwrap();
    fs_store(temp.path()).create_or_open("docs").await.unwrap();

    let mut handles = Vec::new();
    for writer in 0..4 {
        let root = temp.path().to_path_buf();
        handles.push(tokio::spawn(async move {
            let store = fs_store(&root);
            store.create_or_open("docs").await.unwrap();
            for i in 0..3 {
                let text = format!("writer {writer} part {i}");
                store.add("docs", vec![chunk(&format!("w{writer}.pdf"), i, &text)]).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(fs_store(temp.path()).load("docs").await.unwrap().len, 12);
}

#[tokio::test]
async fn list_reports_collections_with_counts() {
    let temp = tempfile::tempdir().unwrap();
    let store = fs_store(temp.path());
    store.create_or_open("reports").await.unwrap();
    store.create_or_open("contracts").await.unwrap();
    store.add("reports", vec![chunk("q1.pdf", 0, "revenue grew")]).await.unwrap();

    let listed = fs_store(temp.path()).list().await.unwrap();
    let counts: Vec<(String, usize)> = listed.into_iter().map(|c| (c.name, c.len)).collect();
    assert_eq!(counts, vec![("contracts".to_string(), 0), ("reports".to_string(), 1)]);
}

fn arb_texts() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec("[a-e]{1,3}( [a-e]{1,3}){0,4}", 0..25)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Search never returns more than `k` results nor the same entry twice.
    #[test]
    fn search_is_bounded_and_unique(
        texts in arb_texts(),
        query in "[a-e]{1,3}( [a-e]{1,3}){0,3}",
        k in 1usize..10,
        fetch_k in 0usize..30,
        lambda in 0.0f32..=1.0,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (results, stored) = rt.block_on(async {
            let store = IndexStore::new(
                Arc::new(HashingEmbeddingProvider::new(16).unwrap()),
                Arc::new(InMemoryVectorStore::new()),
            );
            store.create_or_open("docs").await.unwrap();
            let chunks = texts.iter().enumerate().map(|(i, t)| chunk("p.pdf", i, t)).collect();
            store.add("docs", chunks).await.unwrap();

            let retriever = Retriever::new(store, MmrConfig { fetch_k, lambda }).unwrap();
            (retriever.search("docs", &query, k).await.unwrap(), texts.len())
        });

        prop_assert_eq!(results.len(), k.min(stored));
        let unique: HashSet<&str> = results.iter().map(|r| r.id.as_str()).collect();
        prop_assert_eq!(unique.len(), results.len());
    }
}
