//! File-system vector store.
//!
//! Each collection is a directory under `<root>/collections/<name>/` holding
//! two JSON files:
//!
//! - `docstore.json`: id → chunk
//! - `index.json`: format version, dimensions, embedding model, ids and
//!   vectors in insertion order, and the SHA-256 of `docstore.json`
//!
//! Both files are written to temporaries in the same directory and renamed
//! into place, docstore first and index last. A process killed between the
//! two renames leaves an index whose checksum no longer matches the
//! docstore, which [`FsVectorStore::load`](VectorStore::load) reports as a
//! [`RagError::Store`] instead of guessing at recovery.
//!
//! Several processes may share one data directory. Every read holds a shared
//! lock on `<name>/.lock` and every create or append holds it exclusively for
//! the whole read-check-write, re-reading the files when another writer got
//! there first.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use std::time::SystemTime;

use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::collection::{CollectionInfo, CollectionSlot, CollectionSnapshot};
use crate::document::{Chunk, StoredEntry};
use crate::error::{RagError, Result};
use crate::vectorstore::{VectorStore, validate_collection_name};

const FORMAT_VERSION: u32 = 1;
const INDEX_FILE: &str = "index.json";
const DOCSTORE_FILE: &str = "docstore.json";
const LOCK_FILE: &str = ".lock";
const COLLECTIONS_DIR: &str = "collections";

#[derive(Serialize, Deserialize)]
struct IndexFile {
    format_version: u32,
    name: String,
    dimensions: usize,
    embedding_model: String,
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
    docstore_sha256: String,
}

#[derive(Serialize, Deserialize)]
struct DocstoreFile {
    entries: BTreeMap<String, Chunk>,
}

/// Size and modification time of `index.json` when this process last read
/// or wrote it. A different stamp on disk means another writer appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

fn index_stamp(dir: &Path) -> Option<FileStamp> {
    let meta = std::fs::metadata(dir.join(INDEX_FILE)).ok()?;
    Some(FileStamp { len: meta.len(), modified: meta.modified().ok() })
}

/// An advisory lock on a collection directory, released on drop.
struct DirLock(File);

impl DirLock {
    fn open(name: &str, dir: &Path) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(LOCK_FILE))
            .map_err(|e| RagError::store(name, format!("cannot open lock file: {e}")))
    }

    fn shared(name: &str, dir: &Path) -> Result<Self> {
        let file = Self::open(name, dir)?;
        FileExt::lock_shared(&file)
            .map_err(|e| RagError::store(name, format!("cannot lock collection: {e}")))?;
        Ok(Self(file))
    }

    fn exclusive(name: &str, dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| {
            RagError::store(name, format!("cannot create collection directory: {e}"))
        })?;
        let file = Self::open(name, dir)?;
        FileExt::lock_exclusive(&file)
            .map_err(|e| RagError::store(name, format!("cannot lock collection: {e}")))?;
        Ok(Self(file))
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

/// Read a collection under a shared lock.
fn read_locked(name: &str, dir: &Path) -> Result<(CollectionSnapshot, Option<FileStamp>)> {
    if !dir.exists() {
        return Err(RagError::not_found(name));
    }
    let _lock = DirLock::shared(name, dir)?;
    let snapshot = read_collection(name, dir)?;
    Ok((snapshot, index_stamp(dir)))
}

/// One open collection: the visible snapshot and the stamp it was read at.
#[derive(Debug)]
struct OpenCollection {
    slot: CollectionSlot,
    stamp: std::sync::Mutex<Option<FileStamp>>,
}

impl OpenCollection {
    fn new(snapshot: CollectionSnapshot, stamp: Option<FileStamp>) -> Arc<Self> {
        Arc::new(Self { slot: CollectionSlot::new(snapshot), stamp: std::sync::Mutex::new(stamp) })
    }

    fn stamp(&self) -> Option<FileStamp> {
        *self.stamp.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_stamp(&self, stamp: Option<FileStamp>) {
        *self.stamp.lock().unwrap_or_else(PoisonError::into_inner) = stamp;
    }
}

/// A [`VectorStore`] that persists collections as JSON files on disk.
///
/// Open collections are cached. Appends from this store queue on the cached
/// slot; appends from other stores or processes are serialized by the
/// collection's lock file, and a cached snapshot is re-read once the index on
/// disk has changed underneath it.
#[derive(Debug)]
pub struct FsVectorStore {
    root: PathBuf,
    open: Mutex<HashMap<String, Arc<OpenCollection>>>,
}

impl FsVectorStore {
    /// Create a store rooted at `root` (created lazily on first write).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), open: Mutex::new(HashMap::new()) }
    }

    /// The data directory this store writes under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, name: &str) -> PathBuf {
        self.root.join(COLLECTIONS_DIR).join(name)
    }

    async fn cached(&self, name: &str) -> Option<Arc<OpenCollection>> {
        self.open.lock().await.get(name).cloned()
    }

    async fn open_collection(&self, name: &str) -> Result<Arc<OpenCollection>> {
        validate_collection_name(name)?;
        let mut open = self.open.lock().await;
        if let Some(collection) = open.get(name) {
            return Ok(collection.clone());
        }

        let dir = self.collection_dir(name);
        let label = name.to_string();
        let (snapshot, stamp) = blocking(name, move || read_locked(&label, &dir)).await?;
        info!(collection = name, entries = snapshot.len(), "loaded collection");

        let collection = OpenCollection::new(snapshot, stamp);
        open.insert(name.to_string(), collection.clone());
        Ok(collection)
    }

    /// The current snapshot, re-read first if another writer changed the
    /// index. A failed re-read keeps serving the last good snapshot.
    async fn fresh_snapshot(&self, name: &str) -> Result<Arc<CollectionSnapshot>> {
        let collection = self.open_collection(name).await?;
        let dir = self.collection_dir(name);

        let stamp_dir = dir.clone();
        let on_disk = blocking(name, move || Ok(index_stamp(&stamp_dir))).await?;
        if on_disk.is_none() || on_disk == collection.stamp() {
            return Ok(collection.slot.snapshot().await);
        }

        let label = name.to_string();
        let target = collection.clone();
        let refreshed = collection
            .slot
            .update(move |current| async move {
                if index_stamp(&dir) == target.stamp() {
                    return Ok(current);
                }
                let name = label.clone();
                let (snapshot, stamp) = blocking(&label, move || read_locked(&name, &dir)).await?;
                target.set_stamp(stamp);
                Ok(Arc::new(snapshot))
            })
            .await;

        match refreshed {
            Ok(snapshot) => {
                debug!(collection = name, entries = snapshot.len(), "reloaded changed collection");
                Ok(snapshot)
            }
            Err(e) => {
                warn!(
                    collection = name,
                    error = %e,
                    "cannot reload collection; keeping cached copy"
                );
                Ok(collection.slot.snapshot().await)
            }
        }
    }
}

#[async_trait]
impl VectorStore for FsVectorStore {
    async fn create_or_open(
        &self,
        name: &str,
        dimensions: usize,
        embedding_model: &str,
    ) -> Result<CollectionInfo> {
        validate_collection_name(name)?;

        let collection = match self.open_collection(name).await {
            Ok(collection) => collection,
            Err(RagError::NotFound { .. }) => {
                let mut open = self.open.lock().await;
                match open.get(name) {
                    Some(collection) => collection.clone(),
                    None => {
                        let dir = self.collection_dir(name);
                        let label = name.to_string();
                        let model = embedding_model.to_string();
                        let (snapshot, stamp) = blocking(name, move || {
                            let _lock = DirLock::exclusive(&label, &dir)?;
                            // Another process may have created it since we looked.
                            if dir.join(INDEX_FILE).exists() {
                                let snapshot = read_collection(&label, &dir)?;
                                return Ok((snapshot, index_stamp(&dir)));
                            }
                            let snapshot = CollectionSnapshot::empty(&label, dimensions, model);
                            write_collection(&dir, &snapshot)?;
                            info!(collection = %label, dimensions, "created collection");
                            Ok((snapshot, index_stamp(&dir)))
                        })
                        .await?;

                        let collection = OpenCollection::new(snapshot, stamp);
                        open.insert(name.to_string(), collection.clone());
                        collection
                    }
                }
            }
            Err(e) => return Err(e),
        };

        let info = collection.slot.snapshot().await.info();
        if info.dimensions != dimensions {
            return Err(RagError::Config(format!(
                "collection '{name}' holds {}-dimensional vectors, embedder produces {dimensions}",
                info.dimensions
            )));
        }
        if info.embedding_model != embedding_model {
            warn!(
                collection = name,
                stored = %info.embedding_model,
                configured = embedding_model,
                "collection was built with a different embedding model"
            );
        }
        Ok(info)
    }

    async fn load(&self, name: &str) -> Result<CollectionInfo> {
        Ok(self.fresh_snapshot(name).await?.info())
    }

    async fn append(&self, name: &str, entries: Vec<StoredEntry>) -> Result<CollectionInfo> {
        let collection = self.cached(name).await.ok_or_else(|| {
            RagError::store(name, "collection is not open; call create_or_open or load first")
        })?;

        let dir = self.collection_dir(name);
        let label = name.to_string();
        let count = entries.len();

        // Run detached so an abandoned caller cannot stop between the
        // on-disk rename and the in-memory swap.
        let task = tokio::spawn(async move {
            let target = collection.clone();
            collection
                .slot
                .update(move |current| async move {
                    let seen = target.stamp();
                    let name = label.clone();
                    let (next, stamp) = blocking(&label, move || {
                        let _lock = DirLock::exclusive(&name, &dir)?;
                        let base = if index_stamp(&dir) == seen {
                            current
                        } else {
                            debug!(
                                collection = %name,
                                "index changed on disk; re-reading before append"
                            );
                            Arc::new(read_collection(&name, &dir)?)
                        };
                        let next = base.with_appended(entries);
                        write_collection(&dir, &next)?;
                        Ok((Arc::new(next), index_stamp(&dir)))
                    })
                    .await?;
                    target.set_stamp(stamp);
                    Ok(next)
                })
                .await
        });
        let next = task
            .await
            .map_err(|e| RagError::store(name, format!("append task failed: {e}")))??;

        debug!(collection = name, appended = count, total = next.len(), "persisted collection");
        Ok(next.info())
    }

    async fn snapshot(&self, name: &str) -> Result<Arc<CollectionSnapshot>> {
        self.fresh_snapshot(name).await
    }

    async fn list(&self) -> Result<Vec<CollectionInfo>> {
        let dir = self.root.join(COLLECTIONS_DIR);
        let names = blocking("*", move || {
            let mut names = Vec::new();
            let read_dir = match std::fs::read_dir(&dir) {
                Ok(read_dir) => read_dir,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
                Err(e) => {
                    return Err(RagError::store("*", format!("cannot list collections: {e}")));
                }
            };
            for entry in read_dir.flatten() {
                if entry.path().is_dir() {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
            names.sort();
            Ok(names)
        })
        .await?;

        let mut infos = Vec::with_capacity(names.len());
        for name in names {
            match self.load(&name).await {
                Ok(info) => infos.push(info),
                Err(e) => warn!(collection = %name, error = %e, "skipping unreadable collection"),
            }
        }
        Ok(infos)
    }
}

/// Run blocking file work off the async workers.
async fn blocking<T, F>(collection: &str, work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| RagError::store(collection, format!("file task failed: {e}")))?
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn write_atomic(dir: &Path, file_name: &str, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dir.join(file_name)).map_err(|e| e.error)?;
    Ok(())
}

fn write_collection(dir: &Path, snapshot: &CollectionSnapshot) -> Result<()> {
    let name = snapshot.name();
    let io_err = |what: &str, e: std::io::Error| RagError::store(name, format!("{what}: {e}"));

    std::fs::create_dir_all(dir).map_err(|e| io_err("cannot create collection directory", e))?;

    let docstore = DocstoreFile {
        entries: snapshot.entries().iter().map(|e| (e.id.clone(), e.chunk.clone())).collect(),
    };
    let docstore_bytes = serde_json::to_vec(&docstore)
        .map_err(|e| RagError::store(name, format!("cannot serialize docstore: {e}")))?;

    let index = IndexFile {
        format_version: FORMAT_VERSION,
        name: name.to_string(),
        dimensions: snapshot.dimensions(),
        embedding_model: snapshot.embedding_model().to_string(),
        ids: snapshot.entries().iter().map(|e| e.id.clone()).collect(),
        vectors: snapshot.entries().iter().map(|e| e.vector.clone()).collect(),
        docstore_sha256: sha256_hex(&docstore_bytes),
    };
    let index_bytes = serde_json::to_vec(&index)
        .map_err(|e| RagError::store(name, format!("cannot serialize index: {e}")))?;

    write_atomic(dir, DOCSTORE_FILE, &docstore_bytes)
        .map_err(|e| io_err("cannot write docstore", e))?;
    write_atomic(dir, INDEX_FILE, &index_bytes).map_err(|e| io_err("cannot write index", e))?;
    Ok(())
}

fn read_collection(name: &str, dir: &Path) -> Result<CollectionSnapshot> {
    if !dir.exists() {
        return Err(RagError::not_found(name));
    }

    let read = |file: &str| -> Result<Vec<u8>> {
        std::fs::read(dir.join(file)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RagError::store(name, format!("{file} is missing; collection is partially written"))
            } else {
                RagError::store(name, format!("cannot read {file}: {e}"))
            }
        })
    };
    let index_bytes = read(INDEX_FILE)?;
    let docstore_bytes = read(DOCSTORE_FILE)?;

    let index: IndexFile = serde_json::from_slice(&index_bytes)
        .map_err(|e| RagError::store(name, format!("corrupt {INDEX_FILE}: {e}")))?;
    if index.format_version != FORMAT_VERSION {
        return Err(RagError::store(
            name,
            format!("unsupported format version {}", index.format_version),
        ));
    }
    if index.docstore_sha256 != sha256_hex(&docstore_bytes) {
        return Err(RagError::store(
            name,
            "docstore checksum does not match index; collection is partially written",
        ));
    }

    let mut docstore: DocstoreFile = serde_json::from_slice(&docstore_bytes)
        .map_err(|e| RagError::store(name, format!("corrupt {DOCSTORE_FILE}: {e}")))?;

    let unique_ids: HashSet<&String> = index.ids.iter().collect();
    if index.ids.len() != index.vectors.len()
        || unique_ids.len() != index.ids.len()
        || index.ids.len() != docstore.entries.len()
    {
        return Err(RagError::store(name, "index and docstore disagree on the stored entries"));
    }
    if let Some(bad) = index.vectors.iter().find(|v| v.len() != index.dimensions) {
        return Err(RagError::store(
            name,
            format!("vector of length {} in a {}-dimensional index", bad.len(), index.dimensions),
        ));
    }

    let mut entries = Vec::with_capacity(index.ids.len());
    for (id, vector) in index.ids.into_iter().zip(index.vectors) {
        let chunk = docstore
            .entries
            .remove(&id)
            .ok_or_else(|| RagError::store(name, format!("id {id} missing from docstore")))?;
        entries.push(StoredEntry { id, vector, chunk });
    }

    Ok(CollectionSnapshot::from_entries(name, index.dimensions, index.embedding_model, entries))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, text: &str) -> StoredEntry {
        StoredEntry {
            id: id.to_string(),
            vector: vec![0.6, 0.8],
            chunk: Chunk {
                text: text.to_string(),
                source_id: "a.pdf".into(),
                chunk_index: 0,
                char_offset: 0,
                metadata: HashMap::from([("source".to_string(), "a.pdf".to_string())]),
            },
        }
    }

    #[tokio::test]
    async fn load_missing_collection_is_not_found() {
        let temp = tempfile::tempdir().unwrap();
        let store = FsVectorStore::new(temp.path());
        let err = store.load("nonexistent").await.unwrap_err();
        assert!(matches!(err, RagError::NotFound { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn created_collection_is_persisted_empty() {
        let temp = tempfile::tempdir().unwrap();
        FsVectorStore::new(temp.path()).create_or_open("docs", 2, "test").await.unwrap();

        let info = FsVectorStore::new(temp.path()).load("docs").await.unwrap();
        assert_eq!(info.len, 0);
        assert_eq!(info.dimensions, 2);
        assert_eq!(info.embedding_model, "test");
    }

    #[tokio::test]
    async fn missing_index_file_is_a_store_error() {
        let temp = tempfile::tempdir().unwrap();
        let store = FsVectorStore::new(temp.path());
        store.create_or_open("docs", 2, "test").await.unwrap();
        store.append("docs", vec![entry("a", "alpha")]).await.unwrap();

        std::fs::remove_file(temp.path().join("collections/docs/index.json")).unwrap();
        let err = FsVectorStore::new(temp.path()).load("docs").await.unwrap_err();
        assert!(matches!(err, RagError::Store { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn docstore_newer_than_index_is_a_store_error() {
        let temp = tempfile::tempdir().unwrap();
        let store = FsVectorStore::new(temp.path());
        store.create_or_open("docs", 2, "test").await.unwrap();
        store.append("docs", vec![entry("a", "alpha")]).await.unwrap();

        // Simulate a crash after the docstore rename but before the index rename.
        let dir = temp.path().join("collections/docs");
        let stale_index = std::fs::read(dir.join(INDEX_FILE)).unwrap();
        store.append("docs", vec![entry("b", "beta")]).await.unwrap();
        std::fs::write(dir.join(INDEX_FILE), stale_index).unwrap();

        let err = FsVectorStore::new(temp.path()).load("docs").await.unwrap_err();
        assert!(matches!(err, RagError::Store { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn reopening_with_other_dimensions_is_a_config_error() {
        let temp = tempfile::tempdir().unwrap();
        FsVectorStore::new(temp.path()).create_or_open("docs", 2, "test").await.unwrap();
        let err =
            FsVectorStore::new(temp.path()).create_or_open("docs", 3, "test").await.unwrap_err();
        assert!(matches!(err, RagError::Config(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn list_reports_every_collection() {
        let temp = tempfile::tempdir().unwrap();
        let store = FsVectorStore::new(temp.path());
        assert!(store.list().await.unwrap().is_empty());

        store.create_or_open("b", 2, "test").await.unwrap();
        store.create_or_open("a", 2, "test").await.unwrap();
        store.append("a", vec![entry("x", "x")]).await.unwrap();

        let listed = FsVectorStore::new(temp.path()).list().await.unwrap();
        let summary: Vec<(String, usize)> = listed.into_iter().map(|i| (i.name, i.len)).collect();
        assert_eq!(summary, vec![("a".to_string(), 1), ("b".to_string(), 0)]);
    }
}
