//! Content-addressed raw document storage.
//!
//! Objects are keyed `{source}/{ticker|NA}/{doc_type}/{yyyy-mm-dd}/{sha256}.{ext}`.
//! A small index entry at `_checksums/{sha256}` records the key of the first
//! write, so `put` is idempotent and `exists(checksum)` is a single lookup.
//!
//! Backends:
//! - [`FsBackend`]: local directory, atomic temp-file + rename writes
//! - [`MemoryBackend`]: in-process map, with failure injection for tests

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::checksum::sha256_hex;

const CHECKSUM_INDEX_PREFIX: &str = "_checksums";
const DEFAULT_EXTENSION: &str = "html";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            StoreError::NotFound(e.to_string())
        } else {
            StoreError::Backend(e.to_string())
        }
    }
}

// ── Backends ──────────────────────────────────────────────────────────────────

#[async_trait]
pub trait BlobBackend: Send + Sync {
    async fn write(&self, key: &str, data: &[u8]) -> Result<(), StoreError>;
    async fn read(&self, key: &str) -> Result<Vec<u8>, StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
}

/// Stores objects as files under a root directory.
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let rel = Path::new(key);
        let valid = !key.is_empty()
            && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(rel))
    }

    /// Write, read back and delete a probe object.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        let key = format!("_health/{}", Uuid::new_v4());
        let probe = b"finfeed-health-probe";
        self.write(&key, probe).await?;
        let back = self.read(&key).await?;
        self.delete(&key).await?;
        if back != probe {
            return Err(StoreError::Backend("health probe read back different bytes".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobBackend for FsBackend {
    async fn write(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let full_path = self.full_path(key)?;
        debug!(key = %key, size = data.len(), "store: write");

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "store: create_dir_all failed");
                StoreError::Backend(e.to_string())
            })?;
        }

        // Temp file + rename
        let file_name = full_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
        let temp_path = full_path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        file.write_all(data).await.map_err(|e| StoreError::Backend(e.to_string()))?;
        file.sync_all().await.map_err(|e| StoreError::Backend(e.to_string()))?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, &full_path).await {
            warn!(from = %temp_path.display(), to = %full_path.display(), error = %e, "store: rename failed");
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::Backend(e.to_string()));
        }
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let full_path = self.full_path(key)?;
        match fs::read(&full_path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let full_path = self.full_path(key)?;
        if fs::try_exists(&full_path).await? {
            fs::remove_file(full_path).await?;
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let full_path = self.full_path(key)?;
        Ok(fs::try_exists(full_path).await?)
    }
}

/// In-memory backend with a write counter and a switch to make writes fail.
#[derive(Default)]
pub struct MemoryBackend {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful writes so far, index entries included.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Keys of stored objects, excluding checksum index entries.
    pub fn object_keys(&self) -> Vec<String> {
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|k| !k.starts_with(CHECKSUM_INDEX_PREFIX))
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobBackend for MemoryBackend {
    async fn write(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected write failure".into()));
        }
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.insert(key.to_string(), data.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.get(key).cloned().ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        Ok(objects.contains_key(key))
    }
}

// ── Key derivation ────────────────────────────────────────────────────────────

/// URL path suffixes, checked in order.
const URL_SUFFIX_RULES: &[(&[&str], &str)] = &[
    (&[".pdf"],          "pdf"),
    (&[".html", ".htm"], "html"),
    (&[".xml"],          "xml"),
    (&[".json"],         "json"),
];

/// Content-type substrings, checked in order.
const CONTENT_TYPE_RULES: &[(&str, &str)] = &[
    ("pdf",  "pdf"),
    ("html", "html"),
    ("xml",  "xml"),
    ("json", "json"),
];

fn url_path(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_lowercase(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_lowercase(),
    }
}

/// File extension from the URL path suffix, else the content type, else `html`.
pub fn infer_extension(url_hint: Option<&str>, content_type: Option<&str>) -> &'static str {
    if let Some(url) = url_hint {
        let path = url_path(url);
        for (suffixes, ext) in URL_SUFFIX_RULES {
            if suffixes.iter().any(|s| path.ends_with(s)) {
                return ext;
            }
        }
    }
    if let Some(ct) = content_type {
        let ct = ct.to_lowercase();
        for (needle, ext) in CONTENT_TYPE_RULES {
            if ct.contains(needle) {
                return ext;
            }
        }
    }
    DEFAULT_EXTENSION
}

fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Describes the object passed to [`ContentStore::put`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectMeta<'a> {
    pub source: &'a str,
    pub doc_type: &'a str,
    pub entity_tag: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub url_hint: Option<&'a str>,
}

/// Pure key derivation.
pub fn derive_object_key(meta: &ObjectMeta<'_>, checksum: &str, date: NaiveDate) -> String {
    let ext = infer_extension(meta.url_hint, meta.content_type);
    format!(
        "{}/{}/{}/{}/{}.{}",
        sanitize_segment(meta.source),
        meta.entity_tag.map(sanitize_segment).unwrap_or_else(|| "NA".to_string()),
        sanitize_segment(meta.doc_type),
        date.format("%Y-%m-%d"),
        checksum,
        ext
    )
}

fn index_key(checksum: &str) -> String {
    format!("{}/{}", CHECKSUM_INDEX_PREFIX, checksum)
}

// ── Content store ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub checksum: String,
    /// False when the bytes were already present and nothing was written.
    pub written: bool,
}

#[derive(Clone)]
pub struct ContentStore {
    backend: Arc<dyn BlobBackend>,
}

impl ContentStore {
    pub fn new(backend: Arc<dyn BlobBackend>) -> Self {
        Self { backend }
    }

    /// Checksum `data` and persist it unless an object with that checksum exists.
    pub async fn put(&self, data: &[u8], meta: &ObjectMeta<'_>) -> Result<StoredObject, StoreError> {
        let checksum = sha256_hex(data);

        if let Some(key) = self.locate(&checksum).await? {
            debug!(checksum = %checksum, key = %key, "store: content already present");
            return Ok(StoredObject { key, checksum, written: false });
        }

        let key = derive_object_key(meta, &checksum, Utc::now().date_naive());
        self.backend.write(&key, data).await?;
        // Index goes last so exists() never points at a missing object.
        self.backend.write(&index_key(&checksum), key.as_bytes()).await?;

        info!(key = %key, checksum = %checksum, bytes = data.len(), "Stored object");
        Ok(StoredObject { key, checksum, written: true })
    }

    pub async fn exists(&self, checksum: &str) -> Result<bool, StoreError> {
        self.backend.exists(&index_key(checksum)).await
    }

    /// Key of the object holding `checksum`, if any.
    pub async fn locate(&self, checksum: &str) -> Result<Option<String>, StoreError> {
        match self.backend.read(&index_key(checksum)).await {
            Ok(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| StoreError::Backend(format!("corrupt checksum index for {checksum}: {e}"))),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.backend.read(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta<'a>(url: &'a str) -> ObjectMeta<'a> {
        ObjectMeta {
            source: "sec",
            doc_type: "10k",
            entity_tag: Some("AAPL"),
            content_type: None,
            url_hint: Some(url),
        }
    }

    #[test]
    fn test_extension_rules_order() {
        assert_eq!(infer_extension(Some("https://x.com/a/report.PDF"), Some("text/html")), "pdf");
        assert_eq!(infer_extension(Some("https://x.com/a/page.htm?x=1"), None), "html");
        assert_eq!(infer_extension(Some("https://x.com/feed.xml"), None), "xml");
        assert_eq!(infer_extension(Some("https://x.com/data.json"), None), "json");
        assert_eq!(infer_extension(Some("https://x.com/download"), Some("application/pdf")), "pdf");
        assert_eq!(infer_extension(Some("https://x.com/rss"), Some("application/rss+xml")), "xml");
        assert_eq!(infer_extension(None, Some("application/json; charset=utf-8")), "json");
        assert_eq!(infer_extension(Some("https://x.com/download"), None), "html");
        assert_eq!(infer_extension(None, None), "html");
    }

    #[test]
    fn test_key_derivation_is_pure() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let m = meta("https://www.sec.gov/a/aapl-10k.htm");
        let key = derive_object_key(&m, "abc123", date);
        assert_eq!(key, "sec/AAPL/10k/2024-03-01/abc123.html");
        assert_eq!(key, derive_object_key(&m, "abc123", date));
    }

    #[test]
    fn test_key_uses_na_and_sanitizes_segments() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let m = ObjectMeta { source: "../rss", doc_type: "feed item", ..Default::default() };
        let key = derive_object_key(&m, "ff", date);
        assert_eq!(key, ".._rss/NA/feed_item/2024-03-01/ff.html");
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let backend = Arc::new(MemoryBackend::new());
        let store = ContentStore::new(backend.clone());
        let m = meta("https://x.com/r.pdf");

        let first = store.put(b"%PDF-1.7 report", &m).await.unwrap();
        let second = store.put(b"%PDF-1.7 report", &m).await.unwrap();
        assert!(first.written);
        assert!(!second.written);
        assert_eq!(first.key, second.key);
        assert_eq!(first.checksum, second.checksum);
        assert_eq!(backend.object_keys().len(), 1);
        assert_eq!(backend.write_count(), 2);
    }

    #[tokio::test]
    async fn test_exists_and_get() {
        let store = ContentStore::new(Arc::new(MemoryBackend::new()));
        let checksum = sha256_hex(b"hello");
        assert!(!store.exists(&checksum).await.unwrap());

        let obj = store.put(b"hello", &meta("https://x.com/a.json")).await.unwrap();
        assert!(store.exists(&checksum).await.unwrap());
        assert_eq!(store.get(&obj.key).await.unwrap(), b"hello");
        assert_eq!(store.locate(&checksum).await.unwrap(), Some(obj.key));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = ContentStore::new(Arc::new(MemoryBackend::new()));
        assert!(matches!(store.get("nope").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_write_failure_surfaces_and_leaves_no_index() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_fail_writes(true);
        let store = ContentStore::new(backend.clone());

        let err = store.put(b"x", &meta("https://x.com/a")).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(!store.exists(&sha256_hex(b"x")).await.unwrap());
    }

    #[tokio::test]
    async fn test_fs_backend_roundtrip_and_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path());
        backend.health_check().await.unwrap();

        backend.write("a/b/c.txt", b"data").await.unwrap();
        assert!(backend.exists("a/b/c.txt").await.unwrap());
        assert_eq!(backend.read("a/b/c.txt").await.unwrap(), b"data");
        backend.delete("a/b/c.txt").await.unwrap();
        assert!(!backend.exists("a/b/c.txt").await.unwrap());

        assert!(matches!(backend.write("../escape", b"x").await, Err(StoreError::InvalidKey(_))));
        assert!(matches!(backend.write("/abs", b"x").await, Err(StoreError::InvalidKey(_))));
        assert!(matches!(backend.read("a/missing").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_content_store_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(Arc::new(FsBackend::new(dir.path())));
        let obj = store.put(b"<rss/>", &meta("https://x.com/feed.xml")).await.unwrap();
        assert!(obj.key.ends_with(".xml"));
        assert!(dir.path().join(&obj.key).exists());
        let again = store.put(b"<rss/>", &meta("https://x.com/other.xml")).await.unwrap();
        assert_eq!(again.key, obj.key);
    }
}
