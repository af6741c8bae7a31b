//! Flat-file document store
//!
//! Each store owns one JSON file holding an entire collection. Every
//! operation re-reads the file; every mutation rewrites it in full through a
//! temporary file and an atomic rename. A per-store mutex spans the whole
//! read-modify-write cycle, so concurrent writers never lose updates.
//! Each write goes through its own uniquely named temporary file.

mod id;
mod layout;
mod record;

pub use id::{IdStrategy, RecordId};
pub use layout::FileLayout;
pub use record::{Record, ID_FIELD};

use layout::Document;
use record::merge;
use serde::Deserialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;

use crate::logger;

pub type StoreResult<T> = Result<T, StoreError>;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record carries the requested id
    #[error("record {0} not found")]
    NotFound(RecordId),

    /// The backing file could not be read
    #[error("backing file {} is unavailable: {source}", .path.display())]
    Unavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The backing file is not a collection in the configured layout
    #[error("backing file {} is corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// The collection could not be written back
    #[error("failed to write {}: {source}", .path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize collection: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Every candidate id is already taken
    #[error("no unused id left for {}", .path.display())]
    IdsExhausted { path: PathBuf },
}

impl StoreError {
    /// Whether the failure happened while persisting rather than loading
    pub const fn is_write_failure(&self) -> bool {
        matches!(
            self,
            Self::WriteFailed { .. } | Self::Serialize(_) | Self::IdsExhausted { .. }
        )
    }
}

/// What to do when the backing file does not exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingFilePolicy {
    /// Treat an absent or blank file as an empty collection
    #[default]
    Empty,
    /// Report an absent file as unavailable
    Error,
}

/// Store options, one set per resource
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub layout: FileLayout,
    pub id_strategy: IdStrategy,
    pub missing_file: MissingFilePolicy,
}

/// A collection persisted to a single JSON file
#[derive(Debug)]
pub struct DocumentStore {
    path: PathBuf,
    options: StoreOptions,
    lock: Mutex<()>,
}

impl DocumentStore {
    pub fn new(path: impl Into<PathBuf>, options: StoreOptions) -> Self {
        Self {
            path: path.into(),
            options,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Parse a path segment with this store's id type
    pub fn parse_id(&self, segment: &str) -> Option<RecordId> {
        self.options.id_strategy.parse(segment)
    }

    /// Read the whole collection
    pub async fn load_all(&self) -> StoreResult<Vec<Record>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_document(self.options.missing_file).await?.records)
    }

    /// Replace the whole collection
    #[allow(dead_code)] // Used in tests and for bulk imports by library callers
    pub async fn save_all(&self, records: Vec<Record>) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document(MissingFilePolicy::Empty).await?;
        document.records = records;
        self.write_document(document).await
    }

    pub async fn get_one(&self, id: &RecordId) -> StoreResult<Record> {
        self.load_all()
            .await?
            .into_iter()
            .find(|r| id.matches(r.get(ID_FIELD)))
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    /// Append a record under a freshly allocated id. A caller-supplied `id` is overwritten.
    pub async fn create(&self, mut fields: Record) -> StoreResult<Record> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document(self.options.missing_file).await?;

        let Some(id) = self.options.id_strategy.allocate(&document.records) else {
            return Err(StoreError::IdsExhausted {
                path: self.path.clone(),
            });
        };
        fields.insert(ID_FIELD.to_string(), id.to_value());
        document.records.push(fields.clone());

        self.write_document(document).await?;
        logger::log_debug(&format!(
            "[Store] Created record {id} in {}",
            self.path.display()
        ));
        Ok(fields)
    }

    /// Shallow-merge `patch` into the record with `id`
    pub async fn update(&self, id: &RecordId, patch: Record) -> StoreResult<Record> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document(self.options.missing_file).await?;

        let Some(existing) = document
            .records
            .iter_mut()
            .find(|r| id.matches(r.get(ID_FIELD)))
        else {
            return Err(StoreError::NotFound(id.clone()));
        };
        merge(existing, patch);
        let updated = existing.clone();

        self.write_document(document).await?;
        Ok(updated)
    }

    /// Remove the record with `id` and return it
    pub async fn delete(&self, id: &RecordId) -> StoreResult<Record> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document(self.options.missing_file).await?;

        let Some(index) = document
            .records
            .iter()
            .position(|r| id.matches(r.get(ID_FIELD)))
        else {
            return Err(StoreError::NotFound(id.clone()));
        };
        let removed = document.records.remove(index);

        self.write_document(document).await?;
        Ok(removed)
    }

    async fn read_document(&self, missing: MissingFilePolicy) -> StoreResult<Document> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound && missing == MissingFilePolicy::Empty => {
                logger::log_debug(&format!(
                    "[Store] {} does not exist, using an empty collection",
                    self.path.display()
                ));
                return Ok(Document::default());
            }
            Err(source) => {
                return Err(StoreError::Unavailable {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if missing == MissingFilePolicy::Empty && bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Document::default());
        }

        let value = serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        self.options
            .layout
            .decode(value)
            .map_err(|reason| StoreError::Corrupt {
                path: self.path.clone(),
                reason,
            })
    }

    /// Serialize and replace the backing file atomically
    async fn write_document(&self, document: Document) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(&self.options.layout.encode(document))?;
        let path = self.path.clone();
        let result = tokio::task::spawn_blocking(move || replace_file(&path, &json))
            .await
            .unwrap_or_else(|e| Err(io::Error::other(e)));

        result.map_err(|source| StoreError::WriteFailed {
            path: self.path.clone(),
            source,
        })
    }
}

/// Write `contents` to a fresh temporary file next to `path`, fsync it, then
/// rename it over `path`. The temporary file is removed if any step fails.
fn replace_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut prefix = path.file_name().unwrap_or_default().to_os_string();
    prefix.push(".");
    let mut temp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(parent)?;

    // Keep the permissions of the file being replaced
    match std::fs::metadata(path) {
        Ok(meta) => temp.as_file().set_permissions(meta.permissions())?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => set_new_file_permissions(temp.as_file())?,
        Err(e) => return Err(e),
    }

    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(unix)]
fn set_new_file_permissions(file: &std::fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_new_file_permissions(_file: &std::fs::File) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn store_in(dir: &TempDir, options: StoreOptions) -> DocumentStore {
        DocumentStore::new(dir.path().join("db.json"), options)
    }

    fn dir_entries(dir: &TempDir) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_by_default() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, StoreOptions::default());
        assert!(store.load_all().await.unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_missing_file_error_policy() {
        let dir = TempDir::new().unwrap();
        let store = store_in(
            &dir,
            StoreOptions {
                missing_file: MissingFilePolicy::Error,
                ..StoreOptions::default()
            },
        );
        assert!(matches!(
            store.load_all().await,
            Err(StoreError::Unavailable { .. })
        ));
        assert!(matches!(
            store.create(record(json!({"a": 1}))).await,
            Err(StoreError::Unavailable { .. })
        ));
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_blank_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, StoreOptions::default());
        std::fs::write(store.path(), "  \n").unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, StoreOptions::default());
        std::fs::write(store.path(), "{not json").unwrap();

        assert!(matches!(
            store.load_all().await,
            Err(StoreError::Corrupt { .. })
        ));
        assert!(matches!(
            store.create(record(json!({"a": 1}))).await,
            Err(StoreError::Corrupt { .. })
        ));
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "{not json");
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_persists_pretty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, StoreOptions::default());

        let created = store
            .create(record(json!({"name": "Ada", "id": "ignored"})))
            .await
            .unwrap();
        assert_eq!(Value::Object(created), json!({"name": "Ada", "id": 1}));

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(text, "[\n  {\n    \"name\": \"Ada\",\n    \"id\": 1\n  }\n]");
        assert_eq!(dir_entries(&dir), vec!["db.json".to_string()]);
    }

    #[tokio::test]
    async fn test_round_trip_and_idempotent_read() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, StoreOptions::default());
        store.create(record(json!({"n": 1}))).await.unwrap();
        let created = store.create(record(json!({"n": 2}))).await.unwrap();

        let first = store.load_all().await.unwrap();
        let second = store.load_all().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first.iter().filter(|r| **r == created).count(), 1);
        assert_eq!(first[0]["n"], json!(1));
    }

    #[tokio::test]
    async fn test_update_merges_and_keeps_id() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, StoreOptions::default());
        let created = store
            .create(record(json!({"text": "buy milk", "done": false})))
            .await
            .unwrap();
        let id = RecordId::Number(created["id"].as_u64().unwrap());

        let updated = store
            .update(&id, record(json!({"done": true, "id": 500})))
            .await
            .unwrap();
        assert_eq!(
            Value::Object(updated.clone()),
            json!({"text": "buy milk", "done": true, "id": 1})
        );
        assert_eq!(store.get_one(&id).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn test_delete_completeness() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, StoreOptions::default());
        for n in 0..3 {
            store.create(record(json!({"n": n}))).await.unwrap();
        }
        let id = RecordId::Number(2);

        let removed = store.delete(&id).await.unwrap();
        assert_eq!(removed["n"], json!(1));
        assert_eq!(store.load_all().await.unwrap().len(), 2);
        assert!(matches!(
            store.get_one(&id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_not_found_does_not_mutate() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, StoreOptions::default());
        store.create(record(json!({"n": 1}))).await.unwrap();
        let before = std::fs::read(store.path()).unwrap();
        let missing = RecordId::Number(42);

        assert!(matches!(
            store.get_one(&missing).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.update(&missing, record(json!({"x": 1}))).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.delete(&missing).await,
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(std::fs::read(store.path()).unwrap(), before);
    }

    #[tokio::test]
    async fn test_wrapped_layout_with_token_ids() {
        let dir = TempDir::new().unwrap();
        let store = store_in(
            &dir,
            StoreOptions {
                layout: FileLayout::Wrapped {
                    field: "employees".to_string(),
                },
                id_strategy: IdStrategy::Token,
                missing_file: MissingFilePolicy::Empty,
            },
        );
        std::fs::write(store.path(), r#"{"version": 2, "employees": []}"#).unwrap();

        let created = store.create(record(json!({"name": "Bo"}))).await.unwrap();
        let token = created["id"].as_str().unwrap().to_string();
        assert!(token.parse::<u64>().is_ok());

        let on_disk: Value =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(on_disk["version"], json!(2));
        assert_eq!(on_disk["employees"][0]["id"], json!(token));

        let id = store.parse_id(&token).unwrap();
        assert_eq!(store.get_one(&id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn test_save_all_replaces_collection() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, StoreOptions::default());
        store.create(record(json!({"n": 1}))).await.unwrap();

        store
            .save_all(vec![record(json!({"id": 9, "n": 9}))])
            .await
            .unwrap();
        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0]["id"], json!(9));
    }

    #[tokio::test]
    async fn test_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let store = DocumentStore::new(
            dir.path().join("nested/data/todos.json"),
            StoreOptions::default(),
        );
        store.create(record(json!({"n": 1}))).await.unwrap();
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn test_concurrent_creates_are_not_lost() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store_in(&dir, StoreOptions::default()));

        let tasks: Vec<_> = (0..20)
            .map(|n| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.create(record(json!({"n": n}))).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 20);
        let mut ids: Vec<u64> = all.iter().map(|r| r["id"].as_u64().unwrap()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 20);
    }

    #[tokio::test]
    async fn test_create_refuses_when_ids_are_exhausted() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, StoreOptions::default());
        let contents = format!("[{{\"id\": {}}}]", u64::MAX);
        std::fs::write(store.path(), &contents).unwrap();

        let err = store.create(record(json!({"n": 1}))).await.unwrap_err();
        assert!(matches!(err, StoreError::IdsExhausted { .. }));
        assert!(err.is_write_failure());
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), contents);
    }

    #[test]
    fn test_failed_replace_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        // A non-empty directory at the target path makes the final rename fail
        let target = dir.path().join("db.json");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("keep"), "x").unwrap();

        assert!(replace_file(&target, b"[]").is_err());
        assert_eq!(dir_entries(&dir), vec!["db.json".to_string()]);
    }

    #[tokio::test]
    async fn test_stores_sharing_a_directory_use_distinct_temp_files() {
        let dir = TempDir::new().unwrap();
        let first = Arc::new(DocumentStore::new(
            dir.path().join("a.json"),
            StoreOptions::default(),
        ));
        let second = Arc::new(DocumentStore::new(
            dir.path().join("b.json"),
            StoreOptions::default(),
        ));

        let tasks: Vec<_> = (0..20)
            .map(|n| {
                let store = Arc::clone(if n % 2 == 0 { &first } else { &second });
                tokio::spawn(async move { store.create(record(json!({"n": n}))).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(first.load_all().await.unwrap().len(), 10);
        assert_eq!(second.load_all().await.unwrap().len(), 10);
        assert_eq!(
            dir_entries(&dir),
            vec!["a.json".to_string(), "b.json".to_string()]
        );
    }
}
