use crate::config::{AppConfig, StoreKind};
use crate::record::{RecordError, StatsRecord};
use async_trait::async_trait;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::{
    fs::{self, create_dir_all, File, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::Mutex,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store closed")]
    Closed,
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Record(#[from] RecordError),
}

impl StoreError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Append-only destination for polled records.
///
/// `write` appends after every earlier entry and `read_all` returns entries in
/// that same order. Once `close` has run, both fail with [`StoreError::Closed`];
/// `close` itself may be called any number of times.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Short human description used in log lines.
    fn describe(&self) -> String;

    async fn write(&self, record: &StatsRecord) -> Result<(), StoreError>;

    async fn read_all(&self) -> Result<Vec<StatsRecord>, StoreError>;

    async fn close(&self) -> Result<(), StoreError>;
}

/// Opens the backend selected in the configuration.
pub async fn open_store(config: &AppConfig) -> Result<Arc<dyn DataStore>, StoreError> {
    let store: Arc<dyn DataStore> = match config.datastore {
        StoreKind::Memory => Arc::new(MemoryStore::new()),
        StoreKind::File => Arc::new(FileStore::open(&config.data_file_path).await?),
    };
    tracing::info!(store = %store.describe(), "data store ready");
    Ok(store)
}

/// Keeps records for the lifetime of the process only.
pub struct MemoryStore {
    records: Mutex<Option<Vec<StatsRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Some(Vec::new())),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn write(&self, record: &StatsRecord) -> Result<(), StoreError> {
        let mut guard = self.records.lock().await;
        let records = guard.as_mut().ok_or(StoreError::Closed)?;
        records.push(record.clone());
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<StatsRecord>, StoreError> {
        let guard = self.records.lock().await;
        guard.as_ref().cloned().ok_or(StoreError::Closed)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.records.lock().await.take();
        Ok(())
    }
}

struct FileStoreInner {
    file: Option<File>,
    // The file ends mid-line, so the next record must start on a fresh one.
    needs_separator: bool,
}

/// Appends one JSON line per record to a single file that survives restarts.
///
/// Lines that fail to parse on read are skipped with a warning: the file may
/// hold several process generations and a crash can leave a torn last line.
pub struct FileStore {
    path: PathBuf,
    inner: Mutex<FileStoreInner>,
}

impl FileStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir_all(parent).await.map_err(|err| {
                StoreError::io(
                    format!("failed to create data directory {}", parent.display()),
                    err,
                )
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|err| StoreError::io(format!("failed to open {}", path.display()), err))?;
        let needs_separator = ends_mid_line(&path).await.map_err(|err| {
            StoreError::io(format!("failed to inspect {}", path.display()), err)
        })?;
        if needs_separator {
            tracing::warn!(
                path = %path.display(),
                "data file ends with a partial record, next record starts on a new line"
            );
        }
        Ok(Self {
            path,
            inner: Mutex::new(FileStoreInner {
                file: Some(file),
                needs_separator,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DataStore for FileStore {
    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn write(&self, record: &StatsRecord) -> Result<(), StoreError> {
        let encoded = record.to_persistence_line()?;
        let mut inner = self.inner.lock().await;
        let mut line = String::with_capacity(encoded.len() + 2);
        if inner.needs_separator {
            line.push('\n');
        }
        line.push_str(&encoded);
        line.push('\n');
        let file = inner.file.as_mut().ok_or(StoreError::Closed)?;
        let written = match file.write_all(line.as_bytes()).await {
            Ok(()) => file
                .flush()
                .await
                .map_err(|err| StoreError::io("failed to flush record", err)),
            Err(err) => Err(StoreError::io("failed to write record", err)),
        };
        // A failed write may have left part of the line behind.
        inner.needs_separator = written.is_err();
        written
    }

    async fn read_all(&self) -> Result<Vec<StatsRecord>, StoreError> {
        // Held for the whole read so no append lands halfway through it.
        let inner = self.inner.lock().await;
        if inner.file.is_none() {
            return Err(StoreError::Closed);
        }
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(StoreError::io(
                    format!("failed to read {}", self.path.display()),
                    err,
                ))
            }
        };
        Ok(parse_lines(&raw, &self.path))
    }

    async fn close(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(mut file) = inner.file.take() {
            file.flush().await.map_err(|err| {
                StoreError::io(format!("failed to flush {}", self.path.display()), err)
            })?;
        }
        Ok(())
    }
}

async fn ends_mid_line(path: &Path) -> std::io::Result<bool> {
    let mut file = File::open(path).await?;
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] != b'\n')
}

fn parse_lines(raw: &[u8], path: &Path) -> Vec<StatsRecord> {
    raw.split(|byte| *byte == b'\n')
        .enumerate()
        .filter_map(|(idx, bytes)| {
            let parsed = match std::str::from_utf8(bytes) {
                Ok(line) if line.trim().is_empty() => return None,
                Ok(line) => StatsRecord::from_line(line).map_err(|err| err.to_string()),
                Err(err) => Err(format!("line is not valid UTF-8: {err}")),
            };
            match parsed {
                Ok(record) => Some(record),
                Err(error) => {
                    tracing::warn!(
                        path = %path.display(),
                        line = idx + 1,
                        %error,
                        "skipping malformed stored record"
                    );
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RouterSnapshot;
    use chrono::Utc;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    fn record_with_clients(count: usize) -> StatsRecord {
        let clients = (0..count)
            .map(|i| match json!({"mac": format!("AA-BB-CC-00-00-{i:02}")}) {
                Value::Object(map) => map,
                _ => unreachable!(),
            })
            .collect();
        StatsRecord::new(
            Utc::now(),
            RouterSnapshot {
                clients,
                ..RouterSnapshot::default()
            },
        )
    }

    #[tokio::test]
    async fn memory_store_keeps_insertion_order() {
        let store = MemoryStore::new();
        let first = record_with_clients(1);
        let second = record_with_clients(2);
        store.write(&first).await.expect("write first");
        store.write(&second).await.expect("write second");
        assert_eq!(store.read_all().await.expect("read"), vec![first, second]);
    }

    #[tokio::test]
    async fn memory_store_empty_on_start() {
        let store = MemoryStore::new();
        assert!(store.read_all().await.expect("read").is_empty());
    }

    #[tokio::test]
    async fn memory_store_rejects_use_after_close() {
        let store = MemoryStore::new();
        store.write(&record_with_clients(0)).await.expect("write");
        store.close().await.expect("close");
        store.close().await.expect("second close");
        assert!(matches!(
            store.write(&record_with_clients(0)).await,
            Err(StoreError::Closed)
        ));
        assert!(matches!(store.read_all().await, Err(StoreError::Closed)));
    }

    #[tokio::test]
    async fn file_store_creates_parent_directories() {
        let tmp = tempdir().expect("tmp");
        let path = tmp.path().join("nested/deeper/stats.jsonl");
        let store = FileStore::open(&path).await.expect("open");
        assert!(path.exists());
        assert!(store.read_all().await.expect("read").is_empty());
    }

    #[tokio::test]
    async fn file_store_missing_file_reads_empty() {
        let tmp = tempdir().expect("tmp");
        let path = tmp.path().join("stats.jsonl");
        let store = FileStore::open(&path).await.expect("open");
        std::fs::remove_file(&path).expect("remove backing file");
        assert!(store.read_all().await.expect("read").is_empty());
    }

    #[tokio::test]
    async fn file_store_writes_one_line_per_record() {
        let tmp = tempdir().expect("tmp");
        let path = tmp.path().join("stats.jsonl");
        let store = FileStore::open(&path).await.expect("open");
        store.write(&record_with_clients(1)).await.expect("write");
        store.write(&record_with_clients(3)).await.expect("write");
        let content = std::fs::read_to_string(&path).expect("read file");
        assert!(content.ends_with('\n'));
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: Value = serde_json::from_str(lines[1]).expect("json line");
        assert_eq!(second["connected_devices"], 3);
    }

    #[tokio::test]
    async fn file_store_rejects_use_after_close() {
        let tmp = tempdir().expect("tmp");
        let store = FileStore::open(tmp.path().join("stats.jsonl"))
            .await
            .expect("open");
        store.close().await.expect("close");
        store.close().await.expect("second close");
        let err = store.write(&record_with_clients(0)).await.unwrap_err();
        assert_eq!(err.to_string(), "store closed");
        assert!(matches!(store.read_all().await, Err(StoreError::Closed)));
    }

    #[tokio::test]
    async fn write_after_failed_write_starts_a_fresh_line() {
        let tmp = tempdir().expect("tmp");
        let path = tmp.path().join("stats.jsonl");
        let store = FileStore::open(&path).await.expect("open");
        assert!(!store.inner.lock().await.needs_separator);
        std::fs::write(&path, "{\"timestamp\":\"2026-10-17T08:").expect("leave partial line");
        store.inner.lock().await.needs_separator = true;

        store.write(&record_with_clients(2)).await.expect("write");
        assert!(!store.inner.lock().await.needs_separator);
        let records = store.read_all().await.expect("read");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].connected_devices(), 2);
    }

    #[tokio::test]
    async fn open_store_follows_configured_kind() {
        let tmp = tempdir().expect("tmp");
        let mut config = AppConfig::default();
        config.datastore = StoreKind::File;
        config.data_file_path = tmp.path().join("data/stats.jsonl").display().to_string();
        let store = open_store(&config).await.expect("open file store");
        assert!(store.describe().starts_with("file:"));

        config.datastore = StoreKind::Memory;
        let store = open_store(&config).await.expect("open memory store");
        assert_eq!(store.describe(), "memory");
    }
}
