use std::sync::{Arc, Mutex};

use async_std::fs;
use async_std::path::{Path, PathBuf};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::machine::error::SnapshotError;
use crate::machine::position::LogPosition;

// The durable artifact a snapshot produces: the ledger balance as of the
// moment the entry at `position` was applied, and nothing else. This pair is
// the sole input to state restoration, so it must never be torn (a balance
// from one position paired with a different position).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub position: LogPosition,
    pub balance: f64,
}

// Durable storage for snapshot records. Multiple snapshots may coexist; only
// the one with the highest position is ever loaded.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, record: &SnapshotRecord) -> Result<(), SnapshotError>;
    async fn load_latest(&self) -> Result<Option<SnapshotRecord>, SnapshotError>;
}

#[derive(Debug, Clone)]
pub enum SnapshotOptions {
    // Snapshots are written as individual files into this directory, which
    // is created if it does not exist.
    Directory(String),

    // Snapshots round-trip through an in-memory slot. For tests.
    InMemoryForTesting,
}

pub async fn new_store(
    options: &SnapshotOptions,
) -> Result<Arc<dyn SnapshotStore>, SnapshotError> {
    match options {
        SnapshotOptions::Directory(directory) => {
            Ok(Arc::new(FileSnapshotStore::new(directory).await?))
        }
        SnapshotOptions::InMemoryForTesting => Ok(Arc::new(MemorySnapshotStore::new())),
    }
}

// A store writing one file per snapshot, named after the position the
// snapshot reflects. Older files are left in place; load_latest picks the
// highest well-formed position.
struct FileSnapshotStore {
    directory: PathBuf,
}

impl FileSnapshotStore {
    async fn new(directory: &str) -> Result<Self, SnapshotError> {
        create_dir_if_not_exists(directory).await?;
        info!("created file snapshot store backed by directory {}", directory);
        Ok(FileSnapshotStore {
            directory: PathBuf::from(directory),
        })
    }

    fn file_name(position: &LogPosition) -> String {
        format!("snapshot_{}_{}.bin", position.term, position.index)
    }

    // Inverse of file_name. Returns None for files that don't follow the
    // naming scheme; those are simply ignored when scanning the directory.
    fn parse_file_name(name: &str) -> Option<LogPosition> {
        let body = name.strip_prefix("snapshot_")?.strip_suffix(".bin")?;
        let (term, index) = body.split_once('_')?;
        Some(LogPosition {
            term: term.parse().ok()?,
            index: index.parse().ok()?,
        })
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, record: &SnapshotRecord) -> Result<(), SnapshotError> {
        let encoded =
            bincode::serialize(record).map_err(|e| SnapshotError::Corrupt(e.to_string()))?;
        let path = self.directory.join(Self::file_name(&record.position));
        fs::write(&path, &encoded).await?;
        debug!(snapshot = %record.position, "wrote snapshot file");
        Ok(())
    }

    async fn load_latest(&self) -> Result<Option<SnapshotRecord>, SnapshotError> {
        let mut latest: Option<(LogPosition, PathBuf)> = None;
        let mut entries = fs::read_dir(&self.directory).await?;
        while let Some(entry) = entries.next().await {
            let entry = entry?;
            let name = entry.file_name();
            let position = match Self::parse_file_name(&name.to_string_lossy()) {
                Some(position) => position,
                None => continue,
            };
            if latest.as_ref().map_or(true, |(p, _)| position > *p) {
                latest = Some((position, entry.path()));
            }
        }

        let (position, path) = match latest {
            Some(found) => found,
            None => return Ok(None),
        };

        let encoded = fs::read(&path).await?;
        let record: SnapshotRecord = bincode::deserialize(&encoded)
            .map_err(|e| SnapshotError::Corrupt(e.to_string()))?;
        if record.position != position {
            return Err(SnapshotError::Corrupt(format!(
                "file {:?} names position {} but contains {}",
                path, position, record.position
            )));
        }
        Ok(Some(record))
    }
}

// Keeps the encoded bytes of the most recent snapshot in memory. Encoding
// still round-trips through the same serialization as the file store, so
// tests exercise the full save/load path.
struct MemorySnapshotStore {
    slot: Mutex<Option<Vec<u8>>>,
}

impl MemorySnapshotStore {
    fn new() -> Self {
        MemorySnapshotStore {
            slot: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, record: &SnapshotRecord) -> Result<(), SnapshotError> {
        let encoded =
            bincode::serialize(record).map_err(|e| SnapshotError::Corrupt(e.to_string()))?;
        *self.slot.lock().expect("snapshot slot lock") = Some(encoded);
        Ok(())
    }

    async fn load_latest(&self) -> Result<Option<SnapshotRecord>, SnapshotError> {
        let encoded = self.slot.lock().expect("snapshot slot lock").clone();
        match encoded {
            None => Ok(None),
            Some(bytes) => {
                let record = bincode::deserialize(&bytes)
                    .map_err(|e| SnapshotError::Corrupt(e.to_string()))?;
                Ok(Some(record))
            }
        }
    }
}

async fn create_dir_if_not_exists(directory: &str) -> Result<(), SnapshotError> {
    let path = Path::new(directory);
    match fs::metadata(&path).await {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(SnapshotError::Io(std::io::Error::new(
            std::io::ErrorKind::NotADirectory,
            format!("path exists but is not a directory: {}", directory),
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("snapshot directory {} missing, creating it", directory);
            Ok(fs::create_dir_all(directory).await?)
        }
        Err(e) => Err(SnapshotError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(term: u64, index: u64, balance: f64) -> SnapshotRecord {
        SnapshotRecord {
            position: LogPosition::new(term, index),
            balance,
        }
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemorySnapshotStore::new();
        assert!(store.load_latest().await.unwrap().is_none());

        store.save(&record(3, 10, 250.0)).await.unwrap();
        assert_eq!(store.load_latest().await.unwrap(), Some(record(3, 10, 250.0)));
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(temp_dir.path().to_str().unwrap())
            .await
            .unwrap();

        assert!(store.load_latest().await.unwrap().is_none());
        store.save(&record(3, 10, 250.0)).await.unwrap();
        assert_eq!(store.load_latest().await.unwrap(), Some(record(3, 10, 250.0)));
    }

    #[tokio::test]
    async fn test_file_store_picks_latest() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(temp_dir.path().to_str().unwrap())
            .await
            .unwrap();

        store.save(&record(1, 5, 10.0)).await.unwrap();
        store.save(&record(3, 10, 250.0)).await.unwrap();
        store.save(&record(2, 40, 99.0)).await.unwrap();

        // Term dominates index in the position order.
        assert_eq!(store.load_latest().await.unwrap(), Some(record(3, 10, 250.0)));
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let directory = temp_dir.path().to_str().unwrap().to_string();

        {
            let store = FileSnapshotStore::new(&directory).await.unwrap();
            store.save(&record(7, 2, 42.0)).await.unwrap();
        }

        let store = FileSnapshotStore::new(&directory).await.unwrap();
        assert_eq!(store.load_latest().await.unwrap(), Some(record(7, 2, 42.0)));
    }

    #[tokio::test]
    async fn test_file_store_ignores_unrelated_files() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), b"hello").unwrap();
        std::fs::write(temp_dir.path().join("snapshot_x_y.bin"), b"junk").unwrap();

        let store = FileSnapshotStore::new(temp_dir.path().to_str().unwrap())
            .await
            .unwrap();
        assert!(store.load_latest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_corrupt_latest_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("snapshot_9_9.bin"), b"garbage").unwrap();

        let store = FileSnapshotStore::new(temp_dir.path().to_str().unwrap())
            .await
            .unwrap();
        assert!(matches!(
            store.load_latest().await,
            Err(SnapshotError::Corrupt(_))
        ));
    }

    #[test]
    fn test_parse_file_name() {
        assert_eq!(
            FileSnapshotStore::parse_file_name("snapshot_3_10.bin"),
            Some(LogPosition::new(3, 10))
        );
        assert_eq!(FileSnapshotStore::parse_file_name("snapshot_3.bin"), None);
        assert_eq!(FileSnapshotStore::parse_file_name("snapshot_a_b.bin"), None);
        assert_eq!(FileSnapshotStore::parse_file_name("other.bin"), None);
    }
}
