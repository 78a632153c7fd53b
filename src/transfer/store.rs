//! Transfer storage
//!
//! Stores hold encoded [`TransferRecord`](super::codec::TransferRecord)s as
//! opaque JSON values; decoding is the supervisor's job so one bad record
//! never blocks the rest.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tokio::sync::Mutex;

use super::error::StoreError;

#[async_trait]
pub trait TransferStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<Value>, StoreError>;

    /// Replace the stored set with `records`.
    async fn save_all(&self, records: &[Value]) -> Result<(), StoreError>;

    /// Insert `record`, replacing the stored record with the same `id`.
    async fn save(&self, record: Value) -> Result<(), StoreError> {
        let mut records = self.load_all().await?;
        upsert(&mut records, record);
        self.save_all(&records).await
    }
}

fn upsert(records: &mut Vec<Value>, record: Value) {
    let existing = record
        .get("id")
        .and_then(|id| records.iter().position(|r| r.get("id") == Some(id)));
    match existing {
        Some(index) => records[index] = record,
        None => records.push(record),
    }
}

/// All transfers in one JSON array file.
///
/// Saves write `{path}.tmp` first and rename it over the target, so readers
/// never see a partially written file. Writers sharing one store (or its
/// clones) are serialized.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    async fn read(&self) -> Result<Vec<Value>, StoreError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn write(&self, records: &[Value]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(records)?;
        let tmp = self.tmp_path();
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl TransferStore for JsonFileStore {
    async fn load_all(&self) -> Result<Vec<Value>, StoreError> {
        self.read().await
    }

    async fn save_all(&self, records: &[Value]) -> Result<(), StoreError> {
        let _writer = self.write_lock.lock().await;
        self.write(records).await
    }

    async fn save(&self, record: Value) -> Result<(), StoreError> {
        let _writer = self.write_lock.lock().await;
        let mut records = self.read().await?;
        upsert(&mut records, record);
        self.write(&records).await
    }
}
