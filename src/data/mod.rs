//! Persistence layer for upload records.

pub mod uploads;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Persistent store for upload records (not upload bytes).
///
/// The engine inserts a record when an upload is created; the provenance
/// recorder later writes `uploader_ip` against it, at most once per upload.
#[async_trait]
pub trait UploadStore: Send + Sync {
    async fn create_upload(&self, id: &str, size: u64) -> anyhow::Result<()>;
    async fn update_uploader_ip(&self, id: &str, ip: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub size: u64,
    pub uploader_ip: Option<String>,
}

/// In-memory `UploadStore` backing tests and ephemeral local runs.
///
/// Mirrors the SQL semantics: updating the IP of an unknown id is a no-op,
/// not an error.
#[derive(Debug, Default)]
pub struct MemoryUploadStore {
    records: DashMap<String, UploadRecord>,
    ip_writes: AtomicUsize,
}

impl MemoryUploadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uploader_ip(&self, id: &str) -> Option<String> {
        self.records.get(id).and_then(|r| r.uploader_ip.clone())
    }

    /// Number of `update_uploader_ip` calls observed, including no-ops.
    pub fn ip_write_count(&self) -> usize {
        self.ip_writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl UploadStore for MemoryUploadStore {
    async fn create_upload(&self, id: &str, size: u64) -> anyhow::Result<()> {
        self.records.insert(
            id.to_owned(),
            UploadRecord {
                size,
                uploader_ip: None,
            },
        );
        Ok(())
    }

    async fn update_uploader_ip(&self, id: &str, ip: &str) -> anyhow::Result<()> {
        self.ip_writes.fetch_add(1, Ordering::SeqCst);
        if let Some(mut record) = self.records.get_mut(id) {
            record.uploader_ip = Some(ip.to_owned());
        }
        Ok(())
    }
}
