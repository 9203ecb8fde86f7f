//! Upload engine interface and the in-process transfer engine.
//!
//! The gateway treats the transfer engine as opaque: the authorization
//! pipeline hands it an authoritative creation request and everything else
//! rides on the engine's lifecycle event stream. `MemoryEngine` implements
//! the minimal resumable lifecycle (create, offset-checked append,
//! termination, readback) so the pipeline has something real to front;
//! upload bytes live in memory only.

use crate::data::UploadStore;
use crate::meta::Metadata;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadEventKind {
    Created,
    Progress,
    Completed,
    Terminated,
}

/// A lifecycle event emitted by the engine.
#[derive(Debug, Clone)]
pub struct UploadEvent {
    pub kind: UploadEventKind,
    pub id: String,
    /// Snapshot of the upload's metadata at event time.
    pub metadata: Metadata,
}

/// Single-producer, multi-subscriber event fan-out.
///
/// Each subscriber owns an independent receive queue; a slow subscriber lags
/// (dropping its oldest events) without ever blocking the engine or other
/// subscribers. Dropping the producer closes every subscriber loop.
#[derive(Debug, Clone)]
pub struct UploadEventBus {
    tx: broadcast::Sender<UploadEvent>,
}

impl UploadEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, kind: UploadEventKind, id: &str, metadata: &Metadata) {
        // No subscribers is fine; events are advisory.
        let _ = self.tx.send(UploadEvent {
            kind,
            id: id.to_owned(),
            metadata: metadata.clone(),
        });
    }
}

impl Default for UploadEventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("upload {0} not found")]
    NotFound(String),
    #[error("upload offset mismatch: expected {expected}, got {got}")]
    OffsetMismatch { expected: u64, got: u64 },
    #[error("upload length {length} exceeds maximum {max}")]
    TooLarge { length: u64, max: u64 },
    #[error("chunk would exceed the declared upload length {length}")]
    LengthExceeded { length: u64 },
    #[error("invalid metadata header")]
    Metadata(#[source] crate::meta::MetadataError),
    #[error("failed to persist upload record")]
    Store(#[source] anyhow::Error),
}

/// State returned by `create`.
#[derive(Debug, Clone)]
pub struct CreatedUpload {
    pub id: String,
    pub length: u64,
}

/// Offset/length view for HEAD requests.
#[derive(Debug, Clone, Copy)]
pub struct UploadInfo {
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug)]
struct UploadState {
    metadata: Metadata,
    length: u64,
    offset: u64,
    data: Vec<u8>,
}

pub struct MemoryEngine {
    uploads: DashMap<String, UploadState>,
    bus: UploadEventBus,
    store: Arc<dyn UploadStore>,
    max_upload_size: u64,
}

impl MemoryEngine {
    pub fn new(store: Arc<dyn UploadStore>, max_upload_size: u64) -> Self {
        Self {
            uploads: DashMap::new(),
            bus: UploadEventBus::default(),
            store,
            max_upload_size,
        }
    }

    pub fn events(&self) -> &UploadEventBus {
        &self.bus
    }

    /// Create an upload from an authoritative (server-augmented) metadata
    /// header. The header is opaque to callers; the engine decodes it like
    /// any other client of the wire format.
    ///
    /// The record is persisted before the `Created` event is published, so by
    /// the time any subscriber reacts the row exists.
    pub async fn create(
        &self,
        length: u64,
        metadata_header: &str,
    ) -> Result<CreatedUpload, EngineError> {
        let metadata = Metadata::decode(metadata_header).map_err(EngineError::Metadata)?;

        if length > self.max_upload_size {
            return Err(EngineError::TooLarge {
                length,
                max: self.max_upload_size,
            });
        }

        let id = Ulid::new().to_string();
        self.store
            .create_upload(&id, length)
            .await
            .map_err(EngineError::Store)?;

        self.uploads.insert(
            id.clone(),
            UploadState {
                metadata: metadata.clone(),
                length,
                offset: 0,
                data: Vec::new(),
            },
        );
        self.bus.publish(UploadEventKind::Created, &id, &metadata);

        Ok(CreatedUpload { id, length })
    }

    /// Append a chunk at `offset`. Returns the new offset.
    ///
    /// `Progress` is published per chunk; `Completed` once the declared
    /// length is reached.
    pub fn append(&self, id: &str, offset: u64, chunk: &[u8]) -> Result<u64, EngineError> {
        let mut entry = self
            .uploads
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(id.to_owned()))?;

        if entry.offset != offset {
            return Err(EngineError::OffsetMismatch {
                expected: entry.offset,
                got: offset,
            });
        }
        if entry.offset + chunk.len() as u64 > entry.length {
            return Err(EngineError::LengthExceeded {
                length: entry.length,
            });
        }

        entry.data.extend_from_slice(chunk);
        entry.offset += chunk.len() as u64;
        let new_offset = entry.offset;
        let completed = entry.offset == entry.length;
        let snapshot = entry.metadata.clone();
        drop(entry);

        self.bus.publish(UploadEventKind::Progress, id, &snapshot);
        if completed {
            self.bus.publish(UploadEventKind::Completed, id, &snapshot);
        }

        Ok(new_offset)
    }

    pub fn info(&self, id: &str) -> Option<UploadInfo> {
        self.uploads.get(id).map(|entry| UploadInfo {
            offset: entry.offset,
            length: entry.length,
        })
    }

    /// Metadata snapshot for an in-flight upload.
    pub fn metadata(&self, id: &str) -> Option<Metadata> {
        self.uploads.get(id).map(|entry| entry.metadata.clone())
    }

    pub fn read(&self, id: &str) -> Option<Vec<u8>> {
        self.uploads.get(id).map(|entry| entry.data.clone())
    }

    pub fn terminate(&self, id: &str) -> Result<(), EngineError> {
        let (id, state) = self
            .uploads
            .remove(id)
            .ok_or_else(|| EngineError::NotFound(id.to_owned()))?;
        self.bus
            .publish(UploadEventKind::Terminated, &id, &state.metadata);
        Ok(())
    }
}
