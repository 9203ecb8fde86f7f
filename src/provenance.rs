//! Asynchronous subscribers to the upload lifecycle stream.
//!
//! Provenance recording is decoupled from the request/response cycle: the
//! creating request finishes as soon as the engine accepts the upload, and
//! the recorder persists the resolved IP from the `Created` event afterwards.

use crate::data::UploadStore;
use crate::engine::{UploadEvent, UploadEventKind};
use crate::meta;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Record each upload's resolved client IP, keyed by upload id.
///
/// Reacts to `Created` events only: the IP is fixed at creation time, and
/// later Progress/Completed/Terminated events must never rewrite it. Each
/// write runs in a detached task; failures are logged, not retried -- the
/// originating request has already completed, so there is nobody to tell.
pub async fn record_uploader_ips(
    mut rx: broadcast::Receiver<UploadEvent>,
    store: Arc<dyn UploadStore>,
) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "uploader IP recorder lagged behind the event stream");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };

        if event.kind != UploadEventKind::Created {
            continue;
        }

        let store = store.clone();
        tokio::spawn(async move {
            let ip = event
                .metadata
                .get_str(meta::REMOTE_IP_KEY)
                .unwrap_or_default()
                .to_owned();

            debug!(id = %event.id, ip = %ip, "recording uploader IP");

            if let Err(e) = store.update_uploader_ip(&event.id, &ip).await {
                error!(error = ?e, id = %event.id, "failed to record uploader IP");
            }
        });
    }
}

/// Structured log line per lifecycle event.
pub async fn log_upload_events(mut rx: broadcast::Receiver<UploadEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                info!(id = %event.id, kind = ?event.kind, "upload event");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "upload event logger lagged behind the event stream");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemoryUploadStore;
    use crate::meta::Metadata;
    use std::time::Duration;

    fn created_event(id: &str, ip: &str) -> UploadEvent {
        let mut metadata = Metadata::new();
        metadata.insert_str(meta::REMOTE_IP_KEY, ip);
        UploadEvent {
            kind: UploadEventKind::Created,
            id: id.to_owned(),
            metadata,
        }
    }

    async fn wait_for_ip(store: &MemoryUploadStore, id: &str) -> Option<String> {
        for _ in 0..50 {
            if let Some(ip) = store.uploader_ip(id) {
                return Some(ip);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }

    #[tokio::test]
    async fn records_ip_on_created_only() {
        let store = Arc::new(MemoryUploadStore::new());
        store.create_upload("u1", 10).await.unwrap();

        let (tx, rx) = broadcast::channel(16);
        let handle = tokio::spawn(record_uploader_ips(rx, store.clone()));

        let event = created_event("u1", "9.9.9.9");
        tx.send(event.clone()).unwrap();
        assert_eq!(wait_for_ip(&store, "u1").await.as_deref(), Some("9.9.9.9"));

        // Completed with a different snapshot must not alter the stored IP.
        let mut completed = event;
        completed.kind = UploadEventKind::Completed;
        completed.metadata.insert_str(meta::REMOTE_IP_KEY, "6.6.6.6");
        tx.send(completed).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.uploader_ip("u1").as_deref(), Some("9.9.9.9"));
        assert_eq!(store.ip_write_count(), 1);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn redelivered_created_event_is_idempotent() {
        let store = Arc::new(MemoryUploadStore::new());
        store.create_upload("u2", 10).await.unwrap();

        let (tx, rx) = broadcast::channel(16);
        let handle = tokio::spawn(record_uploader_ips(rx, store.clone()));

        let event = created_event("u2", "9.9.9.9");
        tx.send(event.clone()).unwrap();
        tx.send(event).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Same value, last write wins; state is not corrupted.
        assert_eq!(store.uploader_ip("u2").as_deref(), Some("9.9.9.9"));
        assert_eq!(store.ip_write_count(), 2);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn write_for_unknown_upload_does_not_stall_the_loop() {
        // An id the store has no record for: the write is a no-op, the loop
        // keeps running, and later events still land.
        let store = Arc::new(MemoryUploadStore::new());
        store.create_upload("known", 10).await.unwrap();

        let (tx, rx) = broadcast::channel(16);
        let handle = tokio::spawn(record_uploader_ips(rx, store.clone()));

        tx.send(created_event("ghost", "1.1.1.1")).unwrap();
        tx.send(created_event("known", "9.9.9.9")).unwrap();
        assert_eq!(wait_for_ip(&store, "known").await.as_deref(), Some("9.9.9.9"));
        assert_eq!(store.uploader_ip("ghost"), None);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn loop_ends_when_channel_closes() {
        let store = Arc::new(MemoryUploadStore::new());
        let (tx, rx) = broadcast::channel::<UploadEvent>(16);
        let handle = tokio::spawn(record_uploader_ips(rx, store));
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("recorder loop did not terminate")
            .unwrap();
    }
}
