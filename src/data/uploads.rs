//! Database query functions for the `uploads` table.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::data::UploadStore;

/// Insert a new upload record. Creation is the only insert path, so a
/// conflicting id (a re-delivered creation) is left untouched.
pub async fn insert(pool: &PgPool, id: &str, size: u64) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO uploads (id, size) VALUES ($1, $2) \
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(id)
    .bind(size as i64)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record the resolved uploader IP against an upload. Updating an unknown id
/// is a no-op, matching plain SQL UPDATE semantics.
pub async fn set_uploader_ip(pool: &PgPool, id: &str, ip: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE uploads SET uploader_ip = $1 WHERE id = $2")
        .bind(ip)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Postgres-backed `UploadStore`.
#[derive(Clone)]
pub struct PgUploadStore {
    pool: PgPool,
}

impl PgUploadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UploadStore for PgUploadStore {
    async fn create_upload(&self, id: &str, size: u64) -> anyhow::Result<()> {
        insert(&self.pool, id, size).await?;
        Ok(())
    }

    async fn update_uploader_ip(&self, id: &str, ip: &str) -> anyhow::Result<()> {
        set_uploader_ip(&self.pool, id, ip).await?;
        Ok(())
    }
}
