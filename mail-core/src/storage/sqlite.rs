use crate::error::Result;
use crate::storage::records::{FolderRecord, FolderRecordStore};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

/// Folder records in a sqlite table, one JSON document per mailbox
#[derive(Clone)]
pub struct SqliteRecordStore {
    db: Arc<SqlitePool>,
}

impl SqliteRecordStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let db = SqlitePool::connect(database_url).await?;
        Self::with_pool(db).await
    }

    pub async fn with_pool(db: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS folder_records (
                name TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&db)
        .await?;

        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait]
impl FolderRecordStore for SqliteRecordStore {
    async fn load(&self, name: &str) -> Result<Option<FolderRecord>> {
        let row = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT data FROM folder_records WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&*self.db)
        .await?;

        match row {
            Some((data,)) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, record: &FolderRecord) -> Result<()> {
        debug!("Saving folder record {}", record.name);
        let data = serde_json::to_string(record)?;

        sqlx::query(
            r#"
            INSERT INTO folder_records (name, data, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(name) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.name)
        .bind(&data)
        .execute(&*self.db)
        .await?;

        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM folder_records WHERE name = ?
            "#,
        )
        .bind(name)
        .execute(&*self.db)
        .await?;

        Ok(())
    }

    async fn names(&self) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT name FROM folder_records ORDER BY name
            "#,
        )
        .fetch_all(&*self.db)
        .await?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }
}
