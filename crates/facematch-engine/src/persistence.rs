//! SQLite-backed record of profile metadata.
//!
//! Only metadata is stored. A profile comes back by re-running detection
//! over its recorded source images (see [`ProfileStore::restore`]).
//!
//! [`ProfileStore::restore`]: crate::store::ProfileStore::restore

use rusqlite::{params, OptionalExtension};
use std::path::Path;
use tokio_rusqlite::Connection;

use crate::error::EngineError;
use crate::profile::ProfileMetadata;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
    owner_id   TEXT PRIMARY KEY,
    metadata   TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

pub struct ProfileRecords {
    conn: Connection,
}

impl ProfileRecords {
    /// Open (creating if needed) the database at `path`.
    pub async fn open(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    EngineError::Persistence(format!("creating {}: {e}", parent.display()))
                })?;
            }
        }
        let conn = Connection::open(path).await?;
        tracing::info!(path = %path.display(), "profile database opened");
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, EngineError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA_SQL)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Insert or replace the record for `metadata.owner_id`.
    pub async fn save(&self, metadata: &ProfileMetadata) -> Result<(), EngineError> {
        let json = serde_json::to_string(metadata)?;
        let owner_id = metadata.owner_id.clone();
        let updated_at = metadata.updated_at.to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO profiles (owner_id, metadata, updated_at)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(owner_id) DO UPDATE SET
                         metadata = excluded.metadata,
                         updated_at = excluded.updated_at",
                    params![owner_id, json, updated_at],
                )?;
                Ok(())
            })
            .await?;
        tracing::debug!(owner = %metadata.owner_id, "profile metadata saved");
        Ok(())
    }

    pub async fn load(&self, owner_id: &str) -> Result<Option<ProfileMetadata>, EngineError> {
        let owner_id = owner_id.to_string();
        let json: Option<String> = self
            .conn
            .call(move |conn| {
                let json = conn
                    .query_row(
                        "SELECT metadata FROM profiles WHERE owner_id = ?1",
                        params![owner_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(json)
            })
            .await?;
        Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
    }

    /// Every record, ordered by owner.
    pub async fn list(&self) -> Result<Vec<ProfileMetadata>, EngineError> {
        let rows: Vec<String> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT metadata FROM profiles ORDER BY owner_id")?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        rows.iter()
            .map(|j| serde_json::from_str(j).map_err(EngineError::from))
            .collect()
    }

    /// Remove the record for `owner_id`. Returns whether one existed.
    pub async fn delete(&self, owner_id: &str) -> Result<bool, EngineError> {
        let owner_id = owner_id.to_string();
        let deleted = self
            .conn
            .call(move |conn| {
                let n = conn.execute("DELETE FROM profiles WHERE owner_id = ?1", params![owner_id])?;
                Ok(n)
            })
            .await?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use facematch_core::{ImageRef, MatchStrategy};

    fn metadata(owner: &str, faces: usize) -> ProfileMetadata {
        let now = Utc::now();
        ProfileMetadata {
            owner_id: owner.to_string(),
            image_count: faces + 1,
            face_count: faces,
            mean_quality: 0.8,
            best_quality: 0.95,
            match_threshold: 0.5,
            match_strategy: MatchStrategy::Distance,
            source_images: (0..faces).map(|i| ImageRef::new(format!("{owner}-{i}.jpg"))).collect(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_save_load_replace() {
        let records = ProfileRecords::open_in_memory().await.unwrap();
        assert!(records.load("alice").await.unwrap().is_none());

        let first = metadata("alice", 2);
        records.save(&first).await.unwrap();
        assert_eq!(records.load("alice").await.unwrap(), Some(first));

        let second = metadata("alice", 4);
        records.save(&second).await.unwrap();
        assert_eq!(records.load("alice").await.unwrap(), Some(second));
        assert_eq!(records.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let records = ProfileRecords::open_in_memory().await.unwrap();
        records.save(&metadata("carol", 2)).await.unwrap();
        records.save(&metadata("alice", 3)).await.unwrap();

        let owners: Vec<String> = records
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.owner_id)
            .collect();
        assert_eq!(owners, vec!["alice", "carol"]);

        assert!(records.delete("alice").await.unwrap());
        assert!(!records.delete("alice").await.unwrap());
        assert_eq!(records.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("profiles.db");

        {
            let records = ProfileRecords::open(&path).await.unwrap();
            records.save(&metadata("alice", 2)).await.unwrap();
        }

        let reopened = ProfileRecords::open(&path).await.unwrap();
        let loaded = reopened.load("alice").await.unwrap().unwrap();
        assert_eq!(loaded.face_count, 2);
        assert_eq!(loaded.source_images.len(), 2);
    }
}
