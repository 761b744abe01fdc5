//! Ownership ledger and allow-list, persisted in SQLite.
//!
//! The `blobs` table records one row per `(digest, owner)` pair; the same
//! digest may be owned by many principals. A blob file exists on disk iff at
//! least one ownership row exists, enforced by the transactional
//! delete-and-count in [`Ledger::remove_ownership`]. Reference counting uses
//! a live `COUNT(*)`, never a stored counter, so it cannot drift across
//! crashes.

use std::{path::Path, str::FromStr, time::Duration};

use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Pool, Sqlite,
};

use crate::storage::BlobStore;

/// One ownership claim: a principal uploaded a given blob.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobRecord {
    /// Lowercase hex SHA-256 of the content.
    pub digest: String,
    /// Owning principal, lowercase hex.
    pub owner: String,
    /// Size in bytes as observed at upload.
    pub size: u64,
    /// Declared media type, if any.
    pub media_type: Option<String>,
    /// Unix seconds of the most recent upload by this owner.
    pub uploaded_at: u64,
}

/// Internal row type for SQLx mapping (SQLite integers are signed).
#[derive(sqlx::FromRow)]
struct BlobRow {
    digest: String,
    owner: String,
    size: i64,
    media_type: Option<String>,
    uploaded_at: i64,
}

impl BlobRow {
    fn into_record(self) -> BlobRecord {
        BlobRecord {
            digest: self.digest,
            owner: self.owner,
            size: self.size.max(0) as u64,
            media_type: self.media_type,
            uploaded_at: self.uploaded_at.max(0) as u64,
        }
    }
}

/// Handle to the SQLite database holding ownership rows and the allow-list.
#[derive(Clone)]
pub struct Ledger {
    pool: Pool<Sqlite>,
}

impl Ledger {
    /// Open (creating if missing) the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));
        Self::from_options(opts).await
    }

    /// Open a throwaway in-memory database.
    pub async fn open_in_memory() -> Result<Self> {
        Self::from_options(SqliteConnectOptions::from_str("sqlite::memory:")?).await
    }

    async fn from_options(opts: SqliteConnectOptions) -> Result<Self> {
        // SQLite permits limited write concurrency; a single pooled connection
        // avoids "database is locked" failures under server concurrency.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        let ledger = Self { pool };
        ledger.migrate().await?;
        Ok(ledger)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS blobs (
                digest TEXT NOT NULL,
                owner TEXT NOT NULL,
                size INTEGER NOT NULL,
                media_type TEXT,
                uploaded_at INTEGER NOT NULL,
                PRIMARY KEY (digest, owner)
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_blobs_owner ON blobs (owner, uploaded_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE TABLE IF NOT EXISTS allowlist (pubkey TEXT PRIMARY KEY)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Insert or refresh the `(digest, owner)` row. Re-uploading identical
    /// content by the same owner updates the metadata in place.
    pub async fn record_upload(
        &self,
        digest: &str,
        owner: &str,
        size: u64,
        media_type: Option<&str>,
        uploaded_at: u64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO blobs (digest, owner, size, media_type, uploaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (digest, owner) DO UPDATE SET
                 size = excluded.size,
                 media_type = excluded.media_type,
                 uploaded_at = excluded.uploaded_at",
        )
        .bind(digest)
        .bind(owner)
        .bind(size as i64)
        .bind(media_type)
        .bind(uploaded_at as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All blobs owned by `owner`, newest upload first.
    pub async fn list_by_owner(&self, owner: &str) -> Result<Vec<BlobRecord>> {
        let rows = sqlx::query_as::<_, BlobRow>(
            "SELECT digest, owner, size, media_type, uploaded_at
             FROM blobs WHERE owner = ?1
             ORDER BY uploaded_at DESC, digest",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(BlobRow::into_record).collect())
    }

    /// Most recently declared media type for `digest`, across all owners.
    pub async fn media_type_for(&self, digest: &str) -> Result<Option<String>> {
        let media = sqlx::query_scalar::<_, String>(
            "SELECT media_type FROM blobs
             WHERE digest = ?1 AND media_type IS NOT NULL
             ORDER BY uploaded_at DESC LIMIT 1",
        )
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?;
        Ok(media)
    }

    /// Drop `owner`'s claim on `digest`. Returns `false` if no such row
    /// existed. When the last claim goes, the blob file goes with it: the row
    /// deletion and the count of surviving owners happen in one transaction,
    /// so two racing deletes cannot both observe a stale count (and the file
    /// removal itself is idempotent anyway).
    pub async fn remove_ownership(
        &self,
        digest: &str,
        owner: &str,
        blobs: &BlobStore,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM blobs WHERE digest = ?1 AND owner = ?2")
            .bind(digest)
            .bind(owner)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Ok(false);
        }
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blobs WHERE digest = ?1")
            .bind(digest)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        if remaining == 0 {
            blobs.delete(digest)?;
        }
        Ok(true)
    }

    /// Add a normalized key to the allow-list. Returns `false` when it was
    /// already present.
    pub async fn allow(&self, pubkey: &str) -> Result<bool> {
        let res = sqlx::query("INSERT OR IGNORE INTO allowlist (pubkey) VALUES (?1)")
            .bind(pubkey)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Remove a key from the allow-list. Returns `false` when it was absent.
    pub async fn disallow(&self, pubkey: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM allowlist WHERE pubkey = ?1")
            .bind(pubkey)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Set-membership check against the allow-list.
    pub async fn is_allowed(&self, pubkey: &str) -> Result<bool> {
        let n: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM allowlist WHERE pubkey = ?1)")
                .bind(pubkey)
                .fetch_one(&self.pool)
                .await?;
        Ok(n != 0)
    }

    /// All allow-listed keys, sorted.
    pub async fn allowed_keys(&self) -> Result<Vec<String>> {
        Ok(
            sqlx::query_scalar("SELECT pubkey FROM allowlist ORDER BY pubkey")
                .fetch_all(&self.pool)
                .await?,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::Stream;
    use tempfile::TempDir;

    const DIGEST: &str = "e2bab35b5296ec2242ded0a01f6d6723a5cd921239280c0a5f0b5589303336b6";

    fn one_chunk(data: &[u8]) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> + Unpin {
        futures_util::stream::iter(vec![Ok(data.to_vec())])
    }

    async fn stored_blob(store: &BlobStore, data: &[u8]) -> String {
        let staged = store.receive(one_chunk(data), 1 << 20).await.unwrap();
        let digest = staged.digest.clone();
        store.commit(staged).unwrap();
        digest
    }

    #[tokio::test]
    async fn reupload_replaces_metadata_not_rows() {
        let ledger = Ledger::open_in_memory().await.unwrap();
        ledger
            .record_upload(DIGEST, "owner1", 10, Some("text/plain"), 100)
            .await
            .unwrap();
        ledger
            .record_upload(DIGEST, "owner1", 10, Some("image/png"), 200)
            .await
            .unwrap();
        let rows = ledger.list_by_owner("owner1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].media_type.as_deref(), Some("image/png"));
        assert_eq!(rows[0].uploaded_at, 200);
    }

    #[tokio::test]
    async fn listing_is_newest_first() {
        let ledger = Ledger::open_in_memory().await.unwrap();
        ledger
            .record_upload(&"a".repeat(64), "owner1", 1, None, 100)
            .await
            .unwrap();
        ledger
            .record_upload(&"b".repeat(64), "owner1", 2, None, 300)
            .await
            .unwrap();
        ledger
            .record_upload(&"c".repeat(64), "owner1", 3, None, 200)
            .await
            .unwrap();
        let rows = ledger.list_by_owner("owner1").await.unwrap();
        let uploads: Vec<u64> = rows.iter().map(|r| r.uploaded_at).collect();
        assert_eq!(uploads, vec![300, 200, 100]);
    }

    #[tokio::test]
    async fn shared_blob_survives_until_last_owner_leaves() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path().to_path_buf());
        store.init().unwrap();
        let ledger = Ledger::open_in_memory().await.unwrap();

        let digest = stored_blob(&store, b"shared content").await;
        ledger
            .record_upload(&digest, "owner1", 14, None, 100)
            .await
            .unwrap();
        ledger
            .record_upload(&digest, "owner2", 14, None, 101)
            .await
            .unwrap();

        // First owner leaves: row gone, file stays, other owner untouched.
        assert!(ledger
            .remove_ownership(&digest, "owner1", &store)
            .await
            .unwrap());
        assert!(store.stat(&digest).is_some());
        assert_eq!(ledger.list_by_owner("owner1").await.unwrap().len(), 0);
        assert_eq!(ledger.list_by_owner("owner2").await.unwrap().len(), 1);

        // Same owner again: nothing left to remove.
        assert!(!ledger
            .remove_ownership(&digest, "owner1", &store)
            .await
            .unwrap());

        // Last owner leaves: file removed.
        assert!(ledger
            .remove_ownership(&digest, "owner2", &store)
            .await
            .unwrap());
        assert_eq!(store.stat(&digest), None);
    }

    #[tokio::test]
    async fn remove_unknown_pair_is_false() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path().to_path_buf());
        store.init().unwrap();
        let ledger = Ledger::open_in_memory().await.unwrap();
        assert!(!ledger
            .remove_ownership(DIGEST, "nobody", &store)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn media_type_prefers_latest_declaration() {
        let ledger = Ledger::open_in_memory().await.unwrap();
        assert_eq!(ledger.media_type_for(DIGEST).await.unwrap(), None);
        ledger
            .record_upload(DIGEST, "owner1", 5, Some("text/plain"), 100)
            .await
            .unwrap();
        ledger
            .record_upload(DIGEST, "owner2", 5, None, 200)
            .await
            .unwrap();
        ledger
            .record_upload(DIGEST, "owner3", 5, Some("text/html"), 300)
            .await
            .unwrap();
        assert_eq!(
            ledger.media_type_for(DIGEST).await.unwrap().as_deref(),
            Some("text/html")
        );
    }

    #[tokio::test]
    async fn allowlist_membership() {
        let ledger = Ledger::open_in_memory().await.unwrap();
        let key = "a".repeat(64);
        assert!(!ledger.is_allowed(&key).await.unwrap());
        assert!(ledger.allow(&key).await.unwrap());
        assert!(!ledger.allow(&key).await.unwrap(), "duplicate insert");
        assert!(ledger.is_allowed(&key).await.unwrap());
        assert_eq!(ledger.allowed_keys().await.unwrap(), vec![key.clone()]);
        assert!(ledger.disallow(&key).await.unwrap());
        assert!(!ledger.disallow(&key).await.unwrap());
        assert!(!ledger.is_allowed(&key).await.unwrap());
    }

    #[tokio::test]
    async fn open_creates_database_file() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("data").join("blosr.db");
        let ledger = Ledger::open(&db_path).await.unwrap();
        ledger
            .record_upload(DIGEST, "owner1", 1, None, 1)
            .await
            .unwrap();
        assert!(db_path.exists());
    }
}
