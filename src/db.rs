use std::path::Path;

use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{app_state::AppError, torrent_item::TorrentItem};

/// Expired keys idle for longer than this get swept by the maintenance task.
const EXPIRED_KEY_GRACE: Duration = Duration::days(7);

#[derive(Debug, Clone)]
pub struct Db {
    pub pool: SqlitePool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiKeyRow {
    pub id: i64,
    pub api_key: String,
    pub active: bool,
    pub never_expire: bool,
    pub expiration_ts: Option<i64>,
    pub latest_query_ts: Option<i64>,
    pub total_queries: i64,
    pub name: Option<String>,
}

impl Db {
    pub async fn connect(path: &Path) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    #[cfg(test)]
    pub async fn connect_in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS api_keys (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                api_key TEXT NOT NULL UNIQUE,
                active INTEGER NOT NULL DEFAULT 1,
                never_expire INTEGER NOT NULL DEFAULT 0,
                expiration_ts INTEGER,
                latest_query_ts INTEGER,
                total_queries INTEGER NOT NULL DEFAULT 0,
                name TEXT
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS torrent_items (
                id TEXT PRIMARY KEY,
                info_hash TEXT,
                raw_title TEXT NOT NULL,
                size INTEGER NOT NULL,
                magnet TEXT,
                link TEXT,
                seeders INTEGER NOT NULL DEFAULT 0,
                languages TEXT NOT NULL DEFAULT '[]',
                indexer TEXT NOT NULL,
                privacy TEXT NOT NULL,
                type TEXT NOT NULL,
                file_name TEXT,
                files TEXT,
                torrent_download TEXT,
                trackers TEXT NOT NULL DEFAULT '[]',
                file_index INTEGER,
                full_index TEXT,
                availability TEXT,
                parsed_data TEXT NOT NULL,
                created_ts INTEGER NOT NULL,
                updated_ts INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS torrent_items_info_hash ON torrent_items (info_hash)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn create_key(
        &self,
        name: Option<&str>,
        never_expire: bool,
        validity: Duration,
    ) -> Result<Uuid, AppError> {
        let api_key = Uuid::new_v4();
        let expiration_ts = (!never_expire)
            .then(|| (OffsetDateTime::now_utc() + validity).unix_timestamp());
        sqlx::query(
            "INSERT INTO api_keys (api_key, active, never_expire, expiration_ts, name)
             VALUES (?, 1, ?, ?, ?)",
        )
        .bind(api_key.to_string())
        .bind(never_expire)
        .bind(expiration_ts)
        .bind(name)
        .execute(&self.pool)
        .await?;
        tracing::info!(%api_key, "Created new API key");
        Ok(api_key)
    }

    pub async fn key(&self, api_key: &Uuid) -> Result<Option<ApiKeyRow>, AppError> {
        let row = sqlx::query_as::<_, ApiKeyRow>(
            "SELECT id, api_key, active, never_expire, expiration_ts, latest_query_ts,
                    total_queries, name
             FROM api_keys WHERE api_key = ?",
        )
        .bind(api_key.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Validates a key and bumps its usage counters in one transaction, so a
    /// rejected key never counts a query.
    pub async fn check_key(&self, api_key: &str) -> Result<(), AppError> {
        let api_key: Uuid = api_key
            .parse()
            .map_err(|_| AppError::unauthorized("API key is not a valid uuid"))?;
        let now = OffsetDateTime::now_utc().unix_timestamp();

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT active, never_expire, expiration_ts FROM api_keys WHERE api_key = ?",
        )
        .bind(api_key.to_string())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Err(AppError::unauthorized("unknown API key"));
        };
        let active: bool = row.try_get("active").map_err(AppError::from)?;
        let never_expire: bool = row.try_get("never_expire").map_err(AppError::from)?;
        let expiration_ts: Option<i64> = row.try_get("expiration_ts").map_err(AppError::from)?;
        if !active {
            return Err(AppError::unauthorized("API key has been revoked"));
        }
        if !never_expire && expiration_ts.is_some_and(|expiration| expiration < now) {
            return Err(AppError::unauthorized("API key has expired"));
        }
        sqlx::query(
            "UPDATE api_keys SET latest_query_ts = ?, total_queries = total_queries + 1
             WHERE api_key = ?",
        )
        .bind(now)
        .bind(api_key.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Sweeps keys that expired more than a week ago and have been idle at
    /// least as long. `never_expire` keys are untouchable.
    pub async fn delete_expired_keys(&self) -> Result<u64, AppError> {
        let cutoff = (OffsetDateTime::now_utc() - EXPIRED_KEY_GRACE).unix_timestamp();
        let result = sqlx::query(
            "DELETE FROM api_keys
             WHERE never_expire = 0
               AND expiration_ts IS NOT NULL AND expiration_ts < ?
               AND (latest_query_ts IS NULL OR latest_query_ts < ?)",
        )
        .bind(cutoff)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        let swept = result.rows_affected();
        if swept > 0 {
            tracing::info!(swept, "Removed expired API keys");
        }
        Ok(swept)
    }

    /// Durable torrent rows keyed by the item's stable id, used to skip
    /// re-fetching `.torrent` bodies for known results.
    pub async fn upsert_torrent_item(&self, item: &TorrentItem) -> Result<(), AppError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        sqlx::query(
            "INSERT INTO torrent_items (
                id, info_hash, raw_title, size, magnet, link, seeders, languages, indexer,
                privacy, type, file_name, files, torrent_download, trackers, file_index,
                full_index, availability, parsed_data, created_ts, updated_ts
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                seeders = excluded.seeders,
                magnet = excluded.magnet,
                file_name = excluded.file_name,
                files = excluded.files,
                torrent_download = excluded.torrent_download,
                trackers = excluded.trackers,
                file_index = excluded.file_index,
                full_index = excluded.full_index,
                availability = excluded.availability,
                parsed_data = excluded.parsed_data,
                updated_ts = excluded.updated_ts",
        )
        .bind(item.id())
        .bind(item.info_hash.as_deref())
        .bind(&item.raw_title)
        .bind(item.size as i64)
        .bind(item.magnet.as_deref())
        .bind(item.link.as_deref())
        .bind(i64::from(item.seeders))
        .bind(serde_json::to_string(&item.languages)?)
        .bind(&item.indexer)
        .bind(serde_json::to_string(&item.privacy)?.trim_matches('"').to_string())
        .bind(item.kind.to_string())
        .bind(item.file_name.as_deref())
        .bind(match &item.files {
            Some(files) => Some(serde_json::to_string(files)?),
            None => None,
        })
        .bind(item.torrent_download.as_deref())
        .bind(serde_json::to_string(&item.trackers)?)
        .bind(item.file_index.map(|index| index as i64))
        .bind(match &item.full_index {
            Some(full_index) => Some(serde_json::to_string(full_index)?),
            None => None,
        })
        .bind(item.availability.map(|tag| tag.to_string()))
        .bind(serde_json::to_string(&item.parsed_data)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn torrent_item_by_id(&self, id: &str) -> Result<Option<TorrentItem>, AppError> {
        let row = sqlx::query(
            "SELECT raw_title, size, magnet, info_hash, link, seeders, languages, indexer,
                    privacy, type, file_name, files, torrent_download, trackers, file_index,
                    full_index, availability
             FROM torrent_items WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => match torrent_item_from_row(&row) {
                Ok(item) => Ok(Some(item)),
                Err(e) => {
                    tracing::error!(id, "Corrupt torrent row: {e}");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    pub async fn torrent_items_by_hash(
        &self,
        info_hash: &str,
    ) -> Result<Vec<TorrentItem>, AppError> {
        let rows = sqlx::query(
            "SELECT raw_title, size, magnet, info_hash, link, seeders, languages, indexer,
                    privacy, type, file_name, files, torrent_download, trackers, file_index,
                    full_index, availability
             FROM torrent_items WHERE info_hash = ?",
        )
        .bind(info_hash)
        .fetch_all(&self.pool)
        .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            match torrent_item_from_row(&row) {
                Ok(item) => items.push(item),
                Err(e) => tracing::error!(info_hash, "Skipping corrupt torrent row: {e}"),
            }
        }
        Ok(items)
    }
}

fn torrent_item_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<TorrentItem, AppError> {
    use std::str::FromStr;

    let kind = crate::media::MediaKind::from_str(&row.try_get::<String, _>("type")?)
        .map_err(AppError::from)?;
    let privacy = match row.try_get::<String, _>("privacy")?.as_str() {
        "private" => crate::torrent_item::Privacy::Private,
        _ => crate::torrent_item::Privacy::Public,
    };
    let mut item = TorrentItem::new(
        row.try_get("raw_title")?,
        row.try_get::<i64, _>("size")? as u64,
        row.try_get("info_hash")?,
        row.try_get("link")?,
        row.try_get::<i64, _>("seeders")? as u32,
        row.try_get("indexer")?,
        kind,
        privacy,
    );
    item.magnet = row.try_get("magnet")?;
    item.languages = serde_json::from_str(&row.try_get::<String, _>("languages")?)?;
    item.file_name = row.try_get("file_name")?;
    item.torrent_download = row.try_get("torrent_download")?;
    item.trackers = serde_json::from_str(&row.try_get::<String, _>("trackers")?)?;
    item.file_index = row
        .try_get::<Option<i64>, _>("file_index")?
        .map(|index| index as usize);
    if let Some(files) = row.try_get::<Option<String>, _>("files")? {
        item.files = Some(serde_json::from_str(&files)?);
    }
    if let Some(full_index) = row.try_get::<Option<String>, _>("full_index")? {
        item.full_index = Some(serde_json::from_str(&full_index)?);
    }
    if let Some(availability) = row.try_get::<Option<String>, _>("availability")? {
        item.availability = availability.parse().ok();
    }
    Ok(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaKind;
    use crate::torrent_item::Privacy;

    #[tokio::test]
    async fn check_key_validates_and_counts() {
        let db = Db::connect_in_memory().await.unwrap();
        let key = db.create_key(Some("test"), false, Duration::days(15)).await.unwrap();

        db.check_key(&key.to_string()).await.unwrap();
        db.check_key(&key.to_string()).await.unwrap();

        let row = db.key(&key).await.unwrap().unwrap();
        assert_eq!(row.total_queries, 2);
        assert!(row.latest_query_ts.is_some());
    }

    #[tokio::test]
    async fn unknown_and_malformed_keys_are_rejected() {
        let db = Db::connect_in_memory().await.unwrap();
        assert!(db.check_key("not-a-uuid").await.is_err());
        assert!(db.check_key(&Uuid::new_v4().to_string()).await.is_err());
    }

    #[tokio::test]
    async fn expired_keys_are_rejected_without_side_effects() {
        let db = Db::connect_in_memory().await.unwrap();
        let key = db
            .create_key(Some("expired"), false, Duration::days(-1))
            .await
            .unwrap();
        assert!(db.check_key(&key.to_string()).await.is_err());
        let row = db.key(&key).await.unwrap().unwrap();
        assert_eq!(row.total_queries, 0);
    }

    #[tokio::test]
    async fn maintenance_sweeps_only_stale_expired_keys() {
        let db = Db::connect_in_memory().await.unwrap();
        let stale = db
            .create_key(Some("stale"), false, Duration::days(-30))
            .await
            .unwrap();
        let eternal = db.create_key(Some("eternal"), true, Duration::days(0)).await.unwrap();
        let fresh = db.create_key(Some("fresh"), false, Duration::days(15)).await.unwrap();

        let swept = db.delete_expired_keys().await.unwrap();
        assert_eq!(swept, 1);
        assert!(db.key(&stale).await.unwrap().is_none());
        assert!(db.key(&eternal).await.unwrap().is_some());
        assert!(db.key(&fresh).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn torrent_rows_round_trip() {
        let db = Db::connect_in_memory().await.unwrap();
        let hash = "a".repeat(40);
        let mut item = TorrentItem::new(
            "Inception.2010.MULTi.1080p.BluRay.x264-Group".to_string(),
            8_000_000_000,
            Some(hash.clone()),
            Some("https://indexer.example/dl".to_string()),
            42,
            "Jackett".to_string(),
            MediaKind::Movie,
            Privacy::Public,
        );
        item.magnet = Some(format!("magnet:?xt=urn:btih:{hash}"));
        item.trackers = vec!["udp://tracker.example:1337".to_string()];
        item.file_index = Some(1);

        db.upsert_torrent_item(&item).await.unwrap();
        // Second write with fresher seeders updates in place.
        item.seeders = 77;
        db.upsert_torrent_item(&item).await.unwrap();

        let stored = db.torrent_items_by_hash(&hash).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].seeders, 77);
        assert_eq!(stored[0].raw_title, item.raw_title);
        assert_eq!(stored[0].trackers, item.trackers);
        assert_eq!(stored[0].file_index, Some(1));
    }
}
