use crate::clock::UTC_OFFSET_HOURS;
use crate::types::{
    BatchRecord, BriefingSummary, Enrichment, Mood, NewsItem, Result, Sentiment,
};
use chrono::{DateTime, FixedOffset, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Persists and retrieves one batch per calendar day, with atomic
/// delete-then-insert overwrite semantics.
///
/// Writes to the same batch key are serialized through a per-key lock, and
/// the overwrite itself runs inside a single transaction so a reader never
/// observes a mix of two generations.
pub struct BatchStore {
    db: SqlitePool,
    write_locks: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
    display_offset: FixedOffset,
}

impl BatchStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let db = SqlitePool::connect(database_url).await?;
        let store = Self::from_pool(db);
        store.setup_schema().await?;
        Ok(store)
    }

    /// In-memory store for tests. A single connection keeps the whole
    /// database alive for the pool's lifetime.
    pub async fn in_memory() -> Result<Self> {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self::from_pool(db);
        store.setup_schema().await?;
        Ok(store)
    }

    fn from_pool(db: SqlitePool) -> Self {
        Self {
            db,
            write_locks: Arc::new(RwLock::new(HashMap::new())),
            display_offset: FixedOffset::east_opt(UTC_OFFSET_HOURS * 3600)
                .expect("valid fixed UTC offset"),
        }
    }

    async fn setup_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_news (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                batch_date TEXT NOT NULL,
                title TEXT,
                url TEXT,
                pub_date TEXT,
                summary TEXT,
                sentiment TEXT,
                keywords TEXT,
                created_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_briefing (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                batch_date TEXT NOT NULL UNIQUE,
                mood TEXT,
                mood_label TEXT,
                summary TEXT,
                hot_keywords TEXT,
                created_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn write_lock(&self, batch_date: &str) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.write().await;
        locks
            .entry(batch_date.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Atomic overwrite: delete any prior generation for the key and insert
    /// the new items and briefing in one transaction.
    pub async fn save(
        &self,
        batch_date: &str,
        items: &[NewsItem],
        briefing: Option<&BriefingSummary>,
    ) -> Result<()> {
        let lock = self.write_lock(batch_date).await;
        let _guard = lock.lock().await;

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM daily_news WHERE batch_date = ?")
            .bind(batch_date)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM daily_briefing WHERE batch_date = ?")
            .bind(batch_date)
            .execute(&mut *tx)
            .await?;

        for item in items {
            let keywords = serde_json::to_string(&item.enrichment)?;
            sqlx::query(
                r#"
                INSERT INTO daily_news (batch_date, title, url, pub_date, summary, sentiment, keywords, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(batch_date)
            .bind(&item.title)
            .bind(&item.url)
            .bind(&item.pub_date)
            .bind(&item.summary)
            .bind(item.sentiment.map(|s| s.as_str()))
            .bind(keywords)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(briefing) = briefing {
            let hot_keywords = serde_json::to_string(&briefing.hot_keywords)?;
            sqlx::query(
                r#"
                INSERT INTO daily_briefing (batch_date, mood, mood_label, summary, hot_keywords, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(batch_date)
            .bind(briefing.mood.as_str())
            .bind(&briefing.mood_label)
            .bind(&briefing.summary)
            .bind(hot_keywords)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            batch_date,
            items = items.len(),
            briefing = briefing.is_some(),
            "Saved batch"
        );
        Ok(())
    }

    /// Load the batch for a key, or `None` when nothing is stored.
    ///
    /// All reads run in one transaction, so a save committing concurrently
    /// cannot produce a record that mixes two generations.
    pub async fn load(&self, batch_date: &str) -> Result<Option<BatchRecord>> {
        let mut tx = self.db.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT title, url, pub_date, summary, sentiment, keywords
            FROM daily_news WHERE batch_date = ? ORDER BY id
            "#,
        )
        .bind(batch_date)
        .fetch_all(&mut *tx)
        .await?;

        let items: Vec<NewsItem> = rows
            .into_iter()
            .map(|row| -> Result<NewsItem> {
                let sentiment = row
                    .try_get::<Option<String>, _>("sentiment")?
                    .and_then(|s| Sentiment::parse(&s));
                let enrichment = row
                    .try_get::<Option<String>, _>("keywords")?
                    .and_then(|raw| serde_json::from_str::<Option<Enrichment>>(&raw).ok())
                    .flatten();
                Ok(NewsItem {
                    title: row.try_get::<Option<String>, _>("title")?.unwrap_or_default(),
                    url: row.try_get::<Option<String>, _>("url")?.unwrap_or_default(),
                    pub_date: row
                        .try_get::<Option<String>, _>("pub_date")?
                        .unwrap_or_default(),
                    // The items table does not persist the raw description.
                    description: String::new(),
                    summary: row.try_get("summary")?,
                    sentiment,
                    enrichment,
                })
            })
            .collect::<Result<_>>()?;

        let briefing = Self::fetch_briefing(&mut *tx, batch_date).await?;
        let last_modified = Self::fetch_last_modified(&mut *tx, batch_date).await?;
        tx.commit().await?;

        if items.is_empty() && briefing.is_none() {
            debug!(batch_date, "No batch stored for key");
            return Ok(None);
        }

        Ok(Some(BatchRecord {
            batch_date: batch_date.to_string(),
            items,
            briefing,
            last_modified: last_modified.map(|t| t.with_timezone(&self.display_offset)),
        }))
    }

    async fn fetch_briefing(
        conn: &mut SqliteConnection,
        batch_date: &str,
    ) -> Result<Option<BriefingSummary>> {
        let row = sqlx::query(
            r#"
            SELECT mood, mood_label, summary, hot_keywords
            FROM daily_briefing WHERE batch_date = ?
            "#,
        )
        .bind(batch_date)
        .fetch_optional(conn)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let Some(mood) = row
            .try_get::<Option<String>, _>("mood")?
            .and_then(|m| Mood::parse(&m))
        else {
            return Ok(None);
        };

        let hot_keywords = row
            .try_get::<Option<String>, _>("hot_keywords")?
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        Ok(Some(BriefingSummary {
            mood,
            mood_label: row
                .try_get::<Option<String>, _>("mood_label")?
                .unwrap_or_default(),
            summary: row
                .try_get::<Option<String>, _>("summary")?
                .unwrap_or_default(),
            hot_keywords,
        }))
    }

    /// Remove all rows for a batch key from both tables.
    pub async fn delete(&self, batch_date: &str) -> Result<u64> {
        let lock = self.write_lock(batch_date).await;
        let _guard = lock.lock().await;

        let mut tx = self.db.begin().await?;
        let news = sqlx::query("DELETE FROM daily_news WHERE batch_date = ?")
            .bind(batch_date)
            .execute(&mut *tx)
            .await?;
        let briefing = sqlx::query("DELETE FROM daily_briefing WHERE batch_date = ?")
            .bind(batch_date)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let deleted = news.rows_affected() + briefing.rows_affected();
        info!(batch_date, deleted, "Deleted batch rows");
        Ok(deleted)
    }

    /// Later of the items' and briefing's creation times, in the fixed
    /// display offset. `None` when nothing is stored for the key.
    pub async fn last_modified(
        &self,
        batch_date: &str,
    ) -> Result<Option<DateTime<FixedOffset>>> {
        let mut conn = self.db.acquire().await?;
        let latest = Self::fetch_last_modified(&mut conn, batch_date).await?;
        Ok(latest.map(|t| t.with_timezone(&self.display_offset)))
    }

    // Single statement so both tables are read atomically.
    async fn fetch_last_modified(
        conn: &mut SqliteConnection,
        batch_date: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT MAX(created_at) FROM (
                SELECT created_at FROM daily_news WHERE batch_date = ?
                UNION ALL
                SELECT created_at FROM daily_briefing WHERE batch_date = ?
            )
            "#,
        )
        .bind(batch_date)
        .bind(batch_date)
        .fetch_one(conn)
        .await?;
        Ok(latest)
    }
}
