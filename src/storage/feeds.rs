use anyhow::Result;

use super::schema::Database;
use super::types::FeedRecord;

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Persist a feed URL. Writing a URL that already exists is a no-op.
    pub async fn write_feed(&self, url: &str) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feeds (url, created_at) VALUES (?, ?)
            ON CONFLICT(url) DO UPDATE SET url = excluded.url
            RETURNING id
        "#,
        )
        .bind(url)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Every persisted feed with its last fetch error, ordered by URL.
    ///
    /// Used once at startup to seed the in-memory cache.
    pub async fn all_feeds(&self) -> Result<Vec<FeedRecord>> {
        let feeds = sqlx::query_as::<_, FeedRecord>(
            "SELECT id, url, fetch_error FROM feeds ORDER BY url",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    /// Database id of a feed, if the URL is known.
    pub async fn feed_id(&self, url: &str) -> Result<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM feeds WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(id,)| id))
    }

    /// Number of users subscribed to the feed at `url` (0 for unknown URLs).
    pub async fn subscriber_count(&self, url: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(s.id)
            FROM feeds f
            JOIN subscriptions s ON s.feed_id = f.id
            WHERE f.url = ?
        "#,
        )
        .bind(url)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Set or clear the last fetch error for a feed.
    ///
    /// Unknown URLs are ignored; the row count is returned so callers can tell.
    pub async fn set_feed_fetch_error(&self, url: &str, error: Option<&str>) -> Result<u64> {
        let result = sqlx::query("UPDATE feeds SET fetch_error = ? WHERE url = ?")
            .bind(error)
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// The last recorded fetch error for a feed, if any.
    pub async fn feed_fetch_error(&self, url: &str) -> Result<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT fetch_error FROM feeds WHERE url = ?")
                .bind(url)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(error,)| error))
    }
}
