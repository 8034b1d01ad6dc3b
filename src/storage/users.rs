use anyhow::Result;

use super::schema::Database;
use super::types::DatabaseError;

impl Database {
    // ========================================================================
    // User Operations
    // ========================================================================

    /// Create a user. Credentials live with the authentication layer, not here.
    pub async fn add_user(&self, username: &str) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query("INSERT INTO users (username, created_at) VALUES (?, ?)")
            .bind(username)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn user_exists(&self, username: &str) -> Result<bool> {
        Ok(self.user_id(username).await?.is_some())
    }

    async fn user_id(&self, username: &str) -> Result<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(id,)| id))
    }

    pub(super) async fn require_user(&self, username: &str) -> Result<i64> {
        match self.user_id(username).await? {
            Some(id) => Ok(id),
            None => Err(DatabaseError::UnknownUser(username.to_string()).into()),
        }
    }

    // ========================================================================
    // Subscription Operations
    // ========================================================================

    /// URLs of every feed the user subscribes to, sorted by URL.
    ///
    /// An unknown user simply has no subscriptions.
    pub async fn user_feed_urls(&self, username: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT f.url
            FROM subscriptions s
            JOIN users u ON u.id = s.user_id
            JOIN feeds f ON f.id = s.feed_id
            WHERE u.username = ?
            ORDER BY f.url
        "#,
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(url,)| url).collect())
    }

    /// Replace a user's subscription set with `urls` in one transaction.
    ///
    /// Either the old set or the new one is visible, never a partial mix,
    /// even if the process dies half-way.
    pub async fn replace_subscriptions(&self, username: &str, urls: &[String]) -> Result<()> {
        let user_id = self.require_user(username).await?;
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM subscriptions WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        for url in urls {
            let (feed_id,): (i64,) = sqlx::query_as(
                r#"
                INSERT INTO feeds (url, created_at) VALUES (?, ?)
                ON CONFLICT(url) DO UPDATE SET url = excluded.url
                RETURNING id
            "#,
            )
            .bind(url)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query("INSERT OR IGNORE INTO subscriptions (user_id, feed_id) VALUES (?, ?)")
                .bind(user_id)
                .bind(feed_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
