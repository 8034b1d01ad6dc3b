use anyhow::Result;

use super::schema::Database;
use super::types::SavedItem;

impl Database {
    // ========================================================================
    // Saved Item Operations
    // ========================================================================

    /// Bookmark an item for a user.
    ///
    /// Saving the same link twice keeps the first save. Returns `true` when
    /// a new save was created.
    pub async fn save_item(&self, username: &str, item_url: &str, item_title: &str) -> Result<bool> {
        let user_id = self.require_user(username).await?;
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO saved_items (user_id, item_url, item_title, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id, item_url) DO NOTHING
        "#,
        )
        .bind(user_id)
        .bind(item_url)
        .bind(item_title)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// A user's saved items, most recent first.
    pub async fn user_saved_items(&self, username: &str) -> Result<Vec<SavedItem>> {
        let items = sqlx::query_as::<_, SavedItem>(
            r#"
            SELECT si.id, si.item_url, si.item_title, si.archive_url, si.created_at
            FROM saved_items si
            JOIN users u ON u.id = si.user_id
            WHERE u.username = ?
            ORDER BY si.created_at DESC, si.id DESC
        "#,
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }
}
