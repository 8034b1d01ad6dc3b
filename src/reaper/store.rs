use anyhow::Result;
use async_trait::async_trait;

use crate::feed::Item;
use crate::storage::{Database, FeedRecord};

/// How the service identifies itself to a feed's operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedIdentity {
    pub id: i64,
    pub subscribers: i64,
}

/// Persistence operations the refresh engine depends on.
///
/// Implemented by [`Database`]; tests use in-memory recorders. Every call is
/// made by the worker that needs it, and a failure is logged by the caller
/// rather than retried.
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Every known source with its last recorded error, used once at
    /// startup to seed the cache.
    async fn all_sources(&self) -> Result<Vec<FeedRecord>>;

    /// URLs the user subscribes to.
    async fn subscribed_urls(&self, user: &str) -> Result<Vec<String>>;

    /// Error sink for failed refreshes.
    async fn record_fetch_error(&self, url: &str, message: &str) -> Result<()>;

    /// Forget the recorded error after a successful refresh.
    async fn clear_fetch_error(&self, url: &str) -> Result<()>;

    /// A submission introduced a URL the service did not know yet.
    async fn record_new_source(&self, url: &str) -> Result<()>;

    /// Id and subscriber count for the `User-Agent`, `None` for unknown URLs.
    async fn feed_identity(&self, url: &str) -> Result<Option<FeedIdentity>>;

    /// Atomically replace the user's subscriptions with `urls`.
    async fn replace_subscriptions(&self, user: &str, urls: &[String]) -> Result<()>;

    /// Bookmark `item` for the user.
    async fn save_item(&self, user: &str, item: &Item) -> Result<()>;
}

#[async_trait]
impl FeedStore for Database {
    async fn all_sources(&self) -> Result<Vec<FeedRecord>> {
        self.all_feeds().await
    }

    async fn subscribed_urls(&self, user: &str) -> Result<Vec<String>> {
        self.user_feed_urls(user).await
    }

    async fn record_fetch_error(&self, url: &str, message: &str) -> Result<()> {
        if self.set_feed_fetch_error(url, Some(message)).await? == 0 {
            tracing::debug!(url = %url, "Fetch error for a feed that is not persisted");
        }
        Ok(())
    }

    async fn clear_fetch_error(&self, url: &str) -> Result<()> {
        self.set_feed_fetch_error(url, None).await?;
        Ok(())
    }

    async fn record_new_source(&self, url: &str) -> Result<()> {
        self.write_feed(url).await?;
        Ok(())
    }

    async fn feed_identity(&self, url: &str) -> Result<Option<FeedIdentity>> {
        let Some(id) = self.feed_id(url).await? else {
            return Ok(None);
        };
        let subscribers = self.subscriber_count(url).await?;
        Ok(Some(FeedIdentity { id, subscribers }))
    }

    async fn replace_subscriptions(&self, user: &str, urls: &[String]) -> Result<()> {
        Database::replace_subscriptions(self, user, urls).await
    }

    async fn save_item(&self, user: &str, item: &Item) -> Result<()> {
        Database::save_item(self, user, &item.link, &item.title).await?;
        Ok(())
    }
}
