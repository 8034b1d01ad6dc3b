//! The refresh engine.
//!
//! A [`Reaper`] owns the [`FeedCache`], the in-memory picture of every
//! subscribed source, and keeps it fresh:
//!
//! - `scheduler` wakes up on a fixed interval and selects the stale sources
//! - `pool` refreshes them with a fixed number of concurrent workers
//! - [`query`] builds the read-side views (per-user feeds, merged timeline)
//!
//! Persistence is reached only through the [`FeedStore`] trait and the
//! network only through [`Fetcher`], so both can be stubbed in tests.
//!
//! # Example
//!
//! ```ignore
//! let reaper = Arc::new(Reaper::new(&config, store, fetcher));
//! let handle = reaper.start()?;
//! // ...
//! let items = reaper.timeline("alice").await?;
//! handle.stop().await;
//! ```

mod cache;
mod inflight;
mod pool;
pub mod query;
mod scheduler;
mod store;

pub use cache::FeedCache;
pub use pool::RefreshOutcome;
pub use query::{exclude_future, merged_items_by_date};
pub use scheduler::{CycleReport, SchedulerHandle};
pub use store::{FeedIdentity, FeedStore};

use chrono::{DateTime, Utc};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::feed::{FetchError, Fetcher, Item, Source};
use crate::util::{validate_url, UrlValidationError};
use inflight::InFlight;

/// Errors returned to callers of the submission and query paths.
///
/// The background refresh path never returns errors; it logs and records them.
#[derive(Debug, Error)]
pub enum ReaperError {
    #[error("Can't fetch '{url}': {source}")]
    Fetch { url: String, source: FetchError },

    #[error("Can't parse URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: UrlValidationError,
    },

    #[error("A refresh of '{0}' is already in progress")]
    RefreshInProgress(String),

    #[error("No cached item links to '{0}'")]
    UnknownItem(String),

    #[error("Refresh scheduler already started")]
    AlreadyStarted,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub struct Reaper {
    cache: FeedCache,
    store: Arc<dyn FeedStore>,
    fetcher: Arc<dyn Fetcher>,
    in_flight: InFlight,
    /// Serializes refresh cycles (scheduled and manual).
    cycle_lock: tokio::sync::Mutex<()>,
    started: AtomicBool,
    interval: Duration,
    workers: usize,
    allow_private_hosts: bool,
}

impl Reaper {
    pub fn new(config: &Config, store: Arc<dyn FeedStore>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            cache: FeedCache::new(),
            store,
            fetcher,
            in_flight: InFlight::default(),
            cycle_lock: tokio::sync::Mutex::new(()),
            started: AtomicBool::new(false),
            interval: config.refresh_interval(),
            workers: config.worker_count.max(1),
            allow_private_hosts: config.allow_private_hosts,
        }
    }

    pub fn cache(&self) -> &FeedCache {
        &self.cache
    }

    /// When a source refreshed (or failed to) at `now` becomes eligible again.
    pub(crate) fn next_refresh_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.interval)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Seed the cache with a placeholder for every persisted source.
    ///
    /// Nothing is fetched here; the placeholders are stale, so the next
    /// refresh cycle picks them up. A placeholder carries the last error
    /// recorded for its URL. URLs already cached are left alone.
    /// Returns the number of new entries.
    pub async fn load(&self) -> Result<usize, ReaperError> {
        let persisted = self.store.all_sources().await?;
        let added = persisted
            .iter()
            .filter(|record| {
                self.cache.insert_pending_with(&record.url, || Source {
                    fetch_error: record.fetch_error.clone(),
                    ..Source::pending(record.url.as_str())
                })
            })
            .count();
        tracing::info!(
            persisted = persisted.len(),
            added = added,
            "Seeded feed cache from storage"
        );
        Ok(added)
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Fetch a new source immediately and start maintaining it.
    ///
    /// Adding a URL that is already cached returns the cached source without
    /// fetching. A failed fetch leaves both the cache and storage untouched.
    pub async fn add_source(&self, url: &str) -> Result<Arc<Source>, ReaperError> {
        if let Some(existing) = self.cache.get(url) {
            return Ok(existing);
        }

        let Some(_claim) = self.in_flight.claim(url) else {
            return Err(ReaperError::RefreshInProgress(url.to_string()));
        };
        // Another submission may have finished between the lookup and the claim
        if let Some(existing) = self.cache.get(url) {
            return Ok(existing);
        }

        let fetched = self
            .fetch_source(url)
            .await
            .map_err(|source| ReaperError::Fetch {
                url: url.to_string(),
                source,
            })?;

        self.store.record_new_source(url).await?;

        let now = Utc::now();
        let source = self
            .cache
            .upsert(fetched.refreshed(now, self.next_refresh_after(now)));
        tracing::info!(url = %url, items = source.items.len(), "Added new feed");
        Ok(source)
    }

    /// Replace a user's subscriptions with the URLs in `input`.
    ///
    /// Blank entries are skipped and surrounding whitespace trimmed. URLs the
    /// service does not know yet are validated and fetched first; if any of
    /// them fails, the user's subscriptions are left as they were. Returns the
    /// URLs now subscribed.
    pub async fn subscribe(&self, user: &str, input: &[String]) -> Result<Vec<String>, ReaperError> {
        let mut urls: Vec<String> = Vec::new();
        for raw in input {
            let url = raw.trim();
            if url.is_empty() || urls.iter().any(|u| u == url) {
                continue;
            }
            if !self.cache.has(url) {
                validate_url(url, self.allow_private_hosts).map_err(|source| {
                    ReaperError::InvalidUrl {
                        url: url.to_string(),
                        source,
                    }
                })?;
            }
            urls.push(url.to_string());
        }

        for url in &urls {
            if !self.cache.has(url) {
                self.add_source(url).await?;
            }
        }

        self.store.replace_subscriptions(user, &urls).await?;
        tracing::info!(user = %user, feeds = urls.len(), "Updated subscriptions");
        Ok(urls)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn has_feed(&self, url: &str) -> bool {
        self.cache.has(url)
    }

    pub fn get_feed(&self, url: &str) -> Option<Arc<Source>> {
        self.cache.get(url)
    }

    /// Look up an item by its link across every cached source.
    pub fn get_item(&self, link: &str) -> Option<Item> {
        self.cache.find_item(link)
    }

    /// Bookmark the cached item linking to `link` for the user.
    ///
    /// Only items currently held by some cached source can be saved.
    pub async fn save_item(&self, user: &str, link: &str) -> Result<Item, ReaperError> {
        let item = self
            .get_item(link)
            .ok_or_else(|| ReaperError::UnknownItem(link.to_string()))?;
        self.store.save_item(user, &item).await?;
        tracing::info!(user = %user, link = %link, "Saved item");
        Ok(item)
    }

    /// The user's sources, ordered by URL.
    ///
    /// Subscriptions are only ever created for cached sources, so a miss
    /// means a caller skipped [`Reaper::add_source`]; it is logged and left out.
    pub async fn user_feeds(&self, user: &str) -> Result<Vec<Arc<Source>>, ReaperError> {
        let urls = self.store.subscribed_urls(user).await?;
        let mut feeds = Vec::with_capacity(urls.len());
        for url in urls {
            match self.cache.get(&url) {
                Some(source) => feeds.push(source),
                None => tracing::warn!(user = %user, url = %url, "Subscribed feed missing from cache"),
            }
        }
        query::sort_by_url(&mut feeds);
        Ok(feeds)
    }

    /// Every item from the user's sources, newest first, without future-dated posts.
    pub async fn timeline(&self, user: &str) -> Result<Vec<Item>, ReaperError> {
        let feeds = self.user_feeds(user).await?;
        Ok(exclude_future(merged_items_by_date(&feeds), Utc::now()))
    }
}
