use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use super::scheduler::CycleReport;
use super::Reaper;
use crate::feed::{parse_source, FetchError, Source};

/// What happened to one source in a refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Fetched and parsed; the cache holds the new items.
    Updated,
    /// Fetch or parse failed; the previous items were kept and the error recorded.
    Failed,
    /// Another refresh of the same URL was already running.
    Skipped,
}

impl Reaper {
    /// Refresh `stale` with up to `workers` concurrent workers.
    ///
    /// The queue is filled and then closed; each worker pulls sources until
    /// the queue is drained and exits. Returns once every worker has exited.
    pub(crate) async fn run_pool(self: &Arc<Self>, stale: Vec<Arc<Source>>) -> CycleReport {
        let mut report = CycleReport {
            stale: stale.len(),
            ..CycleReport::default()
        };
        let workers = self.workers.min(stale.len());
        if workers == 0 {
            return report;
        }

        let (tx, rx) = mpsc::channel::<Arc<Source>>(workers);
        let rx = Arc::new(Mutex::new(rx));
        let mut pool = JoinSet::new();

        for worker in 0..workers {
            let reaper = Arc::clone(self);
            let rx = Arc::clone(&rx);
            pool.spawn(async move {
                let mut tally = CycleReport::default();
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(source) = next else { break };
                    tally.record(reaper.refresh_source(source).await);
                }
                tracing::trace!(worker = worker, "Refresh worker drained queue");
                tally
            });
        }
        drop(rx);

        for source in stale {
            if tx.send(source).await.is_err() {
                // Only possible if every worker died
                tracing::warn!("All refresh workers exited before the queue was drained");
                break;
            }
        }
        drop(tx);

        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(tally) => report.merge(&tally),
                Err(e) => tracing::warn!(error = %e, "Refresh worker panicked"),
            }
        }

        report
    }

    /// Refresh one source and reconcile the outcome with the cache and store.
    ///
    /// On success the cache gets the freshly parsed source. On failure the
    /// cached items stay as they were; the error is attached to the cached
    /// source and handed to the store's error sink. Either way the source's
    /// next eligible refresh moves one interval ahead.
    pub async fn refresh_source(&self, source: Arc<Source>) -> RefreshOutcome {
        let url = source.url.clone();
        let Some(_claim) = self.in_flight.claim(&url) else {
            tracing::debug!(url = %url, "Refresh already in flight, skipping");
            return RefreshOutcome::Skipped;
        };

        let started = Instant::now();
        let result = self.fetch_source(&url).await;
        let now = Utc::now();
        let next_refresh = self.next_refresh_after(now);

        match result {
            Ok(fresh) => {
                let fresh = self.cache.upsert(fresh.refreshed(now, next_refresh));
                if let Err(e) = self.store.clear_fetch_error(&url).await {
                    tracing::warn!(url = %url, error = %e, "Could not clear feed fetch error");
                }
                tracing::debug!(
                    url = %url,
                    items = fresh.items.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Feed refreshed"
                );
                RefreshOutcome::Updated
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(
                    url = %url,
                    error = %message,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Failed to fetch feed"
                );

                // Re-read so the prior items come from the latest cached state
                let current = self.cache.get(&url).unwrap_or(source);
                self.cache.upsert(current.failed(message.clone(), next_refresh));

                if let Err(db_err) = self.store.record_fetch_error(&url, &message).await {
                    tracing::warn!(url = %url, error = %db_err, "Could not set feed fetch error");
                }
                RefreshOutcome::Failed
            }
        }
    }

    pub(crate) async fn fetch_source(&self, url: &str) -> Result<Source, FetchError> {
        let bytes = self.fetcher.fetch(url).await?;
        Ok(parse_source(url, &bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::feed::{Fetcher, Item};
    use crate::reaper::{FeedIdentity, FeedStore};
    use crate::storage::FeedRecord;
    use anyhow::Result;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Fresh</title>
    <item><title>New post</title><link>https://example.com/new</link></item>
</channel></rss>"#;

    /// Serves canned responses per URL; anything else is a 404.
    struct CannedFetcher {
        bodies: HashMap<String, &'static str>,
    }

    #[async_trait]
    impl Fetcher for CannedFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            self.bodies
                .get(url)
                .map(|b| b.as_bytes().to_vec())
                .ok_or(FetchError::HttpStatus(404))
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        errors: StdMutex<Vec<(String, String)>>,
        cleared: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl FeedStore for RecordingStore {
        async fn all_sources(&self) -> Result<Vec<FeedRecord>> {
            Ok(Vec::new())
        }
        async fn subscribed_urls(&self, _user: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn record_fetch_error(&self, url: &str, message: &str) -> Result<()> {
            self.errors
                .lock()
                .unwrap()
                .push((url.to_string(), message.to_string()));
            Ok(())
        }
        async fn clear_fetch_error(&self, url: &str) -> Result<()> {
            self.cleared.lock().unwrap().push(url.to_string());
            Ok(())
        }
        async fn record_new_source(&self, _url: &str) -> Result<()> {
            Ok(())
        }
        async fn feed_identity(&self, _url: &str) -> Result<Option<FeedIdentity>> {
            Ok(None)
        }
        async fn replace_subscriptions(&self, _user: &str, _urls: &[String]) -> Result<()> {
            Ok(())
        }
        async fn save_item(&self, _user: &str, _item: &Item) -> Result<()> {
            Ok(())
        }
    }

    fn reaper(store: Arc<RecordingStore>, bodies: &[(&str, &'static str)]) -> Arc<Reaper> {
        let fetcher = CannedFetcher {
            bodies: bodies.iter().map(|(u, b)| (u.to_string(), *b)).collect(),
        };
        Arc::new(Reaper::new(&Config::default(), store, Arc::new(fetcher)))
    }

    fn old_source(url: &str) -> Source {
        Source {
            title: "Old".to_string(),
            items: vec![Item {
                title: "Old post".to_string(),
                link: "https://example.com/old".to_string(),
                published: None,
                summary: None,
                categories: Vec::new(),
            }],
            ..Source::pending(url)
        }
    }

    #[tokio::test]
    async fn test_refresh_success_replaces_items() {
        let store = Arc::new(RecordingStore::default());
        let reaper = reaper(Arc::clone(&store), &[("https://a.example.com", RSS)]);
        let source = reaper.cache().upsert(old_source("https://a.example.com"));

        let before = Utc::now();
        assert_eq!(reaper.refresh_source(source).await, RefreshOutcome::Updated);

        let cached = reaper.get_feed("https://a.example.com").unwrap();
        assert_eq!(cached.title, "Fresh");
        assert_eq!(cached.items.len(), 1);
        assert_eq!(cached.items[0].title, "New post");
        assert!(cached.last_fetched.unwrap() >= before);
        assert!(cached.next_refresh > before + chrono::Duration::minutes(14));
        assert!(store.errors.lock().unwrap().is_empty());
        assert_eq!(*store.cleared.lock().unwrap(), vec!["https://a.example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_items_and_records_once() {
        let store = Arc::new(RecordingStore::default());
        let reaper = reaper(Arc::clone(&store), &[]);
        let source = reaper.cache().upsert(old_source("https://b.example.com"));

        let before = Utc::now();
        assert_eq!(reaper.refresh_source(source).await, RefreshOutcome::Failed);

        let cached = reaper.get_feed("https://b.example.com").unwrap();
        assert_eq!(cached.title, "Old");
        assert_eq!(cached.items.len(), 1);
        assert_eq!(cached.items[0].title, "Old post");
        assert_eq!(cached.fetch_error.as_deref(), Some("HTTP error: status 404"));
        assert!(cached.next_refresh > before);

        let errors = store.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "https://b.example.com");
        assert!(!errors[0].1.is_empty());
    }

    #[tokio::test]
    async fn test_parse_failure_is_a_refresh_failure() {
        let store = Arc::new(RecordingStore::default());
        let reaper = reaper(
            Arc::clone(&store),
            &[("https://c.example.com", "<not valid xml")],
        );
        let source = reaper.cache().upsert(old_source("https://c.example.com"));

        assert_eq!(reaper.refresh_source(source).await, RefreshOutcome::Failed);
        let cached = reaper.get_feed("https://c.example.com").unwrap();
        assert_eq!(cached.items.len(), 1);
        assert!(cached
            .fetch_error
            .as_deref()
            .unwrap()
            .starts_with("Parse error"));
        assert_eq!(store.errors.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_claimed_source_is_skipped() {
        let store = Arc::new(RecordingStore::default());
        let reaper = reaper(Arc::clone(&store), &[("https://a.example.com", RSS)]);
        let source = reaper.cache().upsert(old_source("https://a.example.com"));

        let _claim = reaper.in_flight.claim("https://a.example.com").unwrap();
        assert_eq!(reaper.refresh_source(source).await, RefreshOutcome::Skipped);
        assert_eq!(reaper.get_feed("https://a.example.com").unwrap().title, "Old");
    }

    #[tokio::test]
    async fn test_run_pool_with_nothing_stale() {
        let store = Arc::new(RecordingStore::default());
        let reaper = reaper(store, &[]);
        let report = reaper.run_pool(Vec::new()).await;
        assert_eq!(report, CycleReport::default());
    }

    #[tokio::test]
    async fn test_run_pool_tallies_outcomes() {
        let store = Arc::new(RecordingStore::default());
        let reaper = reaper(
            Arc::clone(&store),
            &[("https://a.example.com", RSS), ("https://b.example.com", RSS)],
        );
        let stale = vec![
            reaper.cache().upsert(old_source("https://a.example.com")),
            reaper.cache().upsert(old_source("https://b.example.com")),
            reaper.cache().upsert(old_source("https://c.example.com")),
        ];

        let report = reaper.run_pool(stale).await;
        assert_eq!(report.stale, 3);
        assert_eq!(report.updated, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 0);
        assert!(!reaper.in_flight.contains("https://a.example.com"));
    }
}
