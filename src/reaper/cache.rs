use dashmap::DashMap;
use std::sync::Arc;

use crate::feed::{Item, Source};

/// The in-memory map from source URL to the latest known [`Source`].
///
/// Backed by a [`DashMap`]: a write locks one shard for the duration of a
/// map insert and reads of other shards proceed in parallel. No shard guard
/// is ever held across an `.await`, so a lookup can never wait on network
/// I/O. Values are handed out as `Arc<Source>` snapshots: an `upsert` swaps
/// the whole entry, so readers see either the old state or the new one.
#[derive(Default)]
pub struct FeedCache {
    sources: DashMap<String, Arc<Source>>,
}

impl FeedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, url: &str) -> bool {
        self.sources.contains_key(url)
    }

    pub fn get(&self, url: &str) -> Option<Arc<Source>> {
        self.sources.get(url).map(|entry| Arc::clone(entry.value()))
    }

    /// Insert or replace the entry for `source.url`.
    pub fn upsert(&self, source: Source) -> Arc<Source> {
        let source = Arc::new(source);
        self.sources.insert(source.url.clone(), Arc::clone(&source));
        source
    }

    /// Add a URL-only placeholder unless the URL is already cached.
    ///
    /// Returns `true` when a new entry was created.
    pub fn insert_pending(&self, url: &str) -> bool {
        self.insert_pending_with(url, || Source::pending(url))
    }

    /// Like [`FeedCache::insert_pending`], building the placeholder only
    /// when the URL is not cached yet.
    pub fn insert_pending_with(&self, url: &str, placeholder: impl FnOnce() -> Source) -> bool {
        let mut created = false;
        self.sources.entry(url.to_string()).or_insert_with(|| {
            created = true;
            Arc::new(placeholder())
        });
        created
    }

    /// Snapshot of every entry, in no particular order.
    pub fn all(&self) -> Vec<Arc<Source>> {
        self.sources
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// First cached item whose link matches, searching every source.
    pub fn find_item(&self, link: &str) -> Option<Item> {
        self.all()
            .iter()
            .find_map(|source| source.items.iter().find(|item| item.link == link).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn source_with_items(url: &str, titles: &[&str]) -> Source {
        Source {
            title: format!("Feed at {url}"),
            items: titles
                .iter()
                .map(|t| Item {
                    title: t.to_string(),
                    link: format!("{url}/{t}"),
                    published: None,
                    summary: None,
                    categories: Vec::new(),
                })
                .collect(),
            ..Source::pending(url)
        }
    }

    #[test]
    fn test_has_and_get() {
        let cache = FeedCache::new();
        cache.upsert(Source::pending("something"));
        cache.upsert(Source::pending("strange"));

        assert!(!cache.has("banana"));
        assert!(cache.has("something"));
        assert!(cache.has("strange"));
        assert_eq!(cache.get("strange").unwrap().url, "strange");
        assert!(cache.get("banana").is_none());
    }

    #[test]
    fn test_upsert_overwrites_same_url() {
        let cache = FeedCache::new();
        cache.upsert(source_with_items("https://a.example.com", &["old"]));
        cache.upsert(source_with_items("https://a.example.com", &["new1", "new2"]));

        assert_eq!(cache.len(), 1);
        let source = cache.get("https://a.example.com").unwrap();
        assert_eq!(source.items.len(), 2);
        assert_eq!(source.items[0].title, "new1");
    }

    #[test]
    fn test_insert_pending_is_idempotent() {
        let cache = FeedCache::new();
        cache.upsert(source_with_items("https://a.example.com", &["kept"]));

        assert!(!cache.insert_pending("https://a.example.com"));
        assert!(cache.insert_pending("https://b.example.com"));
        assert!(!cache.insert_pending("https://b.example.com"));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("https://a.example.com").unwrap().items.len(), 1);
    }

    #[test]
    fn test_all_returns_every_entry() {
        let cache = FeedCache::new();
        for i in 0..10 {
            cache.upsert(Source::pending(format!("https://feed{i}.example.com")));
        }
        let mut urls: Vec<String> = cache.all().iter().map(|s| s.url.clone()).collect();
        urls.sort();
        assert_eq!(urls.len(), 10);
        assert_eq!(urls[0], "https://feed0.example.com");
    }

    #[test]
    fn test_snapshot_unaffected_by_later_upsert() {
        let cache = FeedCache::new();
        cache.upsert(source_with_items("https://a.example.com", &["one"]));
        let snapshot = cache.get("https://a.example.com").unwrap();

        cache.upsert(source_with_items("https://a.example.com", &["two", "three"]));
        assert_eq!(snapshot.items.len(), 1);
    }

    #[test]
    fn test_find_item_by_link() {
        let cache = FeedCache::new();
        cache.upsert(source_with_items("https://a.example.com", &["x", "y"]));
        cache.upsert(source_with_items("https://b.example.com", &["z"]));

        let item = cache.find_item("https://b.example.com/z").unwrap();
        assert_eq!(item.title, "z");
        assert!(cache.find_item("https://c.example.com/nothing").is_none());
    }

    #[test]
    fn test_concurrent_upserts_of_different_urls() {
        let cache = Arc::new(FeedCache::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..50 {
                        cache.upsert(Source::pending(format!("https://t{t}.example.com/{i}")));
                        assert!(cache.has(&format!("https://t{t}.example.com/{i}")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 400);
    }
}
