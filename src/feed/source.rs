use chrono::{DateTime, Utc};

/// A single entry (post) within a [`Source`].
///
/// `link` doubles as the identity key when something needs to refer to
/// "this specific post" across sources (e.g. [`crate::reaper::Reaper::get_item`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub title: String,
    pub link: String,
    /// Publication date, falling back to the entry's last update.
    /// `None` when the feed supplied neither.
    pub published: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub categories: Vec<String>,
}

/// A subscribed feed as the service currently knows it.
///
/// Identified by `url` (the fetch URL). A source that has never been fetched
/// has an empty title and no items, and `next_refresh` at the Unix epoch so
/// the first refresh cycle picks it up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub url: String,
    pub title: String,
    /// Canonical link to the site the feed belongs to.
    pub link: Option<String>,
    pub items: Vec<Item>,
    pub last_fetched: Option<DateTime<Utc>>,
    pub next_refresh: DateTime<Utc>,
    /// Message of the most recent failed refresh, cleared on success.
    pub fetch_error: Option<String>,
}

impl Source {
    /// A placeholder entry holding only the URL, used when seeding the cache
    /// from persistence so that the first fetch is deferred to the scheduler.
    pub fn pending(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            link: None,
            items: Vec::new(),
            last_fetched: None,
            next_refresh: DateTime::<Utc>::UNIX_EPOCH,
            fetch_error: None,
        }
    }

    /// Whether the source is due for a refresh at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.next_refresh <= now
    }

    /// Display title, falling back to the URL for sources that have not been
    /// fetched yet or whose feed carries no title.
    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            &self.url
        } else {
            &self.title
        }
    }

    /// State after a successful refresh: this (freshly parsed) source stamped
    /// with the fetch time and the next eligible refresh.
    pub(crate) fn refreshed(mut self, fetched_at: DateTime<Utc>, next_refresh: DateTime<Utc>) -> Self {
        self.last_fetched = Some(fetched_at);
        self.next_refresh = next_refresh;
        self.fetch_error = None;
        self
    }

    /// State after a failed refresh: items, title and link stay untouched.
    pub(crate) fn failed(&self, message: String, next_refresh: DateTime<Utc>) -> Self {
        Self {
            fetch_error: Some(message),
            next_refresh,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn item(title: &str) -> Item {
        Item {
            title: title.to_string(),
            link: format!("https://example.com/{title}"),
            published: None,
            summary: None,
            categories: Vec::new(),
        }
    }

    #[test]
    fn test_pending_source_is_stale_immediately() {
        let source = Source::pending("https://example.com/feed.xml");
        assert!(source.is_stale(Utc::now()));
        assert!(source.items.is_empty());
        assert!(source.last_fetched.is_none());
    }

    #[test]
    fn test_stale_boundary_is_inclusive() {
        let now = Utc::now();
        let mut source = Source::pending("https://example.com/feed.xml");
        source.next_refresh = now;
        assert!(source.is_stale(now));
        source.next_refresh = now + Duration::seconds(1);
        assert!(!source.is_stale(now));
    }

    #[test]
    fn test_display_title_falls_back_to_url() {
        let mut source = Source::pending("https://example.com/feed.xml");
        assert_eq!(source.display_title(), "https://example.com/feed.xml");
        source.title = "Example".to_string();
        assert_eq!(source.display_title(), "Example");
    }

    #[test]
    fn test_failed_keeps_items_and_sets_error() {
        let now = Utc::now();
        let mut source = Source::pending("https://example.com/feed.xml");
        source.title = "Example".to_string();
        source.items = vec![item("a"), item("b")];

        let failed = source.failed("HTTP error: status 500".to_string(), now);
        assert_eq!(failed.items, source.items);
        assert_eq!(failed.title, "Example");
        assert_eq!(failed.fetch_error.as_deref(), Some("HTTP error: status 500"));
        assert_eq!(failed.next_refresh, now);
    }

    #[test]
    fn test_refreshed_clears_error() {
        let now = Utc::now();
        let mut source = Source::pending("https://example.com/feed.xml");
        source.fetch_error = Some("boom".to_string());

        let next = now + Duration::minutes(15);
        let refreshed = source.refreshed(now, next);
        assert!(refreshed.fetch_error.is_none());
        assert_eq!(refreshed.last_fetched, Some(now));
        assert_eq!(refreshed.next_refresh, next);
    }
}
