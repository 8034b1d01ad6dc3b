use dashmap::DashSet;
use std::sync::Arc;

/// URLs with a refresh currently running.
///
/// Both the worker pool and the submission path claim a URL before fetching
/// it, which keeps a single source from ever having two fetches in flight.
#[derive(Clone, Default)]
pub(crate) struct InFlight {
    urls: Arc<DashSet<String>>,
}

/// Releases its URL when dropped.
pub(crate) struct Claim {
    urls: Arc<DashSet<String>>,
    url: String,
}

impl InFlight {
    /// Claim `url`, or `None` if another refresh already holds it.
    pub(crate) fn claim(&self, url: &str) -> Option<Claim> {
        if !self.urls.insert(url.to_string()) {
            return None;
        }
        Some(Claim {
            urls: Arc::clone(&self.urls),
            url: url.to_string(),
        })
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.urls.remove(&self.url);
    }
}
