use feed_rs::model::{Entry, Link};
use feed_rs::parser;
use thiserror::Error;

use super::source::{Item, Source};

/// The payload could not be turned into a feed.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ParseError(#[from] parser::ParseFeedError);

/// Parse raw feed bytes (RSS, Atom or JSON Feed) into a [`Source`] for `url`.
///
/// The returned source has no fetch bookkeeping yet (`last_fetched` is empty);
/// callers stamp it once they know how it got here. Malformed input is an
/// error, never a partially filled source.
pub fn parse_source(url: &str, bytes: &[u8]) -> Result<Source, ParseError> {
    let feed = parser::parse(bytes)?;

    let title = feed
        .title
        .map(|t| t.content.trim().to_string())
        .unwrap_or_default();
    let link = canonical_link(&feed.links);
    let items = feed.entries.into_iter().map(into_item).collect();

    Ok(Source {
        title,
        link,
        items,
        ..Source::pending(url)
    })
}

fn into_item(entry: Entry) -> Item {
    let link = canonical_link(&entry.links).unwrap_or_default();
    let published = entry.published.or(entry.updated);
    let summary = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body));
    let title = entry
        .title
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());
    let categories = entry
        .categories
        .into_iter()
        .map(|c| c.label.unwrap_or(c.term))
        .collect();

    Item {
        title,
        link,
        published,
        summary,
        categories,
    }
}

/// Prefer the `alternate` (or rel-less) link; Atom feeds list their own
/// `self` link too, which is not where readers want to go.
fn canonical_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.clone())
}
