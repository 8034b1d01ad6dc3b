use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::feed::{Item, Source};

/// Order sources by URL. Not a ranking, just a stable order for listings.
pub fn sort_by_url(sources: &mut [Arc<Source>]) {
    sources.sort_by(|a, b| a.url.cmp(&b.url));
}

/// Every item of `sources` in one list, most recent first.
///
/// The sort is stable: items with equal dates keep their input order.
/// Undated items sort after all dated ones.
pub fn merged_items_by_date(sources: &[Arc<Source>]) -> Vec<Item> {
    let mut items: Vec<Item> = sources
        .iter()
        .flat_map(|source| source.items.iter().cloned())
        .collect();
    items.sort_by(|a, b| b.published.cmp(&a.published));
    items
}

/// Drop items dated strictly after `now`.
///
/// Guards the timeline against feeds with skewed clocks or bogus dates.
/// Undated items are kept.
pub fn exclude_future(items: Vec<Item>, now: DateTime<Utc>) -> Vec<Item> {
    items
        .into_iter()
        .filter(|item| item.published.map_or(true, |published| published <= now))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn item(title: &str, published: Option<DateTime<Utc>>) -> Item {
        Item {
            title: title.to_string(),
            link: format!("https://example.com/{title}"),
            published,
            summary: None,
            categories: Vec::new(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn source(url: &str, items: Vec<Item>) -> Arc<Source> {
        Arc::new(Source {
            items,
            ..Source::pending(url)
        })
    }

    fn titles(items: &[Item]) -> Vec<&str> {
        items.iter().map(|i| i.title.as_str()).collect()
    }

    #[test]
    fn test_merged_items_descending() {
        let sources = vec![
            source("https://a.example.com", vec![item("jan", Some(date(2024, 1, 1)))]),
            source(
                "https://b.example.com",
                vec![
                    item("mar", Some(date(2024, 3, 1))),
                    item("feb", Some(date(2024, 2, 1))),
                ],
            ),
        ];

        let merged = merged_items_by_date(&sources);
        assert_eq!(titles(&merged), vec!["mar", "feb", "jan"]);
    }

    #[test]
    fn test_merged_items_ties_keep_input_order() {
        let same = Some(date(2024, 5, 5));
        let sources = vec![
            source("https://a.example.com", vec![item("first", same), item("second", same)]),
            source("https://b.example.com", vec![item("third", same)]),
        ];

        let merged = merged_items_by_date(&sources);
        assert_eq!(titles(&merged), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_undated_items_sort_last() {
        let sources = vec![source(
            "https://a.example.com",
            vec![item("undated", None), item("dated", Some(date(2020, 1, 1)))],
        )];

        let merged = merged_items_by_date(&sources);
        assert_eq!(titles(&merged), vec!["dated", "undated"]);
    }

    #[test]
    fn test_merged_items_of_nothing() {
        assert!(merged_items_by_date(&[]).is_empty());
        assert!(merged_items_by_date(&[source("https://a.example.com", vec![])]).is_empty());
    }

    #[test]
    fn test_exclude_future_boundary() {
        let now = date(2024, 6, 1);
        let items = vec![
            item("next-year", Some(now + Duration::days(365))),
            item("now", Some(now)),
            item("past", Some(now - Duration::seconds(1))),
            item("undated", None),
            item("one-second-ahead", Some(now + Duration::seconds(1))),
        ];

        let kept = exclude_future(items, now);
        assert_eq!(titles(&kept), vec!["now", "past", "undated"]);
    }

    #[test]
    fn test_sort_by_url() {
        let mut sources = vec![
            source("https://c.example.com", vec![]),
            source("https://a.example.com", vec![]),
            source("https://b.example.com", vec![]),
        ];
        sort_by_url(&mut sources);
        let urls: Vec<&str> = sources.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://a.example.com", "https://b.example.com", "https://c.example.com"]
        );
    }

    proptest! {
        #[test]
        fn prop_merged_items_sorted_and_complete(
            days in prop::collection::vec(prop::collection::vec(proptest::option::of(0i64..3650), 0..8), 0..5)
        ) {
            let base = date(2015, 1, 1);
            let sources: Vec<Arc<Source>> = days
                .iter()
                .enumerate()
                .map(|(s, offsets)| {
                    let items = offsets
                        .iter()
                        .enumerate()
                        .map(|(i, d)| item(&format!("{s}-{i}"), d.map(|d| base + Duration::days(d))))
                        .collect();
                    source(&format!("https://feed{s}.example.com"), items)
                })
                .collect();

            let merged = merged_items_by_date(&sources);
            let total: usize = days.iter().map(Vec::len).sum();
            prop_assert_eq!(merged.len(), total);
            for pair in merged.windows(2) {
                prop_assert!(pair[0].published >= pair[1].published);
            }
        }

        #[test]
        fn prop_exclude_future_never_keeps_future_items(
            offsets in prop::collection::vec(-1000i64..1000, 0..32)
        ) {
            let now = date(2024, 1, 1);
            let items: Vec<Item> = offsets
                .iter()
                .enumerate()
                .map(|(i, o)| item(&i.to_string(), Some(now + Duration::hours(*o))))
                .collect();

            let kept = exclude_future(items, now);
            let expected = offsets.iter().filter(|o| **o <= 0).count();
            prop_assert_eq!(kept.len(), expected);
            prop_assert!(kept.iter().all(|i| i.published.map_or(true, |p| p <= now)));
        }
    }
}
