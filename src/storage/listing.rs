//! Prefix/delimiter/marker pagination over a sorted key sequence.
//!
//! Stores enumerate their flat key namespace in ascending key order and hand
//! it to [`paginate`], which produces the S3 view: keys sharing the prefix up
//! to the first delimiter occurrence collapse into a single common prefix, and
//! common prefixes count toward `max_keys` like ordinary keys.

use super::traits::{ListPage, ListRequest};
use crate::types::BlobSummary;

/// Build one listing page from `entries`, which must be sorted by key.
pub fn paginate<I>(entries: I, request: &ListRequest) -> ListPage
where
    I: IntoIterator<Item = BlobSummary>,
{
    let mut page = ListPage::default();
    if request.max_keys == 0 {
        return page;
    }

    let prefix = request.prefix.as_str();
    let delimiter = request.delimiter.as_deref().filter(|d| !d.is_empty());
    let marker = request.marker.as_deref();

    let mut emitted = 0usize;
    let mut last_emitted: Option<String> = None;

    for entry in entries {
        if !entry.key.starts_with(prefix) {
            continue;
        }
        if marker.is_some_and(|m| entry.key.as_str() <= m) {
            continue;
        }

        let common_prefix = delimiter.and_then(|d| {
            entry.key[prefix.len()..]
                .find(d)
                .map(|idx| entry.key[..prefix.len() + idx + d.len()].to_string())
        });

        match common_prefix {
            Some(cp) => {
                // Keys sharing a prefix are contiguous in sorted order, so only
                // the previous group can repeat. A marker at or past the group
                // means it was returned on an earlier page.
                if page.common_prefixes.last() == Some(&cp) || marker.is_some_and(|m| cp.as_str() <= m)
                {
                    continue;
                }
                if emitted == request.max_keys {
                    page.is_truncated = true;
                    break;
                }
                last_emitted = Some(cp.clone());
                page.common_prefixes.push(cp);
            }
            None => {
                if emitted == request.max_keys {
                    page.is_truncated = true;
                    break;
                }
                last_emitted = Some(entry.key.clone());
                page.objects.push(entry);
            }
        }
        emitted += 1;
    }

    if page.is_truncated {
        page.next_marker = last_emitted;
    }
    page
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn summaries(keys: &[&str]) -> Vec<BlobSummary> {
        let mut keys: Vec<&str> = keys.to_vec();
        keys.sort();
        keys.into_iter()
            .map(|k| BlobSummary {
                key: k.to_string(),
                size: 1,
                etag: "e".to_string(),
                last_modified: Utc::now(),
            })
            .collect()
    }

    fn request(prefix: &str, delimiter: Option<&str>, marker: Option<&str>, max: usize) -> ListRequest {
        ListRequest {
            prefix: prefix.to_string(),
            delimiter: delimiter.map(str::to_string),
            marker: marker.map(str::to_string),
            max_keys: max,
        }
    }

    fn keys(page: &ListPage) -> Vec<&str> {
        page.objects.iter().map(|o| o.key.as_str()).collect()
    }

    #[test]
    fn test_delimiter_groups_common_prefix() {
        let page = paginate(summaries(&["a/b", "a/c", "d"]), &request("", Some("/"), None, 1000));
        assert_eq!(page.common_prefixes, vec!["a/".to_string()]);
        assert_eq!(keys(&page), vec!["d"]);
        assert!(!page.is_truncated);
    }

    #[test]
    fn test_no_delimiter_lists_every_key() {
        let page = paginate(summaries(&["a/b", "a/c", "d"]), &request("", None, None, 1000));
        assert!(page.common_prefixes.is_empty());
        assert_eq!(keys(&page), vec!["a/b", "a/c", "d"]);
    }

    #[test]
    fn test_prefix_and_nested_delimiter() {
        let entries = summaries(&["photos/2024/a.jpg", "photos/2024/b.jpg", "photos/x.jpg", "docs/y"]);
        let page = paginate(entries, &request("photos/", Some("/"), None, 1000));
        assert_eq!(page.common_prefixes, vec!["photos/2024/".to_string()]);
        assert_eq!(keys(&page), vec!["photos/x.jpg"]);
    }

    #[test]
    fn test_truncation_and_continuation() {
        let entries = summaries(&["a", "b", "c", "d", "e"]);
        let first = paginate(entries.clone(), &request("", None, None, 2));
        assert_eq!(keys(&first), vec!["a", "b"]);
        assert!(first.is_truncated);
        assert_eq!(first.next_marker.as_deref(), Some("b"));

        let second = paginate(entries, &request("", None, Some("b"), 10));
        assert_eq!(keys(&second), vec!["c", "d", "e"]);
        assert!(!second.is_truncated);
        assert_eq!(second.next_marker, None);
    }

    #[test]
    fn test_marker_on_common_prefix_skips_group() {
        let entries = summaries(&["a/1", "a/2", "b/1", "c"]);
        let first = paginate(entries.clone(), &request("", Some("/"), None, 1));
        assert_eq!(first.common_prefixes, vec!["a/".to_string()]);
        assert_eq!(first.next_marker.as_deref(), Some("a/"));

        let second = paginate(entries, &request("", Some("/"), Some("a/"), 10));
        assert_eq!(second.common_prefixes, vec!["b/".to_string()]);
        assert_eq!(keys(&second), vec!["c"]);
    }

    #[test]
    fn test_zero_max_keys() {
        let page = paginate(summaries(&["a"]), &request("", None, None, 0));
        assert!(page.objects.is_empty());
        assert!(!page.is_truncated);
    }

    proptest! {
        #[test]
        fn prop_paging_visits_every_entry_once(
            raw in proptest::collection::btree_set("[ab/]{1,6}", 0..40),
            page_size in 1usize..7,
        ) {
            let all: Vec<&str> = raw.iter().map(|s| s.as_str()).collect();
            let entries = summaries(&all);

            // Expected view: ungrouped keys plus distinct first-level prefixes
            let mut expected = BTreeSet::new();
            for k in &all {
                match k.find('/') {
                    Some(i) => expected.insert(k[..=i].to_string()),
                    None => expected.insert(k.to_string()),
                };
            }

            let mut seen = Vec::new();
            let mut marker: Option<String> = None;
            loop {
                let page = paginate(
                    entries.clone(),
                    &request("", Some("/"), marker.as_deref(), page_size),
                );
                prop_assert!(page.objects.len() + page.common_prefixes.len() <= page_size);
                seen.extend(page.objects.iter().map(|o| o.key.clone()));
                seen.extend(page.common_prefixes.iter().cloned());
                if !page.is_truncated {
                    break;
                }
                marker = page.next_marker.clone();
            }

            let seen_set: BTreeSet<String> = seen.iter().cloned().collect();
            prop_assert_eq!(seen.len(), seen_set.len());
            prop_assert_eq!(seen_set, expected);
        }
    }
}
