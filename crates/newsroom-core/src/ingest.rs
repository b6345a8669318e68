//! Ingestion of parsed feed entries into a [`Store`].
//!
//! Every entry is keyed (see [`crate::dedup`]) and inserted with
//! insert-or-ignore semantics, so re-running the same feed converges to one
//! raw entry and one content record per key. Malformed entries are reported
//! in [`IngestReport::skipped`] and never abort the batch.

use anyhow::Result;
use serde::Serialize;

use crate::dedup::identify;
use crate::models::{FeedEntry, Source};
use crate::store::{IngestOutcome, Store};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SkippedEntry {
    /// Position of the entry in the feed document.
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct IngestReport {
    pub fetched: usize,
    pub newly_ingested: usize,
    pub duplicates: usize,
    pub skipped: Vec<SkippedEntry>,
}

/// Insert `entries` for `source`, then record the fetch time on the source.
///
/// Store errors are returned as-is; they mean the backing connection is
/// unusable, not that one entry was bad.
pub async fn ingest_entries(
    store: &dyn Store,
    source: &Source,
    entries: &[FeedEntry],
    now: i64,
) -> Result<IngestReport> {
    let mut report = IngestReport {
        fetched: entries.len(),
        ..Default::default()
    };

    for (index, entry) in entries.iter().enumerate() {
        let identity = match identify(entry) {
            Ok(id) => id,
            Err(e) => {
                report.skipped.push(SkippedEntry {
                    index,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let payload = serde_json::to_string(entry)?;

        match store
            .insert_entry(source, entry, &identity, &payload, now)
            .await?
        {
            IngestOutcome::Inserted { .. } => report.newly_ingested += 1,
            IngestOutcome::Duplicate => report.duplicates += 1,
        }
    }

    store.mark_source_fetched(source.id, now).await?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewSource;
    use crate::store::memory::InMemoryStore;

    fn feed() -> Vec<FeedEntry> {
        vec![
            FeedEntry {
                external_id: Some("g1".into()),
                link: Some("https://a.test/one".into()),
                title: Some("One".into()),
                ..Default::default()
            },
            FeedEntry {
                external_id: None,
                link: Some("https://a.test/u2".into()),
                title: Some("Two".into()),
                ..Default::default()
            },
        ]
    }

    fn source(store: &InMemoryStore) -> Source {
        store
            .add_source(NewSource {
                key: "a".into(),
                name: "Source A".into(),
                url: "https://a.test/feed".into(),
                category: None,
                owner: None,
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let store = InMemoryStore::new();
        let src = source(&store);

        let first = ingest_entries(&store, &src, &feed(), 1_000).await.unwrap();
        assert_eq!((first.fetched, first.newly_ingested), (2, 2));

        let second = ingest_entries(&store, &src, &feed(), 2_000).await.unwrap();
        assert_eq!((second.fetched, second.newly_ingested), (2, 0));
        assert_eq!(second.duplicates, 2);

        assert_eq!(store.raw_entry_count().unwrap(), 2);
        assert_eq!(store.record_count().unwrap(), 2);
        assert_eq!(store.source(src.id).unwrap().unwrap().last_fetched_at, Some(2_000));
    }

    #[tokio::test]
    async fn test_malformed_entry_skipped_not_fatal() {
        let store = InMemoryStore::new();
        let src = source(&store);
        let mut entries = feed();
        entries.insert(1, FeedEntry::default());

        let report = ingest_entries(&store, &src, &entries, 1).await.unwrap();
        assert_eq!(report.fetched, 3);
        assert_eq!(report.newly_ingested, 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].index, 1);
    }

    #[tokio::test]
    async fn test_url_fallback_collapses_same_url_only() {
        let store = InMemoryStore::new();
        let src = source(&store);
        let same = FeedEntry {
            link: Some("https://a.test/x#frag".into()),
            title: Some("X".into()),
            ..Default::default()
        };
        let other = FeedEntry {
            link: Some("https://a.test/y".into()),
            title: Some("Y".into()),
            ..Default::default()
        };
        let entries = vec![same.clone(), same, other];
        let report = ingest_entries(&store, &src, &entries, 1).await.unwrap();
        assert_eq!(report.newly_ingested, 2);
        assert_eq!(store.raw_entry_count().unwrap(), 2);
    }
}
