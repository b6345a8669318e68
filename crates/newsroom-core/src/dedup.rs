//! Dedup key derivation for raw feed entries.
//!
//! An entry is keyed by its external identifier (`guid` / Atom `id`) when
//! the feed supplies one, otherwise by its canonical URL. Both keys are
//! scoped to the owning source.

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use url::Url;

use crate::models::FeedEntry;

/// Query parameters that only carry campaign tracking.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_cid", "mc_eid", "ref_src"];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    ExternalId(String),
    CanonicalUrl(String),
}

/// Resolved identity of a feed entry: dedup key plus its canonical link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryIdentity {
    pub key: DedupKey,
    pub canonical_url: String,
}

impl EntryIdentity {
    pub fn external_id(&self) -> Option<&str> {
        match &self.key {
            DedupKey::ExternalId(id) => Some(id),
            DedupKey::CanonicalUrl(_) => None,
        }
    }
}

/// Derive the identity of an entry, or fail if it is malformed.
///
/// Entries need a title and at least one of guid/link. When the guid is
/// present but the link is missing, a guid that looks like a URL doubles
/// as the link.
pub fn identify(entry: &FeedEntry) -> Result<EntryIdentity> {
    if entry.title.as_deref().map(str::trim).unwrap_or("").is_empty() {
        bail!("entry has no title");
    }

    let external_id = entry
        .external_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let link = entry
        .link
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| external_id.filter(|id| id.starts_with("http")));

    let link = match link {
        Some(l) => l,
        None => bail!("entry has neither a usable guid nor a link"),
    };
    let canonical_url = canonical_url(link)?;

    let key = match external_id {
        Some(id) => DedupKey::ExternalId(id.to_string()),
        None => DedupKey::CanonicalUrl(canonical_url.clone()),
    };

    Ok(EntryIdentity { key, canonical_url })
}

/// Normalise a URL for dedup comparison.
///
/// Lowercases scheme and host (done by the parser), drops the fragment and
/// tracking parameters, and strips a trailing slash from non-root paths.
pub fn canonical_url(raw: &str) -> Result<String> {
    let mut url = Url::parse(raw.trim())?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("unsupported URL scheme: {}", url.scheme());
    }
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    Ok(url.to_string())
}

/// SHA-256 of a raw payload, hex encoded.
pub fn payload_hash(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(guid: Option<&str>, link: Option<&str>) -> FeedEntry {
        FeedEntry {
            external_id: guid.map(String::from),
            link: link.map(String::from),
            title: Some("t".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_guid_preferred() {
        let id = identify(&entry(Some("g1"), Some("https://x.test/a"))).unwrap();
        assert_eq!(id.key, DedupKey::ExternalId("g1".into()));
        assert_eq!(id.canonical_url, "https://x.test/a");
    }

    #[test]
    fn test_url_fallback() {
        let id = identify(&entry(None, Some("https://X.test/a/?utm_source=rss#top"))).unwrap();
        assert_eq!(id.key, DedupKey::CanonicalUrl("https://x.test/a".into()));
    }

    #[test]
    fn test_url_guid_doubles_as_link() {
        let id = identify(&entry(Some("https://x.test/p/1"), None)).unwrap();
        assert_eq!(id.canonical_url, "https://x.test/p/1");
    }

    #[test]
    fn test_malformed_entries_rejected() {
        assert!(identify(&entry(None, None)).is_err());
        assert!(identify(&entry(Some("opaque-id"), None)).is_err());
        let mut e = entry(Some("g"), Some("https://x.test"));
        e.title = Some("  ".into());
        assert!(identify(&e).is_err());
    }

    #[test]
    fn test_canonical_keeps_meaningful_query() {
        let c = canonical_url("https://x.test/read?id=7&utm_medium=feed").unwrap();
        assert_eq!(c, "https://x.test/read?id=7");
    }

    #[test]
    fn test_different_urls_stay_distinct() {
        let a = canonical_url("https://x.test/a").unwrap();
        let b = canonical_url("https://x.test/b").unwrap();
        assert_ne!(a, b);
    }
}
