//! Media rehosting over an already-sanitized [`Fragment`].
//!
//! Runs after sanitization as its own stage: every failure leaves the
//! original `src` in place and is only logged, so the article text can
//! never be affected by it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::sanitize::Fragment;
use crate::storage::ObjectStore;
use crate::transport::Transport;

#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
pub struct RehostReport {
    pub rehosted: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct MediaRehoster {
    transport: Transport,
    store: Arc<dyn ObjectStore>,
    timeout: Duration,
}

impl MediaRehoster {
    pub fn new(transport: Transport, store: Arc<dyn ObjectStore>, timeout: Duration) -> Self {
        Self {
            transport,
            store,
            timeout,
        }
    }

    pub async fn rehost(&self, fragment: &mut Fragment) -> RehostReport {
        let mut report = RehostReport::default();

        let sources: Vec<String> = fragment
            .media_mut()
            .into_iter()
            .filter_map(|el| el.attr("src").map(str::to_string))
            .collect();

        let mut replaced: HashMap<String, String> = HashMap::new();
        for (index, src) in sources.iter().enumerate() {
            if replaced.contains_key(src) {
                continue;
            }
            if src.starts_with("data:") || self.store.owns(src) {
                report.skipped += 1;
                continue;
            }
            match self.copy_one(src, index).await {
                Ok(url) => {
                    report.rehosted += 1;
                    replaced.insert(src.clone(), url);
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(src = %src, error = %format!("{:#}", e), "media rehost failed, keeping original");
                }
            }
        }

        for el in fragment.media_mut() {
            let new = el.attr("src").and_then(|s| replaced.get(s)).cloned();
            if let Some(url) = new {
                el.set_attr("src", url);
            }
        }
        report
    }

    async fn copy_one(&self, src: &str, index: usize) -> anyhow::Result<String> {
        let fetched = self.transport.get(src, self.timeout).await?;
        let content_type = fetched
            .content_type
            .as_deref()
            .and_then(|c| c.split(';').next())
            .map(|c| c.trim().to_ascii_lowercase())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let name = object_name(src, &content_type, index, chrono::Utc::now().timestamp_millis());
        self.store.put(&name, fetched.bytes, &content_type).await
    }
}

fn extension_for(content_type: &str) -> Option<&'static str> {
    Some(match content_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/avif" => "avif",
        "image/svg+xml" => "svg",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        _ => return None,
    })
}

/// `<millis>-<index>-<stem>.<ext>`; the extension comes from the content
/// type, then the URL, then `bin`.
pub fn object_name(src: &str, content_type: &str, index: usize, millis: i64) -> String {
    let last = url::Url::parse(src)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .unwrap_or_default();

    let (stem, url_ext) = match last.rsplit_once('.') {
        Some((s, e)) if !s.is_empty() && e.len() <= 5 => (s.to_string(), Some(e.to_ascii_lowercase())),
        _ => (last.clone(), None),
    };
    let mut stem: String = stem
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(40)
        .collect();
    if stem.is_empty() {
        stem = "media".to_string();
    }
    let ext = extension_for(content_type)
        .map(str::to_string)
        .or(url_ext.filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric())))
        .unwrap_or_else(|| "bin".to_string());

    format!("{}-{}-{}.{}", millis, index, stem, ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::sanitize::{Element, Node};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[test]
    fn test_object_name() {
        assert_eq!(
            object_name("https://x.test/img/photo.final.JPG?w=10", "image/jpeg", 0, 1700),
            "1700-0-photofinal.jpg"
        );
        assert_eq!(object_name("https://x.test/a/clip", "video/mp4", 2, 5), "5-2-clip.mp4");
        assert_eq!(object_name("https://x.test/", "text/plain", 1, 5), "5-1-media.bin");
    }

    struct RecordingStore(Mutex<Vec<String>>);

    #[async_trait]
    impl ObjectStore for RecordingStore {
        async fn put(&self, name: &str, _b: Vec<u8>, _ct: &str) -> anyhow::Result<String> {
            self.0.lock().unwrap().push(name.to_string());
            Ok(format!("https://cdn.test/{}", name))
        }
        fn owns(&self, url: &str) -> bool {
            url.starts_with("https://cdn.test/")
        }
    }

    #[tokio::test]
    async fn test_unreachable_media_keeps_original_src() {
        let store = Arc::new(RecordingStore(Mutex::new(Vec::new())));
        let rehoster = MediaRehoster::new(
            Transport::direct("test"),
            store.clone(),
            Duration::from_millis(200),
        );
        let img = |src: &str| {
            Node::Element(Element {
                tag: "img".into(),
                attrs: vec![("src".into(), src.into())],
                children: vec![],
            })
        };
        let mut fragment = Fragment {
            nodes: vec![
                img("http://127.0.0.1:9/missing.png"),
                img("https://cdn.test/already.png"),
                img("data:image/png;base64,AAAA"),
            ],
        };
        let before = fragment.clone();

        let report = rehoster.rehost(&mut fragment).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.rehosted, 0);
        assert_eq!(fragment, before);
        assert!(store.0.lock().unwrap().is_empty());
    }
}
