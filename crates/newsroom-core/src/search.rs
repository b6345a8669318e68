//! Hybrid retrieval over a [`Store`].
//!
//! The algorithm is independent of any provider: the caller embeds the
//! query (and its translation), supplies an optional [`Reranker`], and this
//! module does candidate selection, rerank fusion, thresholding and paging.
//!
//! # Query modes
//!
//! | Input | Path |
//! |-------|------|
//! | no semantic query | filtered scan, publish time desc, importance desc |
//! | semantic query + vectors | vector candidates → rerank → threshold → page |
//!
//! A semantic query without vectors is the caller's business: it should
//! fold the text into [`ContentFilter::text`] and ask for a scan.
//!
//! # Semantic path
//!
//! 1. Fetch `max(page_size × overfetch, offset + page_size)` candidates,
//!    scored by [`QueryVectors::score`](crate::embedding::QueryVectors::score).
//! 2. With a reranker and more than one candidate, rerank. Returned scores
//!    become `relevance` and lead the order; omitted ids keep their
//!    relative order at the tail. Any rerank error keeps the original order.
//! 3. Keep candidates with `relevance ?? similarity ?? 0 >= threshold`.
//! 4. Slice out the requested page.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::embedding::QueryVectors;
use crate::models::ContentFilter;
use crate::store::{CorpusStats, RecordHit, Store};

/// Retrieval tuning parameters.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    pub threshold: f64,
    /// Candidate multiplier over the page size, at least 1.
    pub overfetch: i64,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            overfetch: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SemanticQuery<'a> {
    pub text: &'a str,
    pub vectors: QueryVectors,
}

#[derive(Debug, Clone)]
pub struct RetrievalRequest<'a> {
    pub filter: ContentFilter,
    pub viewer: Option<&'a str>,
    pub semantic: Option<SemanticQuery<'a>>,
    /// 1-based page number.
    pub page: i64,
    /// 0 means statistics only.
    pub page_size: i64,
    pub params: RetrievalParams,
}

impl RetrievalRequest<'_> {
    /// Saturates; a page past the end yields an empty slice.
    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1).saturating_mul(self.page_size.max(0))
    }

    /// Number of vector candidates to pull before rerank and threshold.
    pub fn candidate_limit(&self) -> i64 {
        let size = self.page_size.max(0);
        size.saturating_mul(self.params.overfetch.max(1))
            .max(self.offset().saturating_add(size))
    }
}

/// One document submitted to a reranker.
#[derive(Debug, Clone, Serialize)]
pub struct RerankDocument {
    pub id: i64,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankScore {
    pub id: i64,
    pub score: f64,
}

/// Model-based relevance scoring of candidates against a query.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Scores may cover a subset of `docs`; unknown ids are ignored.
    async fn rerank(&self, query: &str, docs: &[RerankDocument]) -> Result<Vec<RerankScore>>;
}

/// A ranked result item.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub hit: RecordHit,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f64>,
}

impl SearchHit {
    /// `relevance ?? similarity ?? 0`.
    pub fn effective_score(&self) -> f64 {
        self.relevance.or(self.hit.similarity).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    Scan,
    Semantic,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalPage {
    pub mode: RetrievalMode,
    pub items: Vec<SearchHit>,
    pub stats: CorpusStats,
    /// Semantic path only: candidates that passed the threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<i64>,
    pub reranked: bool,
    /// Message of a swallowed rerank failure, for the caller to log.
    #[serde(skip)]
    pub rerank_error: Option<String>,
}

/// Run one retrieval request.
pub async fn retrieve(
    store: &dyn Store,
    reranker: Option<&dyn Reranker>,
    req: &RetrievalRequest<'_>,
) -> Result<RetrievalPage> {
    let stats = store.stats(&req.filter, req.viewer).await?;

    let mut page = RetrievalPage {
        mode: if req.semantic.is_some() {
            RetrievalMode::Semantic
        } else {
            RetrievalMode::Scan
        },
        items: Vec::new(),
        stats,
        matched: None,
        reranked: false,
        rerank_error: None,
    };

    if req.page_size <= 0 {
        return Ok(page);
    }

    let semantic = match &req.semantic {
        None => {
            page.items = store
                .scan(&req.filter, req.viewer, req.page_size, req.offset())
                .await?
                .into_iter()
                .map(|hit| SearchHit {
                    hit,
                    relevance: None,
                })
                .collect();
            return Ok(page);
        }
        Some(s) => s,
    };

    let candidates: Vec<SearchHit> = store
        .vector_search(
            &semantic.vectors,
            &req.filter,
            req.viewer,
            req.candidate_limit(),
        )
        .await?
        .into_iter()
        .map(|hit| SearchHit {
            hit,
            relevance: None,
        })
        .collect();

    let candidates = match reranker {
        Some(r) if candidates.len() > 1 => {
            let docs: Vec<RerankDocument> = candidates.iter().map(rerank_document).collect();
            match r.rerank(semantic.text, &docs).await {
                Ok(scores) => {
                    page.reranked = true;
                    apply_rerank(candidates, &scores)
                }
                Err(e) => {
                    page.rerank_error = Some(format!("{:#}", e));
                    candidates
                }
            }
        }
        _ => candidates,
    };

    let passed = apply_threshold(candidates, req.params.threshold);
    page.matched = Some(passed.len() as i64);
    page.items = passed
        .into_iter()
        .skip(req.offset() as usize)
        .take(req.page_size as usize)
        .collect();

    Ok(page)
}

/// Text sent to the reranker for one candidate.
pub fn rerank_document(hit: &SearchHit) -> RerankDocument {
    let r = &hit.hit.record;
    let body = r
        .ai_summary
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(&r.snippet);
    RerankDocument {
        id: r.id,
        text: format!("{}\n{}", r.title, body),
    }
}

/// Reorder candidates by rerank scores.
///
/// Scored candidates come first, by score desc (stable for ties); the
/// rest follow in their original order with `relevance` unset.
pub fn apply_rerank(candidates: Vec<SearchHit>, scores: &[RerankScore]) -> Vec<SearchHit> {
    let by_id: HashMap<i64, f64> = scores
        .iter()
        .filter(|s| s.score.is_finite())
        .map(|s| (s.id, s.score))
        .collect();

    let (mut scored, tail): (Vec<SearchHit>, Vec<SearchHit>) = candidates
        .into_iter()
        .map(|mut c| {
            c.relevance = by_id.get(&c.hit.record.id).copied();
            c
        })
        .partition(|c| c.relevance.is_some());

    scored.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.extend(tail);
    scored
}

pub fn apply_threshold(candidates: Vec<SearchHit>, threshold: f64) -> Vec<SearchHit> {
    candidates
        .into_iter()
        .filter(|c| c.effective_score() >= threshold)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentRecord, FeedEntry, NewSource};
    use crate::store::memory::InMemoryStore;
    use anyhow::bail;

    struct FailingReranker;

    #[async_trait]
    impl Reranker for FailingReranker {
        async fn rerank(&self, _q: &str, _d: &[RerankDocument]) -> Result<Vec<RerankScore>> {
            bail!("rerank endpoint returned 503")
        }
    }

    struct FixedReranker(Vec<RerankScore>);

    #[async_trait]
    impl Reranker for FixedReranker {
        async fn rerank(&self, _q: &str, _d: &[RerankDocument]) -> Result<Vec<RerankScore>> {
            Ok(self.0.clone())
        }
    }

    /// Records whose embedding has cosine similarity `s` with `[1, 0]`.
    fn seeded(similarities: &[f64]) -> (InMemoryStore, Vec<i64>) {
        let store = InMemoryStore::new();
        let src = store
            .add_source(NewSource {
                key: "a".into(),
                name: "A".into(),
                url: "https://a.test/feed".into(),
                category: None,
                owner: None,
            })
            .unwrap();
        let mut ids = Vec::new();
        for (i, s) in similarities.iter().enumerate() {
            let mut r = ContentRecord::from_entry(
                &src,
                i as i64,
                &FeedEntry {
                    title: Some(format!("item {}", i)),
                    ..Default::default()
                },
                &format!("https://a.test/{}", i),
                i as i64,
            );
            r.raw_entry_id = None;
            let y = (1.0 - s * s).max(0.0).sqrt();
            r.embedding = Some(vec![*s as f32, y as f32]);
            ids.push(store.insert_record(r).unwrap());
        }
        (store, ids)
    }

    fn semantic_request(page_size: i64) -> RetrievalRequest<'static> {
        RetrievalRequest {
            filter: ContentFilter::default(),
            viewer: None,
            semantic: Some(SemanticQuery {
                text: "q",
                vectors: QueryVectors {
                    primary: vec![1.0, 0.0],
                    translated: None,
                },
            }),
            page: 1,
            page_size,
            params: RetrievalParams::default(),
        }
    }

    #[test]
    fn test_paging_arithmetic_saturates() {
        let mut req = semantic_request(20);
        req.page = i64::MAX / 2;
        assert_eq!(req.offset(), i64::MAX);
        assert_eq!(req.candidate_limit(), i64::MAX);
        req.page = i64::MAX;
        req.page_size = i64::MAX;
        assert_eq!(req.offset(), i64::MAX);
    }

    #[tokio::test]
    async fn test_page_far_past_the_end_is_empty() {
        let (store, _) = seeded(&[0.9, 0.8]);
        let mut req = semantic_request(20);
        req.page = i64::MAX / 2;
        let page = retrieve(&store, None, &req).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.matched, Some(2));

        req.semantic = None;
        let page = retrieve(&store, None, &req).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.stats.global_total, 2);
    }

    fn ids(page: &RetrievalPage) -> Vec<i64> {
        page.items.iter().map(|h| h.hit.record.id).collect()
    }

    #[tokio::test]
    async fn test_threshold_scenario_without_rerank() {
        let (store, ids_) = seeded(&[0.5, 0.25, 0.31]);
        let page = retrieve(&store, None, &semantic_request(10)).await.unwrap();
        assert_eq!(ids(&page), vec![ids_[0], ids_[2]]);
        assert_eq!(page.matched, Some(2));
    }

    #[tokio::test]
    async fn test_rerank_failure_keeps_order() {
        let (store, _) = seeded(&[0.9, 0.4, 0.7, 0.35]);
        let baseline = retrieve(&store, None, &semantic_request(10)).await.unwrap();
        let page = retrieve(&store, Some(&FailingReranker), &semantic_request(10))
            .await
            .unwrap();
        assert_eq!(ids(&page), ids(&baseline));
        assert!(!page.reranked);
        assert!(page.rerank_error.is_some());
        assert!(page.items.iter().all(|h| h.relevance.is_none()));
    }

    #[tokio::test]
    async fn test_rerank_scores_lead_and_omissions_trail() {
        let (store, i) = seeded(&[0.9, 0.8, 0.7, 0.6]);
        let reranker = FixedReranker(vec![
            RerankScore { id: i[2], score: 0.95 },
            RerankScore { id: i[3], score: 0.5 },
        ]);
        let page = retrieve(&store, Some(&reranker), &semantic_request(10))
            .await
            .unwrap();
        assert_eq!(ids(&page), vec![i[2], i[3], i[0], i[1]]);
        assert_eq!(page.items[0].relevance, Some(0.95));
        assert_eq!(page.items[2].relevance, None);
    }

    #[tokio::test]
    async fn test_relevance_overrides_similarity_for_threshold() {
        let (store, i) = seeded(&[0.9, 0.8]);
        let reranker = FixedReranker(vec![
            RerankScore { id: i[0], score: 0.1 },
            RerankScore { id: i[1], score: 0.6 },
        ]);
        let page = retrieve(&store, Some(&reranker), &semantic_request(10))
            .await
            .unwrap();
        assert_eq!(ids(&page), vec![i[1]]);
        assert!(page.items.iter().all(|h| h.effective_score() >= 0.3));
    }

    #[tokio::test]
    async fn test_page_size_zero_returns_stats_only() {
        let (store, _) = seeded(&[0.9, 0.8]);
        let page = retrieve(&store, None, &semantic_request(0)).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.stats.global_total, 2);
        assert_eq!(page.stats.per_source.len(), 1);
    }

    #[tokio::test]
    async fn test_scan_orders_by_publish_then_importance() {
        let (store, i) = seeded(&[0.1, 0.1, 0.1]);
        let mut req = semantic_request(10);
        req.semantic = None;
        let page = retrieve(&store, None, &req).await.unwrap();
        assert_eq!(ids(&page), vec![i[2], i[1], i[0]]);
        assert_eq!(page.mode, RetrievalMode::Scan);
        assert_eq!(page.matched, None);
    }

    #[test]
    fn test_candidate_limit_covers_offset() {
        let mut req = semantic_request(10);
        assert_eq!(req.candidate_limit(), 50);
        req.page = 8;
        assert_eq!(req.offset(), 70);
        assert_eq!(req.candidate_limit(), 80);
    }

    #[test]
    fn test_apply_rerank_ignores_unknown_ids() {
        let scores = [RerankScore { id: 999, score: 1.0 }];
        assert!(apply_rerank(Vec::new(), &scores).is_empty());
    }
}
