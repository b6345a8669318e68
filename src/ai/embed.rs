//! Embeddings with model-specific retrieval prefixes.
//!
//! Some retrieval embedding families are trained with instruction prefixes
//! and score poorly without them:
//!
//! | Model name contains | Query | Document |
//! |---------------------|-------|----------|
//! | `e5` | `query: ` | `passage: ` |
//! | `nomic` | `search_query: ` | `search_document: ` |
//! | `bge` | `Represent this sentence for searching relevant passages: ` | none |
//! | `qwen`, `gte` | `Instruct: ...\nQuery: ` | none |

use anyhow::{bail, Result};

use super::AiBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Query,
    Document,
}

const QWEN_INSTRUCT: &str =
    "Instruct: Given a news search query, retrieve relevant news articles\nQuery: ";

pub fn instruction_prefix(model: &str, purpose: Purpose) -> &'static str {
    let m = model.to_ascii_lowercase();
    match purpose {
        Purpose::Query => {
            if m.contains("e5") {
                "query: "
            } else if m.contains("nomic") {
                "search_query: "
            } else if m.contains("bge") {
                "Represent this sentence for searching relevant passages: "
            } else if m.contains("qwen") || m.contains("gte") {
                QWEN_INSTRUCT
            } else {
                ""
            }
        }
        Purpose::Document => {
            if m.contains("e5") {
                "passage: "
            } else if m.contains("nomic") {
                "search_document: "
            } else {
                ""
            }
        }
    }
}

/// Embed `text` for `purpose`, applying the model's prefix.
pub async fn embed(backend: &dyn AiBackend, text: &str, purpose: Purpose) -> Result<Vec<f32>> {
    let input = format!("{}{}", instruction_prefix(backend.model(), purpose), text.trim());
    let vector = backend.embed(&input).await?;
    if vector.is_empty() {
        bail!("model {} returned an empty embedding", backend.model());
    }
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::testing::ScriptedBackend;

    #[test]
    fn test_prefix_selection() {
        assert_eq!(instruction_prefix("intfloat/multilingual-e5-large", Purpose::Query), "query: ");
        assert_eq!(instruction_prefix("multilingual-e5-large", Purpose::Document), "passage: ");
        assert_eq!(instruction_prefix("nomic-embed-text", Purpose::Document), "search_document: ");
        assert!(instruction_prefix("Qwen3-Embedding-0.6B", Purpose::Query).starts_with("Instruct:"));
        assert_eq!(instruction_prefix("Qwen3-Embedding-0.6B", Purpose::Document), "");
        assert_eq!(instruction_prefix("text-embedding-3-small", Purpose::Query), "");
    }

    #[tokio::test]
    async fn test_embed_applies_prefix() {
        let mut b = ScriptedBackend::new(vec![]);
        b.model = "nomic-embed-text".into();
        embed(&b, " hello ", Purpose::Query).await.unwrap();
        assert_eq!(b.embedded.lock().unwrap()[0], "search_query: hello");
    }
}
