//! Prompt templates. Placeholders are `{name}` and filled by [`fill`].

pub const SUMMARY_SYSTEM: &str = "You are a professional news analyst. You answer with a single JSON object and nothing else.";

pub const SUMMARY: &str = r#"Write a concise, objective and insightful summary of the news item below.

Requirements:
1. Length: about {summary_length} sentences.
2. Cover the core facts: when, who, where, what happened and its impact.
3. Tone: professional and neutral.
4. Classify the sentiment as positive, neutral or negative.
5. Rate the importance from 1 to 10 (10 is most important).
6. Set highlight to true only for major or breakthrough news.
7. Assign one short topical category (for example: Technology, Business, Politics, Science, Health, Sports, Culture).

Return a JSON object with exactly these fields:
- summary: string
- sentiment: "positive" | "neutral" | "negative"
- importance: integer 1-10
- highlight: boolean
- category: string

Title: {title}
Content: {content}
"#;

pub const TRANSLATE_SYSTEM: &str = "You are a professional translator. Output only the translation, with no explanations.";

pub const TRANSLATE: &str = "Translate the following text into {language}. Keep names, numbers and formatting intact.\n\n{text}";

pub const STRUCTURED_TRANSLATE: &str = r#"Translate each segment's "text" into {language}.
Return a JSON object {"segments": [{"id": <same id>, "translation": "<translated text>"}]}
containing every id from the input exactly once, in the same order.

Input:
{segments}
"#;

pub const RERANK_SYSTEM: &str = "You rank search results by relevance. You answer with a single JSON object and nothing else.";

pub const RERANK: &str = r#"Query: {query}

Rate how relevant each document is to the query, from 0.0 (unrelated) to 1.0 (exactly on topic).
Return {"scores": [{"id": <document id>, "score": <number>}]} with one entry per document id.

Documents:
{documents}
"#;

/// Replace each `{key}` in `template` with its value.
pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in values {
        out = out.replace(&format!("{{{}}}", key), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_replaces_all_placeholders() {
        let p = fill(TRANSLATE, &[("language", "English"), ("text", "hola")]);
        assert!(p.starts_with("Translate the following text into English."));
        assert!(p.ends_with("hola"));
        assert!(!p.contains('{'));
    }
}
