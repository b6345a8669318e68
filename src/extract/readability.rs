//! Main-content selection for a rendered page.
//!
//! Candidates are tried in tiers: `article`, then `main`, then containers
//! whose class names mark an article body. Within a tier the block with the
//! best paragraph score wins. Without any candidate the `div`/`section`
//! holding the most `<p>` tags is used, and `body` as a last resort.

use scraper::{ElementRef, Html, Selector};

const CANDIDATE_TIERS: &[&str] = &[
    "article",
    "main, [role=main]",
    "[itemprop=articleBody], [class*=article-body], [class*=article-content], \
     [class*=content-body], [class*=post-content], [class*=entry-content], [class*=story-body]",
];

/// Class / id words that mark ad, share, comment and recommendation blocks.
const BOILERPLATE_WORDS: &[&str] = &[
    "ad", "ads", "advert", "advertisement", "banner", "share", "sharing", "social", "comment",
    "comments", "related", "recommend", "recommended", "newsletter", "promo", "sponsor",
    "sponsored", "cookie", "popup", "modal", "subscribe", "breadcrumb",
];

const BOILERPLATE_TAGS: &[&str] = &["nav", "header", "footer", "aside"];

/// Selected content plus page metadata.
pub struct Readable<'a> {
    pub title: Option<String>,
    pub published_at: Option<i64>,
    pub body: ElementRef<'a>,
    /// Whether `body` is, or sits inside, an `article`/`main` element.
    pub inside_article: bool,
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

/// Whether an element is page chrome rather than content.
pub fn is_boilerplate(el: ElementRef) -> bool {
    let v = el.value();
    if BOILERPLATE_TAGS.contains(&v.name()) {
        return true;
    }
    if matches!(v.attr("role"), Some("navigation" | "banner" | "complementary" | "dialog")) {
        return true;
    }
    [v.attr("class"), v.attr("id")]
        .into_iter()
        .flatten()
        .flat_map(|s| s.split(|c: char| c.is_whitespace() || c == '-' || c == '_'))
        .any(|word| BOILERPLATE_WORDS.contains(&word.to_ascii_lowercase().as_str()))
}

/// Paragraph-based score: text inside `<p>` descendants plus a bonus per
/// paragraph, discounted by link density.
fn score(el: ElementRef, p: &Selector, a: &Selector) -> f64 {
    let mut paragraphs = 0usize;
    let mut text_len = 0usize;
    for para in el.select(p) {
        let len: usize = para.text().map(|t| t.trim().chars().count()).sum();
        if len > 0 {
            paragraphs += 1;
            text_len += len;
        }
    }
    if paragraphs == 0 {
        return 0.0;
    }
    let total: usize = el.text().map(|t| t.trim().chars().count()).sum();
    let link: usize = el
        .select(a)
        .flat_map(|x| x.text())
        .map(|t| t.trim().chars().count())
        .sum();
    let link_density = if total == 0 { 0.0 } else { link as f64 / total as f64 };
    (text_len as f64 + 25.0 * paragraphs as f64) * (1.0 - link_density)
}

fn within_article(el: ElementRef) -> bool {
    let name = el.value().name();
    name == "article"
        || name == "main"
        || el.ancestors().filter_map(ElementRef::wrap).any(|a| {
            let n = a.value().name();
            n == "article" || n == "main"
        })
}

/// Pick the article container of `doc`.
pub fn find_article(doc: &Html) -> Option<Readable<'_>> {
    let p = selector("p")?;
    let a = selector("a")?;

    let mut chosen: Option<ElementRef> = None;
    for tier in CANDIDATE_TIERS {
        let Some(sel) = selector(tier) else { continue };
        let best = doc
            .select(&sel)
            .map(|el| (score(el, &p, &a), el))
            .filter(|(s, _)| *s > 0.0)
            .max_by(|x, y| x.0.total_cmp(&y.0));
        if let Some((_, el)) = best {
            chosen = Some(el);
            break;
        }
    }

    if chosen.is_none() {
        let blocks = selector("div, section")?;
        chosen = doc
            .select(&blocks)
            .filter(|el| !is_boilerplate(*el))
            .map(|el| (el.select(&p).count(), el))
            .filter(|(n, _)| *n > 0)
            // max_by_key keeps the last maximum, prefer the outermost (first)
            .fold(None, |best: Option<(usize, ElementRef)>, cur| match best {
                Some(b) if b.0 >= cur.0 => Some(b),
                _ => Some(cur),
            })
            .map(|(_, el)| el);
    }

    let body = match chosen {
        Some(el) => el,
        None => doc.select(&selector("body")?).next()?,
    };

    Some(Readable {
        title: title(doc, body),
        published_at: published_at(doc),
        inside_article: within_article(body),
        body,
    })
}

fn first_text(scope: ElementRef, css: &str) -> Option<String> {
    let sel = selector(css)?;
    scope
        .select(&sel)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .find(|t| !t.is_empty())
}

fn meta(doc: &Html, css: &str) -> Option<String> {
    let sel = selector(css)?;
    doc.select(&sel)
        .filter_map(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

fn title(doc: &Html, body: ElementRef) -> Option<String> {
    if let Some(t) = first_text(body, "h1") {
        return Some(t);
    }
    if let Some(t) = first_text(doc.root_element(), "h1") {
        return Some(t);
    }
    if let Some(t) = meta(doc, r#"meta[property="og:title"]"#) {
        return Some(t);
    }
    first_text(doc.root_element(), "title").map(|t| {
        t.split(" | ")
            .next()
            .unwrap_or(&t)
            .trim()
            .to_string()
    })
}

fn published_at(doc: &Html) -> Option<i64> {
    let from_time = selector("time[datetime]").and_then(|sel| {
        doc.select(&sel)
            .filter_map(|el| el.value().attr("datetime"))
            .find_map(parse_datetime)
    });
    from_time
        .or_else(|| meta(doc, r#"meta[property="article:published_time"]"#).and_then(|s| parse_datetime(&s)))
        .or_else(|| meta(doc, r#"meta[name="pubdate"], meta[itemprop="datePublished"]"#).and_then(|s| parse_datetime(&s)))
        .or_else(|| first_text(doc.root_element(), "[class*=date]").and_then(|s| parse_datetime(&s)))
}

fn parse_datetime(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc2822(s) {
        return Some(dt.timestamp());
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}
