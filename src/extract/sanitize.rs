//! Allow-list HTML sanitizer producing an owned node tree.
//!
//! Disallowed elements are unwrapped (their children kept), except the
//! hard-stripped ones which are dropped with their subtree. Only
//! `src href alt title width height` survive as attributes, `href`/`src`
//! are resolved against the page URL, and elements left empty are pruned.

use scraper::{ElementRef, Node as DomNode};
use url::Url;

use super::readability::is_boilerplate;

const ALLOWED_TAGS: &[&str] = &[
    "p", "br", "strong", "em", "u", "b", "i", "a", "img", "h1", "h2", "h3", "h4", "h5", "h6", "ul",
    "ol", "li", "blockquote", "pre", "code", "figure", "figcaption", "div", "span", "table", "thead",
    "tbody", "tr", "th", "td", "video", "source",
];

const ALLOWED_ATTRS: &[&str] = &["src", "href", "alt", "title", "width", "height"];

const VOID_TAGS: &[&str] = &["br", "img", "source"];

/// Dropped with their whole subtree, wherever they appear.
pub const HARD_STRIP: &[&str] = &[
    "script", "style", "noscript", "iframe", "dialog", "form", "button", "input", "select",
    "textarea", "svg", "template", "object", "embed", "link", "meta",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: String) {
        match self.attrs.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((name.to_string(), value)),
        }
    }
}

/// Sanitized article body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    pub nodes: Vec<Node>,
}

impl Fragment {
    /// Visible text, whitespace collapsed.
    pub fn text(&self) -> String {
        let mut raw = String::new();
        collect_text(&self.nodes, &mut raw);
        raw.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        render(&self.nodes, &mut out);
        out
    }

    /// Every `img`/`video`/`source` element carrying a `src`.
    pub fn media_mut(&mut self) -> Vec<&mut Element> {
        let mut found = Vec::new();
        media_in(&mut self.nodes, &mut found);
        found
    }
}

fn media_in<'a>(nodes: &'a mut [Node], found: &mut Vec<&'a mut Element>) {
    for node in nodes.iter_mut() {
        if let Node::Element(el) = node {
            if matches!(el.tag.as_str(), "img" | "video" | "source") && el.attr("src").is_some() {
                found.push(el);
            } else {
                media_in(&mut el.children, found);
            }
        }
    }
}

fn collect_text(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Element(el) => {
                out.push(' ');
                collect_text(&el.children, out);
                out.push(' ');
            }
        }
    }
}

fn render(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(t) => out.push_str(&html_escape::encode_text(t)),
            Node::Element(el) => {
                out.push('<');
                out.push_str(&el.tag);
                for (k, v) in &el.attrs {
                    out.push(' ');
                    out.push_str(k);
                    out.push_str("=\"");
                    out.push_str(&html_escape::encode_double_quoted_attribute(v));
                    out.push('"');
                }
                out.push('>');
                if VOID_TAGS.contains(&el.tag.as_str()) {
                    continue;
                }
                render(&el.children, out);
                out.push_str("</");
                out.push_str(&el.tag);
                out.push('>');
            }
        }
    }
}

/// Sanitize the subtree under `root`. `inside_article` says whether `root`
/// already sits in an `article`/`main` container, which exempts its
/// descendants from boilerplate stripping.
pub fn sanitize(root: ElementRef, base: &Url, inside_article: bool) -> Fragment {
    let mut nodes = Vec::new();
    walk(root, base, inside_article, &mut nodes);
    Fragment { nodes }
}

fn walk(parent: ElementRef, base: &Url, inside_article: bool, out: &mut Vec<Node>) {
    for child in parent.children() {
        match child.value() {
            DomNode::Text(text) => {
                let t: &str = text;
                if !t.is_empty() {
                    push_text(out, t);
                }
            }
            DomNode::Element(_) => {
                let Some(el) = ElementRef::wrap(child) else { continue };
                let name = el.value().name().to_ascii_lowercase();
                if HARD_STRIP.contains(&name.as_str()) {
                    continue;
                }
                let inside = inside_article || name == "article" || name == "main";
                if !inside && is_boilerplate(el) {
                    continue;
                }

                let mut children = Vec::new();
                walk(el, base, inside, &mut children);

                if !ALLOWED_TAGS.contains(&name.as_str()) {
                    for c in children {
                        match c {
                            Node::Text(t) => push_text(out, &t),
                            other => out.push(other),
                        }
                    }
                    continue;
                }

                let attrs = clean_attrs(el, &name, base);
                let element = Element {
                    tag: name,
                    attrs,
                    children,
                };
                if keep(&element) {
                    out.push(Node::Element(element));
                }
            }
            _ => {}
        }
    }
}

fn push_text(out: &mut Vec<Node>, t: &str) {
    if let Some(Node::Text(prev)) = out.last_mut() {
        prev.push_str(t);
    } else {
        out.push(Node::Text(t.to_string()));
    }
}

fn clean_attrs(el: ElementRef, tag: &str, base: &Url) -> Vec<(String, String)> {
    let v = el.value();
    let mut attrs = Vec::new();

    for (name, value) in v.attrs() {
        let name = name.to_ascii_lowercase();
        if !ALLOWED_ATTRS.contains(&name.as_str()) {
            continue;
        }
        match name.as_str() {
            "href" => {
                if let Some(u) = resolve(base, value, false) {
                    attrs.push((name, u));
                }
            }
            "src" => {}
            _ => attrs.push((name, value.trim().to_string())),
        }
    }

    if matches!(tag, "img" | "video" | "source") {
        // Lazy loaders keep the real URL in data-src / data-original and a
        // placeholder in src.
        let candidates = [v.attr("data-src"), v.attr("data-original"), v.attr("src")];
        if let Some(src) = candidates
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
            .find_map(|s| resolve(base, s, true))
        {
            attrs.push(("src".to_string(), src));
        }
    }
    attrs
}

/// Absolute http(s) URL, or a `data:image/` URI when `allow_data`.
fn resolve(base: &Url, raw: &str, allow_data: bool) -> Option<String> {
    let raw = raw.trim();
    if allow_data && raw.starts_with("data:image/") {
        return Some(raw.to_string());
    }
    let url = base.join(raw).ok()?;
    match url.scheme() {
        "http" | "https" => Some(url.to_string()),
        _ => None,
    }
}

fn keep(el: &Element) -> bool {
    match el.tag.as_str() {
        "br" => true,
        "img" | "source" => el.attr("src").is_some(),
        "video" => el.attr("src").is_some() || !el.children.is_empty(),
        _ => el.children.iter().any(|c| match c {
            Node::Text(t) => !t.trim().is_empty(),
            Node::Element(_) => true,
        }),
    }
}
