//! HTML content rewriting.
//!
//! Package HTML references media by package-relative path. The rewriter
//! walks the parsed document and replaces every local reference with an
//! attachment placeholder (or a broken-reference marker when the file is
//! missing), keeps external links visible, and drops active content.
//! Alongside the rewritten HTML it produces a plain-text summary.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ego_tree::NodeRef;
use regex::{Captures, Regex};
use scraper::node::Element;
use scraper::{Html, Node};

use super::paths::{self, ReferenceKind};
use crate::domain::{normalize_key, PackageFile, PackageFiles, PendingUpload};

/// Elements removed together with their content
const DROPPED: &[&str] = &[
    "script", "style", "noscript", "head", "title", "meta", "link", "base", "template",
];

/// Elements that make a description worth showing as rich HTML
const RICH: &[&str] = &[
    "img", "table", "ul", "ol", "li", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "pre",
    "code",
];

/// Elements whose boundaries separate words in the plain-text summary
const BLOCK: &[&str] = &[
    "p", "div", "br", "li", "ul", "ol", "tr", "td", "th", "table", "h1", "h2", "h3", "h4", "h5",
    "h6", "blockquote", "pre", "section", "article", "header", "footer", "hr", "dd", "dt",
];

const VOID: &[&str] = &["br", "hr", "wbr", "col", "area", "input", "img", "source", "track"];

/// Output of [`rewrite_html`]
#[derive(Debug, Clone, Default)]
pub struct RewriteResult {
    /// Text of the document's `<title>`, if any
    pub title: Option<String>,
    pub display_html: String,
    pub plain_text_summary: String,
    pub attachments: Vec<PendingUpload>,
    pub external_links: Vec<String>,
    pub is_rich: bool,
}

/// Collapse runs of whitespace into single spaces and trim
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut `text` to at most `max_chars` (ellipsis included), preferring a
/// sentence end within the last fifth of the allowed length.
pub fn truncate_summary(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }

    let limit = max_chars - 1;
    let cut: Vec<char> = text.chars().take(limit).collect();
    let window_start = limit - limit / 5;
    let boundary = cut
        .iter()
        .enumerate()
        .rev()
        .take_while(|(idx, _)| *idx >= window_start)
        .find(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(idx, _)| idx + 1);

    let end = boundary.unwrap_or(cut.len());
    let kept: String = cut[..end].iter().collect();
    format!("{}…", kept.trim_end())
}

/// Plain text of an HTML fragment, whitespace-collapsed
pub fn html_to_text(html: &str) -> String {
    let doc = Html::parse_fragment(html);
    let mut text = String::new();
    collect_text(*doc.root_element(), &mut text);
    collapse_whitespace(&text)
}

fn collect_text(node: NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Text(text) => out.push_str(text),
        Node::Element(el) => {
            if DROPPED.contains(&el.name()) {
                return;
            }
            let block = BLOCK.contains(&el.name());
            if block {
                out.push(' ');
            }
            for child in node.children() {
                collect_text(child, out);
            }
            if block {
                out.push(' ');
            }
        }
        _ => {
            for child in node.children() {
                collect_text(child, out);
            }
        }
    }
}

/// Locate the `<body>` of a parsed document (or its root)
pub fn body_of(doc: &Html) -> NodeRef<'_, Node> {
    let root = doc.root_element();
    root.descendants()
        .find(|n| n.value().as_element().is_some_and(|e| e.name() == "body"))
        .unwrap_or(*root)
}

/// Resolve a local reference written inside `source_path` to a package file
pub fn resolve_file(
    files: &PackageFiles,
    source_path: &str,
    reference: &str,
) -> Option<Arc<PackageFile>> {
    let path = match paths::resolve_wiki_reference(reference) {
        Some(wiki) => wiki,
        None => paths::resolve(paths::parent_dir(source_path), reference)?,
    };
    files.get(&path).cloned()
}

/// Replace the placeholder of an uploaded video with a real link
pub fn substitute_video_links(html: &str, name: &str, url: &str) -> String {
    let encoded = html_escape::encode_double_quoted_attribute(name);
    let pattern = format!(
        r#"<span class="video-placeholder" data-video-source="{}">([^<]*)</span>"#,
        regex::escape(&encoded)
    );
    let Ok(re) = Regex::new(&pattern) else {
        return html.to_string();
    };

    let href = html_escape::encode_double_quoted_attribute(url);
    re.replace_all(html, |caps: &Captures| {
        format!(
            r#"<a class="video-link" href="{}" target="_blank" rel="noopener noreferrer">{}</a>"#,
            href, &caps[1]
        )
    })
    .into_owned()
}

/// Rewrite `raw_html` read from `source_path`
pub fn rewrite_html(
    files: &PackageFiles,
    source_path: &str,
    raw_html: &str,
    max_summary_len: usize,
) -> RewriteResult {
    let doc = Html::parse_document(raw_html);
    let mut rewriter = Rewriter::new(files, source_path);
    for child in body_of(&doc).children() {
        rewriter.walk(child);
    }

    let mut result = rewriter.finish(max_summary_len);
    result.title = doc
        .root_element()
        .descendants()
        .find(|n| n.value().as_element().is_some_and(|e| e.name() == "title"))
        .map(|n| {
            let mut text = String::new();
            collect_text(n, &mut text);
            collapse_whitespace(&text)
        })
        .filter(|t| !t.is_empty());
    result
}

/// Label used inside placeholder spans
#[derive(Debug, Clone, Copy)]
enum Label {
    Attachment,
    Image,
}

impl Label {
    fn as_str(self) -> &'static str {
        match self {
            Label::Attachment => "Attachment",
            Label::Image => "Image",
        }
    }
}

struct Rewriter<'a> {
    files: &'a PackageFiles,
    source_path: &'a str,
    html: String,
    text: String,
    attachments: Vec<PendingUpload>,
    /// normalized source path -> target name
    attached: HashMap<String, String>,
    used_names: HashSet<String>,
    links: Vec<String>,
    rich: bool,
}

impl<'a> Rewriter<'a> {
    fn new(files: &'a PackageFiles, source_path: &'a str) -> Self {
        Self {
            files,
            source_path,
            html: String::new(),
            text: String::new(),
            attachments: Vec::new(),
            attached: HashMap::new(),
            used_names: HashSet::new(),
            links: Vec::new(),
            rich: false,
        }
    }

    fn finish(self, max_summary_len: usize) -> RewriteResult {
        let summary = collapse_whitespace(&self.text);
        RewriteResult {
            title: None,
            display_html: self.html.trim().to_string(),
            plain_text_summary: truncate_summary(&summary, max_summary_len),
            attachments: self.attachments,
            external_links: self.links,
            is_rich: self.rich,
        }
    }

    fn walk(&mut self, node: NodeRef<'_, Node>) {
        match node.value() {
            Node::Text(text) => {
                self.html.push_str(&html_escape::encode_text(&**text));
                self.text.push_str(text);
            }
            Node::Element(el) => self.element(node, el),
            _ => {}
        }
    }

    fn children(&mut self, node: NodeRef<'_, Node>) {
        for child in node.children() {
            self.walk(child);
        }
    }

    fn element(&mut self, node: NodeRef<'_, Node>, el: &Element) {
        let name = el.name();
        if DROPPED.contains(&name) {
            return;
        }
        if RICH.contains(&name) || name == "br" || el.attr("style").is_some() {
            self.rich = true;
        }

        let block = BLOCK.contains(&name);
        if block {
            self.text.push(' ');
        }

        match name {
            "a" => self.anchor(node, el),
            "img" => self.image(el),
            "video" | "audio" => self.media(node, el),
            "iframe" => self.iframe(el),
            "source" | "track" => {}
            "html" | "body" => self.children(node),
            _ => {
                self.open_tag(el);
                if !VOID.contains(&name) {
                    self.children(node);
                    self.html.push_str(&format!("</{}>", name));
                }
            }
        }

        if block {
            self.text.push(' ');
        }
    }

    /// Emit a start tag with event handlers and script URLs removed
    fn open_tag(&mut self, el: &Element) {
        self.html.push('<');
        self.html.push_str(el.name());
        for (attr, value) in el.attrs() {
            let attr_lower = attr.to_ascii_lowercase();
            if attr_lower.starts_with("on")
                || value.trim().to_ascii_lowercase().starts_with("javascript:")
            {
                continue;
            }
            self.html.push_str(&format!(
                " {}=\"{}\"",
                attr,
                html_escape::encode_double_quoted_attribute(value)
            ));
        }
        self.html.push('>');
    }

    fn add_link(&mut self, url: &str) {
        if !self.links.iter().any(|l| l == url) {
            self.links.push(url.to_string());
        }
    }

    /// Attach `file` once and return the name it will be uploaded under
    fn attach(&mut self, file: Arc<PackageFile>) -> String {
        let key = normalize_key(&file.name);
        if let Some(existing) = self.attached.get(&key) {
            return existing.clone();
        }

        let base = file.file_name().to_string();
        let mut target = base.clone();
        let mut n = 2;
        while self.used_names.contains(&target.to_lowercase()) {
            target = match base.rsplit_once('.') {
                Some((stem, ext)) => format!("{} ({}).{}", stem, n, ext),
                None => format!("{} ({})", base, n),
            };
            n += 1;
        }

        self.used_names.insert(target.to_lowercase());
        self.attached.insert(key, target.clone());
        self.attachments.push(PendingUpload::new(file, target.clone()));
        target
    }

    fn placeholder(&mut self, label: Label, name: &str) {
        let shown = format!("[{}: {}]", label.as_str(), name);
        self.html.push_str(&format!(
            r#"<span class="attachment-placeholder" data-attachment="{}">{}</span>"#,
            html_escape::encode_double_quoted_attribute(name),
            html_escape::encode_text(&shown)
        ));
        self.text.push_str(&shown);
        self.rich = true;
    }

    fn broken(&mut self, shown: &str) {
        self.html.push_str(&format!(
            r#"<span class="broken-reference" style="text-decoration: line-through">{}</span>"#,
            html_escape::encode_text(shown)
        ));
        self.text.push_str(shown);
    }

    fn external_link(&mut self, url: &str, label: &str) {
        self.add_link(url);
        let shown = if label.is_empty() { url } else { label };
        self.html.push_str(&format!(
            r#"<span class="external-link" data-url="{url}"><a href="{url}" target="_blank" rel="noopener noreferrer">{text}</a></span>"#,
            url = html_escape::encode_double_quoted_attribute(url),
            text = html_escape::encode_text(shown)
        ));
        self.text.push_str(shown);
    }

    /// Rewrite media nested under an element whose own content is replaced
    /// by a single link or placeholder
    fn nested_media(&mut self, node: NodeRef<'_, Node>) {
        for child in node.children() {
            let Some(el) = child.value().as_element() else {
                continue;
            };
            match el.name() {
                "img" => self.image(el),
                "video" | "audio" => self.media(child, el),
                "iframe" => self.iframe(el),
                name if DROPPED.contains(&name) => {}
                _ => self.nested_media(child),
            }
        }
    }

    fn anchor(&mut self, node: NodeRef<'_, Node>, el: &Element) {
        let href = el.attr("href").unwrap_or("").trim();
        let mut label = String::new();
        collect_text(node, &mut label);
        let label = collapse_whitespace(&label);

        if href.is_empty() {
            self.children(node);
            return;
        }

        match paths::classify_reference(href) {
            ReferenceKind::Web => {
                self.nested_media(node);
                let url = paths::normalize_web_url(href);
                self.text.push(' ');
                self.external_link(&url, &label);
            }
            ReferenceKind::Mailto | ReferenceKind::Tel => {
                self.html.push_str(&format!(
                    r#"<a href="{}">"#,
                    html_escape::encode_double_quoted_attribute(href)
                ));
                self.children(node);
                self.html.push_str("</a>");
            }
            ReferenceKind::Javascript
            | ReferenceKind::Fragment
            | ReferenceKind::Data
            | ReferenceKind::CourseObject
            | ReferenceKind::OtherScheme => self.children(node),
            ReferenceKind::Local => {
                self.nested_media(node);
                self.text.push(' ');
                match resolve_file(self.files, self.source_path, href) {
                    Some(file) => {
                        let name = self.attach(file);
                        if !label.is_empty() && label != name {
                            self.html.push_str(&html_escape::encode_text(&label));
                            self.html.push(' ');
                            self.text.push_str(&label);
                            self.text.push(' ');
                        }
                        self.placeholder(Label::Attachment, &name);
                    }
                    None => {
                        let shown = if label.is_empty() { href.to_string() } else { label };
                        self.broken(&shown);
                    }
                }
            }
        }
    }

    fn image(&mut self, el: &Element) {
        self.rich = true;
        let src = el.attr("src").unwrap_or("").trim();
        let alt = el.attr("alt").map(collapse_whitespace).unwrap_or_default();

        match paths::classify_reference(src) {
            ReferenceKind::Web | ReferenceKind::Data if !src.is_empty() => self.open_tag(el),
            ReferenceKind::Local if !src.is_empty() => {
                match resolve_file(self.files, self.source_path, src) {
                    Some(file) => {
                        let name = self.attach(file);
                        self.placeholder(Label::Image, &name);
                    }
                    None => {
                        let shown = if alt.is_empty() {
                            format!("[Image not found: {}]", paths::file_name(src))
                        } else {
                            format!("[Image not found: {}]", alt)
                        };
                        self.broken(&shown);
                    }
                }
            }
            _ => {
                let shown = if alt.is_empty() { "[Image unavailable]".to_string() } else { alt };
                self.broken(&shown);
            }
        }
    }

    fn media(&mut self, node: NodeRef<'_, Node>, el: &Element) {
        let mut sources: Vec<String> = Vec::new();
        if let Some(src) = el.attr("src") {
            sources.push(src.trim().to_string());
        }
        for child in node.children() {
            if let Some(child_el) = child.value().as_element() {
                if child_el.name() == "source" {
                    if let Some(src) = child_el.attr("src") {
                        sources.push(src.trim().to_string());
                    }
                }
            }
        }

        let hit = sources
            .iter()
            .filter(|src| paths::classify_reference(src) == ReferenceKind::Local)
            .find_map(|src| resolve_file(self.files, self.source_path, src));

        if let Some(file) = hit {
            let fallback_title = file.file_name().to_string();
            let name = self.attach(file);
            let title = el
                .attr("title")
                .map(collapse_whitespace)
                .filter(|t| !t.is_empty())
                .unwrap_or(fallback_title);
            let shown = format!("[Video: {}]", title);
            self.html.push_str(&format!(
                r#"<span class="video-placeholder" data-video-source="{}">{}</span>"#,
                html_escape::encode_double_quoted_attribute(&name),
                html_escape::encode_text(&shown)
            ));
            self.text.push_str(&shown);
            self.rich = true;
            return;
        }

        let web = sources.iter().find(|src| paths::is_web_url(src)).cloned();
        match web {
            Some(url) => {
                let url = paths::normalize_web_url(&url);
                self.external_link(&url, "Video");
            }
            None => self.broken("[Video source not found]"),
        }
    }

    fn iframe(&mut self, el: &Element) {
        let src = el.attr("src").unwrap_or("").trim();
        match paths::classify_reference(src) {
            ReferenceKind::Web => {
                let url = paths::normalize_web_url(src);
                let label = el
                    .attr("title")
                    .map(collapse_whitespace)
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| "Embedded content".to_string());
                self.external_link(&url, &label);
            }
            ReferenceKind::Local if !src.is_empty() => {
                match resolve_file(self.files, self.source_path, src) {
                    Some(file) => {
                        let name = self.attach(file);
                        self.placeholder(Label::Attachment, &name);
                    }
                    None => self.broken(&format!("[Embedded content not found: {}]", src)),
                }
            }
            _ => {}
        }
    }
}
