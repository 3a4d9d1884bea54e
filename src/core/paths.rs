//! Package-relative reference resolution.
//!
//! Resolution is pure string manipulation: no file lookups happen here.
//! Callers check the resolved path against the package file map.

use crate::domain::package::decode_reference;

/// Prefixes meaning "resolve from the package root"
pub const FILEBASE_PREFIXES: &[&str] = &["$IMS-CC-FILEBASE$", "$IMS_CC_FILEBASE$"];

/// Prefix of links to wiki pages inside the package
pub const WIKI_PREFIX: &str = "$WIKI_REFERENCE$";

/// Prefixes of links to other course objects (not files)
pub const OBJECT_PREFIXES: &[&str] = &["$CANVAS_OBJECT_REFERENCE$", "$CANVAS_COURSE_REFERENCE$"];

/// Directory wiki pages live in
const WIKI_DIR: &str = "wiki_content";

/// Classification of a raw reference string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// `http://` or `https://`
    Web,
    Mailto,
    Tel,
    Javascript,
    /// `#anchor` within the same page
    Fragment,
    /// `data:` URI
    Data,
    /// Link to another course object via a placeholder prefix
    CourseObject,
    /// Some other scheme (`ftp:`, `file:` ...)
    OtherScheme,
    /// Relative or root-relative package path
    Local,
}

/// Classify a raw `href`/`src` value
pub fn classify_reference(raw: &str) -> ReferenceKind {
    let trimmed = raw.trim();
    let lower = trimmed.to_ascii_lowercase();

    if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("//") {
        ReferenceKind::Web
    } else if lower.starts_with("mailto:") {
        ReferenceKind::Mailto
    } else if lower.starts_with("tel:") {
        ReferenceKind::Tel
    } else if lower.starts_with("javascript:") {
        ReferenceKind::Javascript
    } else if trimmed.starts_with('#') {
        ReferenceKind::Fragment
    } else if lower.starts_with("data:") {
        ReferenceKind::Data
    } else if OBJECT_PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
        ReferenceKind::CourseObject
    } else if has_scheme(trimmed) {
        ReferenceKind::OtherScheme
    } else {
        ReferenceKind::Local
    }
}

/// True for `scheme:` prefixes (letters, digits, `+-.`, at least two chars
/// so Windows drive letters don't count).
fn has_scheme(value: &str) -> bool {
    match value.split_once(':') {
        Some((scheme, _)) => {
            scheme.len() > 1
                && scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// True for absolute web URLs
pub fn is_web_url(raw: &str) -> bool {
    classify_reference(raw) == ReferenceKind::Web
}

/// Normalize protocol-relative URLs to https
pub fn normalize_web_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.strip_prefix("//") {
        Some(rest) => format!("https://{}", rest),
        None => trimmed.to_string(),
    }
}

/// Directory part of a package path (empty for root-level files)
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Last segment of a path
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Drop `?query` and `#fragment` suffixes
fn strip_query_and_fragment(raw: &str) -> &str {
    let end = raw.find(['?', '#']).unwrap_or(raw.len());
    &raw[..end]
}

/// Resolve `relative` against the directory `base`.
///
/// Returns `None` only when `relative` is blank. `..` segments collapse
/// with a floor at the package root.
pub fn resolve(base: &str, relative: &str) -> Option<String> {
    let raw = relative.trim();
    if raw.is_empty() {
        return None;
    }

    // Entities first so `&#32;` isn't mistaken for a fragment
    let unescaped = html_escape::decode_html_entities(raw);
    let decoded = decode_reference(strip_query_and_fragment(&unescaped));
    let mut reference = decoded.replace('\\', "/");
    let mut base = base.replace('\\', "/");

    if let Some(rest) = FILEBASE_PREFIXES
        .iter()
        .find_map(|prefix| reference.strip_prefix(prefix))
    {
        reference = rest.to_string();
        base.clear();
    } else if reference.starts_with('/') {
        base.clear();
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in base.split('/').chain(reference.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    Some(segments.join("/"))
}

/// Map a `$WIKI_REFERENCE$/pages/slug` link to the page's package path
pub fn resolve_wiki_reference(raw: &str) -> Option<String> {
    let rest = raw.trim().strip_prefix(WIKI_PREFIX)?;
    let rest = strip_query_and_fragment(rest);
    let slug = rest.trim_start_matches('/');
    let slug = slug.strip_prefix("pages/").unwrap_or(slug);
    if slug.is_empty() {
        return None;
    }
    let decoded = decode_reference(slug);
    if decoded.ends_with(".html") {
        Some(format!("{}/{}", WIKI_DIR, decoded))
    } else {
        Some(format!("{}/{}.html", WIKI_DIR, decoded))
    }
}
