//! Small helpers over `roxmltree` shared by the manifest, classifier and
//! assessment parsers. Elements are matched by local name so documents with
//! and without namespaces read the same.

use roxmltree::{Document, Node, ParsingOptions};

/// Parse XML, tolerating a DOCTYPE
pub fn parse(text: &str) -> Result<Document<'_>, roxmltree::Error> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    Document::parse_with_options(text, options)
}

pub fn is_named(node: Node<'_, '_>, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

/// First direct child element named `name`
pub fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| is_named(*n, name))
}

/// Direct child elements named `name`
pub fn children<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children().filter(move |n| is_named(*n, name))
}

/// First element named `name` below `node` (excluding `node` itself)
pub fn descendant<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.descendants().skip(1).find(|n| is_named(*n, name))
}

/// All elements named `name` below `node`
pub fn descendants<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.descendants().skip(1).filter(move |n| is_named(*n, name))
}

/// Element children only
pub fn elements<'a, 'input: 'a>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children().filter(|n| n.is_element())
}

/// Concatenated text content, whitespace-collapsed. Inline markup does not
/// split words: `wo<b>rd</b>` reads as `word`.
pub fn text(node: Node<'_, '_>) -> String {
    let raw: String = node
        .descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect();
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trimmed, non-empty attribute value
pub fn attr<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.attribute(name).map(str::trim).filter(|v| !v.is_empty())
}

/// `xml:base` of an element, if set
pub fn xml_base<'a>(node: Node<'a, '_>) -> Option<&'a str> {
    node.attribute((roxmltree::NS_XML_URI, "base"))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
