//! Package manifest parsing and traversal planning.
//!
//! The manifest's organization tree is flattened into an ordered list of
//! [`WorkUnit`]s (depth-first, pre-order) before any resource is classified.
//! Classification then consumes the plan one unit at a time.

use std::collections::{HashMap, HashSet};

use roxmltree::Node;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::paths::{self, ReferenceKind};
use super::xml;

/// Topic used when a container's title sanitizes to nothing
pub const UNTITLED_TOPIC: &str = "Untitled Topic";

const TOPIC_STRIP: &[char] = &['<', '>', '{', '}', '[', ']', '|', '\\', '^', '`'];

/// Manifest-level failures (fatal for the run)
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Manifest is not valid XML: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("Root element is <{0}>, expected <manifest>")]
    NotManifest(String),
}

/// One `item` of the organization tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestNode {
    pub identifier: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_ref: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ManifestNode>,
}

/// One `resource` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceDescriptor {
    pub identifier: String,
    /// The `type` attribute, verbatim
    pub kind: String,
    /// Package path of the main file, already resolved against the base
    pub primary_href: Option<String>,
    /// Package directory hrefs of this resource are relative to
    pub base_href: String,
    /// Identifiers of resources this one depends on
    pub dependencies: Vec<String>,
    /// Raw `file href` values
    pub files: Vec<String>,
}

impl ResourceDescriptor {
    /// Resolve one of this resource's hrefs to a package path
    pub fn resolve(&self, href: &str) -> Option<String> {
        paths::resolve(&self.base_href, href)
    }
}

/// What a work unit points at
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum WorkTarget {
    Resource(String),
    /// Organization node with neither a resource nor children
    Empty,
}

/// One step of the traversal plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkUnit {
    pub identifier: String,
    pub title: String,
    pub topic: Option<String>,
    pub target: WorkTarget,
}

/// Parsed manifest
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub title: Option<String>,
    organization: Vec<ManifestNode>,
    resources: Vec<ResourceDescriptor>,
    /// Raw `href` attribute per resource (before base resolution)
    raw_hrefs: HashMap<String, String>,
    index: HashMap<String, usize>,
}

/// Strip markup-ish and control characters, collapse whitespace and cap the
/// length of a topic name.
pub fn sanitize_topic(raw: &str, max_len: usize) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .filter(|c| !TOPIC_STRIP.contains(c))
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let capped: String = collapsed.chars().take(max_len).collect();
    let capped = capped.trim_end();

    if capped.is_empty() {
        UNTITLED_TOPIC.to_string()
    } else {
        capped.to_string()
    }
}

/// Join a chain of `xml:base` values into one package directory
fn join_base(base: &str, next: Option<&str>) -> String {
    match next {
        Some(next) => paths::resolve(base, next).unwrap_or_else(|| base.to_string()),
        None => base.to_string(),
    }
}

fn parse_node(node: Node<'_, '_>) -> ManifestNode {
    ManifestNode {
        identifier: xml::attr(node, "identifier").unwrap_or_default().to_string(),
        title: xml::child(node, "title").map(xml::text).unwrap_or_default(),
        resource_ref: xml::attr(node, "identifierref").map(str::to_string),
        children: xml::children(node, "item").map(parse_node).collect(),
    }
}

impl Manifest {
    /// Parse manifest XML located at `manifest_path` inside the package
    pub fn parse(manifest_path: &str, text: &str) -> Result<Self, ManifestError> {
        let doc = xml::parse(text)?;
        let root = doc.root_element();
        if !xml::is_named(root, "manifest") {
            return Err(ManifestError::NotManifest(root.tag_name().name().to_string()));
        }

        let mut manifest = Manifest {
            title: xml::descendant(root, "general")
                .and_then(|general| xml::child(general, "title"))
                .map(xml::text)
                .filter(|t| !t.is_empty()),
            ..Default::default()
        };

        if let Some(organization) = xml::child(root, "organizations")
            .and_then(|orgs| xml::child(orgs, "organization"))
        {
            manifest.organization = xml::children(organization, "item").map(parse_node).collect();
        }

        let root_base = join_base(paths::parent_dir(manifest_path), xml::xml_base(root));
        if let Some(resources) = xml::child(root, "resources") {
            let resources_base = join_base(&root_base, xml::xml_base(resources));
            for resource in xml::children(resources, "resource") {
                let identifier = xml::attr(resource, "identifier").unwrap_or_default().to_string();
                if identifier.is_empty() || manifest.index.contains_key(&identifier) {
                    debug!(identifier = %identifier, "Ignoring resource without unique identifier");
                    continue;
                }

                let base_href = join_base(&resources_base, xml::xml_base(resource));
                let files: Vec<String> = xml::children(resource, "file")
                    .filter_map(|f| xml::attr(f, "href"))
                    .map(str::to_string)
                    .collect();
                let raw_href = xml::attr(resource, "href")
                    .map(str::to_string)
                    .or_else(|| files.first().cloned());
                let primary_href = raw_href
                    .as_deref()
                    .filter(|href| paths::classify_reference(href) == ReferenceKind::Local)
                    .and_then(|href| paths::resolve(&base_href, href));

                if let Some(raw) = raw_href {
                    manifest.raw_hrefs.insert(identifier.clone(), raw);
                }

                let descriptor = ResourceDescriptor {
                    identifier: identifier.clone(),
                    kind: xml::attr(resource, "type").unwrap_or_default().to_string(),
                    primary_href,
                    base_href,
                    dependencies: xml::children(resource, "dependency")
                        .filter_map(|d| xml::attr(d, "identifierref"))
                        .map(str::to_string)
                        .collect(),
                    files,
                };
                manifest.index.insert(identifier, manifest.resources.len());
                manifest.resources.push(descriptor);
            }
        }

        Ok(manifest)
    }

    pub fn organization(&self) -> &[ManifestNode] {
        &self.organization
    }

    pub fn resources(&self) -> &[ResourceDescriptor] {
        &self.resources
    }

    pub fn resource(&self, identifier: &str) -> Option<&ResourceDescriptor> {
        self.index.get(identifier).map(|&idx| &self.resources[idx])
    }

    /// The resource's `href` as written, e.g. an absolute URL
    pub fn raw_href(&self, identifier: &str) -> Option<&str> {
        self.raw_hrefs.get(identifier).map(String::as_str)
    }

    /// Flatten the organization (or, without one, the resource list) into
    /// the ordered traversal plan.
    pub fn work_plan(&self, max_topic_len: usize) -> Vec<WorkUnit> {
        let mut plan = Vec::new();

        if self.organization.is_empty() {
            let referenced: HashSet<&str> = self
                .resources
                .iter()
                .flat_map(|r| r.dependencies.iter().map(String::as_str))
                .collect();

            for resource in &self.resources {
                if referenced.contains(resource.identifier.as_str()) {
                    continue;
                }
                plan.push(WorkUnit {
                    identifier: resource.identifier.clone(),
                    title: String::new(),
                    topic: None,
                    target: WorkTarget::Resource(resource.identifier.clone()),
                });
            }
            debug!(units = plan.len(), "No organization, using flat resource list");
            return plan;
        }

        for node in &self.organization {
            plan_node(node, None, max_topic_len, &mut plan);
        }
        plan
    }
}

fn plan_node(node: &ManifestNode, topic: Option<&str>, max_topic_len: usize, plan: &mut Vec<WorkUnit>) {
    if let Some(ref resource_ref) = node.resource_ref {
        plan.push(WorkUnit {
            identifier: node.identifier.clone(),
            title: node.title.clone(),
            topic: topic.map(str::to_string),
            target: WorkTarget::Resource(resource_ref.clone()),
        });
    } else if node.children.is_empty() {
        plan.push(WorkUnit {
            identifier: node.identifier.clone(),
            title: node.title.clone(),
            topic: topic.map(str::to_string),
            target: WorkTarget::Empty,
        });
    }

    if node.children.is_empty() {
        return;
    }

    // Untitled wrappers (e.g. a single root item) keep the enclosing topic
    let own_topic = if node.title.trim().is_empty() {
        topic.map(str::to_string)
    } else {
        Some(sanitize_topic(&node.title, max_topic_len))
    };
    for child in &node.children {
        plan_node(child, own_topic.as_deref(), max_topic_len, plan);
    }
}
