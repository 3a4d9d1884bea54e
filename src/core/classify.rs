//! Resource classification.
//!
//! Each [`WorkUnit`] of the traversal plan is turned into at most one
//! [`ContentItem`]. The resource is tried against the known kinds in a fixed
//! order (assessment, web link, discussion, HTML page, external reference,
//! plain file); the first match wins. Anything that yields no item is
//! recorded in the skip log with a reason.

use std::sync::Arc;

use roxmltree::Document;
use tracing::{debug, warn};

use super::manifest::{Manifest, ResourceDescriptor, WorkTarget, WorkUnit};
use super::paths::{self, ReferenceKind};
use super::qti::{self, ParsedAssessment};
use super::rewrite::{self, RewriteResult};
use super::xml;
use crate::config::ConversionSettings;
use crate::domain::{
    ContentItem, PackageFile, PackageFiles, PendingUpload, ProcessingError, QuestionDef,
    QuestionType, SkipLog, Stage, WorkType,
};

/// Resource `type` fragments that mark an assessment
const ASSESSMENT_TOKENS: &[&str] = &["imsqti", "assessment", "quiz", "qti"];

/// Summary used for discussions whose prompt says nothing beyond the title
const SEE_DETAILS: &str = "See the details below.";

/// The kind a resource was classified as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Assessment,
    WebLink,
    Discussion,
    HtmlPage,
    External,
    File,
}

impl ResourceKind {
    /// Kinds whose primary file is a descriptor rather than content
    fn has_descriptor(self) -> bool {
        matches!(
            self,
            ResourceKind::Assessment | ResourceKind::WebLink | ResourceKind::Discussion
        )
    }
}

/// Shared state for one traversal: the read-only package and the skip log
pub struct WalkContext<'a> {
    pub files: &'a PackageFiles,
    pub manifest: &'a Manifest,
    pub settings: &'a ConversionSettings,
    pub skip_log: &'a mut SkipLog,
}

/// Classification outcome before the emptiness check
type Classified = Result<(ContentItem, ResourceKind), String>;

impl<'a> WalkContext<'a> {
    pub fn new(
        files: &'a PackageFiles,
        manifest: &'a Manifest,
        settings: &'a ConversionSettings,
        skip_log: &'a mut SkipLog,
    ) -> Self {
        Self {
            files,
            manifest,
            settings,
            skip_log,
        }
    }

    /// Classify one unit of the plan. Returns `None` (and records why) when
    /// the unit produces no item.
    pub fn classify(&mut self, unit: &WorkUnit) -> Option<ContentItem> {
        let outcome = match &unit.target {
            WorkTarget::Empty => Err("no content".to_string()),
            WorkTarget::Resource(id) => match self.manifest.resource(id) {
                Some(resource) => self.classify_resource(unit, resource),
                None => Err(format!("missing resource {}", id)),
            },
        };

        let skip_title = if unit.title.trim().is_empty() {
            unit.identifier.clone()
        } else {
            unit.title.clone()
        };

        match outcome {
            Ok((item, kind)) if item.is_empty() => {
                debug!(id = %unit.identifier, ?kind, "Classified item is empty");
                self.skip_log.record(
                    Some(unit.identifier.as_str()),
                    skip_title,
                    "no processable content",
                );
                None
            }
            Ok((item, kind)) => {
                debug!(
                    id = %item.id,
                    ?kind,
                    work_type = %item.work_type,
                    attachments = item.attachments.len(),
                    "Classified resource"
                );
                Some(item)
            }
            Err(reason) => {
                self.skip_log
                    .record(Some(unit.identifier.as_str()), skip_title, reason);
                None
            }
        }
    }

    fn classify_resource(&self, unit: &WorkUnit, resource: &ResourceDescriptor) -> Classified {
        let primary = resource
            .primary_href
            .as_deref()
            .and_then(|href| self.files.get(href))
            .cloned();

        let (mut item, kind) = match primary {
            Some(ref file) => self.classify_primary(unit, resource, file)?,
            None => self.classify_without_file(unit, resource)?,
        };

        item.topic = unit.topic.clone();
        self.attach_dependencies(&mut item, kind, resource, primary.as_deref());
        Ok((item, kind))
    }

    fn classify_primary(
        &self,
        unit: &WorkUnit,
        resource: &ResourceDescriptor,
        file: &Arc<PackageFile>,
    ) -> Classified {
        let typed_assessment = is_assessment_type(&resource.kind);

        if file.is_xml() || typed_assessment {
            let text = file.text();
            match xml::parse(&text) {
                Ok(doc) => {
                    if typed_assessment || qti::is_assessment_document(&doc) {
                        return self.assessment_item(unit, file, &text);
                    }
                    if let Some(item) = web_link_item(unit, &doc) {
                        return Ok((item, ResourceKind::WebLink));
                    }
                    if let Some(item) = self.discussion_item(unit, file, &doc) {
                        return Ok((item, ResourceKind::Discussion));
                    }
                }
                Err(e) if typed_assessment => {
                    return Err(format!("unreadable assessment {}: {}", file.name, e));
                }
                Err(e) => {
                    debug!(path = %file.name, error = %e, "Descriptor is not valid XML");
                }
            }
        }

        if file.is_html() {
            let result = rewrite::rewrite_html(
                self.files,
                &file.name,
                &file.text(),
                self.settings.max_summary_len,
            );
            let title = pick_title(unit, result.title.as_deref(), file.file_name());
            let mut item = ContentItem::new(&unit.identifier, title, WorkType::Assignment);
            apply_rewrite(&mut item, result);
            return Ok((item, ResourceKind::HtmlPage));
        }

        let title = pick_title(unit, None, file.file_name());
        let mut item = ContentItem::new(&unit.identifier, title, WorkType::Material);
        item.attach(PendingUpload::from_file(Arc::clone(file)));
        Ok((item, ResourceKind::File))
    }

    fn classify_without_file(&self, unit: &WorkUnit, resource: &ResourceDescriptor) -> Classified {
        let Some(raw) = self.manifest.raw_href(&resource.identifier) else {
            if is_assessment_type(&resource.kind) {
                return Err("assessment has no readable document".to_string());
            }
            return Err("unhandled resource".to_string());
        };

        match paths::classify_reference(raw) {
            ReferenceKind::Web => {
                let url = paths::normalize_web_url(raw);
                let title = pick_title(unit, None, &url);
                let mut item = ContentItem::new(&unit.identifier, title, WorkType::Material);
                item.add_link(url);
                Ok((item, ResourceKind::External))
            }
            ReferenceKind::CourseObject => {
                let title = pick_title(unit, None, raw);
                let mut item = ContentItem::new(&unit.identifier, title, WorkType::Material);
                let page = paths::resolve_wiki_reference(raw).and_then(|p| self.files.get(&p));
                match page {
                    Some(page) => {
                        item.attach(PendingUpload::from_file(Arc::clone(page)));
                    }
                    None => {
                        item.plain_text_summary = format!("Course reference: {}", raw);
                    }
                }
                Ok((item, ResourceKind::External))
            }
            ReferenceKind::Local => Err(format!("missing file {}", raw)),
            _ => Err("unhandled resource".to_string()),
        }
    }

    fn assessment_item(&self, unit: &WorkUnit, file: &PackageFile, text: &str) -> Classified {
        let parsed: ParsedAssessment = qti::parse_assessment(self.files, &file.name, text)
            .map_err(|e| format!("unreadable assessment {}: {}", file.name, e))?;

        let title = pick_title(unit, parsed.title.as_deref(), file.file_name());
        let mut item = ContentItem::new(&unit.identifier, title, assessment_work_type(&parsed));

        if !parsed.description.is_empty() {
            item.display_html = format!(
                "<p>{}</p>",
                html_escape::encode_text(&parsed.description)
            );
            item.plain_text_summary =
                rewrite::truncate_summary(&parsed.description, self.settings.max_summary_len);
        }

        if !parsed.dropped.is_empty() {
            let reasons: Vec<String> = parsed
                .dropped
                .iter()
                .map(|d| format!("{} ({})", d.ident, d.reason))
                .collect();
            warn!(path = %file.name, dropped = parsed.dropped.len(), "Assessment items dropped");
            item.processing_error = Some(ProcessingError::new(
                Stage::Classify,
                format!(
                    "{} assessment item(s) could not be converted: {}",
                    parsed.dropped.len(),
                    reasons.join(", ")
                ),
            ));
        }

        if !parsed.questions.is_empty() {
            item.assessment_questions = Some(parsed.questions);
        }
        Ok((item, ResourceKind::Assessment))
    }

    fn discussion_item(
        &self,
        unit: &WorkUnit,
        file: &PackageFile,
        doc: &Document<'_>,
    ) -> Option<ContentItem> {
        let root = doc.root_element();
        let prompt = xml::descendants(root, "text")
            .find(|n| {
                n.attribute("texttype")
                    .is_some_and(|t| t.trim().eq_ignore_ascii_case("text/html"))
            })?;
        let html: String = prompt
            .descendants()
            .filter(|n| n.is_text())
            .filter_map(|n| n.text())
            .collect();

        let doc_title = xml::child(root, "title").map(xml::text);
        let title = pick_title(unit, doc_title.as_deref(), file.file_name());

        let result =
            rewrite::rewrite_html(self.files, &file.name, &html, self.settings.max_summary_len);
        let mut item = ContentItem::new(&unit.identifier, title, WorkType::ShortAnswer);
        apply_rewrite(&mut item, result);

        if item.plain_text_summary.is_empty() || item.plain_text_summary == item.title {
            item.plain_text_summary = SEE_DETAILS.to_string();
        }

        for attachment in xml::descendants(root, "attachment") {
            let Some(href) = xml::attr(attachment, "href") else {
                continue;
            };
            match rewrite::resolve_file(self.files, &file.name, href) {
                Some(found) => {
                    item.attach(PendingUpload::from_file(found));
                }
                None if paths::is_web_url(href) => {
                    item.add_link(paths::normalize_web_url(href));
                }
                None => debug!(href, "Discussion attachment not found"),
            }
        }

        Some(item)
    }

    /// Attach files of dependency resources and extra `file` entries that the
    /// content itself did not already reference.
    fn attach_dependencies(
        &self,
        item: &mut ContentItem,
        kind: ResourceKind,
        resource: &ResourceDescriptor,
        primary: Option<&PackageFile>,
    ) {
        let mut hrefs: Vec<(&ResourceDescriptor, &str)> = resource
            .files
            .iter()
            .map(|href| (resource, href.as_str()))
            .collect();

        for dep_id in &resource.dependencies {
            match self.manifest.resource(dep_id) {
                Some(dep) => {
                    hrefs.extend(dep.files.iter().map(|href| (dep, href.as_str())));
                    if dep.files.is_empty() {
                        if let Some(raw) = self.manifest.raw_href(dep_id) {
                            hrefs.push((dep, raw));
                        }
                    }
                }
                None => debug!(dependency = %dep_id, "Dependency resource not found"),
            }
        }

        let question_images: Vec<String> = item
            .assessment_questions
            .iter()
            .flatten()
            .filter_map(QuestionDef::image)
            .map(|upload| upload.source_file.name.clone())
            .collect();

        for (owner, href) in hrefs {
            if paths::classify_reference(href) != ReferenceKind::Local {
                if paths::is_web_url(href) {
                    item.add_link(paths::normalize_web_url(href));
                }
                continue;
            }

            let Some(file) = owner.resolve(href).and_then(|p| self.files.get(&p)) else {
                if let Some(path) = owner.resolve(href) {
                    debug!(path = %path, "Dependency file not in package");
                }
                continue;
            };

            if primary.is_some_and(|p| p.name == file.name) {
                continue;
            }
            if kind.has_descriptor() && is_descriptor_file(file) {
                continue;
            }
            if question_images.iter().any(|name| *name == file.name) {
                continue;
            }
            if self.settings.is_ignored(&file.name) {
                continue;
            }
            item.attach(PendingUpload::from_file(Arc::clone(file)));
        }
    }
}

fn is_assessment_type(kind: &str) -> bool {
    let kind = kind.to_ascii_lowercase();
    ASSESSMENT_TOKENS.iter().any(|token| kind.contains(token))
}

fn is_descriptor_file(file: &PackageFile) -> bool {
    matches!(file.extension().as_deref(), Some("xml") | Some("qti"))
}

/// Exactly one choice question makes a multiple-choice item, exactly one
/// short-text question a short-answer item; anything else is an assignment.
fn assessment_work_type(parsed: &ParsedAssessment) -> WorkType {
    let [QuestionDef::Question(only)] = parsed.questions.as_slice() else {
        return WorkType::Assignment;
    };
    match only.question_type {
        QuestionType::SingleChoice | QuestionType::MultipleChoice => WorkType::MultipleChoice,
        QuestionType::ShortText => WorkType::ShortAnswer,
        QuestionType::Paragraph => WorkType::Assignment,
    }
}

fn web_link_item(unit: &WorkUnit, doc: &Document<'_>) -> Option<ContentItem> {
    let root = doc.root_element();
    let url = xml::descendants(root, "url").find_map(|n| xml::attr(n, "href"))?;
    let url = paths::normalize_web_url(url);

    let doc_title = xml::child(root, "title").map(xml::text);
    let title = pick_title(unit, doc_title.as_deref(), &url);
    let mut item = ContentItem::new(&unit.identifier, title, WorkType::Material);
    item.add_link(url);
    Some(item)
}

fn apply_rewrite(item: &mut ContentItem, result: RewriteResult) {
    item.display_html = result.display_html;
    item.plain_text_summary = result.plain_text_summary;
    item.is_rich = result.is_rich;
    for upload in result.attachments {
        item.attach(upload);
    }
    for link in result.external_links {
        item.add_link(link);
    }
}

/// Organization title, then the document's own title, then `fallback`
fn pick_title(unit: &WorkUnit, document_title: Option<&str>, fallback: &str) -> String {
    let unit_title = rewrite::collapse_whitespace(&unit.title);
    if !unit_title.is_empty() {
        return unit_title;
    }
    document_title
        .map(rewrite::collapse_whitespace)
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}
