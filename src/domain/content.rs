//! Content items produced by the conversion pipeline.

use std::sync::Arc;

use serde::{Serialize, Serializer};

use super::package::PackageFile;
use super::question::QuestionDef;

/// Kind of course work an item becomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WorkType {
    #[serde(rename = "ASSIGNMENT")]
    Assignment,

    #[serde(rename = "SHORT_ANSWER_QUESTION")]
    ShortAnswer,

    #[serde(rename = "MULTIPLE_CHOICE_QUESTION")]
    MultipleChoice,

    #[serde(rename = "MATERIAL")]
    Material,
}

impl std::fmt::Display for WorkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkType::Assignment => write!(f, "assignment"),
            WorkType::ShortAnswer => write!(f, "short-answer"),
            WorkType::MultipleChoice => write!(f, "multiple-choice"),
            WorkType::Material => write!(f, "material"),
        }
    }
}

/// Publication state of an item. Conversion only ever produces drafts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemState {
    #[default]
    Draft,
}

/// Stage an item-scoped failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Classify,
    Folder,
    Upload,
    Document,
    Form,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Classify => "classify",
            Stage::Folder => "folder",
            Stage::Upload => "upload",
            Stage::Document => "document",
            Stage::Form => "form",
        };
        f.write_str(name)
    }
}

/// Non-fatal failure attached to a single item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingError {
    pub message: String,
    pub stage: Stage,
}

impl ProcessingError {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stage,
        }
    }
}

/// A package file that has to be uploaded before its item is submitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingUpload {
    #[serde(rename = "source", serialize_with = "serialize_source")]
    pub source_file: Arc<PackageFile>,

    /// File name to use in storage
    pub target_name: String,
}

fn serialize_source<S: Serializer>(file: &Arc<PackageFile>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&file.name)
}

impl PendingUpload {
    pub fn new(source_file: Arc<PackageFile>, target_name: impl Into<String>) -> Self {
        Self {
            source_file,
            target_name: target_name.into(),
        }
    }

    /// Upload named after the source file itself
    pub fn from_file(source_file: Arc<PackageFile>) -> Self {
        let target_name = source_file.file_name().to_string();
        Self::new(source_file, target_name)
    }

    pub fn is_same_file(&self, other: &PackageFile) -> bool {
        super::package::normalize_key(&self.source_file.name)
            == super::package::normalize_key(&other.name)
    }
}

/// The pipeline's output unit: one submittable piece of course content
#[derive(Debug, Clone, Serialize)]
pub struct ContentItem {
    /// Stable identifier from the source manifest
    pub id: String,

    /// Topic (grouping label) inherited from ancestor containers
    pub topic: Option<String>,

    pub title: String,

    pub work_type: WorkType,

    /// Rewritten HTML for rich display
    pub display_html: String,

    /// Whitespace-collapsed, length-limited description
    pub plain_text_summary: String,

    /// Whether the display form should be preferred over the summary
    pub is_rich: bool,

    pub attachments: Vec<PendingUpload>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub assessment_questions: Option<Vec<QuestionDef>>,

    pub external_links: Vec<String>,

    pub state: ItemState,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_error: Option<ProcessingError>,
}

impl ContentItem {
    /// Create an empty draft item
    pub fn new(id: impl Into<String>, title: impl Into<String>, work_type: WorkType) -> Self {
        Self {
            id: id.into(),
            topic: None,
            title: title.into(),
            work_type,
            display_html: String::new(),
            plain_text_summary: String::new(),
            is_rich: false,
            attachments: Vec::new(),
            assessment_questions: None,
            external_links: Vec::new(),
            state: ItemState::Draft,
            processing_error: None,
        }
    }

    /// Set the topic
    pub fn with_topic(mut self, topic: Option<String>) -> Self {
        self.topic = topic;
        self
    }

    /// Add an attachment unless the same file is already attached
    pub fn attach(&mut self, upload: PendingUpload) -> bool {
        if self
            .attachments
            .iter()
            .any(|a| a.is_same_file(&upload.source_file))
        {
            return false;
        }
        self.attachments.push(upload);
        true
    }

    /// Add an external link unless already present
    pub fn add_link(&mut self, url: impl Into<String>) -> bool {
        let url = url.into();
        if self.external_links.contains(&url) {
            return false;
        }
        self.external_links.push(url);
        true
    }

    pub fn question_count(&self) -> usize {
        self.assessment_questions.as_ref().map_or(0, Vec::len)
    }

    /// True when the item carries nothing a course service could show
    pub fn is_empty(&self) -> bool {
        self.plain_text_summary.trim().is_empty()
            && self.display_html.trim().is_empty()
            && self.question_count() == 0
            && self.external_links.is_empty()
            && self.attachments.is_empty()
    }
}
