//! Per-item artifact publishing.
//!
//! For every converted item the publisher ensures the topic folder, uploads
//! attachments, converts rich descriptions into hosted documents and builds
//! quiz forms for multi-question assessments. Items are processed
//! concurrently; results come back in input order.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::adapters::{
    DocumentService, DriveDocuments, DriveStorage, FileStorage, FormService, FormsClient,
    HttpClient, ServiceError,
};
use crate::config::{PublishSettings, ResolvedConfig};
use crate::core::rewrite::substitute_video_links;
use crate::domain::{ContentItem, ProcessingError, Stage, WorkType};

use super::materializer::Materializer;
use super::quiz::{self, QuizOutcome};

/// A package file that now lives in storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedFile {
    pub name: String,
    pub file_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_url: Option<String>,
}

/// Hosted document created from an item's description
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedDocument {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_url: Option<String>,
}

/// Result of publishing one item. The source item is kept unchanged.
#[derive(Debug, Clone, Serialize)]
pub struct PublishedItem {
    pub item: ContentItem,
    pub folder_id: Option<String>,
    pub uploads: Vec<UploadedFile>,
    /// Description HTML with uploaded video placeholders turned into links
    pub display_html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<PublishedDocument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form: Option<QuizOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_error: Option<ProcessingError>,
}

impl PublishedItem {
    fn new(item: ContentItem) -> Self {
        let display_html = item.display_html.clone();
        Self {
            item,
            folder_id: None,
            uploads: Vec::new(),
            display_html,
            document: None,
            form: None,
            processing_error: None,
        }
    }

    /// Keep the first failure; later ones are only logged
    fn fail(&mut self, stage: Stage, error: &ServiceError) {
        warn!(item_id = %self.item.id, %stage, error = %error, "Publishing step failed");
        if self.processing_error.is_none() {
            self.processing_error = Some(ProcessingError::new(stage, error.to_string()));
        }
    }
}

/// Whether an item becomes a quiz form
fn needs_form(item: &ContentItem) -> bool {
    item.question_count() > 1
}

/// Whether an item's description becomes a hosted document
fn needs_document(item: &ContentItem) -> bool {
    item.is_rich
        && item.work_type != WorkType::Material
        && item.assessment_questions.is_none()
        && !item.display_html.trim().is_empty()
}

/// Drives the materializer for converted items
pub struct Publisher {
    materializer: Materializer,
    settings: PublishSettings,
}

impl Publisher {
    pub fn new(
        storage: Arc<dyn FileStorage>,
        documents: Arc<dyn DocumentService>,
        forms: Arc<dyn FormService>,
        settings: PublishSettings,
    ) -> Self {
        Self {
            materializer: Materializer::new(storage, documents, forms),
            settings,
        }
    }

    /// Build HTTP-backed services from the resolved configuration
    pub fn from_config(config: &ResolvedConfig) -> Result<Self, ServiceError> {
        let services = &config.services;
        let http = HttpClient::new(
            services.access_token.clone(),
            config.publish.http_timeout(),
            config.publish.retry.clone(),
        )?;

        let storage = DriveStorage::new(http.clone(), &services.storage_url, &services.upload_url);
        let documents = DriveDocuments::new(storage.clone());
        let forms = FormsClient::new(
            http,
            &services.forms_url,
            &services.script_url,
            services.script_id.clone(),
        );

        Ok(Self::new(
            Arc::new(storage),
            Arc::new(documents),
            Arc::new(forms),
            config.publish.clone(),
        ))
    }

    pub fn materializer(&self) -> &Materializer {
        &self.materializer
    }

    /// Publish one item. Failures are recorded on the result, never raised.
    #[instrument(skip(self, item), fields(item_id = %item.id))]
    pub async fn publish_item(&self, item: ContentItem) -> PublishedItem {
        let mut published = PublishedItem::new(item);
        let root = self.settings.root_folder_id.as_str();

        let folder_id = match published.item.topic.clone() {
            Some(topic) => {
                let stable_id = format!("topic:{}", topic);
                match self
                    .materializer
                    .find_or_create_folder(root, &topic, Some(&stable_id))
                    .await
                {
                    Ok(folder) => folder.id().to_string(),
                    Err(e) => {
                        published.fail(Stage::Folder, &e);
                        return published;
                    }
                }
            }
            None => root.to_string(),
        };
        published.folder_id = Some(folder_id.clone());

        for attachment in &published.item.attachments {
            match self
                .materializer
                .find_or_create_upload(&folder_id, &published.item.id, attachment)
                .await
            {
                Ok(uploaded) => {
                    if attachment.source_file.is_video() {
                        if let Some(ref url) = uploaded.file.web_view_link {
                            published.display_html = substitute_video_links(
                                &published.display_html,
                                &attachment.target_name,
                                url,
                            );
                        }
                    }
                    published.uploads.push(UploadedFile {
                        name: attachment.target_name.clone(),
                        file_id: uploaded.file.id,
                        view_url: uploaded.file.web_view_link,
                    });
                }
                Err(e) => {
                    warn!(path = %attachment.source_file.name, error = %e, "Attachment upload failed");
                    if published.processing_error.is_none() {
                        published.processing_error = Some(ProcessingError::new(
                            Stage::Upload,
                            format!("{}: {}", attachment.target_name, e),
                        ));
                    }
                }
            }
        }

        if self.settings.create_documents && needs_document(&published.item) {
            let stable_id = format!("doc:{}", published.item.id);
            match self
                .materializer
                .find_or_create_document(
                    &folder_id,
                    &published.item.title,
                    &published.display_html,
                    Some(&stable_id),
                )
                .await
            {
                Ok(doc) => {
                    published.document = Some(PublishedDocument {
                        id: doc.file.id,
                        view_url: doc.file.web_view_link,
                    })
                }
                Err(e) => published.fail(Stage::Document, &e),
            }
        }

        if needs_form(&published.item) {
            match quiz::publish_quiz(&self.materializer, &published.item, &folder_id).await {
                Ok(outcome) => published.form = Some(outcome),
                Err(e) => published.fail(Stage::Form, &e),
            }
        }

        info!(
            uploads = published.uploads.len(),
            document = published.document.is_some(),
            form = published.form.is_some(),
            "Item published"
        );
        published
    }

    /// Publish items concurrently, returning results in input order
    pub async fn publish_all(&self, items: Vec<ContentItem>) -> Vec<PublishedItem> {
        let concurrency = self.settings.concurrency.max(1);
        stream::iter(items)
            .map(|item| self.publish_item(item))
            .buffered(concurrency)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Question, QuestionDef, QuestionType};

    #[test]
    fn test_document_and_form_rules() {
        let mut page = ContentItem::new("p1", "Page", WorkType::Assignment);
        page.is_rich = true;
        page.display_html = "<ul><li>x</li></ul>".to_string();
        assert!(needs_document(&page));
        assert!(!needs_form(&page));

        let mut material = page.clone();
        material.work_type = WorkType::Material;
        assert!(!needs_document(&material));

        let mut quiz = ContentItem::new("q1", "Quiz", WorkType::Assignment);
        quiz.assessment_questions = Some(vec![
            QuestionDef::Question(Question::new("One", QuestionType::ShortText)),
            QuestionDef::Question(Question::new("Two", QuestionType::Paragraph)),
        ]);
        assert!(needs_form(&quiz));
        assert!(!needs_document(&quiz));
    }
}
