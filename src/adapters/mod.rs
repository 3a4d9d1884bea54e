//! Adapter interfaces for external services.
//!
//! Adapters provide narrow request/response contracts for the three
//! services artifacts are materialized in: file storage, document
//! conversion and structured forms. The HTTP implementations live in the
//! submodules; tests substitute in-memory fakes.

pub mod forms;
pub mod http;
pub mod retry;
pub mod storage;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::publish::quiz::FormItem;

pub use forms::FormsClient;
pub use http::HttpClient;
pub use retry::{with_retry, RetryPolicy};
pub use storage::{DriveDocuments, DriveStorage};

/// App properties attached to stored artifacts
pub type AppProperties = HashMap<String, String>;

/// Errors returned by external services
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),
}

impl ServiceError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Server-side and rate-limit failures are retried; other client
    /// errors fail immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            ServiceError::Transport(e) => !e.is_builder() && !e.is_decode(),
            ServiceError::InvalidResponse(_) | ServiceError::NotConfigured(_) => false,
        }
    }
}

/// A file or folder in storage
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_view_link: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_content_link: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_link: Option<String>,

    #[serde(default)]
    pub app_properties: AppProperties,
}

/// Metadata sent with an upload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    pub name: String,
    pub mime_type: String,
    pub parents: Vec<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub app_properties: AppProperties,
}

impl UploadMetadata {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, parent_id: &str) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            parents: vec![parent_id.to_string()],
            app_properties: AppProperties::new(),
        }
    }

    pub fn with_properties(mut self, props: AppProperties) -> Self {
        self.app_properties = props;
        self
    }
}

/// A document produced by the conversion service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedDocument {
    pub id: String,
    pub view_url: Option<String>,
}

/// Form-level settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FormSettings {
    /// Grade responses against answer keys
    pub is_quiz: bool,
}

/// One item as read back from the form service
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FormItemSnapshot {
    pub item_id: String,
    pub title: String,
    /// Content URI the service assigned to the item's image, if any
    pub image_uri: Option<String>,
}

/// File storage contract
#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn create_folder(
        &self,
        name: &str,
        parent_id: &str,
        app_properties: &AppProperties,
    ) -> Result<StoredFile, ServiceError>;

    /// Files directly inside `parent_id` whose app property `key` equals `value`
    async fn search_by_property(
        &self,
        parent_id: &str,
        key: &str,
        value: &str,
    ) -> Result<Vec<StoredFile>, ServiceError>;

    async fn upload_file(
        &self,
        metadata: &UploadMetadata,
        bytes: Vec<u8>,
    ) -> Result<StoredFile, ServiceError>;

    async fn get_file_metadata(&self, id: &str, fields: &str) -> Result<StoredFile, ServiceError>;

    async fn patch_properties(&self, id: &str, props: &AppProperties) -> Result<(), ServiceError>;

    /// Move a file into a folder (used for artifacts created outside storage)
    async fn move_to_folder(&self, id: &str, parent_id: &str) -> Result<(), ServiceError>;
}

/// Document conversion contract
#[async_trait]
pub trait DocumentService: Send + Sync {
    async fn create_from_html(
        &self,
        html: &str,
        title: &str,
        app_properties: &AppProperties,
        parent_id: &str,
    ) -> Result<CreatedDocument, ServiceError>;
}

/// Structured form contract
#[async_trait]
pub trait FormService: Send + Sync {
    async fn create_form(&self, title: &str) -> Result<String, ServiceError>;

    async fn update_settings(&self, form_id: &str, settings: &FormSettings)
        -> Result<(), ServiceError>;

    async fn get_form(
        &self,
        form_id: &str,
        field_mask: &str,
    ) -> Result<Vec<FormItemSnapshot>, ServiceError>;

    async fn delete_items(&self, form_id: &str, item_ids: &[String]) -> Result<(), ServiceError>;

    /// Insert items through the script side-channel; returns created item ids
    async fn run_batch_insert(
        &self,
        form_id: &str,
        items: &[FormItem],
    ) -> Result<Vec<String>, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_status_classes() {
        assert!(ServiceError::status(500, "boom").is_retryable());
        assert!(ServiceError::status(503, "down").is_retryable());
        assert!(ServiceError::status(429, "slow down").is_retryable());

        assert!(!ServiceError::status(400, "bad").is_retryable());
        assert!(!ServiceError::status(403, "forbidden").is_retryable());
        assert!(!ServiceError::status(404, "missing").is_retryable());
        assert!(!ServiceError::InvalidResponse("x".into()).is_retryable());
    }

    #[test]
    fn test_stored_file_deserialization() {
        let json = r#"{"id":"f1","name":"Week 1","webViewLink":"https://drive.google.com/f1","appProperties":{"coursepackHash":"abc"}}"#;
        let file: StoredFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.id, "f1");
        assert_eq!(file.web_view_link.as_deref(), Some("https://drive.google.com/f1"));
        assert_eq!(file.app_properties.get("coursepackHash").map(String::as_str), Some("abc"));
    }
}
