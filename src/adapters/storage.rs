//! Drive-style file storage and document conversion over REST.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use super::http::{Body, HttpClient};
use super::{
    AppProperties, CreatedDocument, DocumentService, FileStorage, ServiceError, StoredFile,
    UploadMetadata,
};

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const DOCUMENT_MIME: &str = "application/vnd.google-apps.document";
const FILE_FIELDS: &str = "id,name,mimeType,webViewLink,webContentLink,thumbnailLink,appProperties";

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<StoredFile>,
}

#[derive(Debug, Deserialize)]
struct Parents {
    #[serde(default)]
    parents: Vec<String>,
}

/// Storage client for a Drive v3 compatible API
#[derive(Debug, Clone)]
pub struct DriveStorage {
    http: HttpClient,
    base_url: String,
    upload_url: String,
}

impl DriveStorage {
    pub fn new(http: HttpClient, base_url: impl Into<String>, upload_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            upload_url: upload_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn files_url(&self) -> String {
        format!("{}/files", self.base_url)
    }

    fn file_url(&self, id: &str) -> String {
        format!("{}/files/{}", self.base_url, id)
    }

    /// Create untagged file metadata, upload the media body, then apply the
    /// app properties. A failed upload leaves only an untagged stub that no
    /// property search will return.
    async fn create_with_media(
        &self,
        metadata: &UploadMetadata,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredFile, ServiceError> {
        let untagged = UploadMetadata {
            app_properties: AppProperties::new(),
            ..metadata.clone()
        };
        let created: StoredFile = self
            .http
            .post_json(&self.files_url(), &[("fields", "id")], &untagged)
            .await?;

        let media_url = format!("{}/files/{}", self.upload_url, created.id);
        let mut file: StoredFile = self
            .http
            .send_json(
                Method::PATCH,
                &media_url,
                &[("uploadType", "media"), ("fields", FILE_FIELDS)],
                Body::Bytes {
                    data: bytes,
                    content_type: content_type.to_string(),
                },
            )
            .await?;

        if !metadata.app_properties.is_empty() {
            match self.patch_properties(&file.id, &metadata.app_properties).await {
                Ok(()) => file.app_properties.extend(metadata.app_properties.clone()),
                Err(e) => warn!(id = %file.id, error = %e, "Failed to tag uploaded file"),
            }
        }
        Ok(file)
    }
}

/// Escape a value for a Drive query string literal
fn quote_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[async_trait]
impl FileStorage for DriveStorage {
    async fn create_folder(
        &self,
        name: &str,
        parent_id: &str,
        app_properties: &AppProperties,
    ) -> Result<StoredFile, ServiceError> {
        let body = json!({
            "name": name,
            "mimeType": FOLDER_MIME,
            "parents": [parent_id],
            "appProperties": app_properties,
        });
        self.http
            .post_json(&self.files_url(), &[("fields", FILE_FIELDS)], &body)
            .await
    }

    async fn search_by_property(
        &self,
        parent_id: &str,
        key: &str,
        value: &str,
    ) -> Result<Vec<StoredFile>, ServiceError> {
        let q = format!(
            "'{}' in parents and appProperties has {{ key='{}' and value='{}' }} and trashed=false",
            quote_query_value(parent_id),
            quote_query_value(key),
            quote_query_value(value)
        );
        let fields = format!("files({})", FILE_FIELDS);
        let list: FileList = self
            .http
            .get_json(&self.files_url(), &[("q", q.as_str()), ("fields", fields.as_str())])
            .await?;
        Ok(list.files)
    }

    async fn upload_file(
        &self,
        metadata: &UploadMetadata,
        bytes: Vec<u8>,
    ) -> Result<StoredFile, ServiceError> {
        let content_type = metadata.mime_type.clone();
        self.create_with_media(metadata, bytes, &content_type).await
    }

    async fn get_file_metadata(&self, id: &str, fields: &str) -> Result<StoredFile, ServiceError> {
        self.http.get_json(&self.file_url(id), &[("fields", fields)]).await
    }

    async fn patch_properties(&self, id: &str, props: &AppProperties) -> Result<(), ServiceError> {
        let _: serde_json::Value = self
            .http
            .send_json(
                Method::PATCH,
                &self.file_url(id),
                &[("fields", "id")],
                Body::Json(json!({ "appProperties": props })),
            )
            .await?;
        Ok(())
    }

    async fn move_to_folder(&self, id: &str, parent_id: &str) -> Result<(), ServiceError> {
        let current: Parents = self
            .http
            .get_json(&self.file_url(id), &[("fields", "parents")])
            .await?;
        let remove = current.parents.join(",");

        let mut query = vec![("addParents", parent_id), ("fields", "id")];
        if !remove.is_empty() {
            query.push(("removeParents", remove.as_str()));
        }

        let _: serde_json::Value = self
            .http
            .send_json(Method::PATCH, &self.file_url(id), &query, Body::Json(json!({})))
            .await?;
        Ok(())
    }
}

/// Document conversion through storage: HTML uploaded as a native document
#[derive(Debug, Clone)]
pub struct DriveDocuments {
    storage: DriveStorage,
}

impl DriveDocuments {
    pub fn new(storage: DriveStorage) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl DocumentService for DriveDocuments {
    async fn create_from_html(
        &self,
        html: &str,
        title: &str,
        app_properties: &AppProperties,
        parent_id: &str,
    ) -> Result<CreatedDocument, ServiceError> {
        let metadata = UploadMetadata::new(title, DOCUMENT_MIME, parent_id)
            .with_properties(app_properties.clone());
        let file = self
            .storage
            .create_with_media(&metadata, html.as_bytes().to_vec(), "text/html")
            .await?;
        Ok(CreatedDocument {
            id: file.id,
            view_url: file.web_view_link,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_query_value() {
        assert_eq!(quote_query_value("it's"), "it\\'s");
        assert_eq!(quote_query_value("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_urls_trim_trailing_slash() {
        let http = HttpClient::new(
            None,
            std::time::Duration::from_secs(1),
            crate::adapters::RetryPolicy::none(),
        )
        .unwrap();
        let storage = DriveStorage::new(http, "https://example.com/drive/v3/", "https://example.com/upload/");
        assert_eq!(storage.files_url(), "https://example.com/drive/v3/files");
        assert_eq!(storage.file_url("f1"), "https://example.com/drive/v3/files/f1");
    }
}
