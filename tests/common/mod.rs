//! In-memory service fakes shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use coursepack::adapters::{
    AppProperties, CreatedDocument, DocumentService, FileStorage, FormItemSnapshot, FormService,
    FormSettings, ServiceError, StoredFile, UploadMetadata,
};
use coursepack::publish::FormItem;

#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub file: StoredFile,
    pub parent: String,
}

/// Storage that keeps every artifact in a vector
#[derive(Default)]
pub struct FakeStorage {
    pub entries: Mutex<Vec<StoredEntry>>,
    pub creates: AtomicUsize,
    pub uploads: AtomicUsize,
    pub fail_search: bool,
    /// Number of upcoming create calls that fail with a 500
    pub fail_creates: AtomicUsize,
    pub create_delay: Duration,
    /// Thumbnail link assigned to uploads (`{id}` is replaced)
    pub thumbnail_template: Option<String>,
    /// Content link assigned to uploads (`{id}` is replaced)
    pub content_template: Option<String>,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_existing(self, parent: &str, file: StoredFile) -> Self {
        self.entries.lock().unwrap().push(StoredEntry {
            file,
            parent: parent.to_string(),
        });
        self
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.entries.lock().unwrap().len() + 1;
        format!("{}-{}", prefix, n)
    }

    fn store(&self, file: StoredFile, parent: &str) -> StoredFile {
        self.entries.lock().unwrap().push(StoredEntry {
            file: file.clone(),
            parent: parent.to_string(),
        });
        file
    }

    fn take_failure(&self) -> bool {
        self.fail_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn link(template: &Option<String>, id: &str) -> Option<String> {
    template.as_ref().map(|t| t.replace("{id}", id))
}

#[async_trait]
impl FileStorage for FakeStorage {
    async fn create_folder(
        &self,
        name: &str,
        parent_id: &str,
        app_properties: &AppProperties,
    ) -> Result<StoredFile, ServiceError> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.take_failure() {
            return Err(ServiceError::status(500, "backend error"));
        }

        let file = StoredFile {
            id: self.next_id("folder"),
            name: name.to_string(),
            app_properties: app_properties.clone(),
            ..Default::default()
        };
        Ok(self.store(file, parent_id))
    }

    async fn search_by_property(
        &self,
        parent_id: &str,
        key: &str,
        value: &str,
    ) -> Result<Vec<StoredFile>, ServiceError> {
        if self.fail_search {
            return Err(ServiceError::status(503, "search unavailable"));
        }
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .filter(|e| e.parent == parent_id)
            .filter(|e| e.file.app_properties.get(key).map(String::as_str) == Some(value))
            .map(|e| e.file.clone())
            .collect())
    }

    async fn upload_file(
        &self,
        metadata: &UploadMetadata,
        _bytes: Vec<u8>,
    ) -> Result<StoredFile, ServiceError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let id = self.next_id("file");
        let file = StoredFile {
            name: metadata.name.clone(),
            mime_type: Some(metadata.mime_type.clone()),
            web_view_link: Some(format!("https://drive.example.com/view/{}", id)),
            thumbnail_link: link(&self.thumbnail_template, &id),
            web_content_link: link(&self.content_template, &id),
            app_properties: metadata.app_properties.clone(),
            id,
        };
        let parent = metadata.parents.first().cloned().unwrap_or_default();
        Ok(self.store(file, &parent))
    }

    async fn get_file_metadata(&self, id: &str, _fields: &str) -> Result<StoredFile, ServiceError> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .find(|e| e.file.id == id)
            .map(|e| e.file.clone())
            .ok_or_else(|| ServiceError::status(404, "not found"))
    }

    async fn patch_properties(&self, id: &str, props: &AppProperties) -> Result<(), ServiceError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.iter_mut().find(|e| e.file.id == id) {
            Some(entry) => {
                entry.file.app_properties.extend(props.clone());
                Ok(())
            }
            None => {
                entries.push(StoredEntry {
                    file: StoredFile {
                        id: id.to_string(),
                        app_properties: props.clone(),
                        ..Default::default()
                    },
                    parent: String::new(),
                });
                Ok(())
            }
        }
    }

    async fn move_to_folder(&self, id: &str, parent_id: &str) -> Result<(), ServiceError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.iter_mut().find(|e| e.file.id == id) {
            Some(entry) => {
                entry.parent = parent_id.to_string();
                Ok(())
            }
            None => Err(ServiceError::status(404, "not found")),
        }
    }
}

/// Document service that only counts conversions
#[derive(Default)]
pub struct FakeDocuments {
    pub created: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl DocumentService for FakeDocuments {
    async fn create_from_html(
        &self,
        html: &str,
        title: &str,
        _app_properties: &AppProperties,
        _parent_id: &str,
    ) -> Result<CreatedDocument, ServiceError> {
        let mut created = self.created.lock().unwrap();
        created.push((title.to_string(), html.to_string()));
        Ok(CreatedDocument {
            id: format!("doc-{}", created.len()),
            view_url: Some(format!("https://docs.example.com/doc-{}", created.len())),
        })
    }
}

/// Form service holding one form's items in memory
#[derive(Default)]
pub struct FakeForms {
    pub forms_created: AtomicUsize,
    pub items: Mutex<Vec<(String, FormItem)>>,
    pub deleted: Mutex<Vec<String>>,
    pub settings: Mutex<Option<FormSettings>>,
    /// Content URI the service reports for rehosted placeholder images
    pub processed_uri: Option<String>,
    /// Number of upcoming batch inserts that fail with a 500
    pub fail_batch_inserts: AtomicUsize,
    pub fail_settings: bool,
    pub next_item: AtomicUsize,
}

impl FakeForms {
    pub fn with_processed_uri(uri: &str) -> Self {
        Self {
            processed_uri: Some(uri.to_string()),
            ..Default::default()
        }
    }

    /// Items still in the form, in insertion order
    pub fn live_items(&self) -> Vec<FormItem> {
        self.items.lock().unwrap().iter().map(|(_, item)| item.clone()).collect()
    }
}

#[async_trait]
impl FormService for FakeForms {
    async fn create_form(&self, _title: &str) -> Result<String, ServiceError> {
        let n = self.forms_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("form-{}", n))
    }

    async fn update_settings(
        &self,
        _form_id: &str,
        settings: &FormSettings,
    ) -> Result<(), ServiceError> {
        if self.fail_settings {
            return Err(ServiceError::status(500, "settings unavailable"));
        }
        *self.settings.lock().unwrap() = Some(*settings);
        Ok(())
    }

    async fn get_form(
        &self,
        _form_id: &str,
        _field_mask: &str,
    ) -> Result<Vec<FormItemSnapshot>, ServiceError> {
        let items = self.items.lock().unwrap();
        Ok(items
            .iter()
            .map(|(id, item)| match item {
                FormItem::Image { title, image_uri } => FormItemSnapshot {
                    item_id: id.clone(),
                    title: title.clone(),
                    image_uri: Some(self.processed_uri.clone().unwrap_or_else(|| image_uri.clone())),
                },
                FormItem::Question { title, .. } | FormItem::PageBreak { title } => {
                    FormItemSnapshot {
                        item_id: id.clone(),
                        title: title.clone(),
                        image_uri: None,
                    }
                }
            })
            .collect())
    }

    async fn delete_items(&self, _form_id: &str, item_ids: &[String]) -> Result<(), ServiceError> {
        self.items
            .lock()
            .unwrap()
            .retain(|(id, _)| !item_ids.contains(id));
        self.deleted.lock().unwrap().extend(item_ids.iter().cloned());
        Ok(())
    }

    async fn run_batch_insert(
        &self,
        _form_id: &str,
        items: &[FormItem],
    ) -> Result<Vec<String>, ServiceError> {
        let failing = self
            .fail_batch_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ServiceError::status(500, "script execution failed"));
        }
        let mut stored = self.items.lock().unwrap();
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            let id = format!("item-{}", self.next_item.fetch_add(1, Ordering::SeqCst) + 1);
            stored.push((id.clone(), item.clone()));
            ids.push(id);
        }
        Ok(ids)
    }
}
