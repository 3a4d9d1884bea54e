//! Idempotent creation of external artifacts.
//!
//! Artifacts created with a stable id are tagged with a content hash app
//! property. A later run (or a concurrent caller in this run) finds the
//! tagged artifact instead of creating a duplicate.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::adapters::{
    AppProperties, DocumentService, FileStorage, FormService, ServiceError, StoredFile,
    UploadMetadata,
};
use crate::domain::PendingUpload;

/// App property carrying the stable-id hash
pub const HASH_PROPERTY: &str = "coursepackHash";

/// Hash a stable id: SHA-256, first 16 bytes as hex
pub fn stable_hash(stable_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stable_id.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Result of a find-or-create call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    pub file: StoredFile,
    /// False when an existing artifact was reused
    pub created: bool,
}

impl Materialized {
    fn created(file: StoredFile) -> Self {
        Self {
            file,
            created: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.file.id
    }
}

type CacheKey = (String, String);

/// In-flight and completed creations keyed by `(hash, parent_id)`.
///
/// Each key owns a [`OnceCell`]; concurrent callers await the same
/// initialization. A failed initialization leaves the cell empty so the
/// next caller tries again.
#[derive(Debug, Default)]
pub struct ArtifactCache {
    slots: Mutex<HashMap<CacheKey, Arc<OnceCell<Materialized>>>>,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, hash: &str, parent_id: &str) -> Arc<OnceCell<Materialized>> {
        let mut slots = self.slots.lock().await;
        slots
            .entry((hash.to_string(), parent_id.to_string()))
            .or_default()
            .clone()
    }

    /// Number of keys that completed successfully
    pub async fn completed(&self) -> usize {
        let slots = self.slots.lock().await;
        slots.values().filter(|cell| cell.initialized()).count()
    }
}

/// Find-or-create front end over the three services
pub struct Materializer {
    storage: Arc<dyn FileStorage>,
    documents: Arc<dyn DocumentService>,
    forms: Arc<dyn FormService>,
    cache: ArtifactCache,
}

impl Materializer {
    pub fn new(
        storage: Arc<dyn FileStorage>,
        documents: Arc<dyn DocumentService>,
        forms: Arc<dyn FormService>,
    ) -> Self {
        Self {
            storage,
            documents,
            forms,
            cache: ArtifactCache::new(),
        }
    }

    pub fn storage(&self) -> &dyn FileStorage {
        self.storage.as_ref()
    }

    pub fn forms(&self) -> &dyn FormService {
        self.forms.as_ref()
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Search `parent_id` for an artifact tagged with `hash`. Search errors
    /// count as "not found".
    async fn find_existing(&self, parent_id: &str, hash: &str) -> Option<StoredFile> {
        match self
            .storage
            .search_by_property(parent_id, HASH_PROPERTY, hash)
            .await
        {
            Ok(found) => found.into_iter().next(),
            Err(e) => {
                warn!(parent_id, hash, error = %e, "Artifact search failed, creating instead");
                None
            }
        }
    }

    /// Core protocol. `create` receives the app properties to tag the new
    /// artifact with (empty when there is no stable id).
    pub async fn find_or_create_with<F, Fut>(
        &self,
        parent_id: &str,
        stable_id: Option<&str>,
        create: F,
    ) -> Result<Materialized, ServiceError>
    where
        F: FnOnce(AppProperties) -> Fut,
        Fut: Future<Output = Result<Materialized, ServiceError>>,
    {
        let Some(stable_id) = stable_id else {
            return create(AppProperties::new()).await;
        };

        let hash = stable_hash(stable_id);
        let slot = self.cache.slot(&hash, parent_id).await;

        let result = slot
            .get_or_try_init(|| async {
                if let Some(existing) = self.find_existing(parent_id, &hash).await {
                    debug!(stable_id, id = %existing.id, "Reusing existing artifact");
                    return Ok::<Materialized, ServiceError>(Materialized {
                        file: existing,
                        created: false,
                    });
                }

                let mut props = AppProperties::new();
                props.insert(HASH_PROPERTY.to_string(), hash.clone());
                let created = create(props).await?;
                info!(stable_id, id = %created.id(), "Created artifact");
                Ok(created)
            })
            .await?;

        Ok(result.clone())
    }

    pub async fn find_or_create_folder(
        &self,
        parent_id: &str,
        name: &str,
        stable_id: Option<&str>,
    ) -> Result<Materialized, ServiceError> {
        self.find_or_create_with(parent_id, stable_id, |props| async move {
            let folder = self.storage.create_folder(name, parent_id, &props).await?;
            Ok(Materialized::created(folder))
        })
        .await
    }

    /// Upload a package file into `parent_id`, deduplicated per item
    pub async fn find_or_create_upload(
        &self,
        parent_id: &str,
        item_id: &str,
        upload: &PendingUpload,
    ) -> Result<Materialized, ServiceError> {
        let stable_id = format!("{}:{}", item_id, upload.source_file.name);
        self.find_or_create_with(parent_id, Some(&stable_id), |props| async move {
            let metadata = UploadMetadata::new(
                upload.target_name.as_str(),
                upload.source_file.mime_type.as_str(),
                parent_id,
            )
            .with_properties(props);
            let file = self
                .storage
                .upload_file(&metadata, upload.source_file.data.clone())
                .await?;
            Ok(Materialized::created(file))
        })
        .await
    }

    pub async fn find_or_create_document(
        &self,
        parent_id: &str,
        title: &str,
        html: &str,
        stable_id: Option<&str>,
    ) -> Result<Materialized, ServiceError> {
        self.find_or_create_with(parent_id, stable_id, |props| async move {
            let doc = self
                .documents
                .create_from_html(html, title, &props, parent_id)
                .await?;
            Ok(Materialized::created(StoredFile {
                id: doc.id,
                name: title.to_string(),
                web_view_link: doc.view_url,
                app_properties: props,
                ..Default::default()
            }))
        })
        .await
    }

    /// Forms are created outside storage, then tagged and moved into place.
    /// Tagging or moving failures leave a usable form and are only logged.
    pub async fn find_or_create_form(
        &self,
        parent_id: &str,
        title: &str,
        stable_id: Option<&str>,
    ) -> Result<Materialized, ServiceError> {
        self.find_or_create_with(parent_id, stable_id, |props| async move {
            let form_id = self.forms.create_form(title).await?;

            if !props.is_empty() {
                if let Err(e) = self.storage.patch_properties(&form_id, &props).await {
                    warn!(form_id = %form_id, error = %e, "Failed to tag form");
                }
            }
            if let Err(e) = self.storage.move_to_folder(&form_id, parent_id).await {
                warn!(form_id = %form_id, error = %e, "Failed to move form into folder");
            }

            Ok(Materialized::created(StoredFile {
                id: form_id,
                name: title.to_string(),
                app_properties: props,
                ..Default::default()
            }))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_hash_shape() {
        let hash = stable_hash("item-42");
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, stable_hash("item-42"));
        assert_ne!(hash, stable_hash("item-43"));
    }

    #[tokio::test]
    async fn test_cache_slot_shared_per_key() {
        let cache = ArtifactCache::new();
        let a = cache.slot("h1", "p1").await;
        let b = cache.slot("h1", "p1").await;
        let c = cache.slot("h1", "p2").await;

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.completed().await, 0);
    }
}
