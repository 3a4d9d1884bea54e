//! Image URL resolution for form building.
//!
//! The form service rehosts images it is given and only accepts some URL
//! shapes in item inserts. To learn the rehosted URL for each image, a
//! throwaway placeholder item is inserted per image, the form is read back,
//! and the processed content URI is matched by the placeholder's unique
//! title. Placeholders are removed before the real items are inserted.

use std::collections::HashMap;

use reqwest::Url;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::{FormService, StoredFile};

use super::quiz::FormItem;

/// Prefix of placeholder item titles
pub const TEMP_TITLE_PREFIX: &str = "__coursepack_tmp_";

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp", "svg"];
const TRUSTED_HOSTS: &[&str] = &["googleusercontent.com", "google.com"];
const READ_MASK: &str = "items(itemId,title,imageItem(image(contentUri)))";

/// Unique placeholder title
pub fn temp_title() -> String {
    format!("{}{}", TEMP_TITLE_PREFIX, Uuid::new_v4().simple())
}

/// Whether the form service will accept `uri` as an item image
pub fn is_secure_image_uri(uri: &str) -> bool {
    let uri = uri.trim();
    if let Some(rest) = uri.strip_prefix("data:image/") {
        return rest
            .split_once(',')
            .is_some_and(|(meta, data)| meta.ends_with(";base64") && !data.is_empty());
    }

    let Ok(url) = Url::parse(uri) else {
        return false;
    };
    if url.scheme() != "https" {
        return false;
    }

    let trusted_host = url.host_str().is_some_and(|host| {
        let host = host.to_ascii_lowercase();
        TRUSTED_HOSTS
            .iter()
            .any(|trusted| host == *trusted || host.ends_with(&format!(".{}", trusted)))
    });

    let image_path = url
        .path()
        .rsplit_once('.')
        .is_some_and(|(_, ext)| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));

    trusted_host || image_path
}

/// Best URL of an uploaded file to hand to the form service
pub fn image_source_uri(file: &StoredFile) -> String {
    file.thumbnail_link
        .clone()
        .or_else(|| file.web_content_link.clone())
        .unwrap_or_else(|| format!("https://drive.google.com/uc?id={}", file.id))
}

/// An image the quiz needs a usable URL for
#[derive(Debug, Clone)]
pub struct ImageRequest {
    /// Index of the question definition the image belongs to
    pub key: usize,
    pub title: String,
    /// URL of the uploaded source image
    pub source_uri: String,
}

/// Image left out of the form, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedImage {
    pub key: usize,
    pub title: String,
    pub reason: String,
}

/// Output of the placeholder passes
#[derive(Debug, Clone, Default)]
pub struct ImageResolution {
    /// Usable URI per request key
    pub resolved: HashMap<usize, String>,
    pub dropped: Vec<DroppedImage>,
    /// Placeholder item ids still in the form
    pub placeholders: Vec<String>,
}

/// Run the placeholder insert, read-back and validation passes.
///
/// Never fails as a whole: each image either gets a URI or a drop reason.
pub async fn resolve_images(
    forms: &dyn FormService,
    form_id: &str,
    requests: &[ImageRequest],
) -> ImageResolution {
    let mut resolution = ImageResolution::default();
    if requests.is_empty() {
        return resolution;
    }

    // Pass 1: one placeholder per image
    let mut titles: HashMap<usize, String> = HashMap::new();
    for request in requests {
        let title = temp_title();
        let placeholder = FormItem::Image {
            title: title.clone(),
            image_uri: request.source_uri.clone(),
        };
        match forms.run_batch_insert(form_id, &[placeholder]).await {
            Ok(ids) => {
                resolution.placeholders.extend(ids);
                titles.insert(request.key, title);
            }
            Err(e) => {
                warn!(form_id, key = request.key, error = %e, "Placeholder insert failed");
            }
        }
    }

    // Pass 2: read back processed URIs by placeholder title
    let processed: HashMap<String, String> = if titles.is_empty() {
        HashMap::new()
    } else {
        match forms.get_form(form_id, READ_MASK).await {
            Ok(items) => items
                .into_iter()
                .filter(|item| item.title.starts_with(TEMP_TITLE_PREFIX))
                .filter_map(|item| item.image_uri.map(|uri| (item.title, uri)))
                .collect(),
            Err(e) => {
                warn!(form_id, error = %e, "Failed to read placeholder images");
                HashMap::new()
            }
        }
    };

    // Pass 3: validate, falling back to the source URI
    for request in requests {
        let candidate = titles
            .get(&request.key)
            .and_then(|title| processed.get(title));

        match candidate {
            Some(uri) if is_secure_image_uri(uri) => {
                resolution.resolved.insert(request.key, uri.clone());
            }
            _ if is_secure_image_uri(&request.source_uri) => {
                debug!(key = request.key, "Using source image URI");
                resolution
                    .resolved
                    .insert(request.key, request.source_uri.clone());
            }
            _ => {
                let reason = match candidate {
                    Some(_) => "processed and source image URIs are both unusable",
                    None => "no usable image URI",
                };
                warn!(key = request.key, title = %request.title, reason, "Dropping image");
                resolution.dropped.push(DroppedImage {
                    key: request.key,
                    title: request.title.clone(),
                    reason: reason.to_string(),
                });
            }
        }
    }

    info!(
        form_id,
        resolved = resolution.resolved.len(),
        dropped = resolution.dropped.len(),
        "Resolved form images"
    );
    resolution
}

/// Best-effort removal of placeholder items. Returns whether it succeeded.
pub async fn cleanup_placeholders(
    forms: &dyn FormService,
    form_id: &str,
    placeholders: &[String],
) -> bool {
    if placeholders.is_empty() {
        return true;
    }
    match forms.delete_items(form_id, placeholders).await {
        Ok(()) => true,
        Err(e) => {
            warn!(form_id, count = placeholders.len(), error = %e, "Failed to delete placeholders");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_image_uris() {
        assert!(is_secure_image_uri("https://example.com/img/photo.PNG"));
        assert!(is_secure_image_uri("https://lh3.googleusercontent.com/abc123"));
        assert!(is_secure_image_uri("https://drive.google.com/uc?id=f1"));
        assert!(is_secure_image_uri("https://docs.google.com/x"));
        assert!(is_secure_image_uri("data:image/png;base64,iVBORw0KGgo="));

        assert!(!is_secure_image_uri("http://example.com/photo.png"));
        assert!(!is_secure_image_uri("https://example.com/download?id=1"));
        assert!(!is_secure_image_uri("https://evilgoogle.com/x"));
        assert!(!is_secure_image_uri("data:text/html;base64,PGh0bWw+"));
        assert!(!is_secure_image_uri("data:image/png,raw"));
        assert!(!is_secure_image_uri("not a url"));
    }

    #[test]
    fn test_temp_titles_are_unique() {
        let a = temp_title();
        let b = temp_title();
        assert!(a.starts_with(TEMP_TITLE_PREFIX));
        assert_ne!(a, b);
    }

    #[test]
    fn test_image_source_uri_preference() {
        let mut file = StoredFile {
            id: "f1".to_string(),
            ..Default::default()
        };
        assert_eq!(image_source_uri(&file), "https://drive.google.com/uc?id=f1");

        file.web_content_link = Some("https://drive.google.com/uc?id=f1&export=download".into());
        assert!(image_source_uri(&file).contains("export=download"));

        file.thumbnail_link = Some("https://lh3.googleusercontent.com/thumb".into());
        assert_eq!(image_source_uri(&file), "https://lh3.googleusercontent.com/thumb");
    }
}
