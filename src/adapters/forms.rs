//! Forms REST client plus the script side-channel used for item inserts.
//!
//! The forms batch-update endpoint cannot fetch arbitrary image URLs, so
//! items are inserted by a deployed script instead. Everything else (form
//! creation, settings, reads, deletes) uses the REST API directly.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::http::HttpClient;
use super::{FormItemSnapshot, FormService, FormSettings, ServiceError};
use crate::publish::quiz::FormItem;

/// Name of the function the insertion script exposes
pub const INSERT_FUNCTION: &str = "insertItems";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedForm {
    form_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct FormBody {
    #[serde(default)]
    items: Vec<RawItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawItem {
    #[serde(default)]
    item_id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    image_item: Option<ImageHolder>,
    #[serde(default)]
    question_item: Option<ImageHolder>,
}

#[derive(Debug, Deserialize)]
struct ImageHolder {
    #[serde(default)]
    image: Option<RawImage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawImage {
    #[serde(default)]
    content_uri: Option<String>,
}

impl From<RawItem> for FormItemSnapshot {
    fn from(raw: RawItem) -> Self {
        let image_uri = [raw.image_item, raw.question_item]
            .into_iter()
            .flatten()
            .filter_map(|holder| holder.image.and_then(|img| img.content_uri))
            .next();
        Self {
            item_id: raw.item_id,
            title: raw.title,
            image_uri,
        }
    }
}

/// Client for the forms API and the item-insertion script
#[derive(Debug, Clone)]
pub struct FormsClient {
    http: HttpClient,
    forms_url: String,
    script_url: String,
    script_id: Option<String>,
}

impl FormsClient {
    pub fn new(
        http: HttpClient,
        forms_url: impl Into<String>,
        script_url: impl Into<String>,
        script_id: Option<String>,
    ) -> Self {
        Self {
            http,
            forms_url: forms_url.into().trim_end_matches('/').to_string(),
            script_url: script_url.into().trim_end_matches('/').to_string(),
            script_id,
        }
    }

    fn form_url(&self, form_id: &str) -> String {
        format!("{}/forms/{}", self.forms_url, form_id)
    }

    async fn batch_update(&self, form_id: &str, requests: Vec<Value>) -> Result<(), ServiceError> {
        let url = format!("{}:batchUpdate", self.form_url(form_id));
        let _: Value = self
            .http
            .post_json(&url, &[], &json!({ "requests": requests }))
            .await?;
        Ok(())
    }
}

/// Extract the created item ids from a script execution response
fn parse_script_result(value: &Value) -> Result<Vec<String>, ServiceError> {
    if let Some(error) = value.get("error") {
        let message = error["details"][0]["errorMessage"]
            .as_str()
            .or_else(|| error["message"].as_str())
            .unwrap_or("script execution failed");
        return Err(ServiceError::InvalidResponse(message.to_string()));
    }

    let result = &value["response"]["result"];
    let ids = result
        .as_array()
        .ok_or_else(|| ServiceError::InvalidResponse("script returned no item ids".to_string()))?
        .iter()
        .filter_map(|id| id.as_str().map(str::to_string))
        .collect();
    Ok(ids)
}

#[async_trait]
impl FormService for FormsClient {
    async fn create_form(&self, title: &str) -> Result<String, ServiceError> {
        let url = format!("{}/forms", self.forms_url);
        let body = json!({ "info": { "title": title, "documentTitle": title } });
        let created: CreatedForm = self.http.post_json(&url, &[], &body).await?;
        Ok(created.form_id)
    }

    async fn update_settings(
        &self,
        form_id: &str,
        settings: &FormSettings,
    ) -> Result<(), ServiceError> {
        let request = json!({
            "updateSettings": {
                "settings": { "quizSettings": { "isQuiz": settings.is_quiz } },
                "updateMask": "quizSettings.isQuiz",
            }
        });
        self.batch_update(form_id, vec![request]).await
    }

    async fn get_form(
        &self,
        form_id: &str,
        field_mask: &str,
    ) -> Result<Vec<FormItemSnapshot>, ServiceError> {
        let body: FormBody = self
            .http
            .get_json(&self.form_url(form_id), &[("fields", field_mask)])
            .await?;
        Ok(body.items.into_iter().map(FormItemSnapshot::from).collect())
    }

    async fn delete_items(&self, form_id: &str, item_ids: &[String]) -> Result<(), ServiceError> {
        if item_ids.is_empty() {
            return Ok(());
        }

        let items = self.get_form(form_id, "items(itemId)").await?;
        let mut indexes: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| item_ids.contains(&item.item_id))
            .map(|(idx, _)| idx)
            .collect();

        // Highest index first so earlier deletions don't shift later ones
        indexes.sort_unstable_by(|a, b| b.cmp(a));

        let requests = indexes
            .into_iter()
            .map(|index| json!({ "deleteItem": { "location": { "index": index } } }))
            .collect::<Vec<_>>();
        if requests.is_empty() {
            return Ok(());
        }
        self.batch_update(form_id, requests).await
    }

    async fn run_batch_insert(
        &self,
        form_id: &str,
        items: &[FormItem],
    ) -> Result<Vec<String>, ServiceError> {
        let script_id = self
            .script_id
            .as_deref()
            .ok_or_else(|| ServiceError::NotConfigured("script_id".to_string()))?;

        let url = format!("{}/scripts/{}:run", self.script_url, script_id);
        let body = json!({
            "function": INSERT_FUNCTION,
            "parameters": [form_id, items],
        });
        let response: Value = self.http.post_json(&url, &[], &body).await?;
        parse_script_result(&response)
    }
}
