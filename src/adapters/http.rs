//! Authenticated JSON-over-HTTP client shared by the service adapters.
//!
//! Each request is rebuilt per attempt and sent through
//! [`with_retry`](super::retry::with_retry), so every service call gets the
//! same backoff behavior.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::retry::{with_retry, RetryPolicy};
use super::ServiceError;

/// Body of an outgoing request
#[derive(Debug, Clone)]
pub enum Body {
    Empty,
    Json(serde_json::Value),
    Bytes { data: Vec<u8>, content_type: String },
}

/// HTTP client with bearer auth, per-call timeout and retry
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    access_token: Option<String>,
    retry: RetryPolicy,
}

impl HttpClient {
    /// Create a client with a per-request timeout
    pub fn new(
        access_token: Option<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            access_token,
            retry,
        })
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn build(&self, method: &Method, url: &str, query: &[(&str, &str)], body: &Body) -> RequestBuilder {
        let mut request = self.client.request(method.clone(), url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(ref token) = self.access_token {
            request = request.bearer_auth(token);
        }
        match body {
            Body::Empty => request,
            Body::Json(value) => request.json(value),
            Body::Bytes { data, content_type } => request
                .header(reqwest::header::CONTENT_TYPE, content_type.as_str())
                .body(data.clone()),
        }
    }

    /// Send a request and return the raw successful response
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
        body: Body,
    ) -> Result<Response, ServiceError> {
        let operation = format!("{} {}", method, url);
        with_retry(&self.retry, &operation, ServiceError::is_retryable, || async {
            let response = self.build(&method, url, query, &body).send().await?;
            check_status(response).await
        })
        .await
    }

    /// Send a request and decode a JSON response
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
        body: Body,
    ) -> Result<T, ServiceError> {
        let response = self.send(method, url, query, body).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            ServiceError::InvalidResponse(format!("{}: {}", e, truncate_for_log(&text)))
        })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ServiceError> {
        self.send_json(Method::GET, url, query, Body::Empty).await
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        body: &B,
    ) -> Result<T, ServiceError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ServiceError::InvalidResponse(format!("Failed to encode body: {}", e)))?;
        self.send_json(Method::POST, url, query, Body::Json(value)).await
    }
}

/// Turn non-success statuses into [`ServiceError::Status`]
async fn check_status(response: Response) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| truncate_for_log(&body));

    Err(ServiceError::status(status.as_u16(), message))
}

fn truncate_for_log(text: &str) -> String {
    const LIMIT: usize = 300;
    if text.chars().count() <= LIMIT {
        text.to_string()
    } else {
        let cut: String = text.chars().take(LIMIT).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("short"), "short");
        let long = "x".repeat(400);
        let cut = truncate_for_log(&long);
        assert_eq!(cut.chars().count(), 301);
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn test_client_builds_with_defaults() {
        let client = HttpClient::new(None, Duration::from_secs(5), RetryPolicy::none()).unwrap();
        assert_eq!(client.retry_policy().max_attempts, 1);
    }
}
