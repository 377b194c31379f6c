use std::error::Error as _;
use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use storage::models::DocumentKey;

use super::document::{DocumentSummary, DocumentSync, ExternalRevision, RosterSnapshot, SyncError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-over-HTTP client for the document service.
pub struct HttpDocumentSync {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpDocumentSync {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("roster-engine/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            client,
        })
    }

    fn url(&self, key: &DocumentKey, action: &str) -> String {
        format!("{}/documents/{}/{}", self.base_url, key.slug(), action)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, SyncError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            return Err(SyncError::Api(message));
        }
        Err(SyncError::Http {
            status: status.as_u16(),
            message,
        })
    }

    async fn json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, SyncError> {
        let body = response.bytes().await.map_err(classify)?;
        serde_json::from_slice(&body).map_err(|e| SyncError::Decode(e.to_string()))
    }
}

/// Maps transport failures onto the variants the scheduler distinguishes.
fn classify(error: reqwest::Error) -> SyncError {
    if error.is_timeout() {
        return SyncError::Timeout;
    }

    if error.is_connect() {
        let mut source = error.source();
        while let Some(cause) = source {
            let text = cause.to_string();
            if text.contains("dns error") || text.contains("failed to lookup address") {
                return SyncError::NameResolution(text);
            }
            source = cause.source();
        }
    }

    SyncError::Transport(error)
}

fn not_found(key: &DocumentKey) -> SyncError {
    SyncError::Http {
        status: StatusCode::NOT_FOUND.as_u16(),
        message: format!("document {} does not exist", key),
    }
}

#[async_trait::async_trait]
impl DocumentSync for HttpDocumentSync {
    async fn mark_changed(&self, key: &DocumentKey) -> Result<(), SyncError> {
        let response = self
            .send(self.client.post(self.url(key, "changed")).json(key))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(not_found(key));
        }
        Ok(())
    }

    async fn get_last_modified(
        &self,
        key: &DocumentKey,
    ) -> Result<Option<ExternalRevision>, SyncError> {
        let response = self.send(self.client.get(self.url(key, "revision"))).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::json(response).await.map(Some)
    }

    async fn read_summary(&self, key: &DocumentKey) -> Result<DocumentSummary, SyncError> {
        let response = self.send(self.client.get(self.url(key, "summary"))).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(DocumentSummary::default());
        }
        Self::json(response).await
    }

    async fn render(&self, key: &DocumentKey, snapshot: &RosterSnapshot) -> Result<(), SyncError> {
        let response = self
            .send(self.client.put(self.url(key, "roster")).json(snapshot))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(not_found(key));
        }
        tracing::debug!(document = %key, lines = snapshot.lines.len(), "Document rendered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> DocumentKey {
        DocumentKey {
            year: 2025,
            discipline: 25,
            is_final_stage: false,
            is_team: true,
            zone: Some(3),
            class_id: 42,
        }
    }

    #[test]
    fn test_urls_use_document_slug() {
        let sync = HttpDocumentSync::new("http://docs.local/api/", None).unwrap();
        assert_eq!(
            sync.url(&key(), "revision"),
            "http://docs.local/api/documents/2025-25-zonal-team-z3-42/revision"
        );
    }

    #[test]
    fn test_empty_token_is_ignored() {
        let sync = HttpDocumentSync::new("http://docs.local", Some(String::new())).unwrap();
        assert!(sync.token.is_none());
    }

    #[tokio::test]
    #[ignore] // Requires network access
    async fn test_unresolvable_host_is_transient() {
        let sync = HttpDocumentSync::new("http://roster-docs.invalid", None).unwrap();
        let err = sync.get_last_modified(&key()).await.unwrap_err();
        assert!(err.is_transient());
    }
}
