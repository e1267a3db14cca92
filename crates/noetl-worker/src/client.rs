// Thin HTTP client to the noetl-api queue/event/keychain surface
// (spec.md §6). The worker is a separate process from the server and
// never touches Postgres directly -- this is its only way in.

use noetl_contracts::event::{Event, EventEnvelope};
use noetl_contracts::queue::{
    CompleteRequest, FailRequest, HeartbeatRequest, LeaseRequest, LeaseResponse, QueueItem,
};
use reqwest::Client;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request to {url} failed: {source}")]
    Request { url: String, #[source] source: reqwest::Error },
    #[error("{url} returned status {status}: {body}")]
    Status { url: String, status: u16, body: String },
}

pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { http: Client::new(), base_url: base_url.into() }
    }

    async fn post<B: serde::Serialize, R: serde::de::DeserializeOwned>(&self, path: &str, body: &B) -> Result<R, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status { url, status, body });
        }
        resp.json::<R>().await.map_err(|source| ClientError::Request { url, source })
    }

    pub async fn lease(&self, worker_id: &str, max_items: u32, lease_seconds: i64) -> Result<Vec<QueueItem>, ClientError> {
        let req = LeaseRequest { worker_id: worker_id.to_string(), max_items, lease_seconds };
        let resp: LeaseResponse = self.post("/api/queue/lease", &req).await?;
        Ok(resp.items)
    }

    pub async fn heartbeat(&self, queue_id: i64, worker_id: &str, extend_seconds: i64) -> Result<(), ClientError> {
        let req = HeartbeatRequest { queue_id, worker_id: worker_id.to_string(), extend_seconds };
        self.post::<_, Value>("/api/queue/heartbeat", &req).await?;
        Ok(())
    }

    pub async fn complete(&self, queue_id: i64, worker_id: &str) -> Result<(), ClientError> {
        let req = CompleteRequest { queue_id, worker_id: worker_id.to_string() };
        self.post::<_, Value>("/api/queue/complete", &req).await?;
        Ok(())
    }

    pub async fn fail(&self, queue_id: i64, worker_id: &str, message: &str, retryable: bool) -> Result<(), ClientError> {
        let req = FailRequest { queue_id, worker_id: worker_id.to_string(), message: message.to_string(), retryable };
        self.post::<_, Value>("/api/queue/fail", &req).await?;
        Ok(())
    }

    pub async fn emit_event(&self, envelope: EventEnvelope) -> Result<Event, ClientError> {
        self.post("/api/events", &envelope).await
    }

    pub async fn resolve_keychain(&self, catalog_id: i64, name: &str, execution_id: i64) -> Result<Option<Value>, ClientError> {
        let url = format!("{}/api/keychain/{}/{}?execution_id={}", self.base_url, catalog_id, name, execution_id);
        let resp = self.http.get(&url).send().await.map_err(|source| ClientError::Request { url: url.clone(), source })?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status { url, status, body });
        }
        resp.json::<Value>().await.map(Some).map_err(|source| ClientError::Request { url, source })
    }
}
