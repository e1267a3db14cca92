// HTTP client wrapper for noetl-api.

use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub struct Client {
    base_url: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base_url: &str) -> Self {
        Self { base_url: base_url.trim_end_matches('/').to_string(), http: reqwest::Client::new() }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.get(&url).send().await?;
        self.handle_response(response).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.post(&url).json(body).send().await?;
        self.handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body: noetl_contracts::rest::ApiErrorResponse = response
            .json()
            .await
            .unwrap_or_else(|_| noetl_contracts::rest::ApiErrorResponse { error: status.to_string(), code: None });

        Err(match status {
            StatusCode::UNPROCESSABLE_ENTITY => ClientError::Validation(body.error),
            StatusCode::NOT_FOUND => ClientError::NotFound(body.error),
            StatusCode::CONFLICT => ClientError::Conflict(body.error),
            _ => ClientError::Internal(body.error),
        })
    }
}

impl ClientError {
    /// Exit code contract: 0 success, 2 validation, 3 not found, 4 conflict, 5 internal.
    pub fn exit_code(&self) -> i32 {
        match self {
            ClientError::Validation(_) => 2,
            ClientError::NotFound(_) => 3,
            ClientError::Conflict(_) => 4,
            ClientError::Internal(_) | ClientError::Http(_) => 5,
        }
    }
}
