// HTTP tool adapter (`kind: http`). Config fields: `url`, `method`
// (default GET), `headers`, `query`, `body`. A resolved credential, if
// present, is merged into `Authorization` rather than exposed in the
// rendered config -- callers never see a secret in a logged task.

use async_trait::async_trait;
use chrono::Utc;
use noetl_contracts::outcome::{ErrorKind, HttpOutcomeDetail, Outcome, OutcomeError, OutcomeMeta};
use noetl_contracts::playbook::ToolTask;
use noetl_core::scope::Scope;
use noetl_core::traits::{ResolvedCredential, ToolAdapter};
use reqwest::{Client, Method};
use std::collections::HashMap;
use std::str::FromStr;

pub struct HttpAdapter {
    client: Client,
}

impl HttpAdapter {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

impl Default for HttpAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolAdapter for HttpAdapter {
    async fn execute(&self, task: &ToolTask, _scope: &Scope, credential: Option<ResolvedCredential>) -> Outcome {
        let started_at = Utc::now();
        let meta = |started_at: chrono::DateTime<Utc>| OutcomeMeta {
            attempt: 1,
            duration_ms: (Utc::now() - started_at).num_milliseconds(),
            started_at,
            ended_at: Utc::now(),
        };

        let Some(url) = task.config_str("url") else {
            return Outcome::error(
                OutcomeError {
                    kind: ErrorKind::Validation,
                    retryable: false,
                    message: "http task is missing required field 'url'".to_string(),
                    code: None,
                    extras: Default::default(),
                },
                meta(started_at),
            );
        };

        let method = task
            .config_str("method")
            .and_then(|m| Method::from_str(&m.to_uppercase()).ok())
            .unwrap_or(Method::GET);

        let mut builder = self.client.request(method, url);

        if let Some(headers) = task.config.get("headers").and_then(|v| v.as_object()) {
            for (k, v) in headers {
                if let Some(v) = v.as_str() {
                    builder = builder.header(k, v);
                }
            }
        }
        if let Some(query) = task.config.get("query").and_then(|v| v.as_object()) {
            let pairs: HashMap<&str, String> = query
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())))
                .collect();
            builder = builder.query(&pairs);
        }
        if let Some(body) = task.config.get("body") {
            builder = builder.json(body);
        }
        if let Some(cred) = &credential {
            if let Some(token) = cred.secret.as_str() {
                builder = builder.bearer_auth(token);
            }
        }

        match builder.send().await {
            Ok(resp) => {
                let status = resp.status();
                let headers = resp
                    .headers()
                    .iter()
                    .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
                    .collect();
                let body = resp.json::<serde_json::Value>().await.unwrap_or(serde_json::Value::Null);
                let detail = HttpOutcomeDetail { status: status.as_u16(), headers };

                if status.is_success() {
                    let mut outcome = Outcome::ok(body, meta(started_at));
                    outcome.http = Some(detail);
                    outcome
                } else {
                    let kind = match status.as_u16() {
                        401 | 403 => ErrorKind::Auth,
                        404 => ErrorKind::NotFound,
                        429 => ErrorKind::RateLimit,
                        400..=499 => ErrorKind::Validation,
                        _ => ErrorKind::Internal,
                    };
                    let mut outcome = Outcome::error(
                        OutcomeError {
                            retryable: kind.default_retryable(),
                            kind,
                            message: format!("http request failed with status {status}"),
                            code: Some(status.as_u16().to_string()),
                            extras: Default::default(),
                        },
                        meta(started_at),
                    );
                    outcome.http = Some(detail);
                    outcome
                }
            }
            Err(err) => {
                let kind = if err.is_timeout() {
                    ErrorKind::Timeout
                } else {
                    ErrorKind::Network
                };
                Outcome::error(
                    OutcomeError {
                        retryable: kind.default_retryable(),
                        kind,
                        message: err.to_string(),
                        code: None,
                        extras: Default::default(),
                    },
                    meta(started_at),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noetl_contracts::playbook::ToolKind;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn task(url: &str) -> ToolTask {
        let mut config = serde_json::Map::new();
        config.insert("url".to_string(), serde_json::json!(url));
        ToolTask { kind: ToolKind::Http, spec: None, config }
    }

    #[tokio::test]
    async fn success_response_maps_to_ok_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"pong": true})))
            .mount(&server)
            .await;

        let adapter = HttpAdapter::new();
        let outcome = adapter.execute(&task(&format!("{}/ping", server.uri())), &Scope::new(), None).await;
        assert!(outcome.is_ok());
        assert_eq!(outcome.result.unwrap(), serde_json::json!({"pong": true}));
    }

    #[tokio::test]
    async fn rate_limited_response_maps_to_retryable_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let adapter = HttpAdapter::new();
        let outcome = adapter.execute(&task(&format!("{}/limited", server.uri())), &Scope::new(), None).await;
        assert!(!outcome.is_ok());
        let err = outcome.error.unwrap();
        assert_eq!(err.kind, ErrorKind::RateLimit);
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn missing_url_is_a_non_retryable_validation_error() {
        let adapter = HttpAdapter::new();
        let task = ToolTask { kind: ToolKind::Http, spec: None, config: Default::default() };
        let outcome = adapter.execute(&task, &Scope::new(), None).await;
        let err = outcome.error.unwrap();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(!err.retryable);
    }
}
