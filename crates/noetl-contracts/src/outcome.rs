// Tool outcome envelope (worker -> policy evaluator) and the error
// taxonomy shared across the whole system (spec.md §4.5, §4.8, §7).

use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Ok,
    Error,
}

/// The full error taxonomy from spec.md §7. `lease_expired`,
/// `template_unresolved`, `catalog_unresolved` and `cancelled` are
/// control-plane-originated; tool adapters populate the rest.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimit,
    Timeout,
    Network,
    Auth,
    Permission,
    NotFound,
    Validation,
    SerializationFailure,
    Deadlock,
    Internal,
    LeaseExpired,
    TemplateUnresolved,
    CatalogUnresolved,
    Cancelled,
}

impl ErrorKind {
    /// Conservative default used when a tool adapter doesn't set
    /// `retryable` explicitly.
    pub fn default_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Timeout | Self::Network | Self::Deadlock
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RateLimit => "rate_limit",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Auth => "auth",
            Self::Permission => "permission",
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::SerializationFailure => "serialization_failure",
            Self::Deadlock => "deadlock",
            Self::Internal => "internal",
            Self::LeaseExpired => "lease_expired",
            Self::TemplateUnresolved => "template_unresolved",
            Self::CatalogUnresolved => "catalog_unresolved",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutcomeError {
    pub kind: ErrorKind,
    pub retryable: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extras: serde_json::Map<String, serde_json::Value>,
}

impl Default for ErrorKind {
    fn default() -> Self {
        Self::Internal
    }
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutcomeMeta {
    pub attempt: i32,
    pub duration_ms: i64,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: chrono::DateTime<chrono::Utc>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpOutcomeDetail {
    pub status: u16,
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PgOutcomeDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlstate: Option<String>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PyOutcomeDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_type: Option<String>,
}

/// The structured result of a single tool invocation, as produced by a
/// `ToolAdapter::execute` call and consumed by the policy evaluator.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
    pub meta: OutcomeMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpOutcomeDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pg: Option<PgOutcomeDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub py: Option<PyOutcomeDetail>,
}

impl Outcome {
    pub fn ok(result: serde_json::Value, meta: OutcomeMeta) -> Self {
        Self {
            status: OutcomeStatus::Ok,
            result: Some(result),
            error: None,
            meta,
            http: None,
            pg: None,
            py: None,
        }
    }

    pub fn error(error: OutcomeError, meta: OutcomeMeta) -> Self {
        Self {
            status: OutcomeStatus::Error,
            result: None,
            error: Some(error),
            meta,
            http: None,
            pg: None,
            py: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.status, OutcomeStatus::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> OutcomeMeta {
        OutcomeMeta {
            attempt: 1,
            duration_ms: 5,
            started_at: chrono::Utc::now(),
            ended_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn default_retryable_flags_transient_kinds() {
        assert!(ErrorKind::RateLimit.default_retryable());
        assert!(ErrorKind::Timeout.default_retryable());
        assert!(!ErrorKind::Validation.default_retryable());
        assert!(!ErrorKind::Auth.default_retryable());
    }

    #[test]
    fn outcome_ok_has_no_error() {
        let o = Outcome::ok(serde_json::json!({"a": 1}), meta());
        assert!(o.is_ok());
        assert!(o.error.is_none());
    }

    #[test]
    fn outcome_error_has_no_result() {
        let err = OutcomeError {
            kind: ErrorKind::Timeout,
            retryable: true,
            message: "timed out".into(),
            code: None,
            extras: Default::default(),
        };
        let o = Outcome::error(err, meta());
        assert!(!o.is_ok());
        assert!(o.result.is_none());
    }
}
